//! LeadRouter Development Monolith
//!
//! All-in-one binary for local development containing:
//! - An in-memory routing engine (registry, admission, assignment)
//! - Background expiry/re-match sweeps
//! - Seeded professionals and a demo submission driven end to end
//! - Lifecycle event logging (stand-in for the notification dispatcher)

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lr_common::{EngineConfig, NewProfessional, RawSubmission, VerificationState};
use lr_engine::{
    AdmissionController, AssignmentEngine, FixedQuotaAccounts, InMemoryLeadStore,
    InMemoryProfessionalStore, LifecycleConfig, ProfessionalRegistry, RoutingLifecycle,
    StatusDirectory,
};

/// LeadRouter Development Server
#[derive(Parser, Debug)]
#[command(name = "lr-dev")]
#[command(about = "LeadRouter Development Monolith - routing engine with seeded data")]
struct Args {
    /// Offer expiry sweep interval in seconds
    #[arg(long, env = "LR_EXPIRY_SWEEP_SECS", default_value = "15")]
    expiry_sweep_secs: u64,

    /// Re-match sweep interval in seconds
    #[arg(long, env = "LR_REMATCH_SECS", default_value = "30")]
    rematch_secs: u64,

    /// Stats report interval in seconds
    #[arg(long, env = "LR_STATS_SECS", default_value = "60")]
    stats_secs: u64,

    /// Per-account monthly intake limit for the stub account service
    #[arg(long, env = "LR_QUOTA_LIMIT", default_value = "50")]
    quota_limit: u32,
}

fn tags(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting LeadRouter development monolith");

    let leads = Arc::new(InMemoryLeadStore::new());
    let professionals = Arc::new(InMemoryProfessionalStore::new());
    let registry = Arc::new(ProfessionalRegistry::new(professionals.clone()));
    let accounts = Arc::new(FixedQuotaAccounts::new(args.quota_limit));
    let config = EngineConfig::default();

    let admission = AdmissionController::new(leads.clone(), accounts, config.clone());
    let engine = Arc::new(AssignmentEngine::new(leads.clone(), registry.clone(), config));
    let directory = StatusDirectory::new(leads, professionals);

    // Log lifecycle events as a stand-in for the notification dispatcher
    {
        let mut events = engine.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                info!(
                    kind = ?event.kind,
                    reference_code = %event.reference_code,
                    "Lifecycle event"
                );
            }
        });
    }

    seed_professionals(&registry).await?;

    let lifecycle = RoutingLifecycle::start(
        engine.clone(),
        LifecycleConfig {
            expiry_sweep_interval: Duration::from_secs(args.expiry_sweep_secs),
            rematch_interval: Duration::from_secs(args.rematch_secs),
            stats_report_interval: Duration::from_secs(args.stats_secs),
        },
    );

    // Drive one demo submission through the pipeline
    let lead = admission
        .admit(RawSubmission {
            account_id: "dev-account".to_string(),
            contact_email: "applicant@example.com".to_string(),
            service_tag: "visa-uk".to_string(),
            region_tag: "uk".to_string(),
        })
        .await?;
    info!(reference_code = %lead.reference_code, "Demo lead admitted");

    let status = engine.route(&lead.id).await?;
    info!(status = ?status, "Demo lead routed");

    match directory
        .lookup(&lead.reference_code, "applicant@example.com")
        .await
    {
        Ok(view) => info!(
            status = ?view.status,
            professional = view.professional_name.as_deref().unwrap_or("-"),
            "Demo status lookup"
        ),
        Err(e) => warn!(error = %e, "Demo status lookup failed"),
    }

    info!("Engine running; press Ctrl+C to stop");
    signal::ctrl_c().await?;

    lifecycle.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn seed_professionals(registry: &ProfessionalRegistry) -> Result<()> {
    let seeds = [
        ("Amara Osei", &["visa-uk", "visa-ie"][..], &["uk", "ie"][..], 3, 0.92),
        ("Piotr Nowak", &["visa-uk"][..], &["uk"][..], 2, 0.78),
        ("Leila Haddad", &["visa-ca", "visa-us"][..], &["ca", "us"][..], 4, 0.85),
    ];

    for (name, specs, regions, capacity, rate) in seeds {
        let p = registry
            .register(NewProfessional {
                display_name: name.to_string(),
                specializations: tags(specs),
                regions: tags(regions),
                capacity,
                response_rate_score: rate,
            })
            .await?;
        registry
            .set_verification(&p.id, VerificationState::Verified)
            .await?;
    }

    info!("Seeded verified professionals");
    Ok(())
}
