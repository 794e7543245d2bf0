//! Admission Controller
//!
//! The gate a submission passes before entering the routing pool:
//! field validation, duplicate suppression, then the account quota check.
//! Quota recording and lead insertion happen under one critical section so
//! the pair is never observably separated.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use lr_common::{EngineConfig, Lead, LeadStatus, QuotaUsage, RawSubmission, Result, RoutingError};

use crate::store::LeadStore;

/// Unambiguous uppercase alphabet for public reference codes.
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTVWXYZ23456789";

/// External identity/account collaborator supplying plan quotas.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn get_quota(&self, account_id: &str) -> Result<QuotaUsage>;

    /// Count one admitted lead against the current period.
    async fn record_intake(&self, account_id: &str) -> Result<()>;

    /// Roll back a recorded intake when the paired lead insert fails.
    async fn release_intake(&self, account_id: &str) -> Result<()>;
}

/// In-memory account service with fixed per-account limits.
/// Used by tests and the dev binary; production wires the real identity
/// service here.
pub struct FixedQuotaAccounts {
    accounts: DashMap<String, QuotaUsage>,
    default_limit: u32,
}

impl FixedQuotaAccounts {
    pub fn new(default_limit: u32) -> Self {
        Self {
            accounts: DashMap::new(),
            default_limit,
        }
    }

    pub fn set_limit(&self, account_id: &str, limit: u32) {
        self.accounts
            .entry(account_id.to_string())
            .and_modify(|q| q.limit = limit)
            .or_insert(QuotaUsage { limit, used: 0 });
    }
}

#[async_trait]
impl AccountService for FixedQuotaAccounts {
    async fn get_quota(&self, account_id: &str) -> Result<QuotaUsage> {
        Ok(*self
            .accounts
            .entry(account_id.to_string())
            .or_insert(QuotaUsage {
                limit: self.default_limit,
                used: 0,
            }))
    }

    async fn record_intake(&self, account_id: &str) -> Result<()> {
        self.accounts
            .entry(account_id.to_string())
            .and_modify(|q| q.used += 1)
            .or_insert(QuotaUsage {
                limit: self.default_limit,
                used: 1,
            });
        Ok(())
    }

    async fn release_intake(&self, account_id: &str) -> Result<()> {
        if let Some(mut entry) = self.accounts.get_mut(account_id) {
            entry.used = entry.used.saturating_sub(1);
        }
        Ok(())
    }
}

pub struct AdmissionController {
    leads: Arc<dyn LeadStore>,
    accounts: Arc<dyn AccountService>,
    config: EngineConfig,

    /// Serializes duplicate check + quota recording + lead insert.
    intake_lock: Mutex<()>,
}

impl AdmissionController {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        accounts: Arc<dyn AccountService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            leads,
            accounts,
            config,
            intake_lock: Mutex::new(()),
        }
    }

    /// Admit a raw submission into the routing pool.
    ///
    /// Checks apply in order: field validation, duplicate suppression
    /// within the cooldown window, account quota. On success the lead is
    /// persisted in `Submitted` with a collision-checked reference code.
    pub async fn admit(&self, submission: RawSubmission) -> Result<Lead> {
        validate(&submission)?;

        let contact_secret = hash_contact_secret(&submission.contact_email);
        let _guard = self.intake_lock.lock().await;

        let window_start = Utc::now() - self.config.duplicate_cooldown;
        if let Some(existing) = self
            .leads
            .find_open_submission(&contact_secret, &submission.service_tag, window_start)
            .await?
        {
            warn!(
                account_id = %submission.account_id,
                service_tag = %submission.service_tag,
                existing_reference = %existing.reference_code,
                "Duplicate submission suppressed"
            );
            return Err(RoutingError::DuplicateSubmission);
        }

        let quota = self.accounts.get_quota(&submission.account_id).await?;
        if quota.exhausted() {
            return Err(RoutingError::QuotaExceeded {
                account_id: submission.account_id,
            });
        }

        let reference_code = self.generate_reference_code().await?;
        let lead = Lead {
            id: Uuid::new_v4().to_string(),
            reference_code,
            contact_secret,
            account_id: submission.account_id.clone(),
            service_tag: submission.service_tag,
            region_tag: submission.region_tag,
            submitted_at: Utc::now(),
            status: LeadStatus::Submitted,
            assigned_professional_id: None,
            attempt_history: Vec::new(),
            offer_deadline: None,
        };

        // Quota recording and lead creation commit together: an insert
        // failure rolls the recorded intake back before the error surfaces.
        self.accounts.record_intake(&submission.account_id).await?;
        if let Err(e) = self.leads.insert(&lead).await {
            self.accounts.release_intake(&submission.account_id).await?;
            return Err(e);
        }

        metrics::counter!("leads_admitted_total").increment(1);
        info!(
            lead_id = %lead.id,
            reference_code = %lead.reference_code,
            service_tag = %lead.service_tag,
            region_tag = %lead.region_tag,
            "Lead admitted"
        );

        Ok(lead)
    }

    /// Generate a reference code, retrying on index collision.
    async fn generate_reference_code(&self) -> Result<String> {
        loop {
            let code = random_reference_code(self.config.reference_code_length);
            if !self.leads.reference_exists(&code).await? {
                return Ok(code);
            }
        }
    }
}

fn validate(submission: &RawSubmission) -> Result<()> {
    if submission.account_id.trim().is_empty() {
        return Err(RoutingError::invalid_submission("account id is required"));
    }
    let email = submission.contact_email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(RoutingError::invalid_submission(
            "a valid contact email is required",
        ));
    }
    if submission.service_tag.trim().is_empty() {
        return Err(RoutingError::invalid_submission("service tag is required"));
    }
    if submission.region_tag.trim().is_empty() {
        return Err(RoutingError::invalid_submission("region tag is required"));
    }
    Ok(())
}

/// Hex SHA-256 of the normalized contact email. Stored on the lead and
/// used for duplicate suppression and status lookup; the raw email is
/// never persisted by this engine.
pub fn hash_contact_secret(contact_email: &str) -> String {
    let normalized = contact_email.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

fn random_reference_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..REFERENCE_ALPHABET.len());
            REFERENCE_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLeadStore;

    fn submission(email: &str, service: &str) -> RawSubmission {
        RawSubmission {
            account_id: "acct-1".to_string(),
            contact_email: email.to_string(),
            service_tag: service.to_string(),
            region_tag: "uk".to_string(),
        }
    }

    fn controller(limit: u32) -> (AdmissionController, Arc<FixedQuotaAccounts>) {
        let accounts = Arc::new(FixedQuotaAccounts::new(limit));
        let controller = AdmissionController::new(
            Arc::new(InMemoryLeadStore::new()),
            accounts.clone(),
            EngineConfig::default(),
        );
        (controller, accounts)
    }

    #[tokio::test]
    async fn test_admit_creates_submitted_lead() {
        let (controller, accounts) = controller(10);
        let lead = controller
            .admit(submission("applicant@example.com", "visa-uk"))
            .await
            .unwrap();

        assert_eq!(lead.status, LeadStatus::Submitted);
        assert_eq!(lead.reference_code.len(), 10);
        assert_ne!(lead.contact_secret, "applicant@example.com");
        assert_eq!(accounts.get_quota("acct-1").await.unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_missing_fields_are_invalid() {
        let (controller, _) = controller(10);
        let err = controller
            .admit(submission("not-an-email", "visa-uk"))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidSubmission { .. }));

        let err = controller
            .admit(submission("applicant@example.com", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidSubmission { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_within_cooldown_leaves_quota_untouched() {
        let (controller, accounts) = controller(10);
        controller
            .admit(submission("applicant@example.com", "visa-uk"))
            .await
            .unwrap();

        let err = controller
            .admit(submission("Applicant@Example.com", "visa-uk"))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::DuplicateSubmission));
        assert_eq!(accounts.get_quota("acct-1").await.unwrap().used, 1);

        // Different service tag is not a duplicate
        controller
            .admit(submission("applicant@example.com", "visa-ca"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quota_exhaustion() {
        let (controller, _) = controller(1);
        controller
            .admit(submission("one@example.com", "visa-uk"))
            .await
            .unwrap();

        let err = controller
            .admit(submission("two@example.com", "visa-uk"))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_contact_secret_is_normalized() {
        assert_eq!(
            hash_contact_secret("  User@Example.COM "),
            hash_contact_secret("user@example.com")
        );
    }

    #[test]
    fn test_reference_code_alphabet() {
        let code = random_reference_code(12);
        assert_eq!(code.len(), 12);
        assert!(code.bytes().all(|b| REFERENCE_ALPHABET.contains(&b)));
    }
}
