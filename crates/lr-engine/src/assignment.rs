//! Assignment State Machine
//!
//! Sole writer of `Lead.status` and, through the registry slot methods, of
//! professional capacity counters. Every transition for a given lead runs
//! inside that lead's exclusive section, so a response racing a timeout
//! resolves deterministically: the first caller to acquire the section
//! wins, the loser observes the updated state and no-ops. Operations on
//! different leads proceed fully in parallel.
//!
//! Transitions: Submitted → Matched → {Accepted → Resolved | back to
//! Submitted on decline/expiry}; Submitted → Unmatched once the attempt
//! budget is spent; any non-terminal state → Withdrawn.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use lr_common::{
    AttemptOutcome, EngineConfig, Lead, LeadEvent, LeadEventKind, LeadStatus, Result,
    RoutingError, RoutingStats,
};

use crate::matcher;
use crate::registry::ProfessionalRegistry;
use crate::store::LeadStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct AssignmentEngine {
    leads: Arc<dyn LeadStore>,
    registry: Arc<ProfessionalRegistry>,
    config: EngineConfig,

    /// Per-lead exclusive sections. Keyed, not global: unrelated leads
    /// never contend.
    lead_locks: DashMap<String, Arc<Mutex<()>>>,

    /// Lifecycle event fan-out for the external notification dispatcher.
    events: broadcast::Sender<LeadEvent>,
}

impl AssignmentEngine {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        registry: Arc<ProfessionalRegistry>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            leads,
            registry,
            config,
            lead_locks: DashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeadEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ProfessionalRegistry> {
        &self.registry
    }

    fn lead_lock(&self, lead_id: &str) -> Arc<Mutex<()>> {
        self.lead_locks
            .entry(lead_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn emit(&self, kind: LeadEventKind, lead: &Lead) {
        // No subscribers is fine; events are best-effort fan-out.
        let _ = self.events.send(LeadEvent::new(kind, lead));
    }

    /// Drive a `Submitted` lead through one match attempt.
    ///
    /// Professionals already present in the attempt history are never
    /// offered the lead again, even if their capacity has since freed up.
    /// With no candidate the lead either stays `Submitted` for the next
    /// sweep or, once the attempt budget is spent, falls to `Unmatched`.
    pub async fn route(&self, lead_id: &str) -> Result<LeadStatus> {
        let lock = self.lead_lock(lead_id);
        let _guard = lock.lock().await;

        let mut lead = self
            .leads
            .get(lead_id)
            .await?
            .ok_or(RoutingError::NotFound)?;

        if lead.status != LeadStatus::Submitted {
            debug!(lead_id = %lead_id, status = ?lead.status, "Route skipped; lead not in submitted");
            return Ok(lead.status);
        }

        if lead.failed_attempts() >= self.config.max_match_attempts {
            lead.status = LeadStatus::Unmatched;
            self.leads.update(&lead).await?;

            metrics::counter!("leads_unmatched_total").increment(1);
            warn!(
                lead_id = %lead.id,
                attempts = lead.failed_attempts(),
                "Attempt budget exhausted; lead surfaced for manual routing"
            );
            self.emit(LeadEventKind::Unmatched, &lead);
            return Ok(LeadStatus::Unmatched);
        }

        // Exclude everyone the lead has already been offered to, plus any
        // candidate that filled up between the scan and the reservation.
        let mut excluding: HashSet<String> = lead
            .attempt_history
            .iter()
            .map(|a| a.professional_id.clone())
            .collect();

        loop {
            let candidates = self
                .registry
                .available_candidates(&lead.service_tag, &lead.region_tag, &excluding)
                .await?;

            let best = match matcher::find_best_match(&lead, &candidates, &self.config.match_weights)
            {
                Some(candidate) => candidate,
                None => {
                    debug!(lead_id = %lead.id, "No candidate available; holding in submitted");
                    return Ok(LeadStatus::Submitted);
                }
            };

            if !self
                .registry
                .try_reserve_slot(&best.professional_id)
                .await?
            {
                // Lost the slot to a concurrent assignment; re-score the rest.
                excluding.insert(best.professional_id);
                continue;
            }

            lead.status = LeadStatus::Matched;
            lead.assigned_professional_id = Some(best.professional_id.clone());
            lead.offer_deadline = Some(Utc::now() + self.config.response_deadline);
            lead.open_attempt(&best.professional_id);

            if let Err(e) = self.leads.update(&lead).await {
                // Keep the slot count consistent with the lead record.
                self.registry.release_slot(&best.professional_id).await?;
                return Err(e);
            }

            metrics::counter!("leads_matched_total").increment(1);
            info!(
                lead_id = %lead.id,
                professional_id = %best.professional_id,
                score = best.score,
                "Lead matched"
            );
            self.emit(LeadEventKind::Matched, &lead);
            return Ok(LeadStatus::Matched);
        }
    }

    /// Professional accepts the outstanding offer. A late accept (already
    /// declined, expired, or withdrawn) is a silent no-op.
    pub async fn accept(&self, lead_id: &str) -> Result<()> {
        let lock = self.lead_lock(lead_id);
        let _guard = lock.lock().await;

        let mut lead = self
            .leads
            .get(lead_id)
            .await?
            .ok_or(RoutingError::NotFound)?;

        if lead.status != LeadStatus::Matched {
            debug!(lead_id = %lead_id, status = ?lead.status, "Accept ignored; no outstanding offer");
            return Ok(());
        }

        let professional_id = assigned_or_invariant(&lead)?;
        if !lead.conclude_attempt(&professional_id, AttemptOutcome::Accepted) {
            return Err(missing_open_attempt(&lead, &professional_id));
        }
        lead.status = LeadStatus::Accepted;
        lead.offer_deadline = None;
        self.leads.update(&lead).await?;

        metrics::counter!("leads_accepted_total").increment(1);
        info!(lead_id = %lead.id, professional_id = %professional_id, "Offer accepted");
        self.emit(LeadEventKind::Accepted, &lead);
        Ok(())
    }

    /// Mark accepted work complete, releasing the professional's slot.
    pub async fn resolve(&self, lead_id: &str) -> Result<()> {
        let lock = self.lead_lock(lead_id);
        let _guard = lock.lock().await;

        let mut lead = self
            .leads
            .get(lead_id)
            .await?
            .ok_or(RoutingError::NotFound)?;

        if lead.status != LeadStatus::Accepted {
            debug!(lead_id = %lead_id, status = ?lead.status, "Resolve ignored; lead not accepted");
            return Ok(());
        }

        let professional_id = assigned_or_invariant(&lead)?;
        self.registry.release_slot(&professional_id).await?;

        lead.status = LeadStatus::Resolved;
        lead.offer_deadline = None;
        self.leads.update(&lead).await?;

        metrics::counter!("leads_resolved_total").increment(1);
        info!(lead_id = %lead.id, professional_id = %professional_id, "Lead resolved");
        self.emit(LeadEventKind::Resolved, &lead);
        Ok(())
    }

    /// Professional explicitly declines the outstanding offer. A repeat
    /// decline is a no-op, never a double slot release.
    pub async fn decline(&self, lead_id: &str) -> Result<LeadStatus> {
        self.fail_offer(lead_id, AttemptOutcome::Declined).await
    }

    /// Shared transition for explicit decline and deadline expiry: both
    /// release the slot, record the outcome, return the lead to
    /// `Submitted`, and immediately re-invoke the matcher with the
    /// departing professional excluded.
    async fn fail_offer(&self, lead_id: &str, outcome: AttemptOutcome) -> Result<LeadStatus> {
        {
            let lock = self.lead_lock(lead_id);
            let _guard = lock.lock().await;

            let mut lead = self
                .leads
                .get(lead_id)
                .await?
                .ok_or(RoutingError::NotFound)?;

            if lead.status != LeadStatus::Matched {
                debug!(lead_id = %lead_id, status = ?lead.status, "Offer failure ignored; no outstanding offer");
                return Ok(lead.status);
            }

            let professional_id = assigned_or_invariant(&lead)?;
            if !lead.conclude_attempt(&professional_id, outcome) {
                return Err(missing_open_attempt(&lead, &professional_id));
            }
            self.registry.release_slot(&professional_id).await?;

            lead.status = LeadStatus::Submitted;
            lead.assigned_professional_id = None;
            lead.offer_deadline = None;
            self.leads.update(&lead).await?;

            let (counter, event_kind) = match outcome {
                AttemptOutcome::Expired => ("leads_expired_total", LeadEventKind::Expired),
                _ => ("leads_declined_total", LeadEventKind::Declined),
            };
            metrics::counter!(counter).increment(1);
            info!(
                lead_id = %lead.id,
                professional_id = %professional_id,
                outcome = ?outcome,
                "Offer returned to pool"
            );

            // The assignment is already cleared; the event still names the
            // professional who let the offer go.
            let mut event = LeadEvent::new(event_kind, &lead);
            event.professional_id = Some(professional_id);
            let _ = self.events.send(event);
        }

        // Re-match outside the critical section; route() re-acquires it.
        self.route(lead_id).await
    }

    /// External cancellation; honored from any non-terminal state,
    /// releasing a held slot.
    pub async fn withdraw(&self, lead_id: &str) -> Result<()> {
        let lock = self.lead_lock(lead_id);
        let _guard = lock.lock().await;

        let mut lead = self
            .leads
            .get(lead_id)
            .await?
            .ok_or(RoutingError::NotFound)?;

        if lead.is_terminal() {
            debug!(lead_id = %lead_id, status = ?lead.status, "Withdraw ignored; lead already terminal");
            return Ok(());
        }

        if matches!(lead.status, LeadStatus::Matched | LeadStatus::Accepted) {
            let professional_id = assigned_or_invariant(&lead)?;
            self.registry.release_slot(&professional_id).await?;
        }

        lead.status = LeadStatus::Withdrawn;
        lead.assigned_professional_id = None;
        lead.offer_deadline = None;
        self.leads.update(&lead).await?;

        metrics::counter!("leads_withdrawn_total").increment(1);
        info!(lead_id = %lead.id, "Lead withdrawn");
        self.emit(LeadEventKind::Withdrawn, &lead);
        Ok(())
    }

    /// Apply the decline transition to every matched lead whose offer
    /// deadline has passed. Scheduled re-evaluation, not a blocking timer:
    /// an accept racing the sweep simply wins or loses the lead's section.
    pub async fn expire_overdue(&self) -> Result<usize> {
        let overdue = self.leads.find_matched_past_deadline(Utc::now()).await?;
        let mut expired = 0;
        for lead in overdue {
            // State may have moved since the scan; fail_offer no-ops then.
            self.fail_offer(&lead.id, AttemptOutcome::Expired).await?;
            expired += 1;
        }
        if expired > 0 {
            info!(count = expired, "Expired overdue offers");
        }
        Ok(expired)
    }

    /// Retry matching for every lead held in `Submitted`. Returns how many
    /// found a professional this pass.
    pub async fn rematch_submitted(&self) -> Result<usize> {
        let held = self.leads.find_submitted().await?;
        let mut matched = 0;
        for lead in held {
            if self.route(&lead.id).await? == LeadStatus::Matched {
                matched += 1;
            }
        }
        Ok(matched)
    }

    /// Aggregate routing snapshot for operators.
    pub async fn stats(&self) -> Result<RoutingStats> {
        let leads = self.leads.all().await?;
        let professionals = self.registry.all().await?;

        let count = |status: LeadStatus| leads.iter().filter(|l| l.status == status).count() as u64;

        Ok(RoutingStats {
            leads_submitted: count(LeadStatus::Submitted),
            leads_matched: count(LeadStatus::Matched),
            leads_accepted: count(LeadStatus::Accepted),
            leads_resolved: count(LeadStatus::Resolved),
            leads_unmatched: count(LeadStatus::Unmatched),
            leads_withdrawn: count(LeadStatus::Withdrawn),
            professionals_total: professionals.len() as u64,
            professionals_matchable: professionals.iter().filter(|p| p.is_matchable()).count()
                as u64,
            slots_in_use: professionals.iter().map(|p| p.active_count as u64).sum(),
            slots_total: professionals.iter().map(|p| p.capacity as u64).sum(),
        })
    }
}

/// A matched/accepted lead with no assigned professional is a corrupted
/// record; reject the operation rather than guessing.
fn assigned_or_invariant(lead: &Lead) -> Result<String> {
    lead.assigned_professional_id.clone().ok_or_else(|| {
        RoutingError::internal(format!(
            "lead {} is {:?} with no assigned professional",
            lead.id, lead.status
        ))
    })
}

fn missing_open_attempt(lead: &Lead, professional_id: &str) -> RoutingError {
    RoutingError::internal(format!(
        "lead {} has no open offer for professional {professional_id}",
        lead.id
    ))
}
