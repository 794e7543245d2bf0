//! Professional Registry
//!
//! Owns professional records, their verification state, and live capacity
//! counters. Candidate sets are recomputed on every call so they always
//! reflect current capacity; nothing here is cached. Capacity itself is
//! mutated only through `try_reserve_slot` / `release_slot`, which the
//! assignment engine calls from inside a lead's critical section.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn, error};
use uuid::Uuid;

use lr_common::{NewProfessional, Professional, Result, RoutingError, VerificationState};

use crate::store::ProfessionalStore;

pub struct ProfessionalRegistry {
    store: Arc<dyn ProfessionalStore>,

    /// Per-professional exclusive sections for capacity mutation.
    /// Keyed locks keep unrelated professionals fully parallel.
    slot_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProfessionalRegistry {
    pub fn new(store: Arc<dyn ProfessionalStore>) -> Self {
        Self {
            store,
            slot_locks: DashMap::new(),
        }
    }

    fn slot_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.slot_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Register a new professional. New registrations start in `Pending`
    /// until the external credential review completes.
    pub async fn register(&self, input: NewProfessional) -> Result<Professional> {
        if input.specializations.is_empty() {
            return Err(RoutingError::invalid_professional(
                "specialization set must not be empty",
            ));
        }
        if input.regions.is_empty() {
            return Err(RoutingError::invalid_professional(
                "region set must not be empty",
            ));
        }
        if input.capacity == 0 {
            return Err(RoutingError::invalid_professional(
                "capacity must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&input.response_rate_score) {
            return Err(RoutingError::invalid_professional(
                "response rate score must be within [0, 1]",
            ));
        }

        let professional = Professional {
            id: Uuid::new_v4().to_string(),
            display_name: input.display_name,
            specializations: input.specializations,
            regions: input.regions,
            verification: VerificationState::Pending,
            verified_at: None,
            capacity: input.capacity,
            active_count: 0,
            response_rate_score: input.response_rate_score,
            created_at: Utc::now(),
        };

        self.store.insert(&professional).await?;

        info!(
            professional_id = %professional.id,
            capacity = professional.capacity,
            "Professional registered"
        );

        Ok(professional)
    }

    /// Apply the outcome of an external credential review.
    ///
    /// Leaving `Verified` while leads are in flight does not unassign them;
    /// the professional simply stops receiving new offers.
    pub async fn set_verification(&self, id: &str, state: VerificationState) -> Result<()> {
        let lock = self.slot_lock(id);
        let _guard = lock.lock().await;

        let mut professional = self
            .store
            .get(id)
            .await?
            .ok_or(RoutingError::NotFound)?;

        if state == VerificationState::Verified && professional.verified_at.is_none() {
            professional.verified_at = Some(Utc::now());
        }

        if professional.verification == VerificationState::Verified
            && state != VerificationState::Verified
            && professional.active_count > 0
        {
            warn!(
                professional_id = %id,
                active_count = professional.active_count,
                new_state = ?state,
                "Professional leaving verified state with leads in flight; in-flight work completes"
            );
        }

        professional.verification = state;
        self.store.update(&professional).await?;

        info!(professional_id = %id, state = ?state, "Verification state updated");
        Ok(())
    }

    /// Verified professionals with open capacity whose tags cover the lead,
    /// minus the excluded set. Recomputed per call.
    pub async fn available_candidates(
        &self,
        service_tag: &str,
        region_tag: &str,
        excluding: &HashSet<String>,
    ) -> Result<Vec<Professional>> {
        Ok(self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|p| {
                p.is_matchable() && p.serves(service_tag, region_tag) && !excluding.contains(&p.id)
            })
            .collect())
    }

    /// Try to claim one capacity slot. Returns `false` when the
    /// professional is no longer matchable (filled up or lost verification
    /// since the candidate scan).
    pub async fn try_reserve_slot(&self, id: &str) -> Result<bool> {
        let lock = self.slot_lock(id);
        let _guard = lock.lock().await;

        let mut professional = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| RoutingError::internal(format!("professional {id} vanished")))?;

        if !professional.is_matchable() {
            return Ok(false);
        }

        professional.active_count += 1;
        self.store.update(&professional).await?;

        metrics::gauge!("registry_slots_in_use").increment(1.0);
        Ok(true)
    }

    /// Release one capacity slot. Releasing a zero counter is an invariant
    /// violation: it is logged and rejected, never silently corrected.
    pub async fn release_slot(&self, id: &str) -> Result<()> {
        let lock = self.slot_lock(id);
        let _guard = lock.lock().await;

        let mut professional = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| RoutingError::internal(format!("professional {id} vanished")))?;

        if professional.active_count == 0 {
            error!(
                professional_id = %id,
                "Attempted to release a slot on a zero active count"
            );
            return Err(RoutingError::internal(format!(
                "double slot release for professional {id}"
            )));
        }

        professional.active_count -= 1;
        self.store.update(&professional).await?;

        metrics::gauge!("registry_slots_in_use").decrement(1.0);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Professional>> {
        self.store.get(id).await
    }

    pub async fn all(&self) -> Result<Vec<Professional>> {
        self.store.all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryProfessionalStore;
    use std::collections::BTreeSet;

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn registry() -> ProfessionalRegistry {
        ProfessionalRegistry::new(Arc::new(InMemoryProfessionalStore::new()))
    }

    fn new_professional(capacity: u32) -> NewProfessional {
        NewProfessional {
            display_name: "Jordan Avery".to_string(),
            specializations: tags(&["visa-uk"]),
            regions: tags(&["uk"]),
            capacity,
            response_rate_score: 0.8,
        }
    }

    #[tokio::test]
    async fn test_register_rejects_empty_specializations() {
        let registry = registry();
        let mut input = new_professional(2);
        input.specializations.clear();
        let err = registry.register(input).await.unwrap_err();
        assert!(matches!(err, RoutingError::InvalidProfessional { .. }));
    }

    #[tokio::test]
    async fn test_register_rejects_zero_capacity() {
        let registry = registry();
        let err = registry.register(new_professional(0)).await.unwrap_err();
        assert!(matches!(err, RoutingError::InvalidProfessional { .. }));
    }

    #[tokio::test]
    async fn test_unverified_professionals_are_not_candidates() {
        let registry = registry();
        let p = registry.register(new_professional(2)).await.unwrap();

        let candidates = registry
            .available_candidates("visa-uk", "uk", &HashSet::new())
            .await
            .unwrap();
        assert!(candidates.is_empty());

        registry
            .set_verification(&p.id, VerificationState::Verified)
            .await
            .unwrap();

        let candidates = registry
            .available_candidates("visa-uk", "uk", &HashSet::new())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].verified_at.is_some());
    }

    #[tokio::test]
    async fn test_reserve_respects_capacity() {
        let registry = registry();
        let p = registry.register(new_professional(1)).await.unwrap();
        registry
            .set_verification(&p.id, VerificationState::Verified)
            .await
            .unwrap();

        assert!(registry.try_reserve_slot(&p.id).await.unwrap());
        assert!(!registry.try_reserve_slot(&p.id).await.unwrap());

        registry.release_slot(&p.id).await.unwrap();
        assert!(registry.try_reserve_slot(&p.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_double_release_is_rejected() {
        let registry = registry();
        let p = registry.register(new_professional(1)).await.unwrap();
        registry
            .set_verification(&p.id, VerificationState::Verified)
            .await
            .unwrap();

        assert!(registry.try_reserve_slot(&p.id).await.unwrap());
        registry.release_slot(&p.id).await.unwrap();

        let err = registry.release_slot(&p.id).await.unwrap_err();
        assert!(matches!(err, RoutingError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_suspension_blocks_new_matches_but_keeps_slots() {
        let registry = registry();
        let p = registry.register(new_professional(2)).await.unwrap();
        registry
            .set_verification(&p.id, VerificationState::Verified)
            .await
            .unwrap();
        assert!(registry.try_reserve_slot(&p.id).await.unwrap());

        registry
            .set_verification(&p.id, VerificationState::Suspended)
            .await
            .unwrap();

        // No new matches while suspended
        assert!(!registry.try_reserve_slot(&p.id).await.unwrap());

        // In-flight work still completes
        let current = registry.get(&p.id).await.unwrap().unwrap();
        assert_eq!(current.active_count, 1);
        registry.release_slot(&p.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_exceed_capacity() {
        let registry = Arc::new(registry());
        let p = registry.register(new_professional(3)).await.unwrap();
        registry
            .set_verification(&p.id, VerificationState::Verified)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let id = p.id.clone();
            handles.push(tokio::spawn(
                async move { registry.try_reserve_slot(&id).await },
            ));
        }

        let mut reserved = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                reserved += 1;
            }
        }

        assert_eq!(reserved, 3);
        let current = registry.get(&p.id).await.unwrap().unwrap();
        assert_eq!(current.active_count, 3);
    }
}
