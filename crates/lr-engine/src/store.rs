//! Injectable persistence seam
//!
//! The engine never talks to a database directly; it goes through these
//! traits. Tests and the dev binary inject the in-memory implementations,
//! production injects persistent ones. Logical layout is two collections:
//! `professionals` keyed by id, `leads` keyed by id with a unique secondary
//! index on `reference_code`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use lr_common::{Lead, Professional, Result, RoutingError};

#[async_trait]
pub trait ProfessionalStore: Send + Sync {
    async fn insert(&self, professional: &Professional) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Professional>>;
    async fn update(&self, professional: &Professional) -> Result<()>;
    async fn all(&self) -> Result<Vec<Professional>>;
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert(&self, lead: &Lead) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Lead>>;
    async fn update(&self, lead: &Lead) -> Result<()>;
    async fn find_by_reference(&self, reference_code: &str) -> Result<Option<Lead>>;
    async fn reference_exists(&self, reference_code: &str) -> Result<bool>;

    /// Most recent non-terminal lead for the same contact and service
    /// submitted at or after `since`. Drives duplicate suppression.
    async fn find_open_submission(
        &self,
        contact_secret: &str,
        service_tag: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Lead>>;

    /// Leads currently held in `Submitted`, awaiting a match sweep.
    async fn find_submitted(&self) -> Result<Vec<Lead>>;

    /// Matched leads whose offer deadline has passed.
    async fn find_matched_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Lead>>;

    async fn all(&self) -> Result<Vec<Lead>>;
}

/// In-memory professional store backed by a DashMap.
#[derive(Default)]
pub struct InMemoryProfessionalStore {
    professionals: DashMap<String, Professional>,
}

impl InMemoryProfessionalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfessionalStore for InMemoryProfessionalStore {
    async fn insert(&self, professional: &Professional) -> Result<()> {
        if self.professionals.contains_key(&professional.id) {
            return Err(RoutingError::internal(format!(
                "professional {} already exists",
                professional.id
            )));
        }
        self.professionals
            .insert(professional.id.clone(), professional.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Professional>> {
        Ok(self.professionals.get(id).map(|e| e.value().clone()))
    }

    async fn update(&self, professional: &Professional) -> Result<()> {
        match self.professionals.get_mut(&professional.id) {
            Some(mut entry) => {
                *entry.value_mut() = professional.clone();
                Ok(())
            }
            None => Err(RoutingError::internal(format!(
                "professional {} not found for update",
                professional.id
            ))),
        }
    }

    async fn all(&self) -> Result<Vec<Professional>> {
        Ok(self
            .professionals
            .iter()
            .map(|e| e.value().clone())
            .collect())
    }
}

/// In-memory lead store with a reference-code secondary index.
#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: DashMap<String, Lead>,
    by_reference: DashMap<String, String>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn insert(&self, lead: &Lead) -> Result<()> {
        if self.leads.contains_key(&lead.id) {
            return Err(RoutingError::internal(format!(
                "lead {} already exists",
                lead.id
            )));
        }
        if self.by_reference.contains_key(&lead.reference_code) {
            return Err(RoutingError::internal(format!(
                "reference code {} already in use",
                lead.reference_code
            )));
        }
        self.by_reference
            .insert(lead.reference_code.clone(), lead.id.clone());
        self.leads.insert(lead.id.clone(), lead.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Lead>> {
        Ok(self.leads.get(id).map(|e| e.value().clone()))
    }

    async fn update(&self, lead: &Lead) -> Result<()> {
        match self.leads.get_mut(&lead.id) {
            Some(mut entry) => {
                *entry.value_mut() = lead.clone();
                Ok(())
            }
            None => Err(RoutingError::internal(format!(
                "lead {} not found for update",
                lead.id
            ))),
        }
    }

    async fn find_by_reference(&self, reference_code: &str) -> Result<Option<Lead>> {
        let id = match self.by_reference.get(reference_code) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        self.get(&id).await
    }

    async fn reference_exists(&self, reference_code: &str) -> Result<bool> {
        Ok(self.by_reference.contains_key(reference_code))
    }

    async fn find_open_submission(
        &self,
        contact_secret: &str,
        service_tag: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Lead>> {
        Ok(self
            .leads
            .iter()
            .map(|e| e.value().clone())
            .filter(|l| {
                l.contact_secret == contact_secret
                    && l.service_tag == service_tag
                    && !l.is_terminal()
                    && l.submitted_at >= since
            })
            .max_by_key(|l| l.submitted_at))
    }

    async fn find_submitted(&self) -> Result<Vec<Lead>> {
        Ok(self
            .leads
            .iter()
            .map(|e| e.value().clone())
            .filter(|l| l.status == lr_common::LeadStatus::Submitted)
            .collect())
    }

    async fn find_matched_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Lead>> {
        Ok(self
            .leads
            .iter()
            .map(|e| e.value().clone())
            .filter(|l| {
                l.status == lr_common::LeadStatus::Matched
                    && l.offer_deadline.map(|d| d <= now).unwrap_or(false)
            })
            .collect())
    }

    async fn all(&self) -> Result<Vec<Lead>> {
        Ok(self.leads.iter().map(|e| e.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lr_common::LeadStatus;

    fn lead(id: &str, reference: &str) -> Lead {
        Lead {
            id: id.to_string(),
            reference_code: reference.to_string(),
            contact_secret: "secret".to_string(),
            account_id: "acct".to_string(),
            service_tag: "visa-uk".to_string(),
            region_tag: "uk".to_string(),
            submitted_at: Utc::now(),
            status: LeadStatus::Submitted,
            assigned_professional_id: None,
            attempt_history: Vec::new(),
            offer_deadline: None,
        }
    }

    #[tokio::test]
    async fn test_reference_index_is_unique() {
        let store = InMemoryLeadStore::new();
        store.insert(&lead("l1", "REF1")).await.unwrap();
        assert!(store.insert(&lead("l2", "REF1")).await.is_err());
        assert!(store.reference_exists("REF1").await.unwrap());
        assert!(!store.reference_exists("REF2").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_reference() {
        let store = InMemoryLeadStore::new();
        store.insert(&lead("l1", "REF1")).await.unwrap();
        let found = store.find_by_reference("REF1").await.unwrap().unwrap();
        assert_eq!(found.id, "l1");
        assert!(store.find_by_reference("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_open_submission_skips_terminal() {
        let store = InMemoryLeadStore::new();
        let mut resolved = lead("l1", "REF1");
        resolved.status = LeadStatus::Resolved;
        store.insert(&resolved).await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        assert!(store
            .find_open_submission("secret", "visa-uk", since)
            .await
            .unwrap()
            .is_none());

        store.insert(&lead("l2", "REF2")).await.unwrap();
        let open = store
            .find_open_submission("secret", "visa-uk", since)
            .await
            .unwrap();
        assert_eq!(open.unwrap().id, "l2");
    }
}
