//! Status Directory
//!
//! Public status lookup by reference code plus contact secret. Read-only,
//! and deliberately blind: a wrong secret and an unknown code produce the
//! identical `NotFound`, so the surface cannot be used to enumerate codes.
//! Internal ids never leave this module; the view carries the assigned
//! professional's display name only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lr_common::{LeadStatus, Result, RoutingError};

use crate::admission::hash_contact_secret;
use crate::store::{LeadStore, ProfessionalStore};

/// What the public status page renders. No internal identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadStatusView {
    pub reference_code: String,
    pub status: LeadStatus,
    pub submitted_at: DateTime<Utc>,
    pub attempt_count: usize,
    pub professional_name: Option<String>,
}

pub struct StatusDirectory {
    leads: Arc<dyn LeadStore>,
    professionals: Arc<dyn ProfessionalStore>,
}

impl StatusDirectory {
    pub fn new(leads: Arc<dyn LeadStore>, professionals: Arc<dyn ProfessionalStore>) -> Self {
        Self {
            leads,
            professionals,
        }
    }

    pub async fn lookup(
        &self,
        reference_code: &str,
        contact_email_candidate: &str,
    ) -> Result<LeadStatusView> {
        let lead = match self.leads.find_by_reference(reference_code).await? {
            Some(lead) => lead,
            None => {
                debug!(reference_code = %reference_code, "Status lookup missed");
                return Err(RoutingError::NotFound);
            }
        };

        if hash_contact_secret(contact_email_candidate) != lead.contact_secret {
            // Same error as an unknown code.
            debug!(reference_code = %reference_code, "Status lookup secret mismatch");
            return Err(RoutingError::NotFound);
        }

        let professional_name = match &lead.assigned_professional_id {
            Some(id) => self
                .professionals
                .get(id)
                .await?
                .map(|p| p.display_name),
            None => None,
        };

        Ok(LeadStatusView {
            reference_code: lead.reference_code,
            status: lead.status,
            submitted_at: lead.submitted_at,
            attempt_count: lead.attempt_history.len(),
            professional_name,
        })
    }
}
