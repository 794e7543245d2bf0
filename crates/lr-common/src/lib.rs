use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Professional Types
// ============================================================================

/// Credential review state for a professional.
///
/// Only `Verified` professionals are eligible for new matches. Leaving
/// `Verified` never force-unassigns in-flight leads; it only blocks new
/// offers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationState {
    Unverified,
    Pending,
    Verified,
    Suspended,
}

/// A service provider eligible to receive leads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Professional {
    pub id: String,
    pub display_name: String,
    /// Specialization tags (e.g. visa types) used for compatibility scoring
    pub specializations: BTreeSet<String>,
    /// Region / visa-corridor tags this professional serves
    pub regions: BTreeSet<String>,
    pub verification: VerificationState,
    /// Set on the first transition into `Verified`; used as a seniority
    /// tie-break by the matcher
    pub verified_at: Option<DateTime<Utc>>,
    /// Maximum concurrent active leads
    pub capacity: u32,
    /// Current active leads; mutated only through the assignment engine
    pub active_count: u32,
    /// Historical accept rate in [0, 1]
    pub response_rate_score: f64,
    pub created_at: DateTime<Utc>,
}

impl Professional {
    pub fn is_matchable(&self) -> bool {
        self.verification == VerificationState::Verified && self.active_count < self.capacity
    }

    pub fn serves(&self, service_tag: &str, region_tag: &str) -> bool {
        self.specializations.contains(service_tag) && self.regions.contains(region_tag)
    }
}

/// Registration input for a new professional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfessional {
    pub display_name: String,
    pub specializations: BTreeSet<String>,
    pub regions: BTreeSet<String>,
    pub capacity: u32,
    pub response_rate_score: f64,
}

// ============================================================================
// Lead Types
// ============================================================================

/// Lifecycle state of a lead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LeadStatus {
    /// Admitted, awaiting a match
    Submitted,
    /// Offered to a professional, awaiting their response
    Matched,
    /// Professional accepted, work in progress
    Accepted,
    /// Terminal success
    Resolved,
    /// Terminal: automation exhausted, surfaced to operators
    Unmatched,
    /// Terminal: externally cancelled
    Withdrawn,
}

impl LeadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Unmatched | Self::Withdrawn)
    }
}

/// Outcome of one offer of a lead to one professional.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Offer made, response pending
    Offered,
    Accepted,
    Declined,
    /// Response deadline elapsed; routed identically to Declined
    Expired,
}

/// One entry in a lead's attempt history: one offer to one professional.
/// A record's outcome moves from `Offered` to its final value when the
/// professional responds or the deadline lapses; completed records are
/// never touched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub professional_id: String,
    pub outcome: AttemptOutcome,
    pub offered_at: DateTime<Utc>,
    pub concluded_at: Option<DateTime<Utc>>,
}

/// One applicant service request moving through the routing lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    /// Public, unguessable identifier for status lookup
    pub reference_code: String,
    /// Hex-encoded SHA-256 of the submitter's contact email
    pub contact_secret: String,
    /// External account the submission is billed against
    pub account_id: String,
    pub service_tag: String,
    pub region_tag: String,
    pub submitted_at: DateTime<Utc>,
    pub status: LeadStatus,
    pub assigned_professional_id: Option<String>,
    /// Append-only; never contains the same professional twice
    pub attempt_history: Vec<AttemptRecord>,
    /// Response deadline for the outstanding offer, if any
    pub offer_deadline: Option<DateTime<Utc>>,
}

impl Lead {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this professional already appears in the attempt history.
    /// Such a professional is never offered this lead again.
    pub fn has_attempted(&self, professional_id: &str) -> bool {
        self.attempt_history
            .iter()
            .any(|a| a.professional_id == professional_id)
    }

    /// Completed offer cycles that ended in decline or expiry.
    pub fn failed_attempts(&self) -> usize {
        self.attempt_history
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Declined | AttemptOutcome::Expired))
            .count()
    }

    /// Record a fresh offer. One record per professional, ever.
    pub fn open_attempt(&mut self, professional_id: &str) {
        self.attempt_history.push(AttemptRecord {
            professional_id: professional_id.to_string(),
            outcome: AttemptOutcome::Offered,
            offered_at: Utc::now(),
            concluded_at: None,
        });
    }

    /// Settle the open offer for this professional. Returns `false` when
    /// no such open record exists, which callers treat as a corrupted
    /// lead rather than guessing.
    pub fn conclude_attempt(&mut self, professional_id: &str, outcome: AttemptOutcome) -> bool {
        match self.attempt_history.iter_mut().rev().find(|a| {
            a.professional_id == professional_id && a.outcome == AttemptOutcome::Offered
        }) {
            Some(record) => {
                record.outcome = outcome;
                record.concluded_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }
}

/// Raw intake payload, validated at the admission boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSubmission {
    pub account_id: String,
    pub contact_email: String,
    pub service_tag: String,
    pub region_tag: String,
}

// ============================================================================
// Matching Types
// ============================================================================

/// Ephemeral scored pairing of one lead to one professional.
/// Produced by the matcher, consumed immediately by the assignment engine.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub professional_id: String,
    pub score: f64,
    pub active_count: u32,
    pub verified_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Account / Quota Types
// ============================================================================

/// Current-period intake allotment for a submitter account,
/// supplied by the external identity/account service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub limit: u32,
    pub used: u32,
}

impl QuotaUsage {
    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// Lifecycle facts emitted for the external notification dispatcher.
/// The engine never sends messages itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LeadEventKind {
    Matched,
    Declined,
    Expired,
    Accepted,
    Resolved,
    Unmatched,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadEvent {
    pub kind: LeadEventKind,
    pub lead_id: String,
    pub reference_code: String,
    pub professional_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl LeadEvent {
    pub fn new(kind: LeadEventKind, lead: &Lead) -> Self {
        Self {
            kind,
            lead_id: lead.id.clone(),
            reference_code: lead.reference_code.clone(),
            professional_id: lead.assigned_professional_id.clone(),
            at: Utc::now(),
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Compatibility-score weights. Kept configurable; the defaults follow the
/// current routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchWeights {
    pub specialization_overlap: f64,
    pub region_exact: f64,
    pub response_rate: f64,
    pub load_penalty: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            specialization_overlap: 2.0,
            region_exact: 1.0,
            response_rate: 1.0,
            load_penalty: 0.1,
        }
    }
}

/// Engine-wide routing configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub match_weights: MatchWeights,
    /// Failed offer cycles before a lead falls to Unmatched
    pub max_match_attempts: usize,
    /// How long a professional has to respond to an offer
    pub response_deadline: Duration,
    /// Window within which a repeat (contact, service) submission is a duplicate
    pub duplicate_cooldown: Duration,
    /// Length of generated public reference codes
    pub reference_code_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_weights: MatchWeights::default(),
            max_match_attempts: 3,
            response_deadline: Duration::hours(24),
            duplicate_cooldown: Duration::hours(24),
            reference_code_length: 10,
        }
    }
}

// ============================================================================
// Stats Types
// ============================================================================

/// Aggregate routing snapshot for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingStats {
    pub leads_submitted: u64,
    pub leads_matched: u64,
    pub leads_accepted: u64,
    pub leads_resolved: u64,
    pub leads_unmatched: u64,
    pub leads_withdrawn: u64,
    pub professionals_total: u64,
    pub professionals_matchable: u64,
    pub slots_in_use: u64,
    pub slots_total: u64,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Invalid submission: {message}")]
    InvalidSubmission { message: String },

    #[error("Duplicate submission for this contact and service within the cooldown window")]
    DuplicateSubmission,

    #[error("Intake quota exhausted for account {account_id}")]
    QuotaExceeded { account_id: String },

    /// Deliberately carries no detail: an unknown reference code and a wrong
    /// secret must be indistinguishable to the caller.
    #[error("Not found")]
    NotFound,

    #[error("Invalid professional: {message}")]
    InvalidProfessional { message: String },

    #[error("Account service error: {message}")]
    AccountService { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RoutingError {
    pub fn invalid_submission(message: impl Into<String>) -> Self {
        Self::InvalidSubmission {
            message: message.into(),
        }
    }

    pub fn invalid_professional(message: impl Into<String>) -> Self {
        Self::InvalidProfessional {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RoutingError>;
