//! LeadRouter Routing & Verification Engine
//!
//! This crate provides the core lead routing functionality with:
//! - ProfessionalRegistry: verified professionals, specialization tags, live capacity
//! - AdmissionController: duplicate suppression, quota checks, lead intake
//! - matcher: pure compatibility scoring with deterministic tie-breaks
//! - AssignmentEngine: per-lead serialized lifecycle state machine
//! - StatusDirectory: public status lookup by reference code, no internal ids
//! - RoutingLifecycle: background expiry/re-match sweeps and stats reports
//!
//! Persistence and the account/identity service are injected behind traits;
//! see `store::LeadStore`, `store::ProfessionalStore`, and
//! `admission::AccountService`.

pub mod admission;
pub mod assignment;
pub mod directory;
pub mod lifecycle;
pub mod matcher;
pub mod registry;
pub mod store;

pub use admission::{AccountService, AdmissionController, FixedQuotaAccounts};
pub use assignment::AssignmentEngine;
pub use directory::{LeadStatusView, StatusDirectory};
pub use lifecycle::{LifecycleConfig, RoutingLifecycle};
pub use registry::ProfessionalRegistry;
pub use store::{InMemoryLeadStore, InMemoryProfessionalStore, LeadStore, ProfessionalStore};

pub use lr_common::{Result, RoutingError};
