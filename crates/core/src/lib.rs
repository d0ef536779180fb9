//! # PIPA Core
//!
//! Consent-gated, audited access to patient records.
//!
//! The crate is built around [`AccessMediator`], which every read or write of patient data
//! passes through:
//! - [`classifier`] marks which record fields are personal health information
//! - [`consent`] tracks, per patient and purpose, whether consent is active
//! - [`policy`] maps staff roles to the purposes they may act for
//! - [`audit`] records one metadata-only entry per decision
//! - [`record`] and [`repositories`] hold the data itself, in memory or on disk
//!
//! **No API concerns**: HTTP servers, authentication and sessions are the caller's business.

pub mod audit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod consent;
pub mod constants;
pub mod error;
pub mod identity;
pub mod ids;
pub mod mediator;
pub mod policy;
pub mod record;
pub mod repositories;
pub mod validation;

pub use audit::{
    AccessContext, ActorDetails, AuditAction, AuditEntry, AuditEntryId, AuditEvent, AuditFilter,
    AuditLog, AuditQuery, AuditSink, MemoryAuditSink, ResourceType,
};
pub use classifier::{FieldClassifier, Sensitivity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use consent::{ConsentLedger, ConsentRecord, ConsentStore, MemoryConsentStore, WithdrawOutcome};
pub use error::{AccessError, AccessResult};
pub use identity::{Actor, ActorId, Purpose, Role};
pub use ids::{ConsentId, PatientId};
pub use mediator::{AccessMediator, Decision, DenialReason, Operation};
pub use policy::AccessPolicy;
pub use record::{FieldValues, MemoryRecordStore, PatientRecord, RecordStore};

pub use pipa_types::{FieldName, FieldSet, NonEmptyText};
