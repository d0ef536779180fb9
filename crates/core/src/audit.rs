//! Audit trail of access decisions and consent changes.
//!
//! Entries are metadata only: who acted, on which resource, for what purpose, and the *names*
//! of the fields involved. Field names are typed as [`FieldName`], so record values (free text,
//! numbers, JSON) cannot be placed where a name belongs.
//!
//! Appending ([`AuditSink`]) and reading back ([`AuditQuery`]) are separate traits. Neither
//! offers update or delete; querying is a privileged operation for compliance review.

use crate::error::{AccessError, AccessResult};
use crate::identity::{Actor, ActorId, Purpose, Role};
use crate::ids::PatientId;
use crate::mediator::DenialReason;
use crate::validation::{parse_ip_address, sanitise_user_agent};
use chrono::{DateTime, Utc};
use pipa_types::{FieldName, FieldSet, NonEmptyText};
use pipa_uuid::{TimestampId, TimestampIdGenerator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;

/// Identifier of a stored audit entry; sorts in append order.
pub type AuditEntryId = TimestampId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PatientAccess,
    PatientUpdate,
    AccessDenied,
    ConsentGranted,
    ConsentWithdrawn,
}

impl AuditAction {
    pub const ALL: [AuditAction; 5] = [
        AuditAction::PatientAccess,
        AuditAction::PatientUpdate,
        AuditAction::AccessDenied,
        AuditAction::ConsentGranted,
        AuditAction::ConsentWithdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PatientAccess => "PATIENT_ACCESS",
            AuditAction::PatientUpdate => "PATIENT_UPDATE",
            AuditAction::AccessDenied => "ACCESS_DENIED",
            AuditAction::ConsentGranted => "CONSENT_GRANTED",
            AuditAction::ConsentWithdrawn => "CONSENT_WITHDRAWN",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = AccessError;

    fn from_str(s: &str) -> AccessResult<Self> {
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AccessError::InvalidInput(format!("unknown audit action '{s}'")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Patient,
    Consent,
}

/// Request metadata recorded alongside an access, when the caller knows it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AccessContext {
    /// Builds a context from raw header-like strings.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidInput`] if `ip_address` is not an IPv4/IPv6 address.
    pub fn parse(ip_address: Option<&str>, user_agent: Option<&str>) -> AccessResult<Self> {
        Ok(Self {
            ip_address: ip_address.map(parse_ip_address).transpose()?,
            user_agent: user_agent.and_then(sanitise_user_agent),
        })
    }
}

/// Who the acting staff member is, beyond their id. Consent grants and withdrawals carry only
/// the id, so every part is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDetails {
    #[serde(rename = "actor_role", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "actor_name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<NonEmptyText>,
    #[serde(rename = "actor_email", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<NonEmptyText>,
    #[serde(rename = "actor_department", default, skip_serializing_if = "Option::is_none")]
    pub department: Option<NonEmptyText>,
}

impl From<&Actor> for ActorDetails {
    fn from(actor: &Actor) -> Self {
        Self {
            role: Some(actor.role),
            name: actor.name.clone(),
            email: actor.email.clone(),
            department: actor.department.clone(),
        }
    }
}

/// An audit event as emitted, before the sink assigns it an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub actor_id: ActorId,
    #[serde(flatten)]
    pub actor: ActorDetails,
    /// The patient concerned, also for consent entries whose resource is the consent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,
    #[serde(default)]
    pub fields_accessed: Vec<FieldName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
    #[serde(flatten)]
    pub context: AccessContext,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: impl fmt::Display,
        actor_id: &ActorId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            resource_type,
            resource_id: resource_id.to_string(),
            actor_id: actor_id.clone(),
            actor: ActorDetails::default(),
            patient_id: None,
            purpose: None,
            fields_accessed: Vec::new(),
            denial_reason: None,
            context: AccessContext::default(),
            timestamp,
        }
    }

    pub fn actor(mut self, actor: &Actor) -> Self {
        self.actor = ActorDetails::from(actor);
        self
    }

    pub fn patient(mut self, patient_id: &PatientId) -> Self {
        self.patient_id = Some(patient_id.clone());
        self
    }

    pub fn purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn fields(mut self, fields: &FieldSet) -> Self {
        self.fields_accessed = fields.iter().cloned().collect();
        self
    }

    pub fn denial(mut self, reason: DenialReason) -> Self {
        self.denial_reason = Some(reason);
        self
    }

    pub fn context(mut self, context: &AccessContext) -> Self {
        self.context = context.clone();
        self
    }
}

/// A stored audit entry. Entries are never modified after they are appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    id: AuditEntryId,
    #[serde(flatten)]
    event: AuditEvent,
}

impl AuditEntry {
    pub(crate) fn new(id: AuditEntryId, event: AuditEvent) -> Self {
        Self { id, event }
    }

    pub fn id(&self) -> &AuditEntryId {
        &self.id
    }

    pub fn event(&self) -> &AuditEvent {
        &self.event
    }

    pub fn action(&self) -> AuditAction {
        self.event.action
    }
}

/// Selects audit entries. Unset criteria match everything.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub actor_id: Option<ActorId>,
    pub resource_id: Option<String>,
    /// Matches access entries for the patient and consent entries about them.
    pub patient_id: Option<PatientId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// `since` is inclusive, `until` exclusive.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let event = &entry.event;
        self.action.map_or(true, |a| a == event.action)
            && self.actor_id.as_ref().map_or(true, |a| a == &event.actor_id)
            && self
                .resource_id
                .as_deref()
                .map_or(true, |r| r == event.resource_id)
            && self
                .patient_id
                .as_ref()
                .map_or(true, |p| event.patient_id.as_ref() == Some(p))
            && self.since.map_or(true, |s| event.timestamp >= s)
            && self.until.map_or(true, |u| event.timestamp < u)
    }

    /// Applies the filter and limit to entries already in append order.
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a AuditEntry>) -> Vec<AuditEntry> {
        entries
            .into_iter()
            .filter(|e| self.matches(e))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

pub trait AuditSink: Send + Sync {
    /// Appends an event and returns the id it was stored under.
    fn append(&self, event: AuditEvent) -> AccessResult<AuditEntryId>;
}

/// Privileged read access to the audit trail.
pub trait AuditQuery: Send + Sync {
    fn query(&self, filter: &AuditFilter) -> AccessResult<Vec<AuditEntry>>;
}

/// A store that can both append and be queried.
pub trait AuditLog: AuditSink + AuditQuery {}

impl<T: AuditSink + AuditQuery> AuditLog for T {}

/// Audit entries held in process memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    ids: TimestampIdGenerator,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: AuditEvent) -> AccessResult<AuditEntryId> {
        let mut entries = self.entries.lock().map_err(|_| AccessError::LockPoisoned {
            store: "audit sink",
        })?;
        let id = self.ids.generate(event.timestamp);
        entries.push(AuditEntry::new(id.clone(), event));
        Ok(id)
    }
}

impl AuditQuery for MemoryAuditSink {
    fn query(&self, filter: &AuditFilter) -> AccessResult<Vec<AuditEntry>> {
        let entries = self.entries.lock().map_err(|_| AccessError::LockPoisoned {
            store: "audit sink",
        })?;
        Ok(filter.apply(entries.iter()))
    }
}
