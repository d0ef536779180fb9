//! The access mediator: the single gate between callers and patient data.
//!
//! Every access decision goes through [`AccessMediator::authorize`]:
//!
//! 1. the actor's role must be permitted to act for the stated purpose (configuration);
//! 2. the requested fields are split into sensitive and non-sensitive;
//! 3. any sensitive field requires an active consent for that patient and purpose;
//! 4. exactly one audit entry is appended describing the decision, with field names only.
//!
//! The decision is returned only after its audit entry is stored. If the audit entry cannot
//! be written the request is denied, so no access is ever granted without a record of it.
//!
//! The higher-level operations (`read_fields`, `write_fields`, `register_patient`, `grant`,
//! `withdraw`) are built on the same rules and never touch the record store before the
//! corresponding decision has been audited.

use crate::audit::{
    AccessContext, AuditAction, AuditEntry, AuditEntryId, AuditEvent, AuditFilter, AuditLog,
    ResourceType,
};
use crate::classifier::FieldClassifier;
use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::consent::{ConsentLedger, ConsentRecord, ConsentStore, WithdrawOutcome};
use crate::error::{AccessError, AccessResult};
use crate::identity::{Actor, ActorId, Purpose, Role};
use crate::ids::{ConsentId, PatientId};
use crate::policy::AccessPolicy;
use crate::record::{FieldValues, PatientRecord, RecordStore};
use crate::repositories::{FileConsentStore, FileRecordStore, JsonlAuditSink};
use chrono::{DateTime, Utc};
use pipa_types::FieldSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    /// The actor's role may not act for the stated purpose.
    RoleNotPermitted,
    /// A sensitive field was requested and no active consent covers the purpose.
    ConsentMissing,
    /// Consent records could not be read, so consent could not be established.
    ConsentUnavailable,
    /// The audit entry for this decision could not be stored.
    AuditWriteFailed,
}

impl DenialReason {
    pub fn into_error(self, role: Role, purpose: Purpose) -> AccessError {
        match self {
            DenialReason::RoleNotPermitted => AccessError::RoleNotPermitted { role, purpose },
            DenialReason::ConsentMissing => AccessError::ConsentMissing { purpose },
            DenialReason::ConsentUnavailable => AccessError::ConsentUnavailable,
            DenialReason::AuditWriteFailed => {
                AccessError::AuditWriteFailed("access decision was not recorded".into())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenialReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    fn audit_action(&self, operation: Operation) -> AuditAction {
        match (self, operation) {
            (Decision::Allowed, Operation::Read) => AuditAction::PatientAccess,
            (Decision::Allowed, Operation::Write) => AuditAction::PatientUpdate,
            (Decision::Denied(_), _) => AuditAction::AccessDenied,
        }
    }
}

/// Consent-gated, audited access to patient records.
#[derive(Clone)]
pub struct AccessMediator {
    policy: Arc<AccessPolicy>,
    classifier: FieldClassifier,
    ledger: ConsentLedger,
    records: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl AccessMediator {
    pub fn new(
        policy: AccessPolicy,
        records: Arc<dyn RecordStore>,
        consents: Arc<dyn ConsentStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            classifier: FieldClassifier::new(),
            ledger: ConsentLedger::new(consents, clock.clone()),
            records,
            audit,
            clock,
        }
    }

    /// Opens the file-backed stores under the configured data directory.
    pub fn open(cfg: &CoreConfig) -> AccessResult<Self> {
        Ok(Self::new(
            cfg.policy().clone(),
            Arc::new(FileRecordStore::open(cfg.patients_dir())?),
            Arc::new(FileConsentStore::open(cfg.consent_dir())?),
            Arc::new(JsonlAuditSink::open(cfg.audit_dir())?),
            Arc::new(SystemClock),
        ))
    }

    /// Current time on the mediator's clock, the instant consent activity is judged at.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Decides whether `actor` may perform `operation` on `fields` of a patient's record for
    /// `purpose`, and appends exactly one audit entry for the decision.
    pub fn authorize(
        &self,
        actor: &Actor,
        patient_id: &PatientId,
        operation: Operation,
        purpose: Purpose,
        fields: &FieldSet,
    ) -> Decision {
        self.authorize_with_context(
            actor,
            patient_id,
            operation,
            purpose,
            fields,
            &AccessContext::default(),
        )
    }

    /// As [`authorize`](Self::authorize), recording request metadata in the audit entry.
    pub fn authorize_with_context(
        &self,
        actor: &Actor,
        patient_id: &PatientId,
        operation: Operation,
        purpose: Purpose,
        fields: &FieldSet,
        context: &AccessContext,
    ) -> Decision {
        let now = self.clock.now();
        let decision = self.decide(actor, patient_id, purpose, fields, now);

        let mut event = AuditEvent::new(
            decision.audit_action(operation),
            ResourceType::Patient,
            patient_id,
            &actor.id,
            now,
        )
        .actor(actor)
        .patient(patient_id)
        .purpose(purpose)
        .fields(fields)
        .context(context);
        if let Decision::Denied(reason) = decision {
            event = event.denial(reason);
        }

        match self.audit.append(event) {
            Ok(entry_id) => {
                match decision {
                    Decision::Allowed => tracing::info!(
                        actor_id = %actor.id,
                        patient_id = %patient_id,
                        ?operation,
                        %purpose,
                        field_count = fields.len(),
                        audit_id = %entry_id,
                        "access allowed"
                    ),
                    Decision::Denied(reason) => tracing::warn!(
                        actor_id = %actor.id,
                        patient_id = %patient_id,
                        ?operation,
                        %purpose,
                        ?reason,
                        field_count = fields.len(),
                        audit_id = %entry_id,
                        "access denied"
                    ),
                }
                decision
            }
            Err(e) => {
                tracing::error!(
                    actor_id = %actor.id,
                    patient_id = %patient_id,
                    error = %e,
                    "audit write failed; denying access"
                );
                Decision::Denied(DenialReason::AuditWriteFailed)
            }
        }
    }

    fn decide(
        &self,
        actor: &Actor,
        patient_id: &PatientId,
        purpose: Purpose,
        fields: &FieldSet,
        now: DateTime<Utc>,
    ) -> Decision {
        if !self.policy.permits(actor.role, purpose) {
            return Decision::Denied(DenialReason::RoleNotPermitted);
        }

        let partition = self.classifier.partition(fields);
        if partition.sensitive.is_empty() {
            return Decision::Allowed;
        }

        match self.ledger.is_consent_active(patient_id, purpose, now) {
            Ok(true) => Decision::Allowed,
            Ok(false) => Decision::Denied(DenialReason::ConsentMissing),
            Err(e) => {
                tracing::warn!(patient_id = %patient_id, error = %e, "consent lookup failed");
                Decision::Denied(DenialReason::ConsentUnavailable)
            }
        }
    }

    /// Reads exactly the requested fields, if allowed. Requested fields absent from the
    /// record are omitted from the result.
    pub fn read_fields(
        &self,
        actor: &Actor,
        patient_id: &PatientId,
        purpose: Purpose,
        fields: &FieldSet,
        context: &AccessContext,
    ) -> AccessResult<FieldValues> {
        match self.authorize_with_context(
            actor,
            patient_id,
            Operation::Read,
            purpose,
            fields,
            context,
        ) {
            Decision::Allowed => Ok(self.records.get(patient_id)?.project(fields)),
            Decision::Denied(reason) => Err(reason.into_error(actor.role, purpose)),
        }
    }

    /// Writes exactly the given fields, if allowed. Other fields on the record are unchanged.
    pub fn write_fields(
        &self,
        actor: &Actor,
        patient_id: &PatientId,
        purpose: Purpose,
        values: FieldValues,
        context: &AccessContext,
    ) -> AccessResult<()> {
        let fields: FieldSet = values.keys().cloned().collect();
        match self.authorize_with_context(
            actor,
            patient_id,
            Operation::Write,
            purpose,
            &fields,
            context,
        ) {
            Decision::Allowed if values.is_empty() => Ok(()),
            Decision::Allowed => self.records.set(patient_id, values, self.clock.now()),
            Decision::Denied(reason) => Err(reason.into_error(actor.role, purpose)),
        }
    }

    /// Creates a new patient record from `values`.
    ///
    /// A new patient cannot have consent on file, so only non-sensitive fields can be
    /// collected here; sensitive fields are written after consent is granted.
    pub fn register_patient(
        &self,
        actor: &Actor,
        purpose: Purpose,
        values: FieldValues,
        context: &AccessContext,
    ) -> AccessResult<PatientId> {
        let patient_id = PatientId::new();
        let fields: FieldSet = values.keys().cloned().collect();

        match self.authorize_with_context(
            actor,
            &patient_id,
            Operation::Write,
            purpose,
            &fields,
            context,
        ) {
            Decision::Allowed => {
                let record = PatientRecord::new(patient_id.clone(), values, self.clock.now());
                self.records.insert(record)?;
                Ok(patient_id)
            }
            Decision::Denied(reason) => Err(reason.into_error(actor.role, purpose)),
        }
    }

    /// Records a patient's consent for `purpose`.
    ///
    /// The `CONSENT_GRANTED` audit entry is written before the consent is stored; if it cannot
    /// be written the consent is not stored.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the patient does not exist
    /// - [`AccessError::InvalidInput`] if `expires_at` is not in the future
    /// - [`AccessError::AuditWriteFailed`] if the audit entry could not be stored
    pub fn grant(
        &self,
        patient_id: &PatientId,
        purpose: Purpose,
        grantor: &ActorId,
        expires_at: Option<DateTime<Utc>>,
        context: &AccessContext,
    ) -> AccessResult<ConsentRecord> {
        if !self.records.exists(patient_id)? {
            return Err(crate::record::patient_not_found(patient_id));
        }

        let record = self
            .ledger
            .draft_grant(patient_id, purpose, grantor, expires_at)?;

        let event = AuditEvent::new(
            AuditAction::ConsentGranted,
            ResourceType::Consent,
            &record.id,
            grantor,
            record.granted_at,
        )
        .patient(patient_id)
        .purpose(purpose)
        .context(context);
        self.append_or_abort(event)?;

        self.ledger.store_grant(record.clone())?;
        tracing::info!(
            consent_id = %record.id,
            patient_id = %patient_id,
            %purpose,
            "consent granted"
        );
        Ok(record)
    }

    /// Withdraws a consent.
    ///
    /// The withdrawal takes effect before it is audited, so an audit failure never leaves the
    /// consent active. Withdrawing an already-withdrawn consent changes nothing and writes no
    /// further audit entry.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the consent does not exist
    /// - [`AccessError::AuditWriteFailed`] if the audit entry could not be stored
    pub fn withdraw(
        &self,
        consent_id: &ConsentId,
        actor: &ActorId,
        context: &AccessContext,
    ) -> AccessResult<WithdrawOutcome> {
        let now = self.clock.now();
        let outcome = self.ledger.withdraw(consent_id, now)?;

        if let WithdrawOutcome::Withdrawn(record) = &outcome {
            let event = AuditEvent::new(
                AuditAction::ConsentWithdrawn,
                ResourceType::Consent,
                consent_id,
                actor,
                now,
            )
            .patient(&record.patient_id)
            .purpose(record.purpose)
            .context(context);
            self.append_or_abort(event)?;
            tracing::info!(
                consent_id = %consent_id,
                patient_id = %record.patient_id,
                purpose = %record.purpose,
                "consent withdrawn"
            );
        }

        Ok(outcome)
    }

    pub fn consent_history(&self, patient_id: &PatientId) -> AccessResult<Vec<ConsentRecord>> {
        self.ledger.history(patient_id)
    }

    /// Reads back the audit trail. This is a privileged operation and is not itself audited.
    pub fn audit_log(&self, filter: &AuditFilter) -> AccessResult<Vec<AuditEntry>> {
        self.audit.query(filter)
    }

    fn append_or_abort(&self, event: AuditEvent) -> AccessResult<AuditEntryId> {
        self.audit.append(event).map_err(|e| {
            tracing::error!(error = %e, "audit write failed; aborting");
            AccessError::AuditWriteFailed(e.to_string())
        })
    }
}
