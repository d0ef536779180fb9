//! Consent ledger.
//!
//! A consent record permits access to one patient's sensitive fields for one purpose. Records
//! are never deleted: granting appends a new record and withdrawing stamps `withdrawn_at` on an
//! existing one, so the full history stays available for review. Because a grant never touches
//! existing records, a grant racing a withdrawal cannot undo it.

use crate::clock::Clock;
use crate::error::{AccessError, AccessResult};
use crate::identity::{ActorId, Purpose};
use crate::ids::{ConsentId, PatientId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: ConsentId,
    pub patient_id: PatientId,
    pub purpose: Purpose,
    pub granted_by: ActorId,
    pub granted_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub withdrawn_at: Option<DateTime<Utc>>,
}

impl ConsentRecord {
    /// Whether this consent permits access at `at`.
    ///
    /// A withdrawn consent is never active. Expiry is exclusive: at the expiry instant the
    /// consent is already inactive. A consent is not active before its grant time.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.withdrawn_at.is_none()
            && self.granted_at <= at
            && self.expires_at.map_or(true, |expiry| at < expiry)
    }
}

/// Result of a withdrawal request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// The consent was active or expired and is now withdrawn.
    Withdrawn(ConsentRecord),
    /// The consent had already been withdrawn; nothing changed.
    AlreadyWithdrawn(ConsentRecord),
}

impl WithdrawOutcome {
    pub fn record(&self) -> &ConsentRecord {
        match self {
            WithdrawOutcome::Withdrawn(record) | WithdrawOutcome::AlreadyWithdrawn(record) => {
                record
            }
        }
    }
}

/// Stamps a withdrawal on `record` unless one is already present.
pub(crate) fn apply_withdrawal(record: &mut ConsentRecord, at: DateTime<Utc>) -> WithdrawOutcome {
    if record.withdrawn_at.is_some() {
        return WithdrawOutcome::AlreadyWithdrawn(record.clone());
    }
    record.withdrawn_at = Some(at);
    WithdrawOutcome::Withdrawn(record.clone())
}

/// Persistence for consent records.
///
/// Implementations must make `mark_withdrawn` a single atomic check-and-set so concurrent
/// withdrawals of the same consent keep the first timestamp.
pub trait ConsentStore: Send + Sync {
    fn insert(&self, record: ConsentRecord) -> AccessResult<()>;

    fn get(&self, id: &ConsentId) -> AccessResult<Option<ConsentRecord>>;

    /// Returns [`AccessError::NotFound`] if `id` is unknown.
    fn mark_withdrawn(&self, id: &ConsentId, at: DateTime<Utc>) -> AccessResult<WithdrawOutcome>;

    fn for_patient(&self, patient_id: &PatientId) -> AccessResult<Vec<ConsentRecord>>;
}

/// Consent records held in process memory.
#[derive(Debug, Default)]
pub struct MemoryConsentStore {
    records: Mutex<Vec<ConsentRecord>>,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AccessResult<std::sync::MutexGuard<'_, Vec<ConsentRecord>>> {
        self.records.lock().map_err(|_| AccessError::LockPoisoned {
            store: "consent store",
        })
    }
}

impl ConsentStore for MemoryConsentStore {
    fn insert(&self, record: ConsentRecord) -> AccessResult<()> {
        let mut records = self.lock()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(AccessError::InvalidInput(format!(
                "consent {} already exists",
                record.id
            )));
        }
        records.push(record);
        Ok(())
    }

    fn get(&self, id: &ConsentId) -> AccessResult<Option<ConsentRecord>> {
        Ok(self.lock()?.iter().find(|r| &r.id == id).cloned())
    }

    fn mark_withdrawn(&self, id: &ConsentId, at: DateTime<Utc>) -> AccessResult<WithdrawOutcome> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| AccessError::NotFound(format!("consent {id}")))?;
        Ok(apply_withdrawal(record, at))
    }

    fn for_patient(&self, patient_id: &PatientId) -> AccessResult<Vec<ConsentRecord>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|r| &r.patient_id == patient_id)
            .cloned()
            .collect())
    }
}

/// Answers "does this patient currently consent to this purpose?" and records grants and
/// withdrawals.
///
/// Grants and withdrawals are only reachable through [`AccessMediator`](crate::AccessMediator),
/// which audits them. From outside the crate the ledger is read-only:
///
/// ```compile_fail
/// use pipa_core::{ConsentLedger, ConsentId, MemoryConsentStore, SystemClock};
/// use std::sync::Arc;
///
/// let ledger = ConsentLedger::new(Arc::new(MemoryConsentStore::new()), Arc::new(SystemClock));
/// let _ = ledger.withdraw(&ConsentId::new(), chrono::Utc::now());
/// ```
#[derive(Clone)]
pub struct ConsentLedger {
    store: Arc<dyn ConsentStore>,
    clock: Arc<dyn Clock>,
}

impl ConsentLedger {
    pub fn new(store: Arc<dyn ConsentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// True iff at least one consent for `patient_id` and `purpose` is active at `at`.
    pub fn is_consent_active(
        &self,
        patient_id: &PatientId,
        purpose: Purpose,
        at: DateTime<Utc>,
    ) -> AccessResult<bool> {
        Ok(self
            .store
            .for_patient(patient_id)?
            .iter()
            .any(|r| r.purpose == purpose && r.is_active_at(at)))
    }

    /// Builds a new consent record granted now, without storing it. Earlier grants for the
    /// same purpose are left as they are once this one is stored.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidInput`] if `expires_at` is not after the grant time.
    pub(crate) fn draft_grant(
        &self,
        patient_id: &PatientId,
        purpose: Purpose,
        grantor: &ActorId,
        expires_at: Option<DateTime<Utc>>,
    ) -> AccessResult<ConsentRecord> {
        let granted_at = self.clock.now();
        if let Some(expiry) = expires_at {
            if expiry <= granted_at {
                return Err(AccessError::InvalidInput(format!(
                    "consent expiry {expiry} must be after grant time {granted_at}"
                )));
            }
        }

        Ok(ConsentRecord {
            id: ConsentId::new(),
            patient_id: patient_id.clone(),
            purpose,
            granted_by: grantor.clone(),
            granted_at,
            expires_at,
            withdrawn_at: None,
        })
    }

    /// Stores a record produced by [`draft_grant`](Self::draft_grant).
    pub(crate) fn store_grant(&self, record: ConsentRecord) -> AccessResult<()> {
        tracing::debug!(
            consent_id = %record.id,
            patient_id = %record.patient_id,
            purpose = %record.purpose,
            "consent stored"
        );
        self.store.insert(record)
    }

    /// Withdraws a consent as of `at`. Withdrawing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotFound`] if `consent_id` is unknown.
    pub(crate) fn withdraw(
        &self,
        consent_id: &ConsentId,
        at: DateTime<Utc>,
    ) -> AccessResult<WithdrawOutcome> {
        let outcome = self.store.mark_withdrawn(consent_id, at)?;
        if let WithdrawOutcome::Withdrawn(record) = &outcome {
            tracing::debug!(
                consent_id = %record.id,
                patient_id = %record.patient_id,
                purpose = %record.purpose,
                "consent withdrawn"
            );
        }
        Ok(outcome)
    }

    /// All consent records for a patient, oldest grant first.
    pub fn history(&self, patient_id: &PatientId) -> AccessResult<Vec<ConsentRecord>> {
        let mut records = self.store.for_patient(patient_id)?;
        records.sort_by(|a, b| a.granted_at.cmp(&b.granted_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use pipa_types::NonEmptyText;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn ledger() -> (ConsentLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let ledger = ConsentLedger::new(Arc::new(MemoryConsentStore::new()), clock.clone());
        (ledger, clock)
    }

    fn grantor() -> ActorId {
        NonEmptyText::new("patient-p1").unwrap()
    }

    fn grant(
        ledger: &ConsentLedger,
        patient_id: &PatientId,
        purpose: Purpose,
        expires_at: Option<DateTime<Utc>>,
    ) -> AccessResult<ConsentRecord> {
        let record = ledger.draft_grant(patient_id, purpose, &grantor(), expires_at)?;
        ledger.store_grant(record.clone())?;
        Ok(record)
    }

    #[test]
    fn no_consent_on_file_is_inactive() {
        let (ledger, clock) = ledger();
        let patient = PatientId::new();
        assert!(!ledger
            .is_consent_active(&patient, Purpose::Treatment, clock.now())
            .unwrap());
    }

    #[test]
    fn grant_is_scoped_to_patient_and_purpose() {
        let (ledger, clock) = ledger();
        let patient = PatientId::new();
        let other = PatientId::new();
        grant(&ledger, &patient, Purpose::Treatment, None).unwrap();

        let now = clock.now();
        assert!(ledger.is_consent_active(&patient, Purpose::Treatment, now).unwrap());
        assert!(!ledger.is_consent_active(&patient, Purpose::Research, now).unwrap());
        assert!(!ledger.is_consent_active(&other, Purpose::Treatment, now).unwrap());
    }

    #[test]
    fn expiry_is_exclusive() {
        let (ledger, clock) = ledger();
        let patient = PatientId::new();
        let expiry = start() + Duration::days(30);
        grant(&ledger, &patient, Purpose::Billing, Some(expiry)).unwrap();

        let just_before = expiry - Duration::milliseconds(1);
        assert!(ledger.is_consent_active(&patient, Purpose::Billing, just_before).unwrap());
        assert!(!ledger.is_consent_active(&patient, Purpose::Billing, expiry).unwrap());

        clock.set(expiry + Duration::days(1));
        assert!(!ledger
            .is_consent_active(&patient, Purpose::Billing, clock.now())
            .unwrap());
    }

    #[test]
    fn expiry_not_after_grant_is_rejected() {
        let (ledger, _clock) = ledger();
        let err =
            grant(&ledger, &PatientId::new(), Purpose::Referral, Some(start())).unwrap_err();
        assert!(matches!(err, AccessError::InvalidInput(_)));
    }

    #[test]
    fn withdrawal_beats_future_expiry() {
        let (ledger, clock) = ledger();
        let patient = PatientId::new();
        let expiry = start() + Duration::days(365);
        let consent = grant(&ledger, &patient, Purpose::Treatment, Some(expiry)).unwrap();

        clock.advance(Duration::hours(1));
        let outcome = ledger.withdraw(&consent.id, clock.now()).unwrap();
        assert!(matches!(outcome, WithdrawOutcome::Withdrawn(_)));
        assert!(!ledger
            .is_consent_active(&patient, Purpose::Treatment, clock.now())
            .unwrap());
    }

    #[test]
    fn withdraw_twice_keeps_first_timestamp() {
        let (ledger, clock) = ledger();
        let consent = grant(&ledger, &PatientId::new(), Purpose::Treatment, None).unwrap();

        let first_at = clock.now();
        ledger.withdraw(&consent.id, first_at).unwrap();
        clock.advance(Duration::minutes(5));
        let second = ledger.withdraw(&consent.id, clock.now()).unwrap();

        match second {
            WithdrawOutcome::AlreadyWithdrawn(record) => {
                assert_eq!(record.withdrawn_at, Some(first_at))
            }
            other => panic!("expected AlreadyWithdrawn, got {other:?}"),
        }
    }

    #[test]
    fn withdraw_unknown_is_not_found() {
        let (ledger, clock) = ledger();
        let err = ledger.withdraw(&ConsentId::new(), clock.now()).unwrap_err();
        assert!(matches!(err, AccessError::NotFound(_)));
    }

    #[test]
    fn overlapping_grants_any_active_suffices() {
        let (ledger, clock) = ledger();
        let patient = PatientId::new();
        let first = grant(&ledger, &patient, Purpose::Treatment, None).unwrap();
        grant(&ledger, &patient, Purpose::Treatment, None).unwrap();

        ledger.withdraw(&first.id, clock.now()).unwrap();
        assert!(ledger
            .is_consent_active(&patient, Purpose::Treatment, clock.now())
            .unwrap());
    }

    #[test]
    fn regrant_after_withdrawal_restores_and_keeps_history() {
        let (ledger, clock) = ledger();
        let patient = PatientId::new();
        let first = grant(&ledger, &patient, Purpose::Treatment, None).unwrap();
        ledger.withdraw(&first.id, clock.now()).unwrap();

        clock.advance(Duration::minutes(1));
        grant(&ledger, &patient, Purpose::Treatment, None).unwrap();

        assert!(ledger
            .is_consent_active(&patient, Purpose::Treatment, clock.now())
            .unwrap());
        let history = ledger.history(&patient).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert!(history[0].withdrawn_at.is_some());
    }
}
