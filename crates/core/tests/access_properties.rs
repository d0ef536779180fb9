#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Property-based tests for the access mediator.
//!
//! Invariants tested:
//! - Requests naming only non-sensitive fields never need consent
//! - Any sensitive or unclassified field needs active consent for the requested purpose
//! - Every `authorize` call appends exactly one audit entry naming exactly the requested fields
//! - Record values never reach the audit trail
//! - A withdrawn consent denies access even before its expiry; a fresh grant restores it

use chrono::{DateTime, Duration, TimeZone, Utc};
use pipa_core::classifier::{NON_SENSITIVE_FIELDS, SENSITIVE_FIELDS};
use pipa_core::{
    AccessContext, AccessMediator, AccessPolicy, Actor, AuditFilter, AuditQuery, Clock, Decision,
    DenialReason, FieldClassifier, FieldName, FieldSet, FieldValues, ManualClock, MemoryAuditSink,
    MemoryConsentStore, MemoryRecordStore, NonEmptyText, Operation, PatientId, PatientRecord,
    Purpose, RecordStore, Role, Sensitivity,
};
use proptest::prelude::*;
use proptest::sample::{select, subsequence};
use std::sync::Arc;

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Harness {
    mediator: AccessMediator,
    audit: Arc<MemoryAuditSink>,
    records: Arc<MemoryRecordStore>,
    clock: Arc<ManualClock>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
}

fn setup() -> Harness {
    let audit = Arc::new(MemoryAuditSink::new());
    let records = Arc::new(MemoryRecordStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let mediator = AccessMediator::new(
        AccessPolicy::default(),
        records.clone(),
        Arc::new(MemoryConsentStore::new()),
        audit.clone(),
        clock.clone(),
    );
    Harness {
        mediator,
        audit,
        records,
        clock,
    }
}

fn actor(role: Role) -> Actor {
    Actor::new(NonEmptyText::new("staff-prop").unwrap(), role)
}

fn grantor() -> NonEmptyText {
    NonEmptyText::new("patient-self").unwrap()
}

/// Inserts an empty record so consent can be granted for it.
fn existing_patient(h: &Harness) -> PatientId {
    let id = PatientId::new();
    h.records
        .insert(PatientRecord::new(id.clone(), FieldValues::new(), h.clock.now()))
        .unwrap();
    id
}

fn field_set(names: &[String]) -> FieldSet {
    FieldName::parse_set(names).unwrap()
}

// ── Strategies ────────────────────────────────────────────────────────────────

fn permitted_pair() -> impl Strategy<Value = (Role, Purpose)> {
    let policy = AccessPolicy::default();
    let pairs: Vec<(Role, Purpose)> = Role::ALL
        .into_iter()
        .flat_map(|role| {
            policy
                .purposes_for(role)
                .map(move |purpose| (role, purpose))
                .collect::<Vec<_>>()
        })
        .collect();
    select(pairs)
}

fn non_sensitive_names() -> impl Strategy<Value = Vec<String>> {
    let all: Vec<String> = NON_SENSITIVE_FIELDS.iter().map(|s| s.to_string()).collect();
    let len = all.len();
    subsequence(all, 0..=len)
}

/// A field name that needs consent: a listed PHI field or a name nobody classified.
fn sensitive_name() -> impl Strategy<Value = String> {
    prop_oneof![
        select(SENSITIVE_FIELDS.to_vec()).prop_map(String::from),
        "[a-z][A-Za-z0-9_]{0,15}"
            .prop_filter("must be unclassified", |s| {
                !NON_SENSITIVE_FIELDS.contains(&s.as_str())
            }),
    ]
}

fn any_known_names() -> impl Strategy<Value = Vec<String>> {
    let all: Vec<String> = NON_SENSITIVE_FIELDS
        .iter()
        .chain(SENSITIVE_FIELDS)
        .map(|s| s.to_string())
        .collect();
    let len = all.len();
    subsequence(all, 1..=len)
}

// ── proptest! blocks ──────────────────────────────────────────────────────────

proptest! {
    /// Unclassified names are always treated as sensitive.
    #[test]
    fn prop_unknown_names_classify_sensitive(name in sensitive_name()) {
        let field = FieldName::new(&name).unwrap();
        prop_assert_eq!(FieldClassifier::new().classify(&field), Sensitivity::Sensitive);
    }

    /// A permitted role asking only for non-sensitive fields is allowed with no consent on file.
    #[test]
    fn prop_non_sensitive_needs_no_consent(
        (role, purpose) in permitted_pair(),
        names in non_sensitive_names(),
    ) {
        let h = setup();
        let decision = h.mediator.authorize(
            &actor(role),
            &PatientId::new(),
            Operation::Read,
            purpose,
            &field_set(&names),
        );
        prop_assert_eq!(decision, Decision::Allowed);
    }

    /// One sensitive field among any number of non-sensitive ones is denied without consent.
    #[test]
    fn prop_sensitive_without_consent_is_denied(
        (role, purpose) in permitted_pair(),
        mut names in non_sensitive_names(),
        sensitive in sensitive_name(),
    ) {
        let h = setup();
        names.push(sensitive);
        let decision = h.mediator.authorize(
            &actor(role),
            &PatientId::new(),
            Operation::Read,
            purpose,
            &field_set(&names),
        );
        prop_assert_eq!(decision, Decision::Denied(DenialReason::ConsentMissing));
    }

    /// Consent for one purpose never covers another.
    #[test]
    fn prop_consent_is_purpose_bound(
        granted in select(Purpose::ALL.to_vec()),
        (role, requested) in permitted_pair(),
        sensitive in sensitive_name(),
    ) {
        prop_assume!(granted != requested);
        let h = setup();
        let patient = existing_patient(&h);
        h.mediator
            .grant(&patient, granted, &grantor(), None, &AccessContext::default())
            .unwrap();

        let decision = h.mediator.authorize(
            &actor(role),
            &patient,
            Operation::Read,
            requested,
            &field_set(&[sensitive]),
        );
        prop_assert_eq!(decision, Decision::Denied(DenialReason::ConsentMissing));
    }

    /// Each call appends exactly one entry, and that entry names exactly the requested fields.
    #[test]
    fn prop_one_audit_entry_per_authorize(
        requests in prop::collection::vec(
            (
                select(Role::ALL.to_vec()),
                select(Purpose::ALL.to_vec()),
                prop::collection::vec(sensitive_name(), 0..4),
                non_sensitive_names(),
            ),
            1..12,
        ),
    ) {
        let h = setup();
        let patient = PatientId::new();

        for (i, (role, purpose, mut names, plain)) in requests.into_iter().enumerate() {
            names.extend(plain);
            let fields = field_set(&names);
            h.mediator.authorize(&actor(role), &patient, Operation::Read, purpose, &fields);

            prop_assert_eq!(h.audit.len(), i + 1);
            let entries = h.audit.query(&AuditFilter::default()).unwrap();
            let last = entries.last().unwrap().event();
            prop_assert_eq!(&last.fields_accessed, &fields.iter().cloned().collect::<Vec<_>>());
            prop_assert_eq!(last.purpose, Some(purpose));
        }
    }

    /// Values written and read through the mediator never appear in any audit entry.
    #[test]
    fn prop_audit_never_contains_values(
        names in any_known_names(),
        raw in prop::collection::vec("[0-9a-z ]{0,12}", 1..16),
    ) {
        let h = setup();
        let patient = existing_patient(&h);
        h.mediator
            .grant(&patient, Purpose::Treatment, &grantor(), None, &AccessContext::default())
            .unwrap();

        // Markers contain a space and a non-ASCII character, which no name or id can.
        let values: FieldValues = names
            .iter()
            .zip(raw.iter().cycle())
            .map(|(name, r)| {
                let value = format!("phi {r} \u{2713}");
                (FieldName::new(name).unwrap(), serde_json::Value::String(value))
            })
            .collect();

        let physician = actor(Role::Physician);
        h.mediator
            .write_fields(&physician, &patient, Purpose::Treatment, values.clone(), &AccessContext::default())
            .unwrap();
        let read_back = h.mediator
            .read_fields(
                &physician,
                &patient,
                Purpose::Treatment,
                &values.keys().cloned().collect(),
                &AccessContext::default(),
            )
            .unwrap();
        prop_assert_eq!(&read_back, &values);

        for entry in h.audit.query(&AuditFilter::default()).unwrap() {
            let json = serde_json::to_string(&entry).unwrap();
            for value in values.values() {
                let value = value.as_str().unwrap();
                prop_assert!(!json.contains(value), "audit entry leaked {:?}", value);
            }
        }
    }

    /// Withdrawal wins over a future expiry, and a new grant restores access.
    #[test]
    fn prop_withdraw_then_regrant(
        expiry_hours in 1i64..=24 * 365,
        elapsed_minutes in 0i64..60,
        sensitive in sensitive_name(),
    ) {
        let h = setup();
        let patient = existing_patient(&h);
        let physician = actor(Role::Physician);
        let fields = field_set(&[sensitive]);
        let expires_at = Some(start() + Duration::hours(expiry_hours));

        let consent = h.mediator
            .grant(&patient, Purpose::Treatment, &grantor(), expires_at, &AccessContext::default())
            .unwrap();
        prop_assert!(h.mediator
            .authorize(&physician, &patient, Operation::Read, Purpose::Treatment, &fields)
            .is_allowed());

        h.clock.advance(Duration::minutes(elapsed_minutes));
        h.mediator
            .withdraw(&consent.id, &physician.id, &AccessContext::default())
            .unwrap();
        prop_assert_eq!(
            h.mediator.authorize(&physician, &patient, Operation::Read, Purpose::Treatment, &fields),
            Decision::Denied(DenialReason::ConsentMissing)
        );

        h.mediator
            .grant(&patient, Purpose::Treatment, &grantor(), None, &AccessContext::default())
            .unwrap();
        prop_assert_eq!(
            h.mediator.authorize(&physician, &patient, Operation::Read, Purpose::Treatment, &fields),
            Decision::Allowed
        );
    }
}
