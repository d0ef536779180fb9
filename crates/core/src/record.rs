//! Patient records and the store that holds them.
//!
//! The store is a collaborator of the mediator: it keeps field values keyed by patient id and
//! knows nothing about consent or audit. Records are only reached through
//! [`AccessMediator`](crate::mediator::AccessMediator), which decides first and then asks the
//! store for exactly the fields it allowed.

use crate::error::{AccessError, AccessResult};
use crate::ids::PatientId;
use chrono::{DateTime, Utc};
use pipa_types::{FieldName, FieldSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

/// Field values keyed by name. Values are opaque JSON (text, dates, nested documents).
pub type FieldValues = BTreeMap<FieldName, serde_json::Value>;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: PatientId,
    pub fields: FieldValues,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientRecord {
    pub fn new(id: PatientId, fields: FieldValues, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            fields,
            created_at,
            updated_at: created_at,
        }
    }

    /// The requested fields that are present on this record, and nothing else.
    pub fn project(&self, fields: &FieldSet) -> FieldValues {
        fields
            .iter()
            .filter_map(|name| self.fields.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Overwrites the given fields, leaving all others untouched.
    pub fn merge(&mut self, fields: FieldValues, at: DateTime<Utc>) {
        self.fields.extend(fields);
        self.updated_at = at;
    }
}

// Values are personal data and must not end up in logs.
impl fmt::Debug for PatientRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatientRecord")
            .field("id", &self.id)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

pub trait RecordStore: Send + Sync {
    /// Returns [`AccessError::NotFound`] if the patient is unknown.
    fn get(&self, id: &PatientId) -> AccessResult<PatientRecord>;

    /// Merges `fields` into an existing record.
    ///
    /// Returns [`AccessError::NotFound`] if the patient is unknown.
    fn set(&self, id: &PatientId, fields: FieldValues, at: DateTime<Utc>) -> AccessResult<()>;

    /// Adds a new record. Fails with [`AccessError::InvalidInput`] if the id is taken.
    fn insert(&self, record: PatientRecord) -> AccessResult<()>;

    fn exists(&self, id: &PatientId) -> AccessResult<bool> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(AccessError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn patient_not_found(id: &PatientId) -> AccessError {
    AccessError::NotFound(format!("patient {id}"))
}

/// Patient records held in process memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<PatientId, PatientRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AccessResult<std::sync::MutexGuard<'_, HashMap<PatientId, PatientRecord>>> {
        self.records.lock().map_err(|_| AccessError::LockPoisoned {
            store: "record store",
        })
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &PatientId) -> AccessResult<PatientRecord> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| patient_not_found(id))
    }

    fn set(&self, id: &PatientId, fields: FieldValues, at: DateTime<Utc>) -> AccessResult<()> {
        let mut records = self.lock()?;
        let record = records.get_mut(id).ok_or_else(|| patient_not_found(id))?;
        record.merge(fields, at);
        Ok(())
    }

    fn insert(&self, record: PatientRecord) -> AccessResult<()> {
        let mut records = self.lock()?;
        if records.contains_key(&record.id) {
            return Err(AccessError::InvalidInput(format!(
                "patient {} already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }
}
