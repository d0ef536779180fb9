use super::shared::{ensure_dir, read_optional, write_atomic, FileLock, LockFile};
use crate::constants::{PATIENT_JSON_FILENAME, RECORDS_LOCK_FILENAME};
use crate::error::{AccessError, AccessResult};
use crate::ids::PatientId;
use crate::record::{patient_not_found, FieldValues, PatientRecord, RecordStore};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Patient records stored as one JSON file per patient in sharded directories.
///
/// Read-modify-write cycles hold an exclusive OS lock on `records.lock`, so concurrent
/// processes updating the same record do not drop each other's fields.
#[derive(Debug)]
pub struct FileRecordStore {
    base_dir: PathBuf,
    lock_file: LockFile,
    local: Mutex<()>,
}

impl FileRecordStore {
    pub fn open(base_dir: PathBuf) -> AccessResult<Self> {
        ensure_dir(&base_dir)?;
        Ok(Self {
            lock_file: LockFile::open(&base_dir.join(RECORDS_LOCK_FILENAME))?,
            base_dir,
            local: Mutex::new(()),
        })
    }

    fn record_path(&self, id: &PatientId) -> PathBuf {
        id.sharded_dir(&self.base_dir).join(PATIENT_JSON_FILENAME)
    }

    fn read(&self, id: &PatientId) -> AccessResult<Option<PatientRecord>> {
        match read_optional(&self.record_path(id))? {
            None => Ok(None),
            Some(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(AccessError::Deserialization),
        }
    }

    fn write(&self, record: &PatientRecord) -> AccessResult<()> {
        let json = serde_json::to_vec_pretty(record).map_err(AccessError::Serialization)?;
        write_atomic(&self.record_path(&record.id), &json)
    }

    // The file lock is released before the mutex: tuple fields drop in order.
    fn lock(&self) -> AccessResult<(FileLock<'_>, MutexGuard<'_, ()>)> {
        let local = self.local.lock().map_err(|_| AccessError::LockPoisoned {
            store: "record store",
        })?;
        Ok((self.lock_file.exclusive()?, local))
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, id: &PatientId) -> AccessResult<PatientRecord> {
        self.read(id)?.ok_or_else(|| patient_not_found(id))
    }

    fn set(&self, id: &PatientId, fields: FieldValues, at: DateTime<Utc>) -> AccessResult<()> {
        let _guard = self.lock()?;
        let mut record = self.read(id)?.ok_or_else(|| patient_not_found(id))?;
        record.merge(fields, at);
        self.write(&record)
    }

    fn insert(&self, record: PatientRecord) -> AccessResult<()> {
        let _guard = self.lock()?;
        if self.record_path(&record.id).exists() {
            return Err(AccessError::InvalidInput(format!(
                "patient {} already exists",
                record.id
            )));
        }
        self.write(&record)
    }
}
