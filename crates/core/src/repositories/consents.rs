use super::shared::{ensure_dir, read_optional, write_atomic, FileLock, LockFile};
use crate::consent::{apply_withdrawal, ConsentRecord, ConsentStore, WithdrawOutcome};
use crate::constants::{CONSENTS_JSON_FILENAME, CONSENTS_LOCK_FILENAME};
use crate::error::{AccessError, AccessResult};
use crate::ids::{ConsentId, PatientId};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Consent records stored together in a single JSON document.
///
/// Every mutation reloads the document, applies the change and replaces the file atomically
/// while holding an exclusive lock on `consents.lock`. The lock is an OS file lock, so a
/// withdrawal is never lost to a grant running in another process.
#[derive(Debug)]
pub struct FileConsentStore {
    path: PathBuf,
    lock_file: LockFile,
    // The OS lock belongs to the open file, so threads sharing it also need this.
    local: Mutex<()>,
}

// Fields drop in order, so the file lock is released before the mutex.
struct Held<'a> {
    _file: FileLock<'a>,
    _local: MutexGuard<'a, ()>,
}

impl FileConsentStore {
    pub fn open(dir: PathBuf) -> AccessResult<Self> {
        ensure_dir(&dir)?;
        Ok(Self {
            path: dir.join(CONSENTS_JSON_FILENAME),
            lock_file: LockFile::open(&dir.join(CONSENTS_LOCK_FILENAME))?,
            local: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> AccessResult<Vec<ConsentRecord>> {
        match read_optional(&self.path)? {
            None => Ok(Vec::new()),
            Some(contents) => {
                serde_json::from_str(&contents).map_err(AccessError::Deserialization)
            }
        }
    }

    fn save(&self, records: &[ConsentRecord]) -> AccessResult<()> {
        let json = serde_json::to_vec_pretty(records).map_err(AccessError::Serialization)?;
        write_atomic(&self.path, &json)
    }

    fn local(&self) -> AccessResult<MutexGuard<'_, ()>> {
        self.local.lock().map_err(|_| AccessError::LockPoisoned {
            store: "consent store",
        })
    }

    fn for_update(&self) -> AccessResult<Held<'_>> {
        let local = self.local()?;
        Ok(Held {
            _file: self.lock_file.exclusive()?,
            _local: local,
        })
    }

    fn for_read(&self) -> AccessResult<Held<'_>> {
        let local = self.local()?;
        Ok(Held {
            _file: self.lock_file.shared()?,
            _local: local,
        })
    }
}

impl ConsentStore for FileConsentStore {
    fn insert(&self, record: ConsentRecord) -> AccessResult<()> {
        let _held = self.for_update()?;
        let mut records = self.load()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(AccessError::InvalidInput(format!(
                "consent {} already exists",
                record.id
            )));
        }
        records.push(record);
        self.save(&records)
    }

    fn get(&self, id: &ConsentId) -> AccessResult<Option<ConsentRecord>> {
        let _held = self.for_read()?;
        Ok(self.load()?.into_iter().find(|r| &r.id == id))
    }

    fn mark_withdrawn(&self, id: &ConsentId, at: DateTime<Utc>) -> AccessResult<WithdrawOutcome> {
        let _held = self.for_update()?;
        let mut records = self.load()?;
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| AccessError::NotFound(format!("consent {id}")))?;

        let outcome = apply_withdrawal(record, at);
        if matches!(outcome, WithdrawOutcome::Withdrawn(_)) {
            self.save(&records)?;
        }
        Ok(outcome)
    }

    fn for_patient(&self, patient_id: &PatientId) -> AccessResult<Vec<ConsentRecord>> {
        let _held = self.for_read()?;
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| &r.patient_id == patient_id)
            .collect())
    }
}
