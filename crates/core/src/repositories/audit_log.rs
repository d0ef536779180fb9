use super::shared::{ensure_dir, read_optional, FileLock};
use crate::audit::{AuditEntry, AuditEntryId, AuditEvent, AuditFilter, AuditQuery, AuditSink};
use crate::constants::AUDIT_LOG_FILENAME;
use crate::error::{AccessError, AccessResult};
use pipa_uuid::TimestampIdGenerator;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only audit trail stored as JSON Lines.
///
/// Each entry is written as one newline-terminated line and synced before
/// [`AuditSink::append`] returns. Appends from several processes are serialised with an
/// exclusive lock on the file itself.
///
/// A line without its trailing newline was never acknowledged to a caller. A failed write is
/// truncated away at once; a line torn by a crashed process is discarded before the next
/// append or query. If a failed write cannot be truncated the sink refuses further appends.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    trail: Mutex<Trail>,
    ids: TimestampIdGenerator,
}

#[derive(Debug)]
struct Trail {
    file: File,
    poisoned: bool,
}

impl JsonlAuditSink {
    /// Opens (or creates) the trail in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Deserialization`] if the last complete line of an existing trail
    /// is not a valid entry.
    pub fn open(dir: PathBuf) -> AccessResult<Self> {
        ensure_dir(&dir)?;
        let path = dir.join(AUDIT_LOG_FILENAME);

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(AccessError::FileWrite)?;

        let last = {
            let _lock = FileLock::exclusive(&file)?;
            repair_torn_tail(&mut &file, &path)?;
            last_entry(&path)?
        };
        let ids = match last {
            Some(entry) => TimestampIdGenerator::starting_after(entry.id().timestamp()),
            None => TimestampIdGenerator::new(),
        };

        Ok(Self {
            path,
            trail: Mutex::new(Trail {
                file,
                poisoned: false,
            }),
            ids,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> AccessResult<Vec<AuditEntry>> {
        let Some(contents) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AccessError::Deserialization))
            .collect()
    }

    fn lock_trail(&self) -> AccessResult<std::sync::MutexGuard<'_, Trail>> {
        self.trail.lock().map_err(|_| AccessError::LockPoisoned {
            store: "audit log",
        })
    }
}

fn last_entry(path: &Path) -> AccessResult<Option<AuditEntry>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };
    contents
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AccessError::Deserialization))
        .transpose()
}

/// The operations the trail needs from its backing file.
trait TrailStorage: Read + Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl TrailStorage for &File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Drops any bytes after the last newline.
fn repair_torn_tail<S: TrailStorage>(storage: &mut S, path: &Path) -> AccessResult<()> {
    let len = storage.seek(SeekFrom::End(0)).map_err(AccessError::FileRead)?;
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    storage
        .seek(SeekFrom::Start(len - 1))
        .and_then(|_| storage.read_exact(&mut last))
        .map_err(AccessError::FileRead)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut contents = Vec::with_capacity(len as usize);
    storage
        .seek(SeekFrom::Start(0))
        .and_then(|_| storage.read_to_end(&mut contents))
        .map_err(AccessError::FileRead)?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i as u64 + 1);

    tracing::warn!(
        path = %path.display(),
        dropped_bytes = len - keep,
        "discarding incomplete audit line"
    );
    storage.truncate(keep).map_err(AccessError::FileWrite)
}

enum LineError {
    /// The write failed and the trail is back to its previous length.
    RolledBack(io::Error),
    /// The write failed and the partial line could not be removed.
    Stuck(io::Error),
}

/// Appends one line and syncs it, truncating back to the previous length on failure.
fn write_line<S: TrailStorage>(storage: &mut S, line: &[u8]) -> Result<(), LineError> {
    let len = storage.seek(SeekFrom::End(0)).map_err(LineError::RolledBack)?;

    let written = storage
        .write_all(line)
        .and_then(|_| storage.flush())
        .and_then(|_| storage.sync());
    match written {
        Ok(()) => Ok(()),
        Err(e) => match storage.truncate(len).and_then(|_| storage.sync()) {
            Ok(()) => Err(LineError::RolledBack(e)),
            Err(rollback) => {
                tracing::error!(error = %rollback, "failed to roll back partial audit line");
                Err(LineError::Stuck(e))
            }
        },
    }
}

impl Trail {
    fn append_line(&mut self, path: &Path, line: &[u8]) -> AccessResult<()> {
        if self.poisoned {
            return Err(AccessError::AuditWriteFailed(format!(
                "{} holds an unremovable partial entry",
                path.display()
            )));
        }

        let _lock = FileLock::exclusive(&self.file)?;
        repair_torn_tail(&mut &self.file, path)?;
        match write_line(&mut &self.file, line) {
            Ok(()) => Ok(()),
            Err(LineError::RolledBack(e)) => Err(AccessError::FileWrite(e)),
            Err(LineError::Stuck(e)) => {
                self.poisoned = true;
                Err(AccessError::FileWrite(e))
            }
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, event: AuditEvent) -> AccessResult<AuditEntryId> {
        let mut trail = self.lock_trail()?;

        let id = self.ids.generate(event.timestamp);
        let entry = AuditEntry::new(id.clone(), event);
        let mut line = serde_json::to_vec(&entry).map_err(AccessError::Serialization)?;
        line.push(b'\n');

        trail.append_line(&self.path, &line)?;

        tracing::trace!(audit_id = %id, action = %entry.action(), "audit entry appended");
        Ok(id)
    }
}

impl AuditQuery for JsonlAuditSink {
    fn query(&self, filter: &AuditFilter) -> AccessResult<Vec<AuditEntry>> {
        let trail = self.lock_trail()?;
        let _lock = FileLock::exclusive(&trail.file)?;
        if !trail.poisoned {
            repair_torn_tail(&mut &trail.file, &self.path)?;
        }
        let entries = self.read_all()?;
        Ok(filter.apply(entries.iter()))
    }
}
