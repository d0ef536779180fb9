//! Constants used throughout the PIPA core crate.
//!
//! Path and filename constants live here so storage layout stays consistent across the
//! file-backed stores.

/// Default directory for data storage when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "patient_data";

/// Directory name for patient record storage.
pub const PATIENTS_DIR_NAME: &str = "patients";

/// Directory name for consent record storage.
pub const CONSENT_DIR_NAME: &str = "consent";

/// Directory name for the audit log.
pub const AUDIT_DIR_NAME: &str = "audit";

/// Filename for a single patient's record within its sharded directory.
pub const PATIENT_JSON_FILENAME: &str = "patient.json";

/// Filename for the consent ledger.
pub const CONSENTS_JSON_FILENAME: &str = "consents.json";

/// Lock file guarding updates to the consent ledger.
pub const CONSENTS_LOCK_FILENAME: &str = "consents.lock";

/// Lock file, in the patients directory, guarding updates to patient records.
pub const RECORDS_LOCK_FILENAME: &str = "records.lock";

/// Filename for the append-only audit log (one JSON entry per line).
pub const AUDIT_LOG_FILENAME: &str = "audit.jsonl";

/// Maximum length kept for a `User-Agent` string in audit metadata.
pub const MAX_USER_AGENT_LEN: usize = 512;
