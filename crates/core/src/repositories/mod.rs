//! File-backed stores.
//!
//! Layout under the configured data directory:
//!
//! ```text
//! patients/<s1>/<s2>/<patient_uuid>/patient.json   # one record per patient
//! consent/consents.json                            # every consent record ever granted
//! audit/audit.jsonl                                # append-only, one entry per line
//! ```

mod audit_log;
mod consents;
mod records;
mod shared;

pub use audit_log::JsonlAuditSink;
pub use consents::FileConsentStore;
pub use records::FileRecordStore;
