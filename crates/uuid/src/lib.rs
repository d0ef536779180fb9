//! Identifier and sharded-path utilities.
//!
//! Patient and consent records are keyed by a *canonical* UUID representation: **32 lowercase
//! hexadecimal characters** (no hyphens). Audit entries are keyed by a time-prefixed
//! identifier so that an append-only log sorts in the order it was written.
//!
//! This crate provides:
//! - [`ShardableUuid`], which guarantees the canonical form once constructed and derives
//!   sharded storage directories from it.
//! - [`TimestampId`] and [`TimestampIdGenerator`] for strictly increasing, time-prefixed ids.
//!
//! ## Canonical UUID form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Canonical form is *required* for externally supplied identifiers (CLI arguments, stored
//! files). Uppercase, hyphenated, wrong-length or non-hex values are rejected.
//!
//! ## Sharded directory layout
//! For a canonical UUID `u`, records live under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! This keeps directory fan-out bounded as the number of patients grows.

mod service;

pub use service::{ShardableUuid, TimestampId, TimestampIdGenerator};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
