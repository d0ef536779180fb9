//! Typed identifiers for stored records.
//!
//! Both wrap a canonical [`ShardableUuid`]; the wrappers stop a consent id from being passed
//! where a patient id is expected.

use pipa_uuid::{ShardableUuid, UuidResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(ShardableUuid);

impl PatientId {
    pub fn new() -> Self {
        Self(ShardableUuid::new())
    }

    pub fn parse(input: &str) -> UuidResult<Self> {
        ShardableUuid::parse(input).map(Self)
    }

    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        self.0.sharded_dir(parent_dir)
    }
}

impl Default for PatientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PatientId {
    type Err = pipa_uuid::UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsentId(ShardableUuid);

impl ConsentId {
    pub fn new() -> Self {
        Self(ShardableUuid::new())
    }

    pub fn parse(input: &str) -> UuidResult<Self> {
        ShardableUuid::parse(input).map(Self)
    }
}

impl Default for ConsentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ConsentId {
    type Err = pipa_uuid::UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
