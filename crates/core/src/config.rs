//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the mediator. Core
//! code never reads process-wide environment variables while handling a request; binaries read
//! the environment and call the helpers here.

use crate::constants::{AUDIT_DIR_NAME, CONSENT_DIR_NAME, DEFAULT_DATA_DIR, PATIENTS_DIR_NAME};
use crate::policy::AccessPolicy;
use crate::{AccessError, AccessResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    policy: AccessPolicy,
}

impl CoreConfig {
    pub fn new(data_dir: PathBuf, policy: AccessPolicy) -> AccessResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(AccessError::InvalidInput(
                "data directory cannot be empty".into(),
            ));
        }

        Ok(Self { data_dir, policy })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn patients_dir(&self) -> PathBuf {
        self.data_dir.join(PATIENTS_DIR_NAME)
    }

    pub fn consent_dir(&self) -> PathBuf {
        self.data_dir.join(CONSENT_DIR_NAME)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join(AUDIT_DIR_NAME)
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}

/// Resolve the data directory from an optional environment value.
///
/// `None` or a blank value falls back to [`DEFAULT_DATA_DIR`].
pub fn data_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Load the access policy.
///
/// If `policy_file` is `None` the built-in default policy is used. A file that is given but
/// cannot be read or parsed is an error rather than a silent fallback.
pub fn load_policy(policy_file: Option<&Path>) -> AccessResult<AccessPolicy> {
    match policy_file {
        None => Ok(AccessPolicy::default()),
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(AccessError::FileRead)?;
            AccessPolicy::from_yaml(&contents)
        }
    }
}
