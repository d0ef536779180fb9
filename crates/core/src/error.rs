use crate::identity::{Purpose, Role};

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid text: {0}")]
    Text(#[from] pipa_types::TextError),
    #[error("invalid identifier: {0}")]
    Identifier(#[from] pipa_uuid::UuidError),

    #[error("role '{role}' is not permitted to act for purpose '{purpose}'")]
    RoleNotPermitted { role: Role, purpose: Purpose },
    #[error("no active consent for purpose '{purpose}'")]
    ConsentMissing { purpose: Purpose },
    #[error("consent records could not be read; access denied")]
    ConsentUnavailable,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("failed to write audit entry: {0}")]
    AuditWriteFailed(String),

    #[error("failed to create storage directory: {0}")]
    DirCreation(std::io::Error),
    #[error("failed to read file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to lock file: {0}")]
    FileLock(std::io::Error),
    #[error("failed to serialize: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),
    #[error("{store} lock poisoned")]
    LockPoisoned { store: &'static str },
}

pub type AccessResult<T> = std::result::Result<T, AccessError>;
