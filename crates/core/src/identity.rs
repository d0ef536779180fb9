//! Actors, roles and the purposes an access can be made for.

use crate::error::{AccessError, AccessResult};
use pipa_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of whoever performs an action (staff user, patient, guardian).
pub type ActorId = NonEmptyText;

/// Staff role. The set is closed; which purposes a role may invoke is configured through
/// [`AccessPolicy`](crate::policy::AccessPolicy).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Physician,
    Nurse,
    Admin,
    Billing,
    Receptionist,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Physician,
        Role::Nurse,
        Role::Admin,
        Role::Billing,
        Role::Receptionist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Physician => "physician",
            Role::Nurse => "nurse",
            Role::Admin => "admin",
            Role::Billing => "billing",
            Role::Receptionist => "receptionist",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> AccessResult<Self> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| AccessError::InvalidInput(format!("unknown role '{s}'")))
    }
}

/// Why data is being accessed. Consent is always granted for exactly one purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Treatment,
    Billing,
    Referral,
    Research,
    Emergency,
}

impl Purpose {
    pub const ALL: [Purpose; 5] = [
        Purpose::Treatment,
        Purpose::Billing,
        Purpose::Referral,
        Purpose::Research,
        Purpose::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Treatment => "treatment",
            Purpose::Billing => "billing",
            Purpose::Referral => "referral",
            Purpose::Research => "research",
            Purpose::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = AccessError;

    fn from_str(s: &str) -> AccessResult<Self> {
        Purpose::ALL
            .into_iter()
            .find(|purpose| purpose.as_str() == s)
            .ok_or_else(|| AccessError::InvalidInput(format!("unknown purpose '{s}'")))
    }
}

/// A staff member requesting access to patient data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<NonEmptyText>,
}

impl Actor {
    pub fn new(id: ActorId, role: Role) -> Self {
        Self {
            id,
            role,
            name: None,
            email: None,
            department: None,
        }
    }

    /// Parses an actor from raw strings, as supplied on the command line.
    pub fn parse(id: &str, role: &str) -> AccessResult<Self> {
        Ok(Self::new(NonEmptyText::new(id)?, role.parse()?))
    }

    pub fn with_name(mut self, name: NonEmptyText) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_email(mut self, email: NonEmptyText) -> Self {
        self.email = Some(email);
        self
    }

    pub fn with_department(mut self, department: NonEmptyText) -> Self {
        self.department = Some(department);
        self
    }
}
