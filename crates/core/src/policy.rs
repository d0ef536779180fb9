//! Role → purpose permissions.
//!
//! Which purposes a role may act for is configuration, loaded once at startup (see
//! [`crate::config`]) and handed to the mediator. Nothing in the mediator branches on a
//! particular role.

use crate::error::{AccessError, AccessResult};
use crate::identity::{Purpose, Role};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    roles: BTreeMap<Role, BTreeSet<Purpose>>,
}

impl AccessPolicy {
    /// A policy in which no role may act for any purpose.
    pub fn deny_all() -> Self {
        Self {
            roles: BTreeMap::new(),
        }
    }

    pub fn from_entries<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Role, P)>,
        P: IntoIterator<Item = Purpose>,
    {
        Self {
            roles: entries
                .into_iter()
                .map(|(role, purposes)| (role, purposes.into_iter().collect()))
                .collect(),
        }
    }

    /// Parses a policy document of the form `roles: { physician: [treatment, ...] }`.
    ///
    /// Roles missing from the document are permitted nothing.
    pub fn from_yaml(contents: &str) -> AccessResult<Self> {
        serde_yaml::from_str(contents).map_err(AccessError::YamlDeserialization)
    }

    pub fn permits(&self, role: Role, purpose: Purpose) -> bool {
        self.roles
            .get(&role)
            .is_some_and(|purposes| purposes.contains(&purpose))
    }

    pub fn purposes_for(&self, role: Role) -> impl Iterator<Item = Purpose> + '_ {
        self.roles.get(&role).into_iter().flatten().copied()
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        use Purpose::*;

        Self::from_entries([
            (Role::Physician, vec![Treatment, Referral, Research, Emergency]),
            (Role::Nurse, vec![Treatment, Emergency]),
            (Role::Admin, vec![Treatment, Billing, Referral]),
            (Role::Billing, vec![Billing]),
            (Role::Receptionist, vec![Treatment]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_role_may_only_bill() {
        let policy = AccessPolicy::default();
        assert!(policy.permits(Role::Billing, Purpose::Billing));
        for purpose in Purpose::ALL.into_iter().filter(|p| *p != Purpose::Billing) {
            assert!(!policy.permits(Role::Billing, purpose));
        }
    }

    #[test]
    fn yaml_policy_replaces_defaults() {
        let policy = AccessPolicy::from_yaml(
            "roles:\n  nurse: [treatment]\n  billing: [billing, treatment]\n",
        )
        .unwrap();

        assert!(policy.permits(Role::Nurse, Purpose::Treatment));
        assert!(!policy.permits(Role::Nurse, Purpose::Emergency));
        assert!(policy.permits(Role::Billing, Purpose::Treatment));
        assert!(!policy.permits(Role::Physician, Purpose::Treatment));
    }

    #[test]
    fn yaml_policy_rejects_unknown_purpose() {
        let err = AccessPolicy::from_yaml("roles:\n  nurse: [gossip]\n").unwrap_err();
        assert!(matches!(err, AccessError::YamlDeserialization(_)));
    }

    #[test]
    fn deny_all_permits_nothing() {
        let policy = AccessPolicy::deny_all();
        assert!(Role::ALL
            .into_iter()
            .all(|role| policy.purposes_for(role).next().is_none()));
    }
}
