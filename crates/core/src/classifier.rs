//! Static sensitivity classification of patient record fields.
//!
//! Fields named as personal health information are [`Sensitivity::Sensitive`]. Only the
//! fields listed in [`NON_SENSITIVE_FIELDS`] are non-sensitive; any other name, including one
//! added to the record later without updating this table, is treated as sensitive.

use pipa_types::{FieldName, FieldSet};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Sensitive,
    NonSensitive,
}

/// Fields explicitly known to be personal health information.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "socialInsuranceNumber",
    "healthCardNumber",
    "medicalHistory",
    "medications",
    "allergies",
    "insuranceInfo",
];

/// Identity, contact and bookkeeping fields that can be disclosed without consent.
pub const NON_SENSITIVE_FIELDS: &[&str] = &[
    "id",
    "firstName",
    "lastName",
    "dateOfBirth",
    "address",
    "city",
    "province",
    "postalCode",
    "phoneNumber",
    "email",
    "emergencyContacts",
    "createdAt",
    "updatedAt",
];

/// A field set split by sensitivity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub sensitive: FieldSet,
    pub non_sensitive: FieldSet,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FieldClassifier;

impl FieldClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, field: &FieldName) -> Sensitivity {
        if NON_SENSITIVE_FIELDS.contains(&field.as_str()) {
            Sensitivity::NonSensitive
        } else {
            Sensitivity::Sensitive
        }
    }

    pub fn partition(&self, fields: &FieldSet) -> Partition {
        let mut partition = Partition::default();
        for field in fields {
            match self.classify(field) {
                Sensitivity::Sensitive => partition.sensitive.insert(field.clone()),
                Sensitivity::NonSensitive => partition.non_sensitive.insert(field.clone()),
            };
        }
        partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> FieldName {
        FieldName::new(s).unwrap()
    }

    #[test]
    fn listed_sensitive_fields_are_sensitive() {
        let classifier = FieldClassifier::new();
        for field in SENSITIVE_FIELDS {
            assert_eq!(classifier.classify(&name(field)), Sensitivity::Sensitive);
        }
    }

    #[test]
    fn contact_fields_are_not_sensitive() {
        let classifier = FieldClassifier::new();
        for field in ["firstName", "phoneNumber", "postalCode"] {
            assert_eq!(classifier.classify(&name(field)), Sensitivity::NonSensitive);
        }
    }

    #[test]
    fn unknown_field_fails_closed() {
        let classifier = FieldClassifier::new();
        assert_eq!(
            classifier.classify(&name("geneticMarkers")),
            Sensitivity::Sensitive
        );
        // Matching is exact; a differently cased name is a different field.
        assert_eq!(classifier.classify(&name("Email")), Sensitivity::Sensitive);
    }

    #[test]
    fn tables_do_not_overlap() {
        assert!(SENSITIVE_FIELDS
            .iter()
            .all(|f| !NON_SENSITIVE_FIELDS.contains(f)));
    }

    #[test]
    fn partition_splits_mixed_request() {
        let fields = FieldName::parse_set(["email", "medications", "unknownThing"]).unwrap();
        let partition = FieldClassifier::new().partition(&fields);

        assert_eq!(
            partition.non_sensitive,
            FieldName::parse_set(["email"]).unwrap()
        );
        assert_eq!(
            partition.sensitive,
            FieldName::parse_set(["medications", "unknownThing"]).unwrap()
        );
    }
}
