//! Validated text primitives shared across the PIPA access core.
//!
//! Types in this crate guarantee their invariants once constructed, so the rest of the
//! workspace never has to re-check them:
//! - [`NonEmptyText`] for identities and labels that must carry content
//! - [`FieldName`] for record field names, which are the only record data allowed into audit
//!   entries

use std::collections::BTreeSet;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input exceeded the maximum permitted length
    #[error("Text exceeds maximum length of {max} characters")]
    TooLong { max: usize },
    /// The input is not shaped like a field name
    #[error("Invalid field name '{0}': expected a letter followed by letters, digits or '_'")]
    InvalidFieldName(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// The name of a field on a patient record, such as `medicalHistory`.
///
/// A field name is an ASCII letter followed by ASCII letters, digits or `_`, at most
/// [`FieldName::MAX_LEN`] characters long. Free text, numbers, dates and JSON documents all
/// fail this check, which keeps record values out of anything typed as a `FieldName`.
///
/// Unlike [`NonEmptyText`], the input is **not** trimmed: surrounding whitespace is rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldName(String);

/// An ordered, de-duplicated set of field names.
pub type FieldSet = BTreeSet<FieldName>;

impl FieldName {
    pub const MAX_LEN: usize = 64;

    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let raw = input.as_ref();
        if raw.is_empty() {
            return Err(TextError::Empty);
        }
        if raw.len() > Self::MAX_LEN {
            return Err(TextError::TooLong { max: Self::MAX_LEN });
        }
        if !Self::is_valid(raw) {
            return Err(TextError::InvalidFieldName(raw.to_owned()));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Returns true if `input` is shaped like a field name (length is not checked).
    pub fn is_valid(input: &str) -> bool {
        let mut bytes = input.bytes();
        match bytes.next() {
            Some(b) if b.is_ascii_alphabetic() => {}
            _ => return false,
        }
        bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses every name in `names` into a [`FieldSet`], failing on the first invalid one.
    pub fn parse_set<I, S>(names: I) -> Result<FieldSet, TextError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().map(FieldName::new).collect()
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for FieldName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for FieldName {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for FieldName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for FieldName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FieldName::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  dr-smith  ").unwrap();
        assert_eq!(text.as_str(), "dr-smith");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new("   \t"), Err(TextError::Empty));
    }

    #[test]
    fn field_name_accepts_schema_names() {
        for name in ["medicalHistory", "healthCardNumber", "postal_code", "a1"] {
            assert!(FieldName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn field_name_rejects_value_shaped_input() {
        for value in [
            "123-456-789",
            "Jane Doe",
            "9876543210",
            "{\"diagnosis\":\"asthma\"}",
            "1985-04-12",
            " email",
            "_private",
        ] {
            assert!(
                matches!(FieldName::new(value), Err(TextError::InvalidFieldName(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn field_name_rejects_empty_and_long_input() {
        assert_eq!(FieldName::new(""), Err(TextError::Empty));
        let long = "a".repeat(FieldName::MAX_LEN + 1);
        assert_eq!(
            FieldName::new(long),
            Err(TextError::TooLong {
                max: FieldName::MAX_LEN
            })
        );
    }

    #[test]
    fn parse_set_deduplicates() {
        let set = FieldName::parse_set(["email", "email", "city"]).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn field_name_deserialize_validates() {
        let ok: FieldName = serde_json::from_str("\"medications\"").unwrap();
        assert_eq!(ok.as_str(), "medications");
        assert!(serde_json::from_str::<FieldName>("\"not a name\"").is_err());
    }
}
