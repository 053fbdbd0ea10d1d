//! Secret string handling with redacted display and serialization.
//!
//! Database passwords live in a `RedactedString` so they never leak through
//! `Debug` output, tracing fields or a re-serialized configuration.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use zeroize::Zeroize;

/// Placeholder shown instead of the actual secret
pub static REDACTED_PASSWORD: &str = "###REDACTED_PASSWORD###";

/// A string that gets redacted in debug output and serialization.
///
/// The value is zeroed on drop. An empty value is allowed and is meaningful:
/// it marks a database account without a password.
#[derive(Clone, Default, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[builder(into)]
    inner: String,
}

impl RedactedString {
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for RedactedString {
    fn from(value: &str) -> Self {
        Self::builder().inner(value).build()
    }
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.inner.is_empty() {
            write!(f, "\"\"")
        } else {
            write!(f, "{}", REDACTED_PASSWORD)
        }
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_PASSWORD)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_any(RedactedStringVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

pub struct RedactedStringVisitor;

impl Visitor<'_> for RedactedStringVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::from(v))
    }

    // YAML scalars such as `password: 1234` arrive as numbers
    fn visit_i64<E>(self, v: i64) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::from(v.to_string()))
    }

    fn visit_u64<E>(self, v: u64) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::from(v.to_string()))
    }

    fn visit_unit<E>(self) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = RedactedString::from("hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert_eq!(debug, REDACTED_PASSWORD);
    }

    #[test]
    fn test_serialize_is_redacted() {
        let secret = RedactedString::from("hunter2");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, format!("\"{}\"", REDACTED_PASSWORD));
    }

    #[test]
    fn test_deserialize_keeps_value() {
        let secret: RedactedString = serde_json::from_str("\"it's\"").unwrap();
        assert_eq!(secret.inner(), "it's");
        assert!(!secret.is_empty());
    }

    #[test]
    fn test_deserialize_numeric_and_null() {
        let numeric: RedactedString = serde_yml::from_str("1234").unwrap();
        assert_eq!(numeric.inner(), "1234");

        let null: RedactedString = serde_yml::from_str("~").unwrap();
        assert!(null.is_empty());
    }

    #[test]
    fn test_zeroize_clears_value() {
        let mut secret = RedactedString::from("hunter2");
        secret.zeroize();
        assert!(secret.is_empty());
    }
}
