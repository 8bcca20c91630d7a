use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A schema version marker that (de)serializes as the number `V`
/// and rejects any other number.
///
/// Used to select between versioned formats with `#[serde(untagged)]`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version<const V: u8>;

impl<const V: u8> Version<V> {
    pub const fn value(&self) -> u8 {
        V
    }
}

impl<const V: u8> Default for Version<V> {
    fn default() -> Self {
        Self
    }
}

impl<const V: u8> Debug for Version<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version").field("value", &V).finish()
    }
}

#[derive(Debug, Error)]
#[error("expected version {expected}, found {found}")]
struct VersionError {
    expected: u8,
    found: u64,
}

impl<const V: u8> Serialize for Version<V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(V)
    }
}

impl<'de, const V: u8> Deserialize<'de> for Version<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u64::deserialize(deserializer)?;
        if value == V as u64 {
            Ok(Version::<V>)
        } else {
            Err(serde::de::Error::custom(VersionError {
                expected: V,
                found: value,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize, Deserialize, Debug)]
    #[serde(untagged)]
    enum Document {
        Current {
            #[serde(rename = "format-version")]
            version: Version<2>,
            entries: Vec<String>,
        },
        Legacy {
            #[serde(rename = "format-version")]
            version: Version<0>,
            entries: Vec<String>,
        },
    }

    #[test]
    fn selects_variant_by_version() {
        let doc: Document = serde_json::from_value(json!({
            "format-version": 0,
            "entries": []
        }))
        .unwrap();
        assert!(matches!(doc, Document::Legacy { .. }));

        let doc: Document = serde_json::from_value(json!({
            "format-version": 2,
            "entries": ["a"]
        }))
        .unwrap();
        assert!(matches!(doc, Document::Current { .. }));
    }

    #[test]
    fn rejects_unknown_version() {
        serde_json::from_value::<Document>(json!({
            "format-version": 7,
            "entries": []
        }))
        .expect_err("version 7 is not known");

        serde_json::from_value::<Version<1>>(json!(1000)).expect_err("out of range");
    }

    #[test]
    fn serializes_as_number() {
        assert_eq!(serde_json::to_value(Version::<2>).unwrap(), json!(2));
    }
}
