//! Core value types shared by the node stores, the repository and the backup format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single typed property value.
///
/// Serialized as `{"type": "STRING", "value": "..."}`; dates use RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyValue {
    Boolean(bool),
    String(String),
    Date(DateTime<Utc>),
    /// Arbitrary precision decimal kept in its canonical string form.
    Decimal(String),
    Double(f64),
    Long(i64),
    /// Reserved for file content; never enumerated by node snapshots.
    Binary(Vec<u8>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(l) => Some(*l),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::Date(d) => Some(*d),
            PropertyValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, PropertyValue::Binary(_))
    }

    /// NaN and the infinities have no JSON form and cannot be stored.
    pub fn is_storable(&self) -> bool {
        match self {
            PropertyValue::Double(d) => d.is_finite(),
            _ => true,
        }
    }
}

/// A property is either a single value or a small array of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    Single(PropertyValue),
    Multiple(Vec<PropertyValue>),
}

impl Property {
    pub fn string(value: impl Into<String>) -> Self {
        Property::Single(PropertyValue::String(value.into()))
    }

    pub fn long(value: i64) -> Self {
        Property::Single(PropertyValue::Long(value))
    }

    pub fn boolean(value: bool) -> Self {
        Property::Single(PropertyValue::Boolean(value))
    }

    pub fn date(value: DateTime<Utc>) -> Self {
        Property::Single(PropertyValue::Date(value))
    }

    /// The scalar value, if this is not an array.
    pub fn single(&self) -> Option<&PropertyValue> {
        match self {
            Property::Single(v) => Some(v),
            Property::Multiple(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        match self {
            Property::Single(v) => v.is_binary(),
            Property::Multiple(values) => values.iter().any(PropertyValue::is_binary),
        }
    }

    pub fn is_storable(&self) -> bool {
        match self {
            Property::Single(v) => v.is_storable(),
            Property::Multiple(values) => values.iter().all(PropertyValue::is_storable),
        }
    }
}

/// Properties of one node, ordered by name.
pub type PropertyMap = BTreeMap<String, Property>;

/// Snapshot of one node as read from a store session.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    /// Repository path, `/` for the top-level node.
    pub path: String,
    pub name: String,
    pub properties: PropertyMap,
    /// Child names in store enumeration order.
    pub children: Vec<String>,
}

/// Encryption-at-rest mode of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZipMode {
    /// Not encrypted.
    Standard,
    /// Encrypted with an algorithm that could not be identified.
    Encrypted,
    /// Traditional PKWARE zip encryption.
    EncryptedStandard,
    EncryptedAes128,
    EncryptedAes256,
}

impl ZipMode {
    pub fn is_encrypted(self) -> bool {
        !matches!(self, ZipMode::Standard)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ZipMode::Standard => "STANDARD",
            ZipMode::Encrypted => "ENCRYPTED",
            ZipMode::EncryptedStandard => "ENCRYPTED_STANDARD",
            ZipMode::EncryptedAes128 => "ENCRYPTED_AES128",
            ZipMode::EncryptedAes256 => "ENCRYPTED_AES256",
        }
    }
}

impl Default for ZipMode {
    fn default() -> Self {
        ZipMode::EncryptedAes256
    }
}

impl fmt::Display for ZipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZipMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "STANDARD" => Ok(ZipMode::Standard),
            "ENCRYPTED" => Ok(ZipMode::Encrypted),
            "ENCRYPTED_STANDARD" => Ok(ZipMode::EncryptedStandard),
            "ENCRYPTED_AES128" => Ok(ZipMode::EncryptedAes128),
            "ENCRYPTED_AES256" => Ok(ZipMode::EncryptedAes256),
            other => Err(format!("unknown zip mode: {}", other)),
        }
    }
}
