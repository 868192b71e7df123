//! File records
//!
//! A file is a child of its node's reserved files collection. Its metadata lives as
//! properties on that child; the content is a blob owned by the node itself.

use crate::store::path;
use crate::types::{NodeData, Property, PropertyMap, ZipMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROP_FILE_ID: &str = "fileId";
pub const PROP_FILE_NAME: &str = "fileName";
pub const PROP_DESCRIPTION: &str = "description";
pub const PROP_CONTEXT_DATA: &str = "contextData";
pub const PROP_CREATED_AT: &str = "createdAt";
pub const PROP_CREATED_BY: &str = "createdByUser";
pub const PROP_LAST_UPDATE_AT: &str = "lastUpdateAt";
pub const PROP_LAST_UPDATE_BY: &str = "lastUpdateByUser";
pub const PROP_SIZE: &str = "sizeBytes";
pub const PROP_CHECKSUM: &str = "checksum";
pub const PROP_AES_ENCRYPTED: &str = "aesEncrypted";
pub const PROP_ZIP_MODE: &str = "zipMode";

/// Metadata of one stored file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Repository path of the owning node.
    pub node_path: String,
    /// Unique within the owning node; assigned on first store when empty.
    pub file_id: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque caller data kept alongside the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by_user: Option<String>,
    #[serde(default)]
    pub last_update_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_update_by_user: Option<String>,
    /// Size of the stored bytes.
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Hex SHA-256 of the stored bytes.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Legacy flag: some encryption was applied.
    #[serde(default)]
    pub aes_encrypted: bool,
    #[serde(default)]
    pub zip_mode: Option<ZipMode>,
}

impl FileRecord {
    pub fn new(node_path: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            node_path: node_path.into(),
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Refer to an existing file by location only.
    pub fn reference(node_path: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            node_path: node_path.into(),
            file_id: file_id.into(),
            ..Self::default()
        }
    }

    pub fn has_id(&self) -> bool {
        !self.file_id.trim().is_empty()
    }

    /// Repository path of the metadata node.
    pub fn metadata_path(&self) -> String {
        path::file_node(&self.node_path, &self.file_id)
    }

    /// Whether reading the content needs a password.
    ///
    /// Only content encrypted by the repository counts; an uploaded encrypted zip is
    /// returned as stored. A `STANDARD` zip mode overrides a stale `aesEncrypted` flag.
    pub fn is_encrypted(&self) -> bool {
        self.aes_encrypted && self.zip_mode.map_or(true, ZipMode::is_encrypted)
    }

    /// Files whose stored bytes are a zip container.
    pub fn is_zip_type(&self) -> bool {
        self.aes_encrypted || self.has_zip_extension()
    }

    pub fn has_zip_extension(&self) -> bool {
        self.file_name.to_ascii_lowercase().ends_with(".zip")
    }

    /// Build a record from the properties of its metadata node.
    pub fn from_node(node_path: &str, node: &NodeData) -> Self {
        let props = &node.properties;
        let string = |name: &str| {
            props
                .get(name)
                .and_then(Property::single)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let date = |name: &str| props.get(name).and_then(Property::single).and_then(|v| v.as_date());
        Self {
            node_path: node_path.to_string(),
            file_id: string(PROP_FILE_ID).unwrap_or_else(|| node.name.clone()),
            file_name: string(PROP_FILE_NAME).unwrap_or_default(),
            description: string(PROP_DESCRIPTION),
            context_data: string(PROP_CONTEXT_DATA),
            created_at: date(PROP_CREATED_AT),
            created_by_user: string(PROP_CREATED_BY),
            last_update_at: date(PROP_LAST_UPDATE_AT),
            last_update_by_user: string(PROP_LAST_UPDATE_BY),
            size_bytes: props
                .get(PROP_SIZE)
                .and_then(Property::single)
                .and_then(|v| v.as_long())
                .and_then(|l| u64::try_from(l).ok()),
            checksum: string(PROP_CHECKSUM).filter(|c| !c.is_empty()),
            aes_encrypted: props
                .get(PROP_AES_ENCRYPTED)
                .and_then(Property::single)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            zip_mode: string(PROP_ZIP_MODE).and_then(|m| m.parse().ok()),
        }
    }

    /// Property writes that persist this record; `None` removes the property.
    pub fn to_properties(&self) -> Vec<(&'static str, Option<Property>)> {
        vec![
            (PROP_FILE_ID, Some(Property::string(&self.file_id))),
            (PROP_FILE_NAME, Some(Property::string(&self.file_name))),
            (PROP_DESCRIPTION, self.description.as_deref().map(Property::string)),
            (PROP_CONTEXT_DATA, self.context_data.as_deref().map(Property::string)),
            (PROP_CREATED_AT, self.created_at.map(Property::date)),
            (PROP_CREATED_BY, self.created_by_user.as_deref().map(Property::string)),
            (PROP_LAST_UPDATE_AT, self.last_update_at.map(Property::date)),
            (PROP_LAST_UPDATE_BY, self.last_update_by_user.as_deref().map(Property::string)),
            (
                PROP_SIZE,
                self.size_bytes
                    .map(|s| Property::long(i64::try_from(s).unwrap_or(i64::MAX))),
            ),
            (PROP_CHECKSUM, self.checksum.as_deref().map(Property::string)),
            (PROP_AES_ENCRYPTED, Some(Property::boolean(self.aes_encrypted))),
            (PROP_ZIP_MODE, self.zip_mode.map(|m| Property::string(m.as_str()))),
        ]
    }

    /// Same as [`to_properties`](Self::to_properties), as a map of present values.
    pub fn property_map(&self) -> PropertyMap {
        self.to_properties()
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
            .collect()
    }
}
