use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DETACHED: &str = "detached";

/// Row status. Names outside the known set are kept verbatim in `Other` so a
/// dump with newer statuses still loads; they never match a configured status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    Available,
    #[serde(rename = "in-use")]
    InUse,
    Creating,
    Error,
    Deleting,
    ErrorDeleting,
    Attaching,
    Detaching,
    ErrorAttaching,
    #[serde(untagged)]
    Other(String),
}

impl VolumeStatus {
    pub const ALL: [VolumeStatus; 9] = [
        VolumeStatus::Available,
        VolumeStatus::InUse,
        VolumeStatus::Creating,
        VolumeStatus::Error,
        VolumeStatus::Deleting,
        VolumeStatus::ErrorDeleting,
        VolumeStatus::Attaching,
        VolumeStatus::Detaching,
        VolumeStatus::ErrorAttaching,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            VolumeStatus::Available => "available",
            VolumeStatus::InUse => "in-use",
            VolumeStatus::Creating => "creating",
            VolumeStatus::Error => "error",
            VolumeStatus::Deleting => "deleting",
            VolumeStatus::ErrorDeleting => "error_deleting",
            VolumeStatus::Attaching => "attaching",
            VolumeStatus::Detaching => "detaching",
            VolumeStatus::ErrorAttaching => "error_attaching",
            VolumeStatus::Other(s) => s,
        }
    }

    /// Known names only.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the storage backend's `volumes` table.
///
/// Only the columns the reconciliation touches are typed; every other column
/// (dates, size, display name, ...) rides along in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub status: VolumeStatus,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub volume_type_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub provider_location: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub attach_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Volume {
    /// Name of the backing file on an NFS share.
    #[inline]
    pub fn file_name(&self) -> String {
        format!("volume-{}", self.id)
    }

    /// Attachments never survive a move between clouds.
    pub fn detach(&mut self) {
        if self.status == VolumeStatus::InUse {
            self.status = VolumeStatus::Available;
            self.mountpoint = None;
            self.instance_uuid = None;
            self.attach_status = Some(DETACHED.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeType {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Database dump exchanged with the storage backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_types: Option<Vec<VolumeType>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Catalog view of `volume_types`; absent and empty both mean untyped.
    pub fn catalog(&self) -> TypeCatalog {
        TypeCatalog::from_types(self.volume_types.clone().unwrap_or_default())
    }
}

/// A cloud either has volume types or it has none, in which case every share
/// belongs to the single default bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeCatalog {
    Typed(Vec<VolumeType>),
    Untyped,
}

impl TypeCatalog {
    pub fn from_types(mut types: Vec<VolumeType>) -> Self {
        if types.is_empty() {
            return TypeCatalog::Untyped;
        }
        types.sort_by(|a, b| a.id.cmp(&b.id));
        TypeCatalog::Typed(types)
    }

    /// Types in id order; empty for the untyped catalog.
    pub fn types(&self) -> &[VolumeType] {
        match self {
            TypeCatalog::Typed(types) => types,
            TypeCatalog::Untyped => &[],
        }
    }

    pub fn name_index(&self) -> BTreeMap<&str, &str> {
        self.types()
            .iter()
            .map(|t| (t.name.as_str(), t.id.as_str()))
            .collect()
    }
}
