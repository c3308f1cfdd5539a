//! Manifest envelope shared by every declarative object
//!
//! Each YAML document carries an `apiVersion` of the form
//! `platform.relay.io/<version>`, a `kind` and a `metadata` block.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API group every manifest must belong to.
pub const API_GROUP: &str = "platform.relay.io";

/// Schema versions accepted within [`API_GROUP`].
pub const SUPPORTED_VERSIONS: &[&str] = &["v1alpha1", "v1"];

/// A parsed `apiVersion` value.
///
/// # Examples
///
/// ```
/// use platform_org::manifest::ApiVersion;
///
/// let version = ApiVersion::parse("platform.relay.io/v1").unwrap();
/// assert_eq!(version.version, "v1");
/// assert!(ApiVersion::parse("apps/v1").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersion {
    /// API group
    pub group: String,

    /// Version within the group
    pub version: String,
}

impl ApiVersion {
    /// Parse and check an `apiVersion` string.
    ///
    /// # Returns
    ///
    /// `Some(ApiVersion)` when the group is [`API_GROUP`] and the version is
    /// one of [`SUPPORTED_VERSIONS`], `None` otherwise
    pub fn parse(s: &str) -> Option<Self> {
        let (group, version) = s.trim().split_once('/')?;
        if group != API_GROUP || !SUPPORTED_VERSIONS.contains(&version) {
            return None;
        }
        Some(Self {
            group: group.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.version)
    }
}

/// Object kinds understood by the reconciler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Organizational project container
    Project,

    /// Role grant within a project
    RoleBinding,
}

impl ObjectKind {
    /// Parse a manifest `kind` value.
    ///
    /// Kinds are matched exactly, as they are in the manifests themselves.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Project" => Some(Self::Project),
            "RoleBinding" => Some(Self::RoleBinding),
            _ => None,
        }
    }

    /// Get the manifest spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::RoleBinding => "RoleBinding",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name (unique per kind, or per project for role bindings)
    #[serde(default)]
    pub name: String,

    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Create metadata with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version_parse() {
        let v = ApiVersion::parse("platform.relay.io/v1alpha1").unwrap();
        assert_eq!(v.group, API_GROUP);
        assert_eq!(v.to_string(), "platform.relay.io/v1alpha1");
    }

    #[test]
    fn test_api_version_rejects_foreign() {
        assert!(ApiVersion::parse("").is_none());
        assert!(ApiVersion::parse("v1").is_none());
        assert!(ApiVersion::parse("platform.relay.io/v2").is_none());
        assert!(ApiVersion::parse("rbac.authorization.k8s.io/v1").is_none());
    }

    #[test]
    fn test_object_kind_parse() {
        assert_eq!(ObjectKind::parse("Project"), Some(ObjectKind::Project));
        assert_eq!(ObjectKind::parse("RoleBinding"), Some(ObjectKind::RoleBinding));
        assert_eq!(ObjectKind::parse("Deployment"), None);
        assert_eq!(ObjectKind::RoleBinding.to_string(), "RoleBinding");
    }
}
