//! Project manifests
//!
//! A project is a named organizational container. Role bindings reference a
//! project by its `metadata.name`.

use serde::{Deserialize, Serialize};

use crate::manifest::ObjectMeta;

/// Maximum length of a project display name.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 256;

/// A declared project.
///
/// # Examples
///
/// ```
/// use platform_org::Project;
///
/// let project = Project::new("marketing-docs").with_display_name("Marketing Docs");
/// assert_eq!(project.name(), "marketing-docs");
/// assert_eq!(project.display_name(), "Marketing Docs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired project state
    #[serde(default)]
    pub spec: ProjectSpec,
}

/// Desired state of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Project description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Visibility level determining who can see the project
    #[serde(default)]
    pub visibility: ProjectVisibility,

    /// Tags for categorization and filtering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Project {
    /// Creates a project with default spec.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: ProjectSpec::default(),
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.spec.display_name = Some(display_name.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.spec.description = Some(description.into());
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: ProjectVisibility) -> Self {
        self.spec.visibility = visibility;
        self
    }

    /// The project name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The display name, falling back to the project name.
    pub fn display_name(&self) -> &str {
        self.spec
            .display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.metadata.name)
    }
}

/// Project visibility levels.
///
/// Determines who can see and access a project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectVisibility {
    /// Visible to everyone (public projects)
    Public,

    /// Visible to all organization members
    #[default]
    Organization,

    /// Visible only to explicitly bound members
    Private,
}

impl ProjectVisibility {
    /// Get string representation of the visibility.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Organization => "organization",
            Self::Private => "private",
        }
    }
}
