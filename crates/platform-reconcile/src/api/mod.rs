//! Platform API transport.
//!
//! [`PlatformApi`] is the raw capability surface of the remote platform: one
//! call, one attempt, no retries. Two implementations exist:
//! - `HttpPlatformApi`: JSON over HTTP with bearer-token authentication
//! - `MemoryPlatformApi`: in-process state with call counting and failure
//!   injection, for tests and local dry runs
//!
//! Retries are layered on top by [`crate::client::RemoteClient`].

pub mod http;
#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use platform_org::{OrganizationRole, Project, ProjectVisibility};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::Classify;

pub use http::HttpPlatformApi;
#[cfg(feature = "memory")]
pub use memory::{ApiOperation, MemoryPlatformApi};

/// Platform API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
        /// Retryability flag reported by the platform, if any.
        retryable: Option<bool>,
    },

    /// Requested object does not exist.
    #[error("{resource} not found: {name}")]
    NotFound {
        /// Resource type.
        resource: &'static str,
        /// Object name or lookup key.
        name: String,
    },

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Authentication failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Failure from a source that does not classify itself.
    #[error("{0}")]
    Other(String),
}

/// Result type for raw API calls.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Check whether this is a rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::Status { status: 429, .. })
    }
}

impl Classify for ApiError {
    fn retryable_hint(&self) -> Option<bool> {
        match self {
            ApiError::Status {
                status, retryable, ..
            } => Some(retryable.unwrap_or(matches!(status, 408 | 429 | 500..=599))),
            ApiError::RequestFailed(e) if e.is_timeout() || e.is_connect() => Some(true),
            ApiError::RequestFailed(_) => None,
            ApiError::NotFound { .. }
            | ApiError::InvalidResponse(_)
            | ApiError::AuthenticationFailed => Some(false),
            ApiError::Other(_) => None,
        }
    }
}

/// Lifecycle status of a platform user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Can be granted roles
    #[default]
    Active,
    /// Invited but not yet signed in
    Pending,
    /// Temporarily blocked
    Suspended,
    /// Removed from the organization
    Deactivated,
}

impl UserStatus {
    /// Check whether the user is active.
    pub fn is_active(&self) -> bool {
        matches!(self, UserStatus::Active)
    }

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Pending => "pending",
            UserStatus::Suspended => "suspended",
            UserStatus::Deactivated => "deactivated",
        }
    }
}

/// A user as known to the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteUser {
    /// Opaque platform user ID
    pub id: String,

    /// Primary email
    pub email: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: UserStatus,

    /// Role within the organization
    #[serde(default)]
    pub organization_role: Option<OrganizationRole>,
}

/// A project as stored by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteProject {
    /// Opaque platform project ID
    pub id: String,

    /// Project name
    pub name: String,

    /// Human-readable name
    pub display_name: String,

    /// Project description
    #[serde(default)]
    pub description: Option<String>,

    /// Visibility
    #[serde(default)]
    pub visibility: ProjectVisibility,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A role binding as stored by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteRoleBinding {
    /// Opaque platform ID
    #[serde(default)]
    pub id: Option<String>,

    /// Binding name
    pub name: String,

    /// Project name
    pub project: String,

    /// Granted role
    pub role: String,

    /// Bound user IDs
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// Body of a project create or update call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectRequest {
    /// Project name
    pub name: String,

    /// Human-readable name
    pub display_name: String,

    /// Project description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Visibility
    pub visibility: ProjectVisibility,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<&Project> for ProjectRequest {
    fn from(project: &Project) -> Self {
        Self {
            name: project.name().to_string(),
            display_name: project.display_name().to_string(),
            description: project.spec.description.clone(),
            visibility: project.spec.visibility,
            tags: project.spec.tags.clone(),
        }
    }
}

impl ProjectRequest {
    /// Check whether applying this request would change the remote project.
    pub fn differs_from(&self, remote: &RemoteProject) -> bool {
        self.display_name != remote.display_name
            || self.description != remote.description
            || self.visibility != remote.visibility
            || self.tags != remote.tags
    }
}

/// Body of a role binding create-or-update call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleBindingRequest {
    /// Binding name
    pub name: String,

    /// Project name
    pub project: String,

    /// Granted role
    pub role: String,

    /// User IDs to bind
    pub user_ids: Vec<String>,
}

/// Raw platform capability surface.
///
/// Each method performs exactly one remote call. Not-found conditions are
/// reported as [`ApiError::NotFound`].
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Fetch a project by name.
    async fn get_project(&self, name: &str) -> ApiResult<RemoteProject>;

    /// Create a project.
    async fn create_project(&self, request: &ProjectRequest) -> ApiResult<RemoteProject>;

    /// Update an existing project.
    async fn update_project(&self, request: &ProjectRequest) -> ApiResult<RemoteProject>;

    /// Fetch a role binding by project and name.
    async fn get_role_binding(&self, project: &str, name: &str) -> ApiResult<RemoteRoleBinding>;

    /// List the role bindings of a project in platform order.
    async fn list_role_bindings(&self, project: &str) -> ApiResult<Vec<RemoteRoleBinding>>;

    /// Create a role binding, or replace it if one of that name exists.
    async fn create_or_update_role_binding(
        &self,
        request: &RoleBindingRequest,
    ) -> ApiResult<RemoteRoleBinding>;

    /// Look up a user by email.
    async fn get_user(&self, email: &str) -> ApiResult<RemoteUser>;
}
