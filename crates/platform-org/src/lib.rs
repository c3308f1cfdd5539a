//! # Platform Organization Manifests
//!
//! This crate provides the declarative object model reconciled against the
//! Relay platform: projects and the role bindings that grant users roles
//! within them.
//!
//! ## Overview
//!
//! The platform-org crate handles:
//! - **Manifests**: The `apiVersion` / `kind` / `metadata` envelope
//! - **Projects**: Named organizational containers
//! - **Role Bindings**: Role grants to users within a project
//! - **Roles**: Organization and project roles, per-role binding policy
//! - **Naming**: Name charset rules, sanitization and truncation
//!
//! ## Architecture
//!
//! ```text
//! Manifest (apiVersion, kind, metadata)
//!   ├─ Project
//!   └─ RoleBinding ─→ Project (by name)
//!         ├─ role ─→ RoleBindingRequirements
//!         └─ subjects / users (emails)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use platform_org::{Project, RoleBinding, RoleBindingRequirements};
//!
//! let project = Project::new("marketing-docs").with_display_name("Marketing Docs");
//! let binding = RoleBinding::new("docs-owners", project.name(), "owner")
//!     .with_user("alice@example.com");
//!
//! let policy = RoleBindingRequirements::for_role(binding.role());
//! assert_eq!(policy.min_users, 1);
//! ```

pub mod manifest;
pub mod naming;
pub mod project;
pub mod role_binding;
pub mod roles;

// Re-export main types for convenience
pub use manifest::{ApiVersion, ObjectKind, ObjectMeta, API_GROUP, SUPPORTED_VERSIONS};
pub use naming::{is_valid_name, sanitize_name, truncate, MAX_NAME_LENGTH};
pub use project::{Project, ProjectSpec, ProjectVisibility};
pub use role_binding::{MemberExtraction, RoleBinding, RoleBindingSpec, Subject};
pub use roles::{OrganizationRole, ProjectRole, RoleBindingRequirements};
