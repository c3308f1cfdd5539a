//! Roles and role binding policy
//!
//! Organization roles describe what a user already is within the platform;
//! project roles are what a role binding grants. Each project role has a
//! fixed [`RoleBindingRequirements`] policy.

use serde::{Deserialize, Serialize};

/// User role within the organization, as reported by the platform.
///
/// The hierarchy is: Guest < Viewer < Editor < Admin < Owner
///
/// # Examples
///
/// ```
/// use platform_org::OrganizationRole;
///
/// assert_eq!(OrganizationRole::parse("ADMIN"), Some(OrganizationRole::Admin));
/// assert!(OrganizationRole::Owner > OrganizationRole::Editor);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationRole {
    /// Guest access (limited visibility)
    Guest = 0,

    /// Read-only access to organization resources
    Viewer = 1,

    /// Can create and edit content
    Editor = 2,

    /// Can manage projects and members
    Admin = 3,

    /// Full organization control
    Owner = 4,
}

impl OrganizationRole {
    /// Parse role from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "guest" => Some(Self::Guest),
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Get lowercase string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

/// Role granted within a project by a role binding.
///
/// The hierarchy is: Viewer < Editor < Admin < Owner
///
/// # Examples
///
/// ```
/// use platform_org::ProjectRole;
///
/// assert_eq!(ProjectRole::parse("Editor"), Some(ProjectRole::Editor));
/// assert_eq!(ProjectRole::parse("auditor"), None);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    /// Read-only access
    Viewer = 1,

    /// Can create and edit content
    Editor = 2,

    /// Can manage project settings and members
    Admin = 3,

    /// Project owner (can delete)
    Owner = 4,
}

impl ProjectRole {
    /// Parse role from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Get lowercase string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    /// Policy applied to bindings granting this role.
    pub fn requirements(&self) -> RoleBindingRequirements {
        use OrganizationRole as Org;

        match self {
            Self::Owner => RoleBindingRequirements {
                min_users: 1,
                max_users: Some(3),
                required_roles: vec![Org::Admin, Org::Owner],
                allowed_roles: vec![Org::Editor, Org::Admin, Org::Owner],
                project_required: true,
            },
            Self::Admin => RoleBindingRequirements {
                min_users: 1,
                max_users: Some(10),
                required_roles: Vec::new(),
                allowed_roles: vec![Org::Editor, Org::Admin, Org::Owner],
                project_required: true,
            },
            Self::Editor => RoleBindingRequirements {
                min_users: 1,
                max_users: Some(50),
                required_roles: Vec::new(),
                allowed_roles: vec![Org::Viewer, Org::Editor, Org::Admin, Org::Owner],
                project_required: true,
            },
            Self::Viewer => RoleBindingRequirements::default(),
        }
    }
}

/// Per-role policy for role bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBindingRequirements {
    /// Minimum number of assignable users
    pub min_users: usize,

    /// Maximum number of assignable users (`None` = unbounded)
    pub max_users: Option<usize>,

    /// At least one assignable user must hold one of these organization
    /// roles (empty = no constraint)
    pub required_roles: Vec<OrganizationRole>,

    /// Organization roles eligible to receive the binding (empty = any)
    pub allowed_roles: Vec<OrganizationRole>,

    /// Whether the referenced project must exist remotely
    pub project_required: bool,
}

impl Default for RoleBindingRequirements {
    /// The permissive policy used for roles without a table entry.
    fn default() -> Self {
        Self {
            min_users: 1,
            max_users: None,
            required_roles: Vec::new(),
            allowed_roles: Vec::new(),
            project_required: true,
        }
    }
}

impl RoleBindingRequirements {
    /// Look up the policy for a role name (case-insensitive).
    ///
    /// Unknown roles get the permissive default.
    ///
    /// # Examples
    ///
    /// ```
    /// use platform_org::RoleBindingRequirements;
    ///
    /// assert_eq!(RoleBindingRequirements::for_role("OWNER").max_users, Some(3));
    /// assert_eq!(RoleBindingRequirements::for_role("auditor").max_users, None);
    /// ```
    pub fn for_role(role: &str) -> Self {
        ProjectRole::parse(role)
            .map(|r| r.requirements())
            .unwrap_or_default()
    }

    /// Check whether a user holding `role` may receive the binding.
    ///
    /// Users without a known organization role are only eligible when the
    /// policy allows any role.
    pub fn permits(&self, role: Option<OrganizationRole>) -> bool {
        if self.allowed_roles.is_empty() {
            return true;
        }
        role.map_or(false, |r| self.allowed_roles.contains(&r))
    }

    /// Check whether the set of assignable users' roles satisfies
    /// `required_roles`.
    pub fn required_roles_met<I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = Option<OrganizationRole>>,
    {
        if self.required_roles.is_empty() {
            return true;
        }
        roles
            .into_iter()
            .flatten()
            .any(|r| self.required_roles.contains(&r))
    }

    /// Describe a violation of the user count bounds, if any.
    pub fn count_violation(&self, assignable: usize) -> Option<String> {
        if assignable < self.min_users {
            return Some(format!(
                "requires at least {} assignable user(s), found {}",
                self.min_users, assignable
            ));
        }
        match self.max_users {
            Some(max) if assignable > max => Some(format!(
                "allows at most {} user(s), found {}",
                max, assignable
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_role_hierarchy() {
        assert!(OrganizationRole::Owner > OrganizationRole::Admin);
        assert!(OrganizationRole::Admin > OrganizationRole::Editor);
        assert!(OrganizationRole::Editor > OrganizationRole::Viewer);
        assert!(OrganizationRole::Viewer > OrganizationRole::Guest);
    }

    #[test]
    fn test_project_role_parse() {
        assert_eq!(ProjectRole::parse("admin"), Some(ProjectRole::Admin));
        assert_eq!(ProjectRole::parse(" VIEWER "), Some(ProjectRole::Viewer));
        assert_eq!(ProjectRole::parse("invalid"), None);
    }

    #[test]
    fn test_requirements_lookup_case_insensitive() {
        assert_eq!(
            RoleBindingRequirements::for_role("Admin"),
            ProjectRole::Admin.requirements()
        );
        assert_eq!(
            RoleBindingRequirements::for_role("something-custom"),
            RoleBindingRequirements::default()
        );
    }

    #[test]
    fn test_permits() {
        let owner = ProjectRole::Owner.requirements();
        assert!(owner.permits(Some(OrganizationRole::Admin)));
        assert!(!owner.permits(Some(OrganizationRole::Guest)));
        assert!(!owner.permits(None));

        let viewer = ProjectRole::Viewer.requirements();
        assert!(viewer.permits(None));
        assert!(viewer.permits(Some(OrganizationRole::Guest)));
    }

    #[test]
    fn test_required_roles_met() {
        let owner = ProjectRole::Owner.requirements();
        assert!(!owner.required_roles_met(vec![Some(OrganizationRole::Editor), None]));
        assert!(owner.required_roles_met(vec![
            Some(OrganizationRole::Editor),
            Some(OrganizationRole::Owner),
        ]));
        assert!(ProjectRole::Editor.requirements().required_roles_met(Vec::new()));
    }

    #[test]
    fn test_count_violation() {
        let owner = ProjectRole::Owner.requirements();
        assert!(owner.count_violation(0).is_some());
        assert!(owner.count_violation(2).is_none());
        assert!(owner.count_violation(4).unwrap().contains("at most 3"));
        assert!(RoleBindingRequirements::default().count_violation(500).is_none());
    }
}
