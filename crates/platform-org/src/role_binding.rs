//! Role binding manifests
//!
//! A role binding grants a project role to a set of users. Users are declared
//! by email, either as `subjects` of kind `User` or through the `users`
//! shorthand list.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::manifest::ObjectMeta;

/// Subject kind naming an individual user.
pub const USER_SUBJECT_KIND: &str = "User";

/// A declared role binding.
///
/// Fields are optional at the serde level so that a document missing its
/// project or role still parses and is rejected by validation with a precise
/// error instead.
///
/// # Examples
///
/// ```
/// use platform_org::RoleBinding;
///
/// let binding = RoleBinding::new("docs-editors", "marketing-docs", "editor")
///     .with_user("alice@example.com");
/// assert_eq!(binding.extract_members().emails, vec!["alice@example.com"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired binding state
    #[serde(default)]
    pub spec: RoleBindingSpec,
}

/// Desired state of a role binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBindingSpec {
    /// Name of the project the role is granted in
    #[serde(default)]
    pub project: String,

    /// Role name (see [`crate::ProjectRole`]; unknown roles are allowed)
    #[serde(default)]
    pub role: String,

    /// Declared subjects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<Subject>,

    /// Shorthand list of user emails
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
}

/// A subject of a role binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Subject kind (`User`, `Group`, ...)
    pub kind: String,

    /// Email address for user subjects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Name for non-user subjects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Subject {
    /// Create a user subject.
    pub fn user(email: impl Into<String>) -> Self {
        Self {
            kind: USER_SUBJECT_KIND.to_string(),
            email: Some(email.into()),
            name: None,
        }
    }

    /// Check whether this subject names an individual user.
    pub fn is_user(&self) -> bool {
        self.kind.eq_ignore_ascii_case(USER_SUBJECT_KIND)
    }
}

/// Candidate users derived from a role binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberExtraction {
    /// Normalized emails in declaration order, without duplicates
    pub emails: Vec<String>,

    /// Non-fatal findings (duplicates, skipped subject kinds)
    pub warnings: Vec<String>,

    /// Malformed subjects
    pub errors: Vec<String>,
}

impl RoleBinding {
    /// Creates a role binding without members.
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: RoleBindingSpec {
                project: project.into(),
                role: role.into(),
                subjects: Vec::new(),
                users: Vec::new(),
            },
        }
    }

    /// Add a user subject.
    pub fn with_user(mut self, email: impl Into<String>) -> Self {
        self.spec.subjects.push(Subject::user(email));
        self
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The referenced project name.
    pub fn project(&self) -> &str {
        &self.spec.project
    }

    /// The granted role name.
    pub fn role(&self) -> &str {
        &self.spec.role
    }

    /// Derive the candidate user list.
    ///
    /// User subjects come first, then the `users` shorthand, each in
    /// declaration order. Emails are trimmed and lowercased; repeated emails
    /// are dropped with a warning. Subjects of other kinds are skipped with a
    /// warning, and user subjects without an email are errors.
    pub fn extract_members(&self) -> MemberExtraction {
        let mut extraction = MemberExtraction::default();
        let mut seen = HashSet::new();

        let subject_emails = self.spec.subjects.iter().enumerate().filter_map(|(i, subject)| {
            if !subject.is_user() {
                extraction.warnings.push(format!(
                    "subject {} of kind '{}' is not supported and was skipped",
                    i, subject.kind
                ));
                return None;
            }
            match subject.email.as_deref().map(str::trim) {
                Some(email) if !email.is_empty() => Some(email.to_string()),
                _ => {
                    extraction
                        .errors
                        .push(format!("user subject {} has no email", i));
                    None
                }
            }
        });
        let candidates: Vec<String> = subject_emails
            .chain(self.spec.users.iter().map(|u| u.trim().to_string()))
            .collect();

        for email in candidates {
            if email.is_empty() {
                extraction.errors.push("empty entry in users list".to_string());
                continue;
            }
            let normalized = email.to_lowercase();
            if seen.insert(normalized.clone()) {
                extraction.emails.push(normalized);
            } else {
                extraction
                    .warnings
                    .push(format!("duplicate user '{}' ignored", normalized));
            }
        }

        extraction
    }
}
