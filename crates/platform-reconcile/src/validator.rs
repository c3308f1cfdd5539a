//! Role binding and project validation.
//!
//! A role binding is validated in fixed-order stages:
//!
//! 1. Structural: name, project reference and role
//! 2. Project existence
//! 3. User extraction
//! 4. Per-user checks: format, resolution, existence, status, permission
//! 5. Role requirements
//! 6. Conflicts with bindings already in the project
//!
//! Each stage produces a [`StageDelta`] that is merged into the
//! [`RoleBindingValidation`] accumulator. A stage that depends on an earlier
//! one that failed is skipped with a derived error, so every skipped check
//! is visible in the report.

use platform_org::{
    is_valid_name, naming::MAX_NAME_LENGTH, project::MAX_DISPLAY_NAME_LENGTH, sanitize_name,
    OrganizationRole, Project, ProjectRole, RoleBinding, RoleBindingRequirements,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::api::RemoteRoleBinding;
use crate::client::PlatformClient;
use crate::error::{remote_kind, ErrorKind, ReconcileError};
use crate::resolver::IdentityResolver;

/// A validation failure with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Kind of failure
    pub kind: ErrorKind,

    /// Human-readable description
    pub message: String,
}

impl ValidationIssue {
    /// A rule violation.
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
        }
    }

    /// A failure carried over from another error.
    pub fn from_error(context: &str, error: &ReconcileError) -> Self {
        Self {
            kind: error.kind(),
            message: format!("{}: {}", context, error),
        }
    }
}

/// Outcome of validating one user of a role binding.
///
/// Checks stop at the first failure; the flags of skipped checks stay
/// `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserValidation {
    /// Normalized email
    pub email: String,

    /// Resolved platform user ID
    pub user_id: Option<String>,

    /// User exists on the platform
    pub exists: bool,

    /// User is active
    pub active: bool,

    /// User's organization role is eligible for the binding
    pub has_permission: bool,

    /// All checks passed
    pub assignable: bool,

    /// Organization role reported by the platform
    pub organization_role: Option<OrganizationRole>,

    /// First failed check
    pub error: Option<ValidationIssue>,

    /// Non-fatal findings
    pub warnings: Vec<String>,
}

impl UserValidation {
    fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            user_id: None,
            exists: false,
            active: false,
            has_permission: false,
            assignable: false,
            organization_role: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    fn fail(mut self, issue: ValidationIssue) -> Self {
        self.error = Some(issue);
        self
    }
}

/// Accumulated result of validating a role binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBindingValidation {
    /// Binding name
    pub name: String,

    /// Referenced project
    pub project: String,

    /// Granted role
    pub role: String,

    /// Per-user outcomes in declaration order
    pub users: Vec<UserValidation>,

    /// Blocking findings
    pub errors: Vec<ValidationIssue>,

    /// Non-blocking findings
    pub warnings: Vec<String>,

    /// Policy applied to the binding
    pub requirements: RoleBindingRequirements,

    /// Time spent validating
    pub elapsed: Duration,

    /// Existing binding of the same name that will be updated
    pub existing: Option<RemoteRoleBinding>,
}

/// Contribution of one validation stage.
#[derive(Debug, Default)]
pub struct StageDelta {
    users: Vec<UserValidation>,
    errors: Vec<ValidationIssue>,
    warnings: Vec<String>,
    existing: Option<RemoteRoleBinding>,
}

impl StageDelta {
    fn error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    fn invalid(&mut self, message: impl Into<String>) {
        self.errors.push(ValidationIssue::validation(message));
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl RoleBindingValidation {
    fn new(binding: &RoleBinding) -> Self {
        Self {
            name: binding.name().to_string(),
            project: binding.project().to_string(),
            role: binding.role().to_string(),
            users: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            requirements: RoleBindingRequirements::for_role(binding.role()),
            elapsed: Duration::ZERO,
            existing: None,
        }
    }

    /// Fold a stage's contribution into the accumulator.
    pub fn merge(&mut self, delta: StageDelta) {
        self.users.extend(delta.users);
        self.errors.extend(delta.errors);
        self.warnings.extend(delta.warnings);
        if delta.existing.is_some() {
            self.existing = delta.existing;
        }
    }

    /// Check whether the binding may be applied.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// IDs of the users that passed every check, in declaration order.
    pub fn assignable_user_ids(&self) -> Vec<String> {
        self.users
            .iter()
            .filter(|u| u.assignable)
            .filter_map(|u| u.user_id.clone())
            .collect()
    }

    /// Email to ID pairs of every resolved user.
    pub fn resolved_emails(&self) -> impl Iterator<Item = (&str, &str)> {
        self.users
            .iter()
            .filter_map(|u| u.user_id.as_deref().map(|id| (u.email.as_str(), id)))
    }

    /// Kind of the most severe error, cancellation first.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.errors.iter().any(|e| e.kind == ErrorKind::Timeout) {
            return Some(ErrorKind::Timeout);
        }
        self.errors.first().map(|e| e.kind)
    }

    /// All error messages joined into one line.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validator behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorOptions {
    /// Accept a same-name, same-role binding as an update target
    pub update_existing: bool,
}

/// Remote state of the referenced project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectState {
    Exists,
    Pending,
    Unavailable,
}

fn name_violation(field: &str, value: &str) -> Option<String> {
    if value.trim().is_empty() {
        return Some(format!("{} is required", field));
    }
    if is_valid_name(value) {
        return None;
    }
    let suggestion = sanitize_name(value);
    let mut message = format!(
        "{} '{}' is invalid: use lowercase letters, digits and '-', at most {} characters",
        field, value, MAX_NAME_LENGTH
    );
    if !suggestion.is_empty() {
        message.push_str(&format!(" (suggested: '{}')", suggestion));
    }
    Some(message)
}

fn role_list(roles: &[OrganizationRole]) -> String {
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Validates declarative objects against local rules and remote state.
pub struct Validator {
    client: Arc<dyn PlatformClient>,
    resolver: Arc<IdentityResolver>,
    options: ValidatorOptions,
}

impl Validator {
    /// Create a validator.
    pub fn new(
        client: Arc<dyn PlatformClient>,
        resolver: Arc<IdentityResolver>,
        options: ValidatorOptions,
    ) -> Self {
        Self {
            client,
            resolver,
            options,
        }
    }

    /// The identity resolver used for user checks.
    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.resolver
    }

    /// Structural checks of a project manifest.
    pub fn validate_project(&self, project: &Project) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if let Some(message) = name_violation("project name", project.name()) {
            issues.push(ValidationIssue::validation(message));
        }
        let display_len = project.display_name().chars().count();
        if display_len > MAX_DISPLAY_NAME_LENGTH {
            issues.push(ValidationIssue::validation(format!(
                "display name is {} characters, at most {} allowed",
                display_len, MAX_DISPLAY_NAME_LENGTH
            )));
        }
        issues
    }

    /// Validate a role binding.
    ///
    /// `pending_projects` names projects that do not exist remotely yet but
    /// are created earlier in the same batch.
    #[instrument(
        skip(self, binding, pending_projects),
        fields(binding = %binding.name(), project = %binding.project())
    )]
    pub async fn validate_role_binding(
        &self,
        binding: &RoleBinding,
        pending_projects: &HashSet<String>,
    ) -> RoleBindingValidation {
        let started = Instant::now();
        let mut validation = RoleBindingValidation::new(binding);

        let (delta, project_ok) = self.check_structure(binding);
        validation.merge(delta);

        let (delta, project_state) = self
            .check_project(binding, project_ok, &validation.requirements, pending_projects)
            .await;
        validation.merge(delta);

        let (delta, emails) = self.extract_users(binding);
        validation.merge(delta);

        let delta = self.check_users(&emails, &validation.requirements).await;
        validation.merge(delta);

        let delta = self.check_requirements(&validation);
        validation.merge(delta);

        let delta = self.check_conflicts(binding, project_state, &validation).await;
        validation.merge(delta);

        validation.elapsed = started.elapsed();
        info!(
            valid = validation.is_valid(),
            users = validation.users.len(),
            assignable = validation.assignable_user_ids().len(),
            errors = validation.errors.len(),
            warnings = validation.warnings.len(),
            elapsed_ms = validation.elapsed.as_millis() as u64,
            "Role binding validated"
        );
        validation
    }

    fn check_structure(&self, binding: &RoleBinding) -> (StageDelta, bool) {
        let mut delta = StageDelta::default();

        if let Some(message) = name_violation("metadata.name", binding.name()) {
            delta.invalid(message);
        }

        let project_violation = name_violation("spec.project", binding.project());
        let project_ok = project_violation.is_none();
        if let Some(message) = project_violation {
            delta.invalid(message);
        }

        if binding.role().trim().is_empty() {
            delta.invalid("spec.role is required");
        } else if ProjectRole::parse(binding.role()).is_none() {
            delta.warn(format!(
                "role '{}' is not a known project role; default requirements apply",
                binding.role()
            ));
        }

        (delta, project_ok)
    }

    async fn check_project(
        &self,
        binding: &RoleBinding,
        project_ok: bool,
        requirements: &RoleBindingRequirements,
        pending_projects: &HashSet<String>,
    ) -> (StageDelta, ProjectState) {
        let mut delta = StageDelta::default();
        let project = binding.project();

        if !requirements.project_required {
            return (delta, ProjectState::Unavailable);
        }
        if !project_ok {
            delta.invalid(format!(
                "project existence check skipped: project reference '{}' is invalid",
                project
            ));
            return (delta, ProjectState::Unavailable);
        }

        match self.client.get_project(project).await {
            Ok(Some(_)) => (delta, ProjectState::Exists),
            Ok(None) if pending_projects.contains(project) => {
                delta.warn(format!(
                    "project '{}' does not exist yet and is created earlier in this batch",
                    project
                ));
                (delta, ProjectState::Pending)
            }
            Ok(None) => {
                delta.invalid(format!("project '{}' not found", project));
                (delta, ProjectState::Unavailable)
            }
            Err(e) => {
                delta.error(ValidationIssue {
                    kind: remote_kind(&e),
                    message: format!("failed to look up project '{}': {}", project, e),
                });
                (delta, ProjectState::Unavailable)
            }
        }
    }

    fn extract_users(&self, binding: &RoleBinding) -> (StageDelta, Vec<String>) {
        let mut delta = StageDelta::default();
        let extraction = binding.extract_members();

        for message in extraction.errors {
            delta.invalid(message);
        }
        for message in extraction.warnings {
            delta.warn(message);
        }
        if extraction.emails.is_empty() {
            delta.invalid("no users declared");
        }

        debug!(users = extraction.emails.len(), "Extracted users");
        (delta, extraction.emails)
    }

    async fn check_users(
        &self,
        emails: &[String],
        requirements: &RoleBindingRequirements,
    ) -> StageDelta {
        let mut delta = StageDelta::default();
        for email in emails {
            let user = self.check_user(email, requirements).await;
            if let Some(ref issue) = user.error {
                delta.error(issue.clone());
            }
            delta.users.push(user);
        }
        delta
    }

    async fn check_user(
        &self,
        email: &str,
        requirements: &RoleBindingRequirements,
    ) -> UserValidation {
        let mut user = UserValidation::new(email);

        if let Err(e) = IdentityResolver::validate_email_format(email) {
            return user.fail(ValidationIssue {
                kind: e.kind(),
                message: e.to_string(),
            });
        }

        let resolved = match self.resolver.resolve_email(email).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                return user.fail(ValidationIssue::validation(format!(
                    "user '{}' not found",
                    email
                )))
            }
            Err(e) => return user.fail(ValidationIssue::from_error("resolution failed", &e)),
        };
        user.user_id = Some(resolved.clone());

        let remote = match self.client.get_user(email).await {
            Ok(Some(remote)) if remote.id == resolved => remote,
            Ok(Some(remote)) => {
                return user.fail(ValidationIssue::validation(format!(
                    "user '{}' resolved to '{}' but the platform reports '{}'",
                    email, resolved, remote.id
                )))
            }
            Ok(None) => {
                return user.fail(ValidationIssue::validation(format!(
                    "user '{}' no longer exists",
                    email
                )))
            }
            Err(e) => {
                return user.fail(ValidationIssue {
                    kind: remote_kind(&e),
                    message: format!("failed to verify user '{}': {}", email, e),
                })
            }
        };
        user.exists = true;
        user.organization_role = remote.organization_role;

        if !remote.status.is_active() {
            return user.fail(ValidationIssue::validation(format!(
                "user '{}' is not active (status: {})",
                email,
                remote.status.as_str()
            )));
        }
        user.active = true;

        if !requirements.permits(remote.organization_role) {
            let held = remote
                .organization_role
                .map(|r| r.as_str())
                .unwrap_or("none");
            return user.fail(ValidationIssue::validation(format!(
                "user '{}' with organization role '{}' is not eligible; requires {}",
                email,
                held,
                role_list(&requirements.allowed_roles)
            )));
        }
        user.has_permission = true;
        user.assignable = true;
        user
    }

    fn check_requirements(&self, validation: &RoleBindingValidation) -> StageDelta {
        let mut delta = StageDelta::default();
        let requirements = &validation.requirements;
        let assignable: Vec<&UserValidation> =
            validation.users.iter().filter(|u| u.assignable).collect();

        if let Some(message) = requirements.count_violation(assignable.len()) {
            delta.invalid(format!("role '{}' {}", validation.role, message));
        }
        if !assignable.is_empty()
            && !requirements.required_roles_met(assignable.iter().map(|u| u.organization_role))
        {
            delta.invalid(format!(
                "role '{}' requires at least one user with organization role {}",
                validation.role,
                role_list(&requirements.required_roles)
            ));
        }
        delta
    }

    async fn check_conflicts(
        &self,
        binding: &RoleBinding,
        project_state: ProjectState,
        validation: &RoleBindingValidation,
    ) -> StageDelta {
        let mut delta = StageDelta::default();
        let project = binding.project();

        match project_state {
            ProjectState::Exists => {}
            ProjectState::Pending => return delta,
            ProjectState::Unavailable => {
                delta.invalid(format!(
                    "conflict detection skipped: project '{}' unavailable",
                    project
                ));
                return delta;
            }
        }

        let existing = match self.client.list_role_bindings(project).await {
            Ok(existing) => existing,
            Err(e) => {
                delta.error(ValidationIssue {
                    kind: remote_kind(&e),
                    message: format!("failed to list role bindings of '{}': {}", project, e),
                });
                return delta;
            }
        };

        let desired: BTreeSet<String> = validation.assignable_user_ids().into_iter().collect();
        for other in existing {
            let same_role = other.role.eq_ignore_ascii_case(binding.role());
            if other.name == binding.name() {
                if self.options.update_existing && same_role {
                    delta.warn(format!(
                        "role binding '{}' already exists and will be updated",
                        other.name
                    ));
                    delta.existing = Some(other);
                } else {
                    delta.invalid(format!(
                        "role binding '{}' already exists in project '{}' with role '{}'",
                        other.name, project, other.role
                    ));
                }
            } else if same_role {
                let members: BTreeSet<String> = other.user_ids.iter().cloned().collect();
                if !desired.is_empty() && members == desired {
                    delta.warn(format!(
                        "role binding '{}' already grants role '{}' to the same users",
                        other.name, other.role
                    ));
                } else {
                    delta.warn(format!(
                        "role binding '{}' also grants role '{}' in project '{}'",
                        other.name, other.role, project
                    ));
                }
            }
        }
        delta
    }
}
