//! Aggregated outcome of a reconciliation run.

use chrono::{DateTime, Utc};
use platform_org::ObjectKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::validator::RoleBindingValidation;

/// What was (or would be) done to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    /// Object did not exist and is created
    Create,
    /// Object exists and is changed
    Update,
    /// Object already matches
    Unchanged,
    /// Object was not applied because of an error
    Rejected,
}

impl ApplyAction {
    /// Get string representation of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyAction::Create => "create",
            ApplyAction::Update => "update",
            ApplyAction::Unchanged => "unchanged",
            ApplyAction::Rejected => "rejected",
        }
    }
}

/// Outcome for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOutcome {
    /// Project name
    pub name: String,

    /// Manifest file
    pub source: PathBuf,

    /// Planned or performed action
    pub action: ApplyAction,

    /// Whether a write call succeeded
    pub applied: bool,

    /// Platform ID, when known
    pub remote_id: Option<String>,

    /// Failure description
    pub error: Option<String>,
}

/// Outcome for one role binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBindingOutcome {
    /// Binding name
    pub name: String,

    /// Project name
    pub project: String,

    /// Granted role
    pub role: String,

    /// Manifest file
    pub source: PathBuf,

    /// Planned or performed action
    pub action: ApplyAction,

    /// Whether the write call succeeded
    pub applied: bool,

    /// Users bound (or to be bound)
    pub user_ids: Vec<String>,

    /// Full validation report
    pub validation: Option<RoleBindingValidation>,

    /// Failure description
    pub error: Option<String>,
}

/// A failure recorded against the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessError {
    /// Manifest file
    pub source: PathBuf,

    /// Kind of the failed object, when it was decoded
    pub object_kind: Option<ObjectKind>,

    /// Name of the failed object, when it was decoded
    pub name: Option<String>,

    /// Error kind
    pub kind: ErrorKind,

    /// Failure description
    pub message: String,
}

/// Derived statistics of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// Projects processed
    pub projects: usize,

    /// Projects written
    pub applied_projects: usize,

    /// Role bindings processed
    pub role_bindings: usize,

    /// Role bindings written
    pub applied_role_bindings: usize,

    /// Distinct emails resolved
    pub resolved_emails: usize,

    /// Errors recorded
    pub errors: usize,
}

/// Record of a reconciliation run.
///
/// Every attempted object contributes one outcome; every failed object also
/// contributes one [`ProcessError`]. The email map only grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Unique run ID
    pub run_id: Uuid,

    /// Whether write calls were skipped
    pub dry_run: bool,

    /// Run start
    pub started_at: DateTime<Utc>,

    /// Run end
    pub finished_at: Option<DateTime<Utc>>,

    /// Project outcomes in processing order
    pub projects: Vec<ProjectOutcome>,

    /// Role binding outcomes in processing order
    pub role_bindings: Vec<RoleBindingOutcome>,

    /// Resolved email to user ID map
    pub resolved_emails: BTreeMap<String, String>,

    /// Failures in processing order
    pub errors: Vec<ProcessError>,

    /// Whether the run stopped early on cancellation
    pub aborted: bool,
}

impl ProcessResult {
    /// Start a new run record.
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            projects: Vec::new(),
            role_bindings: Vec::new(),
            resolved_emails: BTreeMap::new(),
            errors: Vec::new(),
            aborted: false,
        }
    }

    /// Record the outcome of a project.
    pub fn record_project(&mut self, outcome: ProjectOutcome) {
        self.projects.push(outcome);
    }

    /// Record the outcome of a role binding.
    pub fn record_role_binding(&mut self, outcome: RoleBindingOutcome) {
        self.role_bindings.push(outcome);
    }

    /// Record a failure.
    pub fn record_error(&mut self, error: ProcessError) {
        self.errors.push(error);
    }

    /// Add resolved emails. Existing entries are kept.
    pub fn merge_resolved<'a, I>(&mut self, resolved: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (email, id) in resolved {
            self.resolved_emails
                .entry(email.to_string())
                .or_insert_with(|| id.to_string());
        }
    }

    /// Stamp the end of the run.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Number of projects written to the platform.
    pub fn applied_projects(&self) -> usize {
        self.projects.iter().filter(|p| p.applied).count()
    }

    /// Number of role bindings written to the platform.
    pub fn applied_role_bindings(&self) -> usize {
        self.role_bindings.iter().filter(|rb| rb.applied).count()
    }

    /// Number of emails resolved to user IDs.
    pub fn resolved_email_count(&self) -> usize {
        self.resolved_emails.len()
    }

    /// Number of recorded failures.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Check whether the run completed without errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.aborted
    }

    /// Counts for reporting.
    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            projects: self.projects.len(),
            applied_projects: self.applied_projects(),
            role_bindings: self.role_bindings.len(),
            applied_role_bindings: self.applied_role_bindings(),
            resolved_emails: self.resolved_email_count(),
            errors: self.error_count(),
        }
    }

    /// Serialize the run record as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
