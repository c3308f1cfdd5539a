//! Batch orchestration.
//!
//! The processor parses source files, then applies every project followed by
//! every role binding, each in input order. Per-object failures are recorded
//! and the batch continues; cancellation stops it.

use platform_org::{ObjectKind, Project, RoleBinding};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::api::{HttpPlatformApi, ProjectRequest, RoleBindingRequest};
use crate::client::{PlatformClient, RemoteClient};
use crate::config::{ConfigError, ReconcileConfig};
use crate::error::{remote_kind, ErrorKind, ReconcileResult};
use crate::parser::{parse_files, DomainObject, ParsedObject, SourceFile};
use crate::resolver::IdentityResolver;
use crate::result::{
    ApplyAction, ProcessError, ProcessResult, ProjectOutcome, RoleBindingOutcome,
};
use crate::validator::{Validator, ValidatorOptions};

/// Processor behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorOptions {
    /// Validate and plan without write calls
    pub dry_run: bool,
}

/// Whether the batch should stop after an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
}

impl Flow {
    fn after(kind: ErrorKind) -> Self {
        if kind == ErrorKind::Timeout {
            Flow::Abort
        } else {
            Flow::Continue
        }
    }
}

/// Reconciles declarative objects against the platform.
pub struct Processor {
    client: Arc<dyn PlatformClient>,
    validator: Validator,
    options: ProcessorOptions,
}

impl Processor {
    /// Create a processor over a platform client.
    pub fn new(
        client: Arc<dyn PlatformClient>,
        options: ProcessorOptions,
        validator_options: ValidatorOptions,
    ) -> Self {
        let resolver = Arc::new(IdentityResolver::new(client.clone()));
        let validator = Validator::new(client.clone(), resolver, validator_options);
        Self {
            client,
            validator,
            options,
        }
    }

    /// Create a processor talking HTTP to the configured platform.
    ///
    /// `cancel` aborts retry waits and stops the batch.
    pub fn from_config(
        config: &ReconcileConfig,
        cancel: CancellationToken,
    ) -> ReconcileResult<Self> {
        let api = HttpPlatformApi::new(config.api.clone(), config.timeout(), config.verify_tls)
            .map_err(|e| ConfigError::InvalidValue {
                key: "PLATFORM_API_URL".to_string(),
                message: e.to_string(),
            })?;
        let client = RemoteClient::new(Arc::new(api), config.client_policies(), cancel);

        Ok(Self::new(
            Arc::new(client),
            config.processor_options(),
            config.validator_options(),
        ))
    }

    /// The identity resolver shared by every validation of this processor.
    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        self.validator.resolver()
    }

    /// Parse and reconcile a batch of files.
    #[instrument(skip(self, files), fields(files = files.len(), dry_run = self.options.dry_run))]
    pub async fn process_files(&self, files: &[SourceFile]) -> ProcessResult {
        let outcome = parse_files(files);
        let mut result = ProcessResult::new(self.options.dry_run);

        for invalid in outcome.invalid {
            result.record_error(ProcessError {
                source: invalid.source,
                object_kind: None,
                name: None,
                kind: invalid.error.kind(),
                message: invalid.error.to_string(),
            });
        }

        self.apply_all(outcome.objects, &mut result).await;
        result
    }

    /// Reconcile already parsed objects.
    pub async fn process_objects(&self, objects: Vec<ParsedObject>) -> ProcessResult {
        let mut result = ProcessResult::new(self.options.dry_run);
        self.apply_all(objects, &mut result).await;
        result
    }

    async fn apply_all(&self, objects: Vec<ParsedObject>, result: &mut ProcessResult) {
        let (projects, bindings): (Vec<_>, Vec<_>) = objects
            .into_iter()
            .partition(|parsed| parsed.kind() == ObjectKind::Project);
        let mut pending = HashSet::new();

        let ordered = projects.iter().chain(bindings.iter());
        for parsed in ordered {
            let flow = match parsed.object {
                DomainObject::Project(ref project) => {
                    self.apply_project(project, &parsed.source, &mut pending, result)
                        .await
                }
                DomainObject::RoleBinding(ref binding) => {
                    self.apply_role_binding(binding, &parsed.source, &pending, result)
                        .await
                }
            };
            if flow == Flow::Abort {
                warn!(
                    kind = %parsed.kind(),
                    name = parsed.object.name(),
                    "Run cancelled, skipping remaining objects"
                );
                result.aborted = true;
                break;
            }
        }

        result.finish();
        let summary = result.summary();
        info!(
            run_id = %result.run_id,
            projects = summary.projects,
            applied_projects = summary.applied_projects,
            role_bindings = summary.role_bindings,
            applied_role_bindings = summary.applied_role_bindings,
            resolved_emails = summary.resolved_emails,
            errors = summary.errors,
            aborted = result.aborted,
            "Reconciliation finished"
        );
    }

    async fn apply_project(
        &self,
        project: &Project,
        source: &Path,
        pending: &mut HashSet<String>,
        result: &mut ProcessResult,
    ) -> Flow {
        let name = project.name();

        let issues = self.validator.validate_project(project);
        if !issues.is_empty() {
            let message = issues
                .iter()
                .map(|i| i.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return reject_project(result, project, source, ErrorKind::Validation, message);
        }

        let request = ProjectRequest::from(project);
        let existing = match self.client.get_project(name).await {
            Ok(existing) => existing,
            Err(e) => {
                let message = format!("failed to look up project '{}': {}", name, e);
                return reject_project(result, project, source, remote_kind(&e), message);
            }
        };

        let action = match existing {
            None => ApplyAction::Create,
            Some(ref remote) if request.differs_from(remote) => ApplyAction::Update,
            Some(_) => ApplyAction::Unchanged,
        };
        let remote_id = existing.map(|r| r.id);

        if action == ApplyAction::Unchanged || self.options.dry_run {
            if action == ApplyAction::Create {
                pending.insert(name.to_string());
            }
            info!(
                project = name,
                action = action.as_str(),
                dry_run = self.options.dry_run,
                "Project planned"
            );
            result.record_project(ProjectOutcome {
                name: name.to_string(),
                source: source.to_path_buf(),
                action,
                applied: false,
                remote_id,
                error: None,
            });
            return Flow::Continue;
        }

        let written = match action {
            ApplyAction::Create => self.client.create_project(&request).await,
            _ => self.client.update_project(&request).await,
        };
        match written {
            Ok(remote) => {
                info!(project = name, action = action.as_str(), id = %remote.id, "Project applied");
                result.record_project(ProjectOutcome {
                    name: name.to_string(),
                    source: source.to_path_buf(),
                    action,
                    applied: true,
                    remote_id: Some(remote.id),
                    error: None,
                });
                Flow::Continue
            }
            Err(e) => {
                let message = format!("failed to {} project '{}': {}", action.as_str(), name, e);
                reject_project(result, project, source, remote_kind(&e), message)
            }
        }
    }

    async fn apply_role_binding(
        &self,
        binding: &RoleBinding,
        source: &Path,
        pending: &HashSet<String>,
        result: &mut ProcessResult,
    ) -> Flow {
        let validation = self.validator.validate_role_binding(binding, pending).await;
        result.merge_resolved(validation.resolved_emails());

        let mut outcome = RoleBindingOutcome {
            name: binding.name().to_string(),
            project: binding.project().to_string(),
            role: binding.role().to_string(),
            source: source.to_path_buf(),
            action: ApplyAction::Rejected,
            applied: false,
            user_ids: validation.assignable_user_ids(),
            validation: None,
            error: None,
        };

        if !validation.is_valid() {
            let kind = validation.error_kind().unwrap_or(ErrorKind::Validation);
            let message = format!(
                "role binding '{}' is invalid: {}",
                binding.name(),
                validation.error_summary()
            );
            outcome.validation = Some(validation);
            return reject_role_binding(result, outcome, kind, message);
        }

        outcome.action = match validation.existing {
            Some(ref existing) => {
                let current: BTreeSet<&String> = existing.user_ids.iter().collect();
                let desired: BTreeSet<&String> = outcome.user_ids.iter().collect();
                if current == desired {
                    ApplyAction::Unchanged
                } else {
                    ApplyAction::Update
                }
            }
            None => ApplyAction::Create,
        };
        outcome.validation = Some(validation);

        if outcome.action == ApplyAction::Unchanged || self.options.dry_run {
            info!(
                binding = %outcome.name,
                project = %outcome.project,
                action = outcome.action.as_str(),
                dry_run = self.options.dry_run,
                "Role binding planned"
            );
            result.record_role_binding(outcome);
            return Flow::Continue;
        }

        let request = RoleBindingRequest {
            name: outcome.name.clone(),
            project: outcome.project.clone(),
            role: outcome.role.clone(),
            user_ids: outcome.user_ids.clone(),
        };
        match self.client.create_or_update_role_binding(&request).await {
            Ok(_) => {
                info!(
                    binding = %outcome.name,
                    project = %outcome.project,
                    action = outcome.action.as_str(),
                    users = outcome.user_ids.len(),
                    "Role binding applied"
                );
                outcome.applied = true;
                result.record_role_binding(outcome);
                Flow::Continue
            }
            Err(e) => {
                let message = format!(
                    "failed to apply role binding '{}' in project '{}': {}",
                    outcome.name, outcome.project, e
                );
                outcome.action = ApplyAction::Rejected;
                reject_role_binding(result, outcome, remote_kind(&e), message)
            }
        }
    }
}

fn reject_project(
    result: &mut ProcessResult,
    project: &Project,
    source: &Path,
    kind: ErrorKind,
    message: String,
) -> Flow {
    warn!(project = project.name(), kind = %kind, error = %message, "Project rejected");
    result.record_project(ProjectOutcome {
        name: project.name().to_string(),
        source: source.to_path_buf(),
        action: ApplyAction::Rejected,
        applied: false,
        remote_id: None,
        error: Some(message.clone()),
    });
    result.record_error(ProcessError {
        source: source.to_path_buf(),
        object_kind: Some(ObjectKind::Project),
        name: Some(project.name().to_string()),
        kind,
        message,
    });
    Flow::after(kind)
}

fn reject_role_binding(
    result: &mut ProcessResult,
    mut outcome: RoleBindingOutcome,
    kind: ErrorKind,
    message: String,
) -> Flow {
    warn!(
        binding = %outcome.name,
        project = %outcome.project,
        kind = %kind,
        error = %message,
        "Role binding rejected"
    );
    result.record_error(ProcessError {
        source: outcome.source.clone(),
        object_kind: Some(ObjectKind::RoleBinding),
        name: Some(outcome.name.clone()),
        kind,
        message: message.clone(),
    });
    outcome.error = Some(message);
    result.record_role_binding(outcome);
    Flow::after(kind)
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::api::{MemoryPlatformApi, RemoteProject};
    use crate::client::ClientPolicies;
    use crate::retry::RetryPolicy;
    use platform_org::ProjectVisibility;

    fn processor(api: MemoryPlatformApi, dry_run: bool) -> (Arc<MemoryPlatformApi>, Processor) {
        let api = Arc::new(api);
        let client = RemoteClient::new(
            api.clone(),
            ClientPolicies::uniform(RetryPolicy::no_retry()),
            CancellationToken::new(),
        );
        let processor = Processor::new(
            Arc::new(client),
            ProcessorOptions { dry_run },
            ValidatorOptions::default(),
        );
        (api, processor)
    }

    fn parsed(object: DomainObject) -> ParsedObject {
        ParsedObject {
            object,
            source: "manifests.yaml".into(),
            document_index: 0,
            api_version: platform_org::ApiVersion::parse("platform.relay.io/v1").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_projects_are_created_updated_or_left_alone() {
        let api = MemoryPlatformApi::new()
            .with_project(RemoteProject {
                id: "p-same".into(),
                name: "same".into(),
                display_name: "same".into(),
                description: None,
                visibility: ProjectVisibility::Organization,
                tags: Vec::new(),
            })
            .with_project(RemoteProject {
                id: "p-old".into(),
                name: "old".into(),
                display_name: "Old".into(),
                description: None,
                visibility: ProjectVisibility::Organization,
                tags: Vec::new(),
            });
        let (api, processor) = processor(api, false);

        let result = processor
            .process_objects(vec![
                parsed(DomainObject::Project(Project::new("fresh"))),
                parsed(DomainObject::Project(Project::new("same"))),
                parsed(DomainObject::Project(
                    Project::new("old").with_display_name("Renamed"),
                )),
            ])
            .await;

        let actions: Vec<ApplyAction> = result.projects.iter().map(|p| p.action).collect();
        assert_eq!(
            actions,
            vec![ApplyAction::Create, ApplyAction::Unchanged, ApplyAction::Update]
        );
        assert_eq!(result.applied_projects(), 2);
        assert_eq!(api.project("old").unwrap().display_name, "Renamed");
        assert!(result.is_success());
        assert!(result.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_project_is_rejected_without_remote_calls() {
        let (api, processor) = processor(MemoryPlatformApi::new(), false);

        let result = processor
            .process_objects(vec![parsed(DomainObject::Project(Project::new(
                "Bad Project",
            )))])
            .await;

        assert_eq!(result.projects[0].action, ApplyAction::Rejected);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::Validation);
        assert_eq!(api.calls(crate::api::ApiOperation::GetProject), 0);
    }

    #[tokio::test]
    async fn test_role_bindings_follow_projects() {
        let (_, processor) = processor(MemoryPlatformApi::new(), false);

        let result = processor
            .process_objects(vec![
                parsed(DomainObject::RoleBinding(RoleBinding::new(
                    "docs-viewers",
                    "docs",
                    "viewer",
                ))),
                parsed(DomainObject::Project(Project::new("docs"))),
            ])
            .await;

        assert_eq!(result.applied_projects(), 1);
        assert_eq!(result.role_bindings.len(), 1);
        // the project exists by the time the binding is validated
        let validation = result.role_bindings[0].validation.as_ref().unwrap();
        assert!(!validation
            .errors
            .iter()
            .any(|e| e.message.contains("not found")));
        assert!(validation
            .errors
            .iter()
            .any(|e| e.message == "no users declared"));
    }
}
