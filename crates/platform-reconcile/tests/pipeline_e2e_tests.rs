//! End-to-end tests for the reconciliation pipeline.
//!
//! These tests run manifests through parsing, validation, identity resolution
//! and application against the in-memory platform, and check the resulting
//! run record together with the calls the platform received.
//!
//! Scenarios:
//! 1. Role binding referencing a missing project
//! 2. Dry run of a valid batch
//! 3. Full apply of a valid batch
//! 4. Transient failures retried
//! 5. Cancellation aborts the batch
//! 6. Parse failures recorded next to applied objects
//! 7. Updating an existing binding

use platform_org::{OrganizationRole, ProjectVisibility};
use platform_reconcile::api::{
    ApiError, ApiOperation, MemoryPlatformApi, RemoteProject, RemoteRoleBinding, RemoteUser,
    UserStatus,
};
use platform_reconcile::{
    ApplyAction, ClientPolicies, ErrorKind, Processor, ProcessorOptions, RemoteClient,
    RetryPolicy, SourceFile, ValidatorOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PROJECT: &str = r#"
apiVersion: platform.relay.io/v1
kind: Project
metadata:
  name: marketing-docs
spec:
  displayName: Marketing Docs
  visibility: private
  tags: [docs]
"#;

const EDITORS: &str = r#"
apiVersion: platform.relay.io/v1
kind: RoleBinding
metadata:
  name: marketing-editors
spec:
  project: marketing-docs
  role: editor
  subjects:
    - kind: User
      email: Alice@Example.com
    - kind: Group
      name: writers
  users:
    - bob@example.com
"#;

const GHOST_VIEWERS: &str = r#"
apiVersion: platform.relay.io/v1
kind: RoleBinding
metadata:
  name: ghost-viewers
spec:
  project: ghost-project
  role: viewer
  users: [alice@example.com]
"#;

/// Test fixture providing a seeded in-memory platform.
struct TestFixture {
    /// Shared platform state.
    api: Arc<MemoryPlatformApi>,
    /// Cancellation for the run.
    cancel: CancellationToken,
}

impl TestFixture {
    /// Create a fixture with two active users.
    fn new() -> Self {
        Self::with_api(MemoryPlatformApi::new())
    }

    fn with_api(api: MemoryPlatformApi) -> Self {
        let api = api
            .with_user(user("u-alice", "alice@example.com", OrganizationRole::Admin))
            .with_user(user("u-bob", "bob@example.com", OrganizationRole::Editor));
        Self {
            api: Arc::new(api),
            cancel: CancellationToken::new(),
        }
    }

    /// Build a processor with fast retry delays.
    fn processor(&self, dry_run: bool, update_existing: bool) -> Processor {
        let policy = RetryPolicy::api()
            .with_delays(Duration::from_millis(10), Duration::from_millis(50))
            .with_jitter(0.0);
        let client = RemoteClient::new(
            self.api.clone(),
            ClientPolicies::uniform(policy),
            self.cancel.clone(),
        );
        Processor::new(
            Arc::new(client),
            ProcessorOptions { dry_run },
            ValidatorOptions { update_existing },
        )
    }
}

fn user(id: &str, email: &str, role: OrganizationRole) -> RemoteUser {
    RemoteUser {
        id: id.to_string(),
        email: email.to_string(),
        status: UserStatus::Active,
        organization_role: Some(role),
    }
}

fn file(path: &str, contents: &str) -> SourceFile {
    SourceFile::new(path, contents)
}

#[tokio::test(start_paused = true)]
async fn test_missing_project_reference() {
    let fixture = TestFixture::new();
    let processor = fixture.processor(false, false);

    let result = processor
        .process_files(&[
            file("projects.yaml", PROJECT),
            file("bindings.yaml", GHOST_VIEWERS),
        ])
        .await;

    assert_eq!(result.applied_projects(), 1);
    assert_eq!(result.applied_role_bindings(), 0);
    assert_eq!(result.error_count(), 1);

    let error = &result.errors[0];
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.name.as_deref(), Some("ghost-viewers"));
    assert!(error.message.contains("ghost-project"));
    assert_eq!(fixture.api.calls(ApiOperation::ApplyRoleBinding), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_makes_no_writes() {
    let fixture = TestFixture::new();
    let processor = fixture.processor(true, false);
    let bundle = format!("{}---{}", PROJECT, EDITORS);

    let result = processor
        .process_files(&[file("bundle.yaml", &bundle)])
        .await;

    let summary = result.summary();
    assert!(result.dry_run);
    assert_eq!(summary.projects, 1);
    assert_eq!(summary.role_bindings, 1);
    assert_eq!(summary.applied_projects, 0);
    assert_eq!(summary.applied_role_bindings, 0);
    assert_eq!(summary.resolved_emails, 2);
    assert_eq!(summary.errors, 0, "{:?}", result.errors);

    assert_eq!(result.projects[0].action, ApplyAction::Create);
    assert_eq!(result.role_bindings[0].action, ApplyAction::Create);
    assert_eq!(result.role_bindings[0].user_ids, vec!["u-alice", "u-bob"]);
    assert_eq!(fixture.api.write_calls(), 0);
    assert!(fixture.api.project("marketing-docs").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_full_apply() {
    let fixture = TestFixture::new();
    let processor = fixture.processor(false, false);

    // Binding listed first; projects are still applied before it.
    let result = processor
        .process_files(&[
            file("bindings.yaml", EDITORS),
            file("projects.yaml", PROJECT),
        ])
        .await;

    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.applied_projects(), 1);
    assert_eq!(result.applied_role_bindings(), 1);

    let project = fixture.api.project("marketing-docs").unwrap();
    assert_eq!(project.display_name, "Marketing Docs");
    assert_eq!(project.visibility, ProjectVisibility::Private);
    assert_eq!(result.projects[0].remote_id.as_deref(), Some(project.id.as_str()));

    let binding = fixture
        .api
        .role_binding("marketing-docs", "marketing-editors")
        .unwrap();
    assert_eq!(binding.user_ids, vec!["u-alice", "u-bob"]);

    let validation = result.role_bindings[0].validation.as_ref().unwrap();
    assert!(validation
        .warnings
        .iter()
        .any(|w| w.contains("kind 'Group'")));
    assert_eq!(
        result.resolved_emails.get("alice@example.com").map(String::as_str),
        Some("u-alice")
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let fixture = TestFixture::new();
    let unavailable = || ApiError::Status {
        status: 503,
        message: "service unavailable".into(),
        retryable: None,
    };
    fixture.api.fail_next(ApiOperation::CreateProject, unavailable());
    fixture.api.fail_next(ApiOperation::GetUser, unavailable());
    fixture.api.fail_next(ApiOperation::ApplyRoleBinding, unavailable());
    let processor = fixture.processor(false, false);

    let result = processor
        .process_files(&[file("bundle.yaml", &format!("{}---{}", PROJECT, EDITORS))])
        .await;

    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.applied_role_bindings(), 1);
    assert_eq!(fixture.api.calls(ApiOperation::CreateProject), 2);
    assert_eq!(fixture.api.calls(ApiOperation::ApplyRoleBinding), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_is_recorded() {
    let fixture = TestFixture::new();
    for _ in 0..3 {
        fixture.api.fail_next(
            ApiOperation::CreateProject,
            ApiError::Other("connection reset by peer".into()),
        );
    }
    let processor = fixture.processor(false, false);

    let result = processor
        .process_files(&[file("projects.yaml", PROJECT)])
        .await;

    assert_eq!(result.applied_projects(), 0);
    assert_eq!(result.projects[0].action, ApplyAction::Rejected);
    assert_eq!(result.errors[0].kind, ErrorKind::Retryable);
    assert!(!result.aborted);
    assert_eq!(fixture.api.calls(ApiOperation::CreateProject), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_batch() {
    let fixture = TestFixture::new();
    fixture.cancel.cancel();
    let processor = fixture.processor(false, false);

    let result = processor
        .process_files(&[
            file("projects.yaml", PROJECT),
            file("bindings.yaml", EDITORS),
        ])
        .await;

    assert!(result.aborted);
    assert_eq!(result.projects.len(), 1);
    assert!(result.role_bindings.is_empty());
    assert_eq!(result.error_count(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::Timeout);
    assert_eq!(fixture.api.calls(ApiOperation::GetProject), 0);
}

#[tokio::test(start_paused = true)]
async fn test_parse_failures_do_not_stop_the_batch() {
    let fixture = TestFixture::new();
    let processor = fixture.processor(false, false);
    let broken = "apiVersion: platform.relay.io/v2\nkind: Project\nmetadata:\n  name: future\n";

    let result = processor
        .process_files(&[
            file("future.yaml", broken),
            SourceFile::unreadable("locked.yaml", "permission denied"),
            file("projects.yaml", PROJECT),
        ])
        .await;

    assert_eq!(result.applied_projects(), 1);
    assert_eq!(result.error_count(), 2);
    assert!(result.errors.iter().all(|e| e.kind == ErrorKind::Parse));
    assert!(result.errors[0].message.contains("unsupported apiVersion"));
}

#[tokio::test(start_paused = true)]
async fn test_update_existing_binding() {
    let api = MemoryPlatformApi::new()
        .with_project(RemoteProject {
            id: "p-1".into(),
            name: "marketing-docs".into(),
            display_name: "Marketing Docs".into(),
            description: None,
            visibility: ProjectVisibility::Private,
            tags: vec!["docs".into()],
        })
        .with_role_binding(RemoteRoleBinding {
            id: Some("rb-1".into()),
            name: "marketing-editors".into(),
            project: "marketing-docs".into(),
            role: "editor".into(),
            user_ids: vec!["u-alice".into()],
        });
    let fixture = TestFixture::with_api(api);
    let files = [
        file("projects.yaml", PROJECT),
        file("bindings.yaml", EDITORS),
    ];

    let strict = fixture.processor(false, false).process_files(&files).await;
    assert_eq!(strict.projects[0].action, ApplyAction::Unchanged);
    assert_eq!(strict.applied_role_bindings(), 0);
    assert!(strict.errors[0].message.contains("already exists"));

    let updating = fixture.processor(false, true).process_files(&files).await;
    assert!(updating.is_success(), "{:?}", updating.errors);
    assert_eq!(updating.role_bindings[0].action, ApplyAction::Update);

    let binding = fixture
        .api
        .role_binding("marketing-docs", "marketing-editors")
        .unwrap();
    assert_eq!(binding.id.as_deref(), Some("rb-1"));
    assert_eq!(binding.user_ids, vec!["u-alice", "u-bob"]);

    let again = fixture.processor(false, true).process_files(&files).await;
    assert_eq!(again.role_bindings[0].action, ApplyAction::Unchanged);
    assert_eq!(again.applied_role_bindings(), 0);
}
