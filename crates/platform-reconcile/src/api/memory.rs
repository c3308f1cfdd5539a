//! In-memory platform implementation.
//!
//! Suitable for tests and local dry runs. Every call is counted per
//! operation, and failures can be queued per operation to exercise retry
//! behavior.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    ApiError, ApiResult, PlatformApi, ProjectRequest, RemoteProject, RemoteRoleBinding,
    RemoteUser, RoleBindingRequest,
};

/// Operations of the platform API, for call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    /// `get_project`
    GetProject,
    /// `create_project`
    CreateProject,
    /// `update_project`
    UpdateProject,
    /// `get_role_binding`
    GetRoleBinding,
    /// `list_role_bindings`
    ListRoleBindings,
    /// `create_or_update_role_binding`
    ApplyRoleBinding,
    /// `get_user`
    GetUser,
}

impl ApiOperation {
    /// Check whether the operation changes remote state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ApiOperation::CreateProject
                | ApiOperation::UpdateProject
                | ApiOperation::ApplyRoleBinding
        )
    }
}

#[derive(Default)]
struct MemoryState {
    projects: BTreeMap<String, RemoteProject>,
    role_bindings: BTreeMap<String, Vec<RemoteRoleBinding>>,
    users: HashMap<String, RemoteUser>,
    failures: HashMap<ApiOperation, VecDeque<ApiError>>,
    calls: HashMap<ApiOperation, u64>,
}

/// In-memory [`PlatformApi`].
///
/// Role bindings are listed in insertion order per project.
#[derive(Default)]
pub struct MemoryPlatformApi {
    state: Mutex<MemoryState>,
}

impl MemoryPlatformApi {
    /// Create an empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call; the state is
        // still usable for reporting.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a project.
    pub fn with_project(self, project: RemoteProject) -> Self {
        self.state().projects.insert(project.name.clone(), project);
        self
    }

    /// Seed a user (looked up case-insensitively by email).
    pub fn with_user(self, user: RemoteUser) -> Self {
        self.state().users.insert(user.email.to_lowercase(), user);
        self
    }

    /// Seed a role binding.
    pub fn with_role_binding(self, binding: RemoteRoleBinding) -> Self {
        self.state()
            .role_bindings
            .entry(binding.project.clone())
            .or_default()
            .push(binding);
        self
    }

    /// Queue a failure for the next call of `operation`.
    pub fn fail_next(&self, operation: ApiOperation, error: ApiError) {
        self.state()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Number of calls made for `operation`.
    pub fn calls(&self, operation: ApiOperation) -> u64 {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Number of calls that change remote state.
    pub fn write_calls(&self) -> u64 {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| op.is_write())
            .map(|(_, n)| *n)
            .sum()
    }

    /// Current state of a project.
    pub fn project(&self, name: &str) -> Option<RemoteProject> {
        self.state().projects.get(name).cloned()
    }

    /// Current state of a role binding.
    pub fn role_binding(&self, project: &str, name: &str) -> Option<RemoteRoleBinding> {
        self.state()
            .role_bindings
            .get(project)
            .and_then(|bindings| bindings.iter().find(|b| b.name == name))
            .cloned()
    }

    /// Count the call and pop an injected failure, if any.
    fn begin(&self, operation: ApiOperation) -> ApiResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        match state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::now_v7().simple())
}

fn project_record(id: String, request: &ProjectRequest) -> RemoteProject {
    RemoteProject {
        id,
        name: request.name.clone(),
        display_name: request.display_name.clone(),
        description: request.description.clone(),
        visibility: request.visibility,
        tags: request.tags.clone(),
    }
}

#[async_trait]
impl PlatformApi for MemoryPlatformApi {
    async fn get_project(&self, name: &str) -> ApiResult<RemoteProject> {
        let state = self.begin(ApiOperation::GetProject)?;
        state.projects.get(name).cloned().ok_or(ApiError::NotFound {
            resource: "project",
            name: name.to_string(),
        })
    }

    async fn create_project(&self, request: &ProjectRequest) -> ApiResult<RemoteProject> {
        let mut state = self.begin(ApiOperation::CreateProject)?;
        if state.projects.contains_key(&request.name) {
            return Err(ApiError::Status {
                status: 409,
                message: format!("project {} already exists", request.name),
                retryable: None,
            });
        }
        let project = project_record(new_id("prj"), request);
        state.projects.insert(project.name.clone(), project.clone());
        Ok(project)
    }

    async fn update_project(&self, request: &ProjectRequest) -> ApiResult<RemoteProject> {
        let mut state = self.begin(ApiOperation::UpdateProject)?;
        let existing = state
            .projects
            .get_mut(&request.name)
            .ok_or(ApiError::NotFound {
                resource: "project",
                name: request.name.clone(),
            })?;
        *existing = project_record(existing.id.clone(), request);
        Ok(existing.clone())
    }

    async fn get_role_binding(&self, project: &str, name: &str) -> ApiResult<RemoteRoleBinding> {
        let state = self.begin(ApiOperation::GetRoleBinding)?;
        state
            .role_bindings
            .get(project)
            .and_then(|bindings| bindings.iter().find(|b| b.name == name))
            .cloned()
            .ok_or(ApiError::NotFound {
                resource: "role binding",
                name: name.to_string(),
            })
    }

    async fn list_role_bindings(&self, project: &str) -> ApiResult<Vec<RemoteRoleBinding>> {
        let state = self.begin(ApiOperation::ListRoleBindings)?;
        if !state.projects.contains_key(project) {
            return Err(ApiError::NotFound {
                resource: "project",
                name: project.to_string(),
            });
        }
        Ok(state.role_bindings.get(project).cloned().unwrap_or_default())
    }

    async fn create_or_update_role_binding(
        &self,
        request: &RoleBindingRequest,
    ) -> ApiResult<RemoteRoleBinding> {
        let mut state = self.begin(ApiOperation::ApplyRoleBinding)?;
        if !state.projects.contains_key(&request.project) {
            return Err(ApiError::NotFound {
                resource: "project",
                name: request.project.clone(),
            });
        }
        let bindings = state.role_bindings.entry(request.project.clone()).or_default();
        let id = bindings
            .iter()
            .find(|b| b.name == request.name)
            .and_then(|b| b.id.clone())
            .unwrap_or_else(|| new_id("rb"));
        let binding = RemoteRoleBinding {
            id: Some(id),
            name: request.name.clone(),
            project: request.project.clone(),
            role: request.role.clone(),
            user_ids: request.user_ids.clone(),
        };
        match bindings.iter_mut().find(|b| b.name == request.name) {
            Some(existing) => *existing = binding.clone(),
            None => bindings.push(binding.clone()),
        }
        Ok(binding)
    }

    async fn get_user(&self, email: &str) -> ApiResult<RemoteUser> {
        let state = self.begin(ApiOperation::GetUser)?;
        state
            .users
            .get(&email.to_lowercase())
            .cloned()
            .ok_or(ApiError::NotFound {
                resource: "user",
                name: email.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_org::ProjectVisibility;

    fn request(name: &str) -> ProjectRequest {
        ProjectRequest {
            name: name.into(),
            display_name: name.to_uppercase(),
            description: None,
            visibility: ProjectVisibility::Private,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_then_get_project() {
        let api = MemoryPlatformApi::new();
        let created = api.create_project(&request("docs")).await.unwrap();
        let fetched = api.get_project("docs").await.unwrap();

        assert_eq!(created, fetched);
        assert!(created.id.starts_with("prj-"));
        assert_eq!(api.calls(ApiOperation::CreateProject), 1);
        assert_eq!(api.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let api = MemoryPlatformApi::new();
        api.create_project(&request("docs")).await.unwrap();
        let err = api.create_project(&request("docs")).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let api = MemoryPlatformApi::new();
        api.fail_next(ApiOperation::GetProject, ApiError::Other("503".into()));

        assert!(matches!(
            api.get_project("docs").await,
            Err(ApiError::Other(_))
        ));
        assert!(matches!(
            api.get_project("docs").await,
            Err(ApiError::NotFound { .. })
        ));
        assert_eq!(api.calls(ApiOperation::GetProject), 2);
    }

    #[tokio::test]
    async fn test_apply_role_binding_upserts() {
        let api = MemoryPlatformApi::new();
        api.create_project(&request("docs")).await.unwrap();

        let mut binding = RoleBindingRequest {
            name: "docs-viewers".into(),
            project: "docs".into(),
            role: "viewer".into(),
            user_ids: vec!["u-1".into()],
        };
        let first = api.create_or_update_role_binding(&binding).await.unwrap();
        binding.user_ids.push("u-2".into());
        let second = api.create_or_update_role_binding(&binding).await.unwrap();

        assert_eq!(first.id, second.id);
        let listed = api.list_role_bindings("docs").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_ids, vec!["u-1", "u-2"]);
    }

    #[tokio::test]
    async fn test_user_lookup_case_insensitive() {
        let api = MemoryPlatformApi::new().with_user(RemoteUser {
            id: "u-1".into(),
            email: "Alice@Example.com".into(),
            status: Default::default(),
            organization_role: None,
        });
        assert_eq!(api.get_user("alice@example.com").await.unwrap().id, "u-1");
    }
}
