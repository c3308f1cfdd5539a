//! Remote client facade.
//!
//! [`RemoteClient`] wraps every [`PlatformApi`] call in the retry executor
//! with an operation-specific policy and turns not-found answers into
//! `Ok(None)`. The rest of the pipeline only sees the [`PlatformClient`]
//! capability trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::api::{
    ApiError, ApiResult, PlatformApi, ProjectRequest, RemoteProject, RemoteRoleBinding,
    RemoteUser, RoleBindingRequest,
};
use crate::retry::{execute, RetryError, RetryPolicy};

/// Error of a retried platform call.
pub type ClientError = RetryError<ApiError>;

/// Result type for retried platform calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Platform capabilities used by the pipeline.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch a project, `None` if it does not exist.
    async fn get_project(&self, name: &str) -> ClientResult<Option<RemoteProject>>;

    /// Create a project.
    async fn create_project(&self, request: &ProjectRequest) -> ClientResult<RemoteProject>;

    /// Update a project.
    async fn update_project(&self, request: &ProjectRequest) -> ClientResult<RemoteProject>;

    /// Fetch a role binding, `None` if it does not exist.
    async fn get_role_binding(
        &self,
        project: &str,
        name: &str,
    ) -> ClientResult<Option<RemoteRoleBinding>>;

    /// List the role bindings of a project.
    async fn list_role_bindings(&self, project: &str) -> ClientResult<Vec<RemoteRoleBinding>>;

    /// Create or replace a role binding.
    async fn create_or_update_role_binding(
        &self,
        request: &RoleBindingRequest,
    ) -> ClientResult<RemoteRoleBinding>;

    /// Look up a user by email, `None` if unknown.
    async fn get_user(&self, email: &str) -> ClientResult<Option<RemoteUser>>;
}

/// Retry policies per operation class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPolicies {
    /// Project and role binding reads
    pub read: RetryPolicy,

    /// Creates and updates
    pub write: RetryPolicy,

    /// User lookups
    pub lookup: RetryPolicy,

    /// Second round for calls that exhausted their policy on HTTP 429
    pub rate_limit: Option<RetryPolicy>,
}

impl Default for ClientPolicies {
    fn default() -> Self {
        Self {
            read: RetryPolicy::api(),
            write: RetryPolicy::api(),
            lookup: RetryPolicy::network(),
            rate_limit: Some(RetryPolicy::rate_limit()),
        }
    }
}

impl ClientPolicies {
    /// Use the same policy for every operation, without a rate-limit round.
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            read: policy.clone(),
            write: policy.clone(),
            lookup: policy,
            rate_limit: None,
        }
    }

    /// Override the attempt budget of the read, write and lookup policies.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.read.max_attempts = max_attempts;
        self.write.max_attempts = max_attempts;
        self.lookup.max_attempts = max_attempts;
        self
    }
}

/// [`PlatformClient`] backed by a [`PlatformApi`] transport.
pub struct RemoteClient<A: PlatformApi> {
    api: Arc<A>,
    policies: ClientPolicies,
    cancel: CancellationToken,
}

impl<A: PlatformApi> RemoteClient<A> {
    /// Create a client. `cancel` aborts retry waits of every call.
    pub fn new(api: Arc<A>, policies: ClientPolicies, cancel: CancellationToken) -> Self {
        Self {
            api,
            policies,
            cancel,
        }
    }

    /// The underlying transport.
    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// The configured policies.
    pub fn policies(&self) -> &ClientPolicies {
        &self.policies
    }

    async fn run<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        operation: &str,
        mut f: F,
    ) -> ClientResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ApiResult<T>> + Send,
        T: Send,
    {
        let err = match execute(&self.cancel, policy, operation, &mut f).await {
            Ok(outcome) => return Ok(outcome.value),
            Err(err) => err,
        };

        let rate_limited = matches!(
            &err,
            RetryError::Retryable { source, .. } if source.is_rate_limited()
        );
        match self.policies.rate_limit {
            Some(ref rate_limit) if rate_limited => {
                warn!(
                    operation = operation,
                    attempts = err.attempts(),
                    "Rate limited, retrying with rate-limit policy"
                );
                let (attempts, delay) = (err.attempts(), err.total_delay());
                match execute(&self.cancel, rate_limit, operation, &mut f).await {
                    Ok(outcome) => {
                        let outcome = outcome.with_prior(attempts, delay);
                        debug!(
                            operation = operation,
                            attempts = outcome.attempts,
                            total_delay_ms = outcome.total_delay.as_millis() as u64,
                            "Succeeded after rate-limit round"
                        );
                        Ok(outcome.value)
                    }
                    Err(second) => Err(second.with_prior(attempts, delay)),
                }
            }
            _ => Err(err),
        }
    }
}

/// Turn a not-found failure into `None`.
fn found<T>(result: ClientResult<T>) -> ClientResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RetryError::NonRetryable {
            source: ApiError::NotFound { .. },
            ..
        }) => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl<A: PlatformApi> PlatformClient for RemoteClient<A> {
    #[instrument(skip(self))]
    async fn get_project(&self, name: &str) -> ClientResult<Option<RemoteProject>> {
        let api = self.api.as_ref();
        found(
            self.run(&self.policies.read, "get_project", move || api.get_project(name))
                .await,
        )
    }

    #[instrument(skip(self, request), fields(project = %request.name))]
    async fn create_project(&self, request: &ProjectRequest) -> ClientResult<RemoteProject> {
        let api = self.api.as_ref();
        self.run(&self.policies.write, "create_project", move || {
            api.create_project(request)
        })
        .await
    }

    #[instrument(skip(self, request), fields(project = %request.name))]
    async fn update_project(&self, request: &ProjectRequest) -> ClientResult<RemoteProject> {
        let api = self.api.as_ref();
        self.run(&self.policies.write, "update_project", move || {
            api.update_project(request)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_role_binding(
        &self,
        project: &str,
        name: &str,
    ) -> ClientResult<Option<RemoteRoleBinding>> {
        let api = self.api.as_ref();
        found(
            self.run(&self.policies.read, "get_role_binding", move || {
                api.get_role_binding(project, name)
            })
            .await,
        )
    }

    #[instrument(skip(self))]
    async fn list_role_bindings(&self, project: &str) -> ClientResult<Vec<RemoteRoleBinding>> {
        let api = self.api.as_ref();
        self.run(&self.policies.read, "list_role_bindings", move || {
            api.list_role_bindings(project)
        })
        .await
    }

    #[instrument(skip(self, request), fields(project = %request.project, binding = %request.name))]
    async fn create_or_update_role_binding(
        &self,
        request: &RoleBindingRequest,
    ) -> ClientResult<RemoteRoleBinding> {
        let api = self.api.as_ref();
        self.run(&self.policies.write, "create_or_update_role_binding", move || {
            api.create_or_update_role_binding(request)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_user(&self, email: &str) -> ClientResult<Option<RemoteUser>> {
        let api = self.api.as_ref();
        found(
            self.run(&self.policies.lookup, "get_user", move || api.get_user(email))
                .await,
        )
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::api::{ApiOperation, MemoryPlatformApi};
    use crate::error::ErrorKind;
    use platform_org::ProjectVisibility;
    use std::time::Duration;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            status: code,
            message: "upstream".into(),
            retryable: None,
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::api()
            .with_delays(Duration::from_millis(10), Duration::from_millis(50))
            .with_jitter(0.0)
    }

    fn client(api: MemoryPlatformApi, policies: ClientPolicies) -> RemoteClient<MemoryPlatformApi> {
        RemoteClient::new(Arc::new(api), policies, CancellationToken::new())
    }

    fn docs() -> RemoteProject {
        RemoteProject {
            id: "p-1".into(),
            name: "docs".into(),
            display_name: "Docs".into(),
            description: None,
            visibility: ProjectVisibility::Organization,
            tags: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let client = client(
            MemoryPlatformApi::new().with_project(docs()),
            ClientPolicies::uniform(fast()),
        );
        client.api().fail_next(ApiOperation::GetProject, status(503));
        client.api().fail_next(ApiOperation::GetProject, status(502));

        let project = client.get_project("docs").await.unwrap();
        assert_eq!(project.map(|p| p.id), Some("p-1".to_string()));
        assert_eq!(client.api().calls(ApiOperation::GetProject), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_none_without_retry() {
        let client = client(MemoryPlatformApi::new(), ClientPolicies::uniform(fast()));

        assert!(client.get_project("ghost").await.unwrap().is_none());
        assert!(client.get_user("nobody@example.com").await.unwrap().is_none());
        assert!(client.get_role_binding("ghost", "rb").await.unwrap().is_none());
        assert_eq!(client.api().calls(ApiOperation::GetProject), 1);
        assert_eq!(client.api().calls(ApiOperation::GetUser), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_is_not_retried() {
        let client = client(MemoryPlatformApi::new(), ClientPolicies::uniform(fast()));
        client.api().fail_next(ApiOperation::CreateProject, status(400));

        let request = ProjectRequest::from(&platform_org::Project::new("docs"));
        let err = client.create_project(&request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NonRetryable);
        assert_eq!(client.api().calls(ApiOperation::CreateProject), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_of_missing_project_is_an_error() {
        let client = client(MemoryPlatformApi::new(), ClientPolicies::uniform(fast()));
        let err = client.list_role_bindings("ghost").await.unwrap_err();
        assert!(matches!(
            err.last_error(),
            Some(ApiError::NotFound { resource: "project", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_gets_second_round() {
        let policies = ClientPolicies {
            rate_limit: Some(fast().with_max_attempts(2)),
            ..ClientPolicies::uniform(fast().with_max_attempts(2))
        };
        let client = client(MemoryPlatformApi::new().with_project(docs()), policies);
        for _ in 0..3 {
            client.api().fail_next(ApiOperation::GetProject, status(429));
        }

        assert!(client.get_project("docs").await.unwrap().is_some());
        assert_eq!(client.api().calls(ApiOperation::GetProject), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_round_counts_every_attempt() {
        let policies = ClientPolicies {
            rate_limit: Some(fast().with_max_attempts(2)),
            ..ClientPolicies::uniform(fast().with_max_attempts(2))
        };
        let client = client(MemoryPlatformApi::new().with_project(docs()), policies);
        for _ in 0..4 {
            client.api().fail_next(ApiOperation::GetProject, status(429));
        }

        let err = client.get_project("docs").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(err.attempts(), client.api().calls(ApiOperation::GetProject) as u32);
        assert_eq!(err.attempts(), 4);
        // One 10ms wait in each round.
        assert_eq!(err.total_delay(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_rate_limit_round() {
        let client = client(
            MemoryPlatformApi::new().with_project(docs()),
            ClientPolicies::uniform(fast().with_max_attempts(2)),
        );
        for _ in 0..2 {
            client.api().fail_next(ApiOperation::GetProject, status(429));
        }

        let err = client.get_project("docs").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(err.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_client_makes_no_calls() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = RemoteClient::new(
            Arc::new(MemoryPlatformApi::new()),
            ClientPolicies::default(),
            cancel,
        );

        let err = client.get_user("a@example.com").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(client.api().calls(ApiOperation::GetUser), 0);
    }

    #[test]
    fn test_policy_attempt_override() {
        let policies = ClientPolicies::default().with_max_attempts(9);
        assert_eq!(policies.read.max_attempts, 9);
        assert_eq!(policies.lookup.max_attempts, 9);
        assert_eq!(policies.lookup.initial_delay, RetryPolicy::network().initial_delay);
        assert_eq!(
            policies.rate_limit.map(|p| p.max_attempts),
            Some(RetryPolicy::rate_limit().max_attempts)
        );
    }
}
