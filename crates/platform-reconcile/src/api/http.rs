//! Platform API HTTP transport.
//!
//! JSON over HTTP with bearer-token authentication. Error responses may carry
//! a JSON body `{"message": "...", "retryable": true}`; the `retryable` flag is
//! kept on the error so the retry engine can honor it.

use async_trait::async_trait;
use platform_org::naming::truncate;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::{
    ApiError, ApiResult, PlatformApi, ProjectRequest, RemoteProject, RemoteRoleBinding,
    RemoteUser, RoleBindingRequest,
};
use crate::config::ServiceEndpoint;

/// Longest error message kept from a response body.
const MAX_ERROR_MESSAGE_LENGTH: usize = 512;

/// Error body returned by the platform.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "error")]
    message: Option<String>,
    #[serde(default)]
    retryable: Option<bool>,
}

/// HTTP implementation of [`PlatformApi`].
#[derive(Clone)]
pub struct HttpPlatformApi {
    /// HTTP client instance.
    client: Client,

    /// Service endpoint configuration.
    endpoint: ServiceEndpoint,
}

impl HttpPlatformApi {
    /// Create a new platform API client.
    pub fn new(endpoint: ServiceEndpoint, timeout: Duration, verify_tls: bool) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.endpoint.api_key {
            Some(ref api_key) => request.header("Authorization", format!("Bearer {}", api_key)),
            None => request,
        }
    }

    /// Send a request, mapping 404 to [`ApiError::NotFound`].
    async fn send_lookup<T>(
        &self,
        request: RequestBuilder,
        resource: &'static str,
        name: &str,
    ) -> ApiResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.authorize(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(resource = resource, name = name, "Object not found");
            return Err(ApiError::NotFound {
                resource,
                name: name.to_string(),
            });
        }

        self.handle_response(response).await
    }

    /// Handle API response and parse JSON.
    async fn handle_response<T>(&self, response: reqwest::Response) -> ApiResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            error!("Platform authentication failed");
            return Err(ApiError::AuthenticationFailed);
        }

        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let body = serde_json::from_str::<ErrorBody>(&text).ok();
            let retryable = body.as_ref().and_then(|b| b.retryable);
            let message = body
                .and_then(|b| b.message)
                .unwrap_or(text);
            let message = truncate(message.trim(), MAX_ERROR_MESSAGE_LENGTH);

            warn!(status = status.as_u16(), message = %message, "Platform API error");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
                retryable,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    #[instrument(skip(self))]
    async fn get_project(&self, name: &str) -> ApiResult<RemoteProject> {
        let url = self.endpoint.url(&format!("/api/v1/projects/{}", name));
        self.send_lookup(self.client.get(&url), "project", name).await
    }

    #[instrument(skip(self, request), fields(project = %request.name))]
    async fn create_project(&self, request: &ProjectRequest) -> ApiResult<RemoteProject> {
        debug!("Creating project");

        let url = self.endpoint.url("/api/v1/projects");
        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await?;
        self.handle_response(response).await
    }

    #[instrument(skip(self, request), fields(project = %request.name))]
    async fn update_project(&self, request: &ProjectRequest) -> ApiResult<RemoteProject> {
        debug!("Updating project");

        let url = self
            .endpoint
            .url(&format!("/api/v1/projects/{}", request.name));
        self.send_lookup(self.client.put(&url).json(request), "project", &request.name)
            .await
    }

    #[instrument(skip(self))]
    async fn get_role_binding(&self, project: &str, name: &str) -> ApiResult<RemoteRoleBinding> {
        let url = self
            .endpoint
            .url(&format!("/api/v1/projects/{}/role-bindings/{}", project, name));
        self.send_lookup(self.client.get(&url), "role binding", name)
            .await
    }

    #[instrument(skip(self))]
    async fn list_role_bindings(&self, project: &str) -> ApiResult<Vec<RemoteRoleBinding>> {
        let url = self
            .endpoint
            .url(&format!("/api/v1/projects/{}/role-bindings", project));
        self.send_lookup(self.client.get(&url), "project", project)
            .await
    }

    #[instrument(skip(self, request), fields(project = %request.project, binding = %request.name))]
    async fn create_or_update_role_binding(
        &self,
        request: &RoleBindingRequest,
    ) -> ApiResult<RemoteRoleBinding> {
        debug!(users = request.user_ids.len(), "Applying role binding");

        let url = self.endpoint.url(&format!(
            "/api/v1/projects/{}/role-bindings/{}",
            request.project, request.name
        ));
        let response = self
            .authorize(self.client.put(&url).json(request))
            .send()
            .await?;
        self.handle_response(response).await
    }

    #[instrument(skip(self))]
    async fn get_user(&self, email: &str) -> ApiResult<RemoteUser> {
        let url = self.endpoint.url("/api/v1/users/lookup");
        let request = self.client.get(&url).query(&[("email", email)]);
        self.send_lookup(request, "user", email).await
    }
}
