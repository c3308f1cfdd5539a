//! Email to platform user ID resolution.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::client::PlatformClient;
use crate::error::{ReconcileError, ReconcileResult};

/// Resolves emails to platform user IDs.
///
/// Successful resolutions are cached for the lifetime of the resolver and
/// never evicted. Unknown emails are not cached, so a user created mid-run is
/// picked up on the next lookup. Two callers resolving the same unseen email
/// at once may both hit the platform; the first insert wins.
pub struct IdentityResolver {
    client: Arc<dyn PlatformClient>,
    cache: RwLock<HashMap<String, String>>,
}

impl IdentityResolver {
    /// Create a resolver with an empty cache.
    pub fn new(client: Arc<dyn PlatformClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Canonical form used for lookups and cache keys.
    pub fn normalize(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Check email syntax without contacting the platform.
    ///
    /// Requires exactly one `@` with non-empty local and domain parts and no
    /// whitespace.
    pub fn validate_email_format(email: &str) -> ReconcileResult<()> {
        let invalid = |reason: &str| {
            Err(ReconcileError::Validation(format!(
                "invalid email '{}': {}",
                email, reason
            )))
        };

        if email.chars().any(char::is_whitespace) {
            return invalid("contains whitespace");
        }
        let mut parts = email.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => {
                if local.is_empty() {
                    invalid("empty local part")
                } else if domain.is_empty() {
                    invalid("empty domain")
                } else {
                    Ok(())
                }
            }
            (_, None, _) => invalid("missing '@'"),
            _ => invalid("more than one '@'"),
        }
    }

    /// Resolve an email to a user ID.
    ///
    /// Returns `Ok(None)` when the platform does not know the email, and a
    /// [`ReconcileError::Resolution`] when the lookup itself failed.
    #[instrument(skip(self))]
    pub async fn resolve_email(&self, email: &str) -> ReconcileResult<Option<String>> {
        let email = Self::normalize(email);

        if let Some(id) = self.cache.read().await.get(&email) {
            debug!(email = %email, "Resolved from cache");
            return Ok(Some(id.clone()));
        }

        let user = self
            .client
            .get_user(&email)
            .await
            .map_err(|source| ReconcileError::Resolution {
                email: email.clone(),
                source,
            })?;

        match user {
            Some(user) => {
                let mut cache = self.cache.write().await;
                let id = cache.entry(email).or_insert(user.id).clone();
                Ok(Some(id))
            }
            None => {
                debug!(email = %email, "Email not known to the platform");
                Ok(None)
            }
        }
    }

    /// Cached ID for an email, without contacting the platform.
    pub async fn cached(&self, email: &str) -> Option<String> {
        self.cache.read().await.get(&Self::normalize(email)).cloned()
    }

    /// Copy of the cache, ordered by email.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.cache
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of cached resolutions.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Check whether nothing has been resolved yet.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::api::{ApiError, ApiOperation, MemoryPlatformApi, RemoteUser};
    use crate::client::{ClientPolicies, RemoteClient};
    use crate::error::ErrorKind;
    use crate::retry::RetryPolicy;
    use tokio_util::sync::CancellationToken;

    fn setup() -> (Arc<MemoryPlatformApi>, IdentityResolver) {
        let api = Arc::new(MemoryPlatformApi::new().with_user(RemoteUser {
            id: "u-alice".into(),
            email: "alice@example.com".into(),
            status: Default::default(),
            organization_role: None,
        }));
        let client = RemoteClient::new(
            api.clone(),
            ClientPolicies::uniform(RetryPolicy::no_retry()),
            CancellationToken::new(),
        );
        (api, IdentityResolver::new(Arc::new(client)))
    }

    #[test]
    fn test_email_format() {
        assert!(IdentityResolver::validate_email_format("alice@example.com").is_ok());

        for bad in ["alice", "@example.com", "alice@", "a@b@c", "al ice@example.com", ""] {
            let err = IdentityResolver::validate_email_format(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{bad}");
        }
    }

    #[tokio::test]
    async fn test_resolve_caches_hits() {
        let (api, resolver) = setup();

        assert_eq!(
            resolver.resolve_email("Alice@Example.com ").await.unwrap(),
            Some("u-alice".to_string())
        );
        assert_eq!(
            resolver.resolve_email("alice@example.com").await.unwrap(),
            Some("u-alice".to_string())
        );
        assert_eq!(api.calls(ApiOperation::GetUser), 1);
        assert_eq!(resolver.len().await, 1);
        assert_eq!(
            resolver.cached("ALICE@example.com").await.as_deref(),
            Some("u-alice")
        );
    }

    #[tokio::test]
    async fn test_unknown_email_is_not_cached() {
        let (api, resolver) = setup();

        assert_eq!(resolver.resolve_email("bob@example.com").await.unwrap(), None);
        assert_eq!(resolver.resolve_email("bob@example.com").await.unwrap(), None);
        assert_eq!(api.calls(ApiOperation::GetUser), 2);
        assert!(resolver.is_empty().await);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_resolution_error() {
        let (api, resolver) = setup();
        api.fail_next(ApiOperation::GetUser, ApiError::AuthenticationFailed);

        let err = resolver.resolve_email("alice@example.com").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(resolver.snapshot().await.is_empty());
    }
}
