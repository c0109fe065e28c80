//! Polymorphic authenticator: the capability set
//! `{authenticate_token, authenticate_user, authenticate_group,
//! authenticate_collection, get_tape_quota, get_service_information}`,
//! backed by three bearer-token-authenticated HTTPS endpoints on an
//! external identity provider. Variants are selected by configuration
//! (e.g. a JASMIN-flavoured backend); this module provides a real
//! `reqwest`-backed implementation and a deterministic mock for tests.

use super::quota_resolver::{self, ServiceInformation};
use crate::config::AuthenticationConfig;
use crate::error::NldsError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Group roles used by the catalog's permission rules (spec §4.5): a user
/// who is MANAGER or DEPUTY of a group may act on behalf of the group's
/// holdings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Manager,
    Deputy,
    Member,
}

#[derive(Debug, Deserialize)]
struct UserProfileResponse {
    username: String,
}

#[derive(Debug, Deserialize)]
struct UserServicesResponse {
    #[serde(default)]
    group_workspaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserGrantsResponse {
    #[serde(default)]
    group_workspaces: Vec<GrantedRole>,
}

#[derive(Debug, Deserialize)]
struct GrantedRole {
    name: String,
    role: String,
}

/// Trait for pluggable authenticators so tests can inject a deterministic
/// double. All methods take the caller's bearer token; the real
/// implementation re-validates the token with the identity provider and
/// caches the decision for `cache_ttl` (configuration) to avoid a remote
/// round-trip per catalog permission check within one transaction.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate_token(&self, token: &str) -> Result<bool, NldsError>;
    async fn authenticate_user(&self, token: &str, user: &str) -> Result<bool, NldsError>;
    async fn authenticate_group(&self, token: &str, group: &str) -> Result<bool, NldsError>;
    async fn authenticate_collection(
        &self,
        token: &str,
        group: &str,
    ) -> Result<GroupRole, NldsError>;
    async fn get_service_information(
        &self,
        token: &str,
        service_name: &str,
    ) -> Result<ServiceInformation, NldsError>;
    async fn get_tape_quota(&self, token: &str, service_name: &str) -> Result<u64, NldsError>;
}

/// One cached authentication decision, keyed by `(token, subject)`, with
/// its insertion time for TTL expiry.
struct CacheEntry<T> {
    value: T,
    at: Instant,
}

/// Real authenticator backed by the identity provider's three HTTPS
/// endpoints.
pub struct RealAuthenticator {
    client: reqwest::Client,
    config: AuthenticationConfig,
    role_cache: RwLock<std::collections::HashMap<(String, String), CacheEntry<GroupRole>>>,
}

impl RealAuthenticator {
    pub fn new(config: AuthenticationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            role_cache: RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn bearer(&self, token: &str) -> String {
        if token.to_ascii_lowercase().starts_with("bearer ") {
            token.to_string()
        } else {
            format!("Bearer {}", token)
        }
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserProfileResponse, NldsError> {
        let resp = self
            .client
            .get(&self.config.user_profile_url)
            .header("Authorization", self.bearer(token))
            .send()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NldsError::Authentication {
                reason: format!("user profile request returned {}", resp.status()),
            });
        }
        resp.json()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))
    }

    async fn fetch_services(&self, token: &str) -> Result<UserServicesResponse, NldsError> {
        let resp = self
            .client
            .get(&self.config.user_services_url)
            .header("Authorization", self.bearer(token))
            .send()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NldsError::IdentityProvider(format!(
                "user services request returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))
    }

    async fn fetch_grants(&self, token: &str) -> Result<UserGrantsResponse, NldsError> {
        let resp = self
            .client
            .get(&self.config.user_grants_url)
            .header("Authorization", self.bearer(token))
            .send()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NldsError::IdentityProvider(format!(
                "user grants request returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))
    }

    /// Fetch a richer per-service description document, used both for
    /// quota extraction and (were it needed) other service attributes.
    /// Reuses the `user_services_url` endpoint per spec §6.
    async fn fetch_service_information(
        &self,
        token: &str,
        service_name: &str,
    ) -> Result<ServiceInformation, NldsError> {
        let url = format!("{}?name={}", self.config.user_services_url, service_name);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.bearer(token))
            .send()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NldsError::IdentityProvider(format!(
                "user services request for {} returned {}",
                service_name,
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| NldsError::IdentityProvider(e.to_string()))
    }
}

#[async_trait]
impl Authenticator for RealAuthenticator {
    async fn authenticate_token(&self, token: &str) -> Result<bool, NldsError> {
        match self.fetch_profile(token).await {
            Ok(_) => Ok(true),
            Err(NldsError::Authentication { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn authenticate_user(&self, token: &str, user: &str) -> Result<bool, NldsError> {
        let profile = self.fetch_profile(token).await?;
        Ok(profile.username == user)
    }

    async fn authenticate_group(&self, token: &str, group: &str) -> Result<bool, NldsError> {
        let services = self.fetch_services(token).await?;
        Ok(services.group_workspaces.iter().any(|g| g == group))
    }

    async fn authenticate_collection(
        &self,
        token: &str,
        group: &str,
    ) -> Result<GroupRole, NldsError> {
        let key = (token.to_string(), group.to_string());
        {
            let cache = self.role_cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.at.elapsed() < self.config.cache_ttl {
                    return Ok(entry.value);
                }
            }
        }

        let grants = self.fetch_grants(token).await?;
        let role = grants
            .group_workspaces
            .iter()
            .find(|g| g.name == group)
            .map(|g| match g.role.to_ascii_uppercase().as_str() {
                "MANAGER" => GroupRole::Manager,
                "DEPUTY" => GroupRole::Deputy,
                _ => GroupRole::Member,
            })
            .unwrap_or(GroupRole::Member);

        self.role_cache.write().await.insert(
            key,
            CacheEntry {
                value: role,
                at: Instant::now(),
            },
        );
        Ok(role)
    }

    async fn get_service_information(
        &self,
        token: &str,
        service_name: &str,
    ) -> Result<ServiceInformation, NldsError> {
        self.fetch_service_information(token, service_name).await
    }

    async fn get_tape_quota(&self, token: &str, service_name: &str) -> Result<u64, NldsError> {
        let info = self.get_service_information(token, service_name).await?;
        quota_resolver::extract_tape_quota(&info, service_name)
    }
}

/// Deterministic authenticator used in tests: every answer is fixed at
/// construction time, no network calls are made.
pub struct MockAuthenticator {
    pub accept_tokens: bool,
    pub known_user: Option<String>,
    pub known_groups: Vec<String>,
    pub role: GroupRole,
    pub tape_quota: u64,
}

impl MockAuthenticator {
    pub fn new(accept_tokens: bool) -> Self {
        Self {
            accept_tokens,
            known_user: None,
            known_groups: Vec::new(),
            role: GroupRole::Member,
            tape_quota: 0,
        }
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate_token(&self, _token: &str) -> Result<bool, NldsError> {
        Ok(self.accept_tokens)
    }

    async fn authenticate_user(&self, _token: &str, user: &str) -> Result<bool, NldsError> {
        Ok(self.known_user.as_deref() == Some(user))
    }

    async fn authenticate_group(&self, _token: &str, group: &str) -> Result<bool, NldsError> {
        Ok(self.known_groups.iter().any(|g| g == group))
    }

    async fn authenticate_collection(
        &self,
        _token: &str,
        _group: &str,
    ) -> Result<GroupRole, NldsError> {
        Ok(self.role)
    }

    async fn get_service_information(
        &self,
        _token: &str,
        _service_name: &str,
    ) -> Result<ServiceInformation, NldsError> {
        Err(NldsError::Internal(
            "MockAuthenticator does not serve service information".to_string(),
        ))
    }

    async fn get_tape_quota(&self, _token: &str, _service_name: &str) -> Result<u64, NldsError> {
        Ok(self.tape_quota)
    }
}

/// Shared handle to an authenticator, cloned across consumer tasks.
pub type SharedAuthenticator = Arc<dyn Authenticator>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_authenticator_reports_configured_role() {
        let mock = MockAuthenticator {
            role: GroupRole::Manager,
            ..MockAuthenticator::new(true)
        };
        let role = mock.authenticate_collection("t", "gws_test").await.unwrap();
        assert_eq!(role, GroupRole::Manager);
    }

    #[tokio::test]
    async fn mock_authenticator_rejects_unknown_user() {
        let mock = MockAuthenticator::new(true);
        assert!(!mock.authenticate_user("t", "alice").await.unwrap());
    }
}
