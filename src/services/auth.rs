//! Caller identity resolution
//!
//! Handlers never trust identities from request bodies; the bearer token is
//! resolved against the managed auth backend. Operator capability rides on
//! the role claim the backend returns.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: Uuid,
    pub is_operator: bool,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, AuthError>;
}

/// Resolves tokens against the auth backend's user-info endpoint
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: Uuid,
    #[serde(default)]
    role: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, AuthError> {
        let resp = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(bearer_token)
            .header("apikey", &self.api_key)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidToken);
        }
        let user: UserInfo = resp.error_for_status()?.json().await?;

        Ok(Identity {
            user_id: user.id,
            is_operator: matches!(user.role.as_deref(), Some("admin") | Some("service_role")),
        })
    }
}
