//! Credential providers consumed by the connection manager.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::token::{Credential, TokenIssuer};
use crate::config::AuthSettings;
use crate::utils::error::{AuthError, TokenError};

/// Path of the token endpoint relative to the backend base URL.
pub const TOKEN_PATH: &str = "/api/auth/token";

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Exchanges a username for a credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    async fn request(&self, username: &str) -> Result<Credential, AuthError>;
}

/// Calls the token endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTokenClient {
    pub fn new(backend_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}{}", backend_url.trim_end_matches('/'), TOKEN_PATH),
        }
    }

    /// Client for the endpoint under `settings.backend_url`.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(&settings.backend_url)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialProvider for HttpTokenClient {
    async fn request(&self, username: &str) -> Result<Credential, AuthError> {
        let body = TokenRequest {
            username: Some(username.to_string()),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("token endpoint {} unreachable: {e}", self.endpoint);
                AuthError::CredentialRejected(format!("token service unreachable: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let reason = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            debug!(%status, "token request for {username} rejected: {reason}");
            return Err(AuthError::CredentialRejected(reason));
        }

        resp.json::<Credential>()
            .await
            .map_err(|e| AuthError::CredentialRejected(format!("malformed credential: {e}")))
    }
}

/// Issues credentials in-process, without an HTTP hop.
#[derive(Debug, Clone)]
pub struct LocalIssuer {
    issuer: TokenIssuer,
}

impl LocalIssuer {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl CredentialProvider for LocalIssuer {
    async fn request(&self, username: &str) -> Result<Credential, AuthError> {
        self.issuer.issue(username).map_err(|e| match e {
            TokenError::EmptyUsername => AuthError::EmptyUsername,
            other => AuthError::CredentialRejected(other.to_string()),
        })
    }
}
