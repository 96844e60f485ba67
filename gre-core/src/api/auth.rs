//! OAuth2 token exchange against SUNAT's security API.
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::error_message;
use crate::{config::endpoint_url, credentials::Credentials};

/// Scope requested for every GRE token.
pub const GRE_SCOPE: &str = "https://api-cpe.sunat.gob.pe";

/// Failures of the token exchange.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed token response: {0}")]
    Malformed(String),
    #[error("token request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("invalid token endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Bearer token with its absolute expiry.
#[derive(Clone)]
pub struct Token {
    access_token: SecretString,
    token_type: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            token_type: token_type.into(),
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Still usable at `now` with at least `margin` left before expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges credentials for a [`Token`].
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// [`AuthClient`] talking to `{base}/clientessol/{client_id}/oauth2/token/`.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    http: Client,
    base_url: String,
    scope: String,
}

impl HttpAuthClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            scope: GRE_SCOPE.to_string(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    fn token_url(&self, client_id: &str) -> Result<reqwest::Url, AuthError> {
        endpoint_url(
            &self.base_url,
            &["clientessol", client_id, "oauth2", "token", ""],
        )
        .map_err(AuthError::InvalidEndpoint)
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token, AuthError> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(6);
        match (credentials.username(), credentials.password()) {
            (Some(username), Some(password)) if credentials.uses_password_grant() => {
                form.push(("grant_type", "password"));
                form.push(("username", username));
                form.push(("password", password));
            }
            _ => form.push(("grant_type", "client_credentials")),
        }
        form.push(("scope", &self.scope));
        form.push(("client_id", credentials.client_id()));
        form.push(("client_secret", credentials.client_secret()));

        debug!(client_id = credentials.client_id(), grant = form[0].1, "requesting GRE token");
        let response = self
            .http
            .post(self.token_url(credentials.client_id())?)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(AuthError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(AuthError::Transport)?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "token request rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::Malformed(format!("{e}: {body}")))?;
        if parsed.access_token.trim().is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }
        let lifetime = parsed.expires_in.unwrap_or_default().clamp(0, 86_400 * 365);
        Ok(Token::new(
            parsed.access_token,
            parsed.token_type.unwrap_or_else(|| "Bearer".into()),
            Utc::now() + Duration::seconds(lifetime),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_honors_margin() {
        let now = Utc::now();
        let token = Token::new("abc", "Bearer", now + Duration::seconds(3600));
        assert!(token.is_valid_at(now, Duration::seconds(600)));
        assert!(!token.is_valid_at(now + Duration::seconds(3000), Duration::seconds(600)));
        assert!(!token.is_valid_at(now, Duration::seconds(3600)));
    }

    #[test]
    fn debug_hides_access_token() {
        let token = Token::new("very-secret-token", "Bearer", Utc::now());
        assert!(!format!("{token:?}").contains("very-secret-token"));
    }

    #[test]
    fn token_url_includes_client_id() {
        let client = HttpAuthClient::new(Client::new(), "https://api-seguridad.sunat.gob.pe/v1/");
        assert_eq!(
            client.token_url("abc-123").unwrap().as_str(),
            "https://api-seguridad.sunat.gob.pe/v1/clientessol/abc-123/oauth2/token/"
        );
    }

    #[test]
    fn token_url_escapes_client_id() {
        let client = HttpAuthClient::new(Client::new(), "https://auth.test/v1");
        assert_eq!(
            client.token_url("a/../b?c").unwrap().as_str(),
            "https://auth.test/v1/clientessol/a%2F..%2Fb%3Fc/oauth2/token/"
        );
        assert!(matches!(
            client.token_url(".."),
            Err(AuthError::InvalidEndpoint(_))
        ));
    }
}
