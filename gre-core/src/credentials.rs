//! API and SOL credentials.
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::config::EndpointSet;

/// Credential bundle used to obtain GRE API tokens.
///
/// `client_id`/`client_secret` come from the API credentials registered in SUNAT's
/// menu SOL. The SOL pair is optional: when present the token exchange uses the
/// password grant with `username = ruc + user`.
///
/// # Examples
/// ```rust
/// use gre_core::credentials::Credentials;
///
/// let creds = Credentials::new("client-id", "secret")
///     .with_sol("20123456789", "MODDATOS", "moddatos");
/// assert_eq!(creds.username(), Some("20123456789MODDATOS"));
/// assert!(creds.uses_password_grant());
/// ```
#[derive(Debug, Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: SecretString,
    username: Option<String>,
    password: Option<SecretString>,
}

/// Identity of a credential set against one endpoint set, used to key cached tokens.
///
/// Secrets only enter the key as a SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialKey {
    auth_url: String,
    submission_url: String,
    client_id: String,
    username: Option<String>,
    fingerprint: String,
}

impl CredentialKey {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn submission_url(&self) -> &str {
        &self.submission_url
    }
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            username: None,
            password: None,
        }
    }

    /// Attach SOL credentials; the username is the RUC immediately followed by the user.
    pub fn with_sol(
        mut self,
        ruc: impl AsRef<str>,
        user: impl AsRef<str>,
        password: impl Into<String>,
    ) -> Self {
        self.set_sol(ruc, user, password);
        self
    }

    pub(crate) fn set_api(&mut self, client_id: impl Into<String>, client_secret: impl Into<String>) {
        self.client_id = client_id.into();
        self.client_secret = SecretString::new(client_secret.into());
    }

    pub(crate) fn set_sol(
        &mut self,
        ruc: impl AsRef<str>,
        user: impl AsRef<str>,
        password: impl Into<String>,
    ) {
        self.username = Some(format!("{}{}", ruc.as_ref(), user.as_ref()));
        self.password = Some(SecretString::new(password.into()));
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret().as_str())
    }

    /// Client id and secret are both non-empty.
    pub fn has_api_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret().trim().is_empty()
    }

    pub fn uses_password_grant(&self) -> bool {
        matches!(
            (self.username(), self.password()),
            (Some(user), Some(_)) if !user.is_empty()
        )
    }

    /// Cache key for these credentials when used against `endpoints`.
    pub fn key(&self, endpoints: &EndpointSet) -> CredentialKey {
        CredentialKey {
            auth_url: endpoints.auth().to_string(),
            submission_url: endpoints.submission().to_string(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            fingerprint: self.secret_fingerprint(),
        }
    }

    fn secret_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.client_secret().as_bytes());
        if let Some(password) = self.password() {
            hasher.update([0u8]);
            hasher.update(password.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("", "")
    }
}
