//! Per-credential token cache with early refresh.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration as StdDuration,
};

use chrono::{Duration, Utc};
use tracing::debug;

use super::auth::{AuthClient, AuthError, Token};
use crate::{
    config::EndpointSet,
    credentials::{CredentialKey, Credentials},
};

/// Default time before expiry at which a cached token is replaced.
pub const DEFAULT_REFRESH_MARGIN: StdDuration = StdDuration::from_secs(600);

/// Storage backend for cached tokens.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &CredentialKey) -> Option<Token>;
    fn set(&self, key: CredentialKey, token: Token);
    fn remove(&self, key: &CredentialKey);
}

/// Process-local [`TokenStore`].
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<CredentialKey, Token>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenStore for InMemoryTokenStore {
    fn get(&self, key: &CredentialKey) -> Option<Token> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: CredentialKey, token: Token) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, token);
    }

    fn remove(&self, key: &CredentialKey) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Serializes token lookups so concurrent callers share one refresh.
pub struct TokenCache {
    store: Arc<dyn TokenStore>,
    refresh: tokio::sync::Mutex<()>,
    margin: StdDuration,
}

impl TokenCache {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            refresh: tokio::sync::Mutex::new(()),
            margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    pub fn with_refresh_margin(mut self, margin: StdDuration) -> Self {
        self.margin = margin;
        self
    }

    pub fn refresh_margin(&self) -> StdDuration {
        self.margin
    }

    pub fn store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.store)
    }

    /// Return the cached token for `credentials` at `endpoints`, authenticating
    /// when it is missing or within the refresh margin of its expiry.
    ///
    /// A failed exchange leaves no entry behind for these credentials.
    pub async fn get_or_refresh(
        &self,
        auth: &dyn AuthClient,
        endpoints: &EndpointSet,
        credentials: &Credentials,
    ) -> Result<Token, AuthError> {
        let key = credentials.key(endpoints);
        let _guard = self.refresh.lock().await;

        if let Some(token) = self.store.get(&key) {
            if token.is_valid_at(Utc::now(), self.chrono_margin()) {
                debug!(client_id = key.client_id(), "reusing cached GRE token");
                return Ok(token);
            }
            debug!(client_id = key.client_id(), "cached GRE token expired");
            self.store.remove(&key);
        }

        match auth.authenticate(credentials).await {
            Ok(token) => {
                debug!(
                    client_id = key.client_id(),
                    expires_at = %token.expires_at(),
                    "obtained GRE token"
                );
                self.store.set(key, token.clone());
                Ok(token)
            }
            Err(err) => {
                self.store.remove(&key);
                Err(err)
            }
        }
    }

    /// Drop the cached token for `credentials` at `endpoints`.
    pub fn evict(&self, endpoints: &EndpointSet, credentials: &Credentials) {
        let key = credentials.key(endpoints);
        debug!(client_id = key.client_id(), "evicting GRE token");
        self.store.remove(&key);
    }

    fn chrono_margin(&self) -> Duration {
        Duration::from_std(self.margin).unwrap_or_else(|_| Duration::days(365))
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryTokenStore::new()))
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("margin", &self.margin)
            .finish_non_exhaustive()
    }
}
