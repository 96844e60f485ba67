//! High-level GRE client: build, sign and submit documents, then poll tickets.
use std::{sync::Arc, time::Duration};

use reqwest::Client;
use tracing::{info, instrument, warn, Span};

use crate::{
    api::{
        auth::{AuthClient, HttpAuthClient},
        sender::GreSender,
        token::{TokenCache, TokenStore},
        ApiError, ApiFactory, SendResult, StatusResult,
    },
    builder::{BuilderRegistry, XmlBuilderResolver},
    config::{BuilderOptions, ConfigError, EndpointSet},
    credentials::Credentials,
    document::Document,
    sign::{DsigSigner, XmlSigner},
    Error,
};

/// Settings read at the start of every operation.
#[derive(Debug, Clone, Default)]
struct ClientConfig {
    endpoints: EndpointSet,
    credentials: Credentials,
    options: BuilderOptions,
}

impl ClientConfig {
    fn require_credentials(&self) -> Result<&Credentials, ConfigError> {
        if self.credentials.has_api_credentials() {
            Ok(&self.credentials)
        } else {
            Err(ConfigError::MissingCredentials)
        }
    }
}

/// Facade over XML building, signing and the GRE REST API.
///
/// Setters mutate the client and chain; each [`send`](Self::send) or
/// [`get_status`](Self::get_status) works on a snapshot of the settings taken
/// when it starts. Tokens are cached per client instance, keyed by credentials.
///
/// # Examples
/// ```rust,no_run
/// use gre_core::client::GreClient;
/// use gre_core::document::Despatch;
///
/// # async fn run(despatch: Despatch, cert_pem: &str) -> Result<(), gre_core::Error> {
/// let mut client = GreClient::with_defaults()?;
/// client
///     .set_api_credentials("client-id", "client-secret")
///     .set_sol_credentials("20123456789", "MODDATOS", "MODDATOS")
///     .set_certificate(cert_pem)?;
///
/// let sent = client.send(&despatch).await?;
/// let status = client.get_status(Some(sent.ticket())).await?;
/// println!("{:?}", status.state());
/// # Ok(())
/// # }
/// ```
pub struct GreClient {
    config: ClientConfig,
    signer: Box<dyn XmlSigner>,
    registry: BuilderRegistry,
    http: Client,
    auth: Option<Arc<dyn AuthClient>>,
    tokens: TokenCache,
}

impl GreClient {
    /// Create a client from explicit collaborators with production endpoints.
    ///
    /// # Errors
    /// Returns [`Error::Api`] if the HTTP client cannot be initialized.
    pub fn new(signer: impl XmlSigner + 'static, registry: BuilderRegistry) -> Result<Self, Error> {
        let http = Client::builder().build().map_err(ApiError::Transport)?;
        Ok(Self {
            config: ClientConfig::default(),
            signer: Box::new(signer),
            registry,
            http,
            auth: None,
            tokens: TokenCache::default(),
        })
    }

    /// [`DsigSigner`] without a certificate plus the default builder registry.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(DsigSigner::new(), BuilderRegistry::default())
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Replace the token exchange; by default tokens come from the `api` endpoint.
    pub fn with_auth_client(mut self, auth: Arc<dyn AuthClient>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.tokens = TokenCache::new(store).with_refresh_margin(self.tokens.refresh_margin());
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.tokens = TokenCache::new(self.tokens.store()).with_refresh_margin(margin);
        self
    }

    pub fn set_endpoints(&mut self, endpoints: EndpointSet) -> &mut Self {
        self.config.endpoints = endpoints;
        self
    }

    /// Merge `options` into the current builder options; new keys win.
    pub fn set_builder_options(&mut self, options: BuilderOptions) -> &mut Self {
        self.config.options.merge(options);
        self
    }

    pub fn set_api_credentials(
        &mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> &mut Self {
        self.config.credentials.set_api(client_id, client_secret);
        self
    }

    /// SOL user; the token username becomes `ruc + user`.
    pub fn set_sol_credentials(
        &mut self,
        ruc: impl AsRef<str>,
        user: impl AsRef<str>,
        password: impl Into<String>,
    ) -> &mut Self {
        self.config.credentials.set_sol(ruc, user, password);
        self
    }

    /// Load signing material (certificate and private key PEM).
    ///
    /// # Errors
    /// Returns [`Error::Signing`] if the material cannot be parsed.
    pub fn set_certificate(&mut self, pem: &str) -> Result<&mut Self, Error> {
        self.signer.set_certificate(pem)?;
        Ok(self)
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.config.endpoints
    }

    pub fn builder_options(&self) -> &BuilderOptions {
        &self.config.options
    }

    pub fn credentials(&self) -> &Credentials {
        &self.config.credentials
    }

    pub fn has_credentials(&self) -> bool {
        self.config.credentials.has_api_credentials()
    }

    pub fn registry_mut(&mut self) -> &mut BuilderRegistry {
        &mut self.registry
    }

    /// Render `document` to unsigned XML with the current builder options.
    ///
    /// # Errors
    /// Returns [`Error::Builder`] if no builder handles `D` or rendering fails.
    pub fn build_xml<D: Document>(&self, document: &D) -> Result<String, Error> {
        let resolver = XmlBuilderResolver::new(&self.registry, self.config.options.clone());
        Ok(resolver.find::<D>()?.build(document)?)
    }

    /// Build and sign `document` without submitting it.
    ///
    /// # Errors
    /// Returns [`Error::Config`] without a certificate, otherwise builder or signing errors.
    pub fn sign<D: Document>(&self, document: &D) -> Result<String, Error> {
        if !self.signer.has_certificate() {
            return Err(ConfigError::MissingCertificate.into());
        }
        let xml = self.build_xml(document)?;
        Ok(self.signer.sign_xml(&xml)?)
    }

    /// Build, sign and submit `document`, returning SUNAT's ticket.
    ///
    /// No request is made unless credentials, certificate and builder are in place.
    ///
    /// # Errors
    /// Returns [`Error`] for configuration, building, signing, auth or API failures.
    #[instrument(skip_all, fields(document = tracing::field::Empty))]
    pub async fn send<D: Document>(&self, document: &D) -> Result<SendResult, Error> {
        let config = self.config.clone();
        let credentials = config.require_credentials()?;
        if !self.signer.has_certificate() {
            return Err(ConfigError::MissingCertificate.into());
        }

        let name = document.name();
        Span::current().record("document", name.as_str());

        let resolver = XmlBuilderResolver::new(&self.registry, config.options.clone());
        let xml = resolver.find::<D>()?.build(document)?;
        let signed = self.signer.sign_xml(&xml)?;

        let sender = self.create_sender(&config, credentials).await?;
        let result = self.settle(&config, sender.send(&name, &signed).await)?;
        info!(ticket = result.ticket(), "GRE document accepted for processing");
        Ok(result)
    }

    /// Query the processing status of `ticket`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when credentials are missing or the ticket is blank,
    /// otherwise auth or API failures.
    #[instrument(skip_all, fields(ticket = ?ticket))]
    pub async fn get_status(&self, ticket: Option<&str>) -> Result<StatusResult, Error> {
        let config = self.config.clone();
        let credentials = config.require_credentials()?;
        let ticket = ticket
            .map(str::trim)
            .filter(|ticket| !ticket.is_empty())
            .ok_or(ConfigError::MissingTicket)?;

        let sender = self.create_sender(&config, credentials).await?;
        let result = self.settle(&config, sender.status(ticket).await)?;
        info!(code = result.code(), state = ?result.state(), "GRE ticket status");
        Ok(result)
    }

    async fn create_sender(
        &self,
        config: &ClientConfig,
        credentials: &Credentials,
    ) -> Result<GreSender, Error> {
        let http_auth;
        let auth: &dyn AuthClient = match &self.auth {
            Some(auth) => auth.as_ref(),
            None => {
                http_auth = HttpAuthClient::new(self.http.clone(), config.endpoints.auth());
                &http_auth
            }
        };
        let factory = ApiFactory::new(
            auth,
            self.http.clone(),
            &self.tokens,
            config.endpoints.clone(),
        );
        Ok(factory.create(credentials).await?)
    }

    /// A 401 means the cached token is no longer accepted.
    fn settle<T>(&self, config: &ClientConfig, result: Result<T, ApiError>) -> Result<T, Error> {
        if let Err(ApiError::Remote { code: 401, .. }) = &result {
            warn!("GRE token rejected, evicting it");
            self.tokens.evict(&config.endpoints, &config.credentials);
        }
        result.map_err(Error::from)
    }
}

impl std::fmt::Debug for GreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GreClient")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("has_certificate", &self.signer.has_certificate())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::auth::{AuthError, Token},
        builder::BuilderError,
        sign::SigningError,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSigner {
        loaded: bool,
    }

    impl XmlSigner for FakeSigner {
        fn set_certificate(&mut self, pem: &str) -> Result<(), SigningError> {
            if pem.is_empty() {
                return Err(SigningError::Certificate("empty".into()));
            }
            self.loaded = true;
            Ok(())
        }

        fn has_certificate(&self) -> bool {
            self.loaded
        }

        fn sign_xml(&self, xml: &str) -> Result<String, SigningError> {
            Ok(format!("{xml}<!--signed-->"))
        }
    }

    #[derive(Default)]
    struct CountingAuth(AtomicUsize);

    #[async_trait]
    impl AuthClient for CountingAuth {
        async fn authenticate(&self, _: &Credentials) -> Result<Token, AuthError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::Malformed("unreachable in these tests".into()))
        }
    }

    struct Memo;

    impl Document for Memo {
        fn name(&self) -> String {
            "memo".into()
        }
    }

    fn client(auth: Arc<CountingAuth>) -> GreClient {
        GreClient::new(FakeSigner::default(), BuilderRegistry::default())
            .unwrap()
            .with_auth_client(auth)
    }

    #[tokio::test]
    async fn send_without_credentials_is_config_error() {
        let auth = Arc::new(CountingAuth::default());
        let mut client = client(auth.clone());
        client.set_certificate("pem").unwrap();

        let err = client.send(&crate::document::Despatch::default()).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingCredentials)));
        assert_eq!(auth.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_without_certificate_is_config_error() {
        let auth = Arc::new(CountingAuth::default());
        let mut client = client(auth.clone());
        client.set_api_credentials("id", "secret");

        let err = client.send(&crate::document::Despatch::default()).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingCertificate)));
        assert_eq!(auth.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_unknown_document_type_is_builder_error() {
        let auth = Arc::new(CountingAuth::default());
        let mut client = client(auth.clone());
        client
            .set_api_credentials("id", "secret")
            .set_certificate("pem")
            .unwrap();

        let err = client.send(&Memo).await.unwrap_err();
        assert!(matches!(err, Error::Builder(BuilderError::NotFound { .. })));
        assert_eq!(auth.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_status_requires_ticket() {
        let auth = Arc::new(CountingAuth::default());
        let mut client = client(auth.clone());
        client.set_api_credentials("id", "secret");

        for ticket in [None, Some(""), Some("   ")] {
            let err = client.get_status(ticket).await.unwrap_err();
            assert!(matches!(err, Error::Config(ConfigError::MissingTicket)));
        }
        assert_eq!(auth.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_status_requires_credentials() {
        let client = client(Arc::new(CountingAuth::default()));
        let err = client.get_status(Some("ticket")).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingCredentials)));
    }

    #[tokio::test]
    async fn auth_failure_surfaces_as_api_error() {
        let auth = Arc::new(CountingAuth::default());
        let mut client = client(auth.clone());
        client.set_api_credentials("id", "secret");

        let err = client.get_status(Some("abc")).await.unwrap_err();
        assert!(matches!(err, Error::Api(ApiError::Auth(AuthError::Malformed(_)))));
        assert_eq!(auth.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn builder_options_merge_across_calls() {
        let mut client = client(Arc::new(CountingAuth::default()));
        client
            .set_builder_options(BuilderOptions::from_iter([("a", 1)]))
            .set_builder_options(BuilderOptions::from_iter([("b", 2)]));
        let options = client.builder_options();
        assert_eq!(options.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(options.get("b"), Some(&serde_json::json!(2)));
        assert!(!options.autoescape());
    }

    #[test]
    fn sign_requires_certificate() {
        let client = client(Arc::new(CountingAuth::default()));
        let err = client.sign(&crate::document::Despatch::default()).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingCertificate)));
    }

    #[test]
    fn credentials_setters_chain() {
        let mut client = client(Arc::new(CountingAuth::default()));
        assert!(!client.has_credentials());
        client
            .set_sol_credentials("20123456789", "USER", "pw")
            .set_api_credentials("id", "secret");
        assert!(client.has_credentials());
        assert_eq!(client.credentials().username(), Some("20123456789USER"));
    }
}
