//! Rust toolkit for SUNAT electronic waybills (GRE): XML building, XML-DSig signing
//! and submission through the GRE REST API.
//!
//! # Examples
//! ```rust,no_run
//! use gre_core::client::GreClient;
//! use gre_core::config::{EndpointSet, EnvironmentType};
//!
//! let mut client = GreClient::with_defaults()?;
//! client
//!     .set_endpoints(EndpointSet::for_env(EnvironmentType::Beta))
//!     .set_api_credentials("client-id", "client-secret")
//!     .set_sol_credentials("20123456789", "MODDATOS", "MODDATOS");
//! # Ok::<(), gre_core::Error>(())
//! ```
pub mod api;
pub mod builder;
pub mod client;
pub mod config;
pub mod credentials;
pub mod document;
pub mod sign;

use thiserror::Error;

/// Top-level error wrapper for facade operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Builder(#[from] builder::BuilderError),
    #[error(transparent)]
    Signing(#[from] sign::SigningError),
    #[error(transparent)]
    Api(#[from] api::ApiError),
}

impl Error {
    /// Whether repeating the same call may succeed.
    ///
    /// Only network-level failures qualify; configuration, builder, signing and
    /// remote rejections fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api(err) => err.is_transport(),
            _ => false,
        }
    }
}

impl From<api::auth::AuthError> for Error {
    fn from(err: api::auth::AuthError) -> Self {
        Error::Api(api::ApiError::Auth(err))
    }
}
