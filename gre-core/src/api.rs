//! SUNAT GRE HTTP API: authentication, token cache, submission and status.
pub mod auth;
pub mod sender;
pub mod token;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{config::EndpointSet, credentials::Credentials};
use auth::{AuthClient, AuthError};
use sender::GreSender;
use token::TokenCache;

/// Errors returned by the GRE API layer.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote error {code}: {message}")]
    Remote {
        code: u16,
        message: String,
        details: Vec<RemoteError>,
    },
    #[error("invalid response from SUNAT: {0}")]
    InvalidResponse(String),
    #[error("invalid API endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to package document: {0}")]
    Packaging(String),
}

impl ApiError {
    /// Network-level failure (connect, timeout, reset), including during auth.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(_) | ApiError::Auth(AuthError::Transport(_))
        )
    }

    /// HTTP status reported by the remote side, if it answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Remote { code, .. } => Some(*code),
            ApiError::Auth(AuthError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Error code and description reported by SUNAT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteError {
    code: String,
    message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendResult {
    ticket: String,
    received_at: Option<String>,
}

impl SendResult {
    pub fn new(ticket: impl Into<String>, received_at: Option<String>) -> Self {
        Self {
            ticket: ticket.into(),
            received_at,
        }
    }

    /// Identifier to poll with [`GreClient::get_status`](crate::client::GreClient::get_status).
    pub fn ticket(&self) -> &str {
        &self.ticket
    }

    pub fn received_at(&self) -> Option<&str> {
        self.received_at.as_deref()
    }
}

/// Processing state of a submitted ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketState {
    Pending,
    Accepted,
    Rejected,
}

impl TicketState {
    /// Map SUNAT's `codRespuesta`; `None` for codes outside the documented set.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "98" => Some(TicketState::Pending),
            "0" => Some(TicketState::Accepted),
            "99" => Some(TicketState::Rejected),
            _ => None,
        }
    }
}

/// Status of a previously submitted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    code: String,
    state: TicketState,
    error: Option<RemoteError>,
    cdr_generated: bool,
    cdr_zip: Option<Vec<u8>>,
    cdr_xml: Option<String>,
}

impl StatusResult {
    pub(crate) fn new(code: String, state: TicketState) -> Self {
        Self {
            code,
            state,
            error: None,
            cdr_generated: false,
            cdr_zip: None,
            cdr_xml: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn state(&self) -> TicketState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == TicketState::Pending
    }

    pub fn error(&self) -> Option<&RemoteError> {
        self.error.as_ref()
    }

    pub fn cdr_generated(&self) -> bool {
        self.cdr_generated
    }

    /// Zipped CDR (constancia de recepción) as returned by SUNAT.
    pub fn cdr_zip(&self) -> Option<&[u8]> {
        self.cdr_zip.as_deref()
    }

    /// The XML document found inside the CDR archive.
    pub fn cdr_xml(&self) -> Option<&str> {
        self.cdr_xml.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    cod: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    cod: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
}

pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Best human-readable message in an error body, falling back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    let error_text = parsed.error.as_ref().and_then(|value| match value {
        Value::String(text) => Some(text.clone()),
        _ => None,
    });
    parsed
        .msg
        .or(parsed.error_description)
        .or(error_text)
        .or(parsed.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            let raw = body.trim();
            if raw.is_empty() {
                "empty response body".to_string()
            } else {
                raw.to_string()
            }
        })
}

/// Build [`ApiError::Remote`] from a non-success response.
pub(crate) fn remote_error(status: u16, body: &str) -> ApiError {
    let details = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| {
            let mut details: Vec<RemoteError> = parsed
                .errors
                .into_iter()
                .map(|item| {
                    RemoteError::new(
                        item.cod.as_ref().map(value_to_string).unwrap_or_default(),
                        item.msg.unwrap_or_default(),
                    )
                })
                .collect();
            if details.is_empty() {
                if let (Some(code), Some(msg)) = (parsed.cod.as_ref(), parsed.msg.as_ref()) {
                    details.push(RemoteError::new(value_to_string(code), msg.clone()));
                }
            }
            details
        })
        .unwrap_or_default();
    ApiError::Remote {
        code: status,
        message: error_message(body),
        details,
    }
}

/// Hands out authenticated [`GreSender`]s for one endpoint set.
///
/// Tokens are cached per endpoint set, so a token issued for one set is never
/// sent to another.
pub struct ApiFactory<'a> {
    auth: &'a dyn AuthClient,
    http: Client,
    tokens: &'a TokenCache,
    endpoints: EndpointSet,
}

impl<'a> ApiFactory<'a> {
    pub fn new(
        auth: &'a dyn AuthClient,
        http: Client,
        tokens: &'a TokenCache,
        endpoints: EndpointSet,
    ) -> Self {
        Self {
            auth,
            http,
            tokens,
            endpoints,
        }
    }

    /// Obtain a valid token for `credentials` (cached or fresh) and bind it to a sender.
    ///
    /// # Errors
    /// Returns [`ApiError::Auth`] if the token exchange fails.
    pub async fn create(&self, credentials: &Credentials) -> Result<GreSender, ApiError> {
        let token = self
            .tokens
            .get_or_refresh(self.auth, &self.endpoints, credentials)
            .await?;
        Ok(GreSender::new(
            self.http.clone(),
            self.endpoints.submission(),
            token,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_state_maps_documented_codes() {
        assert_eq!(TicketState::from_code("98"), Some(TicketState::Pending));
        assert_eq!(TicketState::from_code("0"), Some(TicketState::Accepted));
        assert_eq!(TicketState::from_code(" 99 "), Some(TicketState::Rejected));
        assert_eq!(TicketState::from_code("1"), None);
    }

    #[test]
    fn error_message_prefers_msg_then_error() {
        assert_eq!(error_message(r#"{"cod":"2105","msg":"Ticket no existe"}"#), "Ticket no existe");
        assert_eq!(error_message(r#"{"error":"invalid document"}"#), "invalid document");
        assert_eq!(
            error_message(r#"{"error":"invalid_client","error_description":"bad secret"}"#),
            "bad secret"
        );
        assert_eq!(error_message("gateway down"), "gateway down");
        assert_eq!(error_message("   "), "empty response body");
    }

    #[test]
    fn remote_error_collects_details() {
        let body = r#"{
          "cod": "422",
          "msg": "Unprocessable Entity",
          "errors": [{"cod": 1034, "msg": "Nombre de archivo no coincide"}]
        }"#;
        match remote_error(422, body) {
            ApiError::Remote {
                code,
                message,
                details,
            } => {
                assert_eq!(code, 422);
                assert_eq!(message, "Unprocessable Entity");
                assert_eq!(details, vec![RemoteError::new("1034", "Nombre de archivo no coincide")]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn remote_error_without_list_uses_top_level_code() {
        match remote_error(400, r#"{"cod":"0151","msg":"Nombre invalido"}"#) {
            ApiError::Remote { details, .. } => {
                assert_eq!(details, vec![RemoteError::new("0151", "Nombre invalido")]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn status_code_and_transport_flags() {
        let err = remote_error(500, "boom");
        assert_eq!(err.status_code(), Some(500));
        assert!(!err.is_transport());

        let err = ApiError::Auth(AuthError::Rejected {
            status: 401,
            message: "nope".into(),
        });
        assert_eq!(err.status_code(), Some(401));
        assert!(!ApiError::InvalidResponse("x".into()).is_transport());
    }
}
