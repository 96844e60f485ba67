//! Submission and ticket queries against the GRE CPE API.
use std::io::{Cursor, Read, Write};

use base64ct::{Base64, Encoding};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

use super::{
    auth::Token, remote_error, value_to_string, ApiError, RemoteError, SendResult, StatusResult,
    TicketState,
};
use crate::config::endpoint_url;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(default)]
    num_ticket: Option<String>,
    #[serde(default)]
    fec_recepcion: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    cod_respuesta: Option<Value>,
    #[serde(default)]
    error: Option<StatusError>,
    #[serde(default)]
    arc_cdr: Option<String>,
    #[serde(default)]
    ind_cdr_generado: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusError {
    #[serde(default)]
    num_error: Option<Value>,
    #[serde(default)]
    des_error: Option<String>,
}

/// Authenticated sender bound to one token and submission base URL.
#[derive(Debug, Clone)]
pub struct GreSender {
    http: Client,
    base_url: String,
    token: Token,
}

impl GreSender {
    pub fn new(http: Client, base_url: impl Into<String>, token: Token) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token,
        }
    }

    /// Zip `signed_xml` as `{name}.xml` and post it to
    /// `contribuyente/gem/comprobantes/{name}`.
    ///
    /// # Errors
    /// Returns [`ApiError`] for packaging, network or remote failures.
    pub async fn send(&self, name: &str, signed_xml: &str) -> Result<SendResult, ApiError> {
        let archive = zip_document(name, signed_xml)?;
        let payload = serde_json::json!({
            "archivo": {
                "nomArchivo": format!("{name}.zip"),
                "arcGreZip": Base64::encode_string(&archive),
                "hashZip": sha256_hex(&archive),
            }
        });
        let url = self.url(&["contribuyente", "gem", "comprobantes", name])?;
        debug!(%url, bytes = archive.len(), "submitting GRE document");

        let response = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .bearer_auth(self.token.access_token())
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "GRE submission rejected");
            return Err(remote_error(status.as_u16(), &body));
        }

        let parsed: SendResponse = serde_json::from_str(&body)
            .map_err(|_| ApiError::InvalidResponse(format!("status {status}: {body}")))?;
        match parsed.num_ticket.filter(|ticket| !ticket.trim().is_empty()) {
            Some(ticket) => Ok(SendResult::new(ticket, parsed.fec_recepcion)),
            None => Err(ApiError::InvalidResponse(format!(
                "missing numTicket in response: {body}"
            ))),
        }
    }

    /// Query `contribuyente/gem/comprobantes/envios/{ticket}`.
    ///
    /// # Errors
    /// Returns [`ApiError`] for network or remote failures and for response codes
    /// outside pending/accepted/rejected.
    pub async fn status(&self, ticket: &str) -> Result<StatusResult, ApiError> {
        let url = self.url(&["contribuyente", "gem", "comprobantes", "envios", ticket])?;
        debug!(%url, "querying GRE ticket");

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .bearer_auth(self.token.access_token())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "GRE status query rejected");
            return Err(remote_error(status.as_u16(), &body));
        }

        let parsed: StatusResponse = serde_json::from_str(&body)
            .map_err(|_| ApiError::InvalidResponse(format!("status {status}: {body}")))?;
        status_result(parsed)
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ApiError> {
        endpoint_url(&self.base_url, segments).map_err(ApiError::InvalidEndpoint)
    }
}

fn status_result(parsed: StatusResponse) -> Result<StatusResult, ApiError> {
    let code = parsed
        .cod_respuesta
        .as_ref()
        .map(value_to_string)
        .unwrap_or_default();
    let state = TicketState::from_code(&code)
        .ok_or_else(|| ApiError::InvalidResponse(format!("unknown codRespuesta {code:?}")))?;

    let mut result = StatusResult::new(code, state);
    result.error = parsed.error.map(|error| {
        RemoteError::new(
            error.num_error.as_ref().map(value_to_string).unwrap_or_default(),
            error.des_error.unwrap_or_default(),
        )
    });
    result.cdr_generated = parsed
        .ind_cdr_generado
        .as_ref()
        .map(|flag| value_to_string(flag) == "1")
        .unwrap_or(false);

    if let Some(encoded) = parsed.arc_cdr.filter(|cdr| !cdr.trim().is_empty()) {
        let archive = Base64::decode_vec(encoded.trim())
            .map_err(|e| ApiError::InvalidResponse(format!("arcCdr is not base64: {e}")))?;
        result.cdr_xml = first_xml_entry(&archive)?;
        result.cdr_zip = Some(archive);
        result.cdr_generated = true;
    }
    Ok(result)
}

pub(crate) fn zip_document(name: &str, xml: &str) -> Result<Vec<u8>, ApiError> {
    let packaging = |e: &dyn std::fmt::Display| ApiError::Packaging(e.to_string());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(format!("{name}.xml"), options)
        .map_err(|e| packaging(&e))?;
    writer.write_all(xml.as_bytes()).map_err(|e| packaging(&e))?;
    let cursor = writer.finish().map_err(|e| packaging(&e))?;
    Ok(cursor.into_inner())
}

fn first_xml_entry(archive: &[u8]) -> Result<Option<String>, ApiError> {
    let invalid = |e: &dyn std::fmt::Display| ApiError::InvalidResponse(format!("bad CDR archive: {e}"));
    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(|e| invalid(&e))?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| invalid(&e))?;
        if entry.name().to_ascii_lowercase().ends_with(".xml") {
            let mut xml = String::new();
            entry.read_to_string(&mut xml).map_err(|e| invalid(&e))?;
            return Ok(Some(xml));
        }
    }
    Ok(None)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
