use gre_core::client::GreClient;
use gre_core::config::EndpointSet;
use gre_core::document::Despatch;

#[allow(dead_code)]
pub const CERT_PEM: &str = include_str!("../fixtures/cert.pem");
#[allow(dead_code)]
pub const KEY_PEM: &str = include_str!("../fixtures/key.pem");

#[allow(dead_code)]
pub const CLIENT_ID: &str = "test-client";
#[allow(dead_code)]
pub const DESPATCH_NAME: &str = "20123456789-09-T001-123";

#[allow(dead_code)]
pub fn signing_pem() -> String {
    format!("{CERT_PEM}{KEY_PEM}")
}

#[allow(dead_code)]
pub fn sample_despatch() -> Despatch {
    serde_json::from_str(include_str!("../fixtures/despatch.json")).expect("despatch fixture")
}

#[allow(dead_code)]
pub fn token_body(token: &str) -> String {
    token_body_with_lifetime(token, 3600)
}

#[allow(dead_code)]
pub fn token_body_with_lifetime(token: &str, expires_in: u64) -> String {
    serde_json::json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
    .to_string()
}

#[allow(dead_code)]
pub fn auth_path() -> String {
    format!("/security/clientessol/{CLIENT_ID}/oauth2/token/")
}

/// Client pointed at `/security` and `/cpe` on the given base URL, with API
/// credentials and SOL user already set.
#[allow(dead_code)]
pub fn configured_client(base_url: &str) -> GreClient {
    let mut client = GreClient::with_defaults().expect("client");
    client
        .set_endpoints(EndpointSet::new(
            format!("{base_url}/security"),
            format!("{base_url}/cpe"),
        ))
        .set_api_credentials(CLIENT_ID, "test-secret")
        .set_sol_credentials("20123456789", "MODDATOS", "moddatos");
    client
}
