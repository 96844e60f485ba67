//! Configuration: environment selection, endpoints and builder options.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, collections::HashMap, str::FromStr};
use thiserror::Error;

/// Key of the authentication (token issuance) service in an endpoint map.
pub const AUTH_ENDPOINT_KEY: &str = "api";
/// Key of the document submission service in an endpoint map.
pub const SUBMISSION_ENDPOINT_KEY: &str = "cpe";

/// Missing or invalid configuration detected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("API credentials (client id and secret) are not configured")]
    MissingCredentials,
    #[error("no signing certificate has been configured")]
    MissingCertificate,
    #[error("a ticket is required to query the submission status")]
    MissingTicket,
    #[error("endpoint '{key}' is missing or empty")]
    MissingEndpoint { key: String },
    #[error("invalid environment type: {input}")]
    InvalidEnvironment { input: String },
}

/// SUNAT environment selection for the default endpoints.
/// - Production: SUNAT's live security and GRE API hosts.
/// - Beta: the public GRE test host, which serves both token and submission routes.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use gre_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("beta")?;
/// assert_eq!(env, EnvironmentType::Beta);
/// # Ok::<(), gre_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvironmentType {
    #[default]
    Production,
    Beta,
}

impl FromStr for EnvironmentType {
    type Err = ConfigError;
    fn from_str(env: &str) -> Result<EnvironmentType, ConfigError> {
        match env.to_ascii_lowercase().as_str() {
            "production" => Ok(EnvironmentType::Production),
            "beta" => Ok(EnvironmentType::Beta),
            _ => Err(ConfigError::InvalidEnvironment {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Beta => "beta",
        }
    }

    pub fn auth_url(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "https://api-seguridad.sunat.gob.pe/v1",
            EnvironmentType::Beta => "https://gre-test.nubefact.com/v1",
        }
    }

    pub fn submission_url(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "https://api.sunat.gob.pe/v1",
            EnvironmentType::Beta => "https://gre-test.nubefact.com/v1",
        }
    }
}

/// Base URLs of the two services the client talks to.
///
/// # Examples
/// ```rust
/// use std::collections::HashMap;
/// use gre_core::config::EndpointSet;
///
/// let map = HashMap::from([
///     ("api".to_string(), "https://auth.test".to_string()),
///     ("cpe".to_string(), "https://sub.test".to_string()),
/// ]);
/// let endpoints = EndpointSet::from_map(&map)?;
/// assert_eq!(endpoints.submission(), "https://sub.test");
/// # Ok::<(), gre_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSet {
    api: String,
    cpe: String,
}

impl EndpointSet {
    pub fn new(api: impl Into<String>, cpe: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            cpe: cpe.into(),
        }
    }

    pub fn for_env(env: EnvironmentType) -> Self {
        Self::new(env.auth_url(), env.submission_url())
    }

    /// Build from a map keyed `"api"` and `"cpe"`.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingEndpoint`] if either key is absent or blank.
    /// URLs are not parsed here; a malformed URL surfaces as a transport error.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            map.get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingEndpoint {
                    key: key.to_string(),
                })
        };
        Ok(Self {
            api: lookup(AUTH_ENDPOINT_KEY)?,
            cpe: lookup(SUBMISSION_ENDPOINT_KEY)?,
        })
    }

    pub fn auth(&self) -> &str {
        &self.api
    }

    pub fn submission(&self) -> &str {
        &self.cpe
    }
}

impl Default for EndpointSet {
    fn default() -> Self {
        Self::for_env(EnvironmentType::default())
    }
}

/// Append `segments` to the path of `base`, each percent-encoded as exactly one
/// path segment (`/`, `?`, `#` and `%` included).
///
/// Fails on an unparseable or non-hierarchical base and on `.` / `..` segments.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, String> {
    let mut url = reqwest::Url::parse(base).map_err(|e| format!("invalid base URL {base:?}: {e}"))?;
    if let Some(segment) = segments.iter().find(|s| matches!(**s, "." | "..")) {
        return Err(format!("invalid path segment {segment:?}"));
    }
    url.path_segments_mut()
        .map_err(|_| format!("base URL {base:?} cannot take a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Rendering flags handed to XML builders.
///
/// Updates merge into the existing map: keys present in the update win, keys
/// absent from it keep their previous value.
///
/// # Examples
/// ```rust
/// use gre_core::config::BuilderOptions;
///
/// let mut options = BuilderOptions::default();
/// options.merge(BuilderOptions::from_iter([("indent", 2)]));
/// assert_eq!(options.indent(), Some(2));
/// assert!(!options.autoescape());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuilderOptions(BTreeMap<String, Value>);

impl BuilderOptions {
    pub const AUTOESCAPE: &'static str = "autoescape";
    pub const INDENT: &'static str = "indent";

    /// Options with no keys at all, not even the defaults.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn merge(&mut self, other: BuilderOptions) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn autoescape(&self) -> bool {
        self.get(Self::AUTOESCAPE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Widest indentation honoured; larger values are clamped to it.
    pub const MAX_INDENT: usize = 16;

    /// Indentation width for pretty output; `None` means compact output.
    pub fn indent(&self) -> Option<usize> {
        self.get(Self::INDENT)
            .and_then(Value::as_u64)
            .filter(|width| *width > 0)
            .map(|width| usize::try_from(width).unwrap_or(usize::MAX).min(Self::MAX_INDENT))
    }
}

impl Default for BuilderOptions {
    fn default() -> Self {
        let mut options = Self::empty();
        options.set(Self::AUTOESCAPE, false);
        options
    }
}

impl<K, V> FromIterator<(K, V)> for BuilderOptions
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!(
            EnvironmentType::from_str("PRODUCTION").unwrap(),
            EnvironmentType::Production
        );
        assert_eq!(EnvironmentType::from_str("Beta").unwrap(), EnvironmentType::Beta);
        assert_eq!(
            EnvironmentType::from_str("staging"),
            Err(ConfigError::InvalidEnvironment {
                input: "staging".into()
            })
        );
    }

    #[test]
    fn default_endpoints_point_at_production() {
        let endpoints = EndpointSet::default();
        assert_eq!(endpoints.auth(), "https://api-seguridad.sunat.gob.pe/v1");
        assert_eq!(endpoints.submission(), "https://api.sunat.gob.pe/v1");
    }

    #[test]
    fn endpoint_map_requires_both_keys() {
        let map = HashMap::from([("api".to_string(), "https://auth.test".to_string())]);
        assert_eq!(
            EndpointSet::from_map(&map),
            Err(ConfigError::MissingEndpoint { key: "cpe".into() })
        );

        let map = HashMap::from([
            ("api".to_string(), "  ".to_string()),
            ("cpe".to_string(), "https://sub.test".to_string()),
        ]);
        assert_eq!(
            EndpointSet::from_map(&map),
            Err(ConfigError::MissingEndpoint { key: "api".into() })
        );
    }

    #[test]
    fn endpoint_url_handles_trailing_slashes() {
        let url = endpoint_url("https://a.test/v1/", &["x", "y"]).unwrap();
        assert_eq!(url.as_str(), "https://a.test/v1/x/y");
        let url = endpoint_url("https://a.test/v1", &["x", ""]).unwrap();
        assert_eq!(url.as_str(), "https://a.test/v1/x/");
    }

    #[test]
    fn endpoint_url_keeps_each_value_in_one_segment() {
        let url = endpoint_url("https://a.test/cpe", &["envios", "../../other?x=1#f"]).unwrap();
        assert_eq!(url.as_str(), "https://a.test/cpe/envios/..%2F..%2Fother%3Fx=1%23f");
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().map(Iterator::count), Some(3));
    }

    #[test]
    fn endpoint_url_rejects_dot_segments_and_bad_bases() {
        assert!(endpoint_url("https://a.test/cpe", &["envios", ".."]).is_err());
        assert!(endpoint_url("https://a.test/cpe", &["."]).is_err());
        assert!(endpoint_url("not a url", &["x"]).is_err());
        assert!(endpoint_url("mailto:someone@a.test", &["x"]).is_err());
    }

    #[test]
    fn indent_is_clamped() {
        let mut options = BuilderOptions::empty();
        options.set(BuilderOptions::INDENT, u64::MAX);
        assert_eq!(options.indent(), Some(BuilderOptions::MAX_INDENT));
        options.set(BuilderOptions::INDENT, 4);
        assert_eq!(options.indent(), Some(4));
        options.set(BuilderOptions::INDENT, 0);
        assert_eq!(options.indent(), None);
    }

    #[test]
    fn builder_options_merge_keeps_earlier_keys() {
        let mut options = BuilderOptions::empty();
        options.merge(BuilderOptions::from_iter([("a", 1)]));
        options.merge(BuilderOptions::from_iter([("b", 2)]));
        assert_eq!(options.get("a"), Some(&json!(1)));
        assert_eq!(options.get("b"), Some(&json!(2)));
        assert_eq!(options.len(), 2);

        options.merge(BuilderOptions::from_iter([("a", 3)]));
        assert_eq!(options.get("a"), Some(&json!(3)));
        assert_eq!(options.get("b"), Some(&json!(2)));
    }

    #[test]
    fn builder_options_defaults_disable_autoescape() {
        let options = BuilderOptions::default();
        assert!(!options.autoescape());
        assert_eq!(options.indent(), None);

        let mut options = options;
        options.set(BuilderOptions::AUTOESCAPE, true).set("indent", 0);
        assert!(options.autoescape());
        assert_eq!(options.indent(), None);
    }
}
