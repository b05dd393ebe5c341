//! Instance settings.
//!
//! Settings are read from the datasource-settings document the host hands
//! out (`url`, basic auth, `jsonData.queryLinks`, `secureJsonData`), or from
//! `OBJECTDS_*` environment variables when running standalone.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use objectds_core::batcher::QueryLink;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::debug;

use crate::error::SettingsError;

/// Path appended to the upstream base URL for batched queries
pub const QUERY_PATH: &str = "/api/ds/query";

/// Default upstream request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resolved settings of one datasource instance
#[derive(Clone, PartialEq)]
pub struct Settings {
    /// Upstream base URL
    pub url: String,

    /// Display name of the instance
    pub name: String,

    pub uid: String,

    pub basic_auth: bool,

    pub basic_auth_user: String,

    basic_auth_password: String,

    api_token: Option<String>,

    /// Timeout of one upstream round trip
    pub timeout: Duration,

    /// Canned queries used by the health check
    pub query_links: Vec<QueryLink>,
}

/// The settings document as stored by the host
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsDocument {
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    basic_auth: bool,
    #[serde(default)]
    basic_auth_user: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    json_data: JsonData,
    #[serde(default, alias = "decryptedSecureJsonData")]
    secure_json_data: SecureJsonData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonData {
    #[serde(default)]
    query_links: Vec<QueryLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecureJsonData {
    #[serde(default)]
    basic_auth_password: String,
    #[serde(default)]
    api_token: Option<String>,
}

impl Settings {
    /// Settings pointing at `url` with no credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: String::new(),
            uid: String::new(),
            basic_auth: false,
            basic_auth_user: String::new(),
            basic_auth_password: String::new(),
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            query_links: Vec::new(),
        }
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = true;
        self.basic_auth_user = user.into();
        self.basic_auth_password = password.into();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_query_links(mut self, query_links: Vec<QueryLink>) -> Self {
        self.query_links = query_links;
        self
    }

    /// Parse a host settings document
    pub fn from_json(bytes: &[u8]) -> Result<Self, SettingsError> {
        let doc: SettingsDocument = serde_json::from_slice(bytes)?;
        if doc.url.trim().is_empty() {
            return Err(SettingsError::MissingUrl);
        }
        debug!(url = %doc.url, links = doc.json_data.query_links.len(), "Loaded instance settings");

        Ok(Self {
            url: doc.url.trim_end_matches('/').to_string(),
            name: doc.name,
            uid: doc.uid,
            basic_auth: doc.basic_auth,
            basic_auth_user: doc.basic_auth_user,
            basic_auth_password: doc.secure_json_data.basic_auth_password,
            api_token: doc.secure_json_data.api_token.filter(|t| !t.is_empty()),
            timeout: Duration::from_secs(doc.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            query_links: doc.json_data.query_links,
        })
    }

    /// Load from `OBJECTDS_SETTINGS` (a settings document) or the individual
    /// `OBJECTDS_*` variables
    pub fn from_env() -> Result<Self, SettingsError> {
        if let Ok(path) = std::env::var("OBJECTDS_SETTINGS") {
            let bytes = std::fs::read(&path)
                .map_err(|source| SettingsError::Io { path: path.clone(), source })?;
            return Self::from_json(&bytes);
        }

        let url = std::env::var("OBJECTDS_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let mut settings = Self::new(url.trim_end_matches('/'));

        if let Ok(user) = std::env::var("OBJECTDS_BASIC_AUTH_USER") {
            let password = std::env::var("OBJECTDS_BASIC_AUTH_PASSWORD").unwrap_or_default();
            settings = settings.with_basic_auth(user, password);
        }

        if let Ok(token) = std::env::var("OBJECTDS_API_TOKEN") {
            if !token.is_empty() {
                settings = settings.with_api_token(token);
            }
        }

        if let Ok(val) = std::env::var("OBJECTDS_TIMEOUT_SECS") {
            let secs = val
                .parse()
                .map_err(|_| SettingsError::InvalidEnv { name: "OBJECTDS_TIMEOUT_SECS", value: val })?;
            settings.timeout = Duration::from_secs(secs);
        }

        Ok(settings)
    }

    /// Full URL of the upstream query endpoint
    pub fn query_url(&self) -> String {
        format!("{}{}", self.url, QUERY_PATH)
    }

    /// Value of the `Authorization` header, if any credentials are set.
    /// An API token wins over basic auth.
    pub fn authorization(&self) -> Option<String> {
        if let Some(token) = &self.api_token {
            return Some(format!("Bearer {}", token));
        }
        if self.basic_auth {
            return Some(basic_auth_header(&self.basic_auth_user, &self.basic_auth_password));
        }
        None
    }

    /// Serialized `query` objects of the configured query links
    pub fn health_queries(&self) -> Result<Vec<Box<RawValue>>, serde_json::Error> {
        self.query_links
            .iter()
            .filter_map(|link| link.query.as_ref())
            .map(|query| serde_json::value::to_raw_value(query))
            .collect()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("url", &self.url)
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("basic_auth", &self.basic_auth)
            .field("basic_auth_user", &self.basic_auth_user)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("query_links", &self.query_links.len())
            .finish()
    }
}

/// `Basic` credential from a user name and password, both trimmed
pub fn basic_auth_header(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username.trim(), password.trim());
    format!("Basic {}", STANDARD.encode(credentials))
}
