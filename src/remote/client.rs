//! HTTP plumbing for the Vestro API.
//!
//! This module owns the wire details: the sessions endpoint, the
//! `{success, data, count}` envelope, bearer headers and per-call
//! deadlines. Pagination lives in [`super::pager`].

use crate::auth::Authenticator;
use crate::config::RemoteConfig;
use crate::error::{excerpt, AuthError, FetchError};
use crate::models::{Category, SessionToken};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Standard response envelope of the Vestro API.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    #[allow(dead_code)] // Reported by the API, pagination relies on page length instead
    pub count: Option<i64>,
}

/// `data` of a successful sessions response.
#[derive(Debug, Deserialize)]
struct AuthData {
    #[serde(default)]
    #[allow(dead_code)] // Session id, only the access token is used
    session: Option<String>,
    #[serde(default)]
    access: Option<String>,
}

/// Settings the client needs from the configuration.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Record property matched against a subject's identity.
    pub identity_property: String,
    /// Deadline for the sessions endpoint.
    pub auth_timeout: Duration,
    /// Deadline for each page request.
    pub fetch_timeout: Duration,
}

impl From<&RemoteConfig> for ClientSettings {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            identity_property: config.identity_property.clone(),
            auth_timeout: config.auth_timeout(),
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

/// Client for the Vestro API.
///
/// Cheap to clone: the underlying `reqwest::Client` is shared and the
/// settings sit behind an `Arc`, so every fan-out task holds its own handle.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    settings: Arc<ClientSettings>,
}

impl RemoteClient {
    /// Create a client on top of the run's shared HTTP client.
    pub fn new(http: reqwest::Client, settings: ClientSettings) -> Self {
        Self {
            http,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    /// Fetch one raw page of a category.
    ///
    /// Returns the unparsed items of `data`; a missing or null `data` is an
    /// empty page.
    pub(crate) async fn fetch_page(
        &self,
        category: Category,
        token: &SessionToken,
        query: &[(&'static str, String)],
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, FetchError> {
        let request = self
            .http
            .get(self.url(category.path()))
            .bearer_auth(token.as_str())
            .query(query)
            .timeout(self.settings.fetch_timeout);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { category }),
            result = request.send() => result.map_err(|source| FetchError::Transport { category, source })?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { category }),
            result = response.text() => result.map_err(|source| FetchError::Transport { category, source })?,
        };

        if !status.is_success() {
            return Err(FetchError::Status {
                category,
                status,
                body: excerpt(&body),
            });
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|source| FetchError::Envelope { category, source })?;

        if !envelope.success {
            return Err(FetchError::Unsuccessful { category, offset });
        }

        match envelope.data {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(FetchError::Envelope {
                category,
                source: <serde_json::Error as serde::de::Error>::custom(format!(
                    "expected an array in data, got {}",
                    json_kind(&other)
                )),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl Authenticator for RemoteClient {
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionToken, AuthError> {
        debug!(login = %login, "Requesting Vestro session");

        let request = self
            .http
            .post(self.url("/sessions"))
            .form(&[("login", login), ("password", password)])
            .timeout(self.settings.auth_timeout);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            result = request.send() => result.map_err(AuthError::Transport)?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            result = response.text() => result.map_err(AuthError::Transport)?,
        };

        if !status.is_success() {
            return Err(AuthError::Status {
                status,
                body: excerpt(&body),
            });
        }

        let envelope: Envelope =
            serde_json::from_str(&body).map_err(|e| AuthError::Decode(e.to_string()))?;

        if !envelope.success {
            return Err(AuthError::Rejected);
        }

        let data: AuthData = serde_json::from_value(envelope.data.unwrap_or(Value::Null))
            .map_err(|e| AuthError::Decode(e.to_string()))?;

        match data.access {
            Some(access) if !access.is_empty() => Ok(SessionToken::new(access)),
            _ => Err(AuthError::Decode("response has no access token".to_string())),
        }
    }
}
