//! Subject source.
//!
//! The downstream application publishes the list of producers awaiting
//! integration, each with its last successful sync.

use crate::config::SourceConfig;
use crate::error::{excerpt, SourceError};
use crate::models::Subject;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lists the subjects a run should process, in processing order.
#[async_trait]
pub trait SubjectSource: Send + Sync {
    async fn list_subjects(&self, cancel: &CancellationToken) -> Result<Vec<Subject>, SourceError>;
}

/// [`SubjectSource`] backed by a JSON endpoint returning an array of subjects.
#[derive(Debug, Clone)]
pub struct HttpSubjectSource {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpSubjectSource {
    pub fn new(http: reqwest::Client, config: &SourceConfig) -> Self {
        Self {
            http,
            url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

#[async_trait]
impl SubjectSource for HttpSubjectSource {
    async fn list_subjects(&self, cancel: &CancellationToken) -> Result<Vec<Subject>, SourceError> {
        debug!(url = %self.url, "Requesting subject list");
        let request = self.http.get(&self.url).timeout(self.timeout);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = request.send() => result.map_err(SourceError::Transport)?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = response.text() => result.map_err(SourceError::Transport)?,
        };

        if !status.is_success() {
            return Err(SourceError::Status {
                status,
                body: excerpt(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))
    }
}
