//! Error types for the integration job.
//!
//! Errors are split by scope: a [`FetchError`] belongs to one category, a
//! [`SubjectError`] skips one subject, and only a [`SyncError`] aborts the run.

use crate::models::Category;
use reqwest::StatusCode;
use thiserror::Error;

/// Maximum number of body bytes kept in error messages.
const BODY_EXCERPT_LEN: usize = 512;

/// Shortens a response body for inclusion in an error message.
pub fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Failure to retrieve one category.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {category} failed: {source}")]
    Transport {
        category: Category,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {category} got status {status}, body: {body}")]
    Status {
        category: Category,
        status: StatusCode,
        body: String,
    },

    #[error("failed to decode {category} response envelope: {source}")]
    Envelope {
        category: Category,
        #[source]
        source: serde_json::Error,
    },

    #[error("{category} call was not successful (offset {offset})")]
    Unsuccessful { category: Category, offset: usize },

    #[error("fetch of {category} was cancelled")]
    Cancelled { category: Category },

    #[error("fetch task for {category} failed: {message}")]
    Task { category: Category, message: String },
}

impl FetchError {
    pub fn category(&self) -> Category {
        match self {
            FetchError::Transport { category, .. }
            | FetchError::Status { category, .. }
            | FetchError::Envelope { category, .. }
            | FetchError::Unsuccessful { category, .. }
            | FetchError::Cancelled { category }
            | FetchError::Task { category, .. } => *category,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}

/// Failure to obtain a session token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to execute auth request: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("auth request failed with status {status}, body: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode auth response: {0}")]
    Decode(String),

    #[error("authentication rejected by the API")]
    Rejected,

    #[error("no credentials available for subject {subject}")]
    MissingCredentials { subject: i64 },

    #[error("authentication was cancelled")]
    Cancelled,
}

/// Failure to hand a payload to the downstream application.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to send payload: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("delivery endpoint responded with status {status}, body: {body}")]
    Status { status: StatusCode, body: String },

    #[error("delivery was cancelled")]
    Cancelled,
}

/// Failure to list the subjects to integrate.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to reach subject source: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("subject source responded with status {status}, body: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode subject list: {0}")]
    Decode(String),

    #[error("subject listing was cancelled")]
    Cancelled,
}

/// Why one subject was skipped. Never escapes the orchestration loop.
#[derive(Debug, Error)]
pub enum SubjectError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("subject has no identity to filter records by")]
    MissingIdentity,

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not get subjects to integrate: {0}")]
    Source(#[from] SourceError),

    #[error("shared authentication failed: {0}")]
    SharedAuth(#[source] AuthError),

    #[error("run was cancelled")]
    Cancelled,
}
