//! Outbound delivery of finished payloads.

use crate::config::DeliveryConfig;
use crate::error::{excerpt, DeliveryError};
use crate::models::Payload;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Accepts one subject's payload.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, payload: &Payload, cancel: &CancellationToken)
        -> Result<(), DeliveryError>;
}

/// [`Delivery`] that POSTs the payload as JSON. Any 2xx status is success.
#[derive(Clone)]
pub struct HttpDelivery {
    http: reqwest::Client,
    url: String,
    auth_header: Option<String>,
    timeout: Duration,
}

impl HttpDelivery {
    pub fn new(http: reqwest::Client, config: &DeliveryConfig) -> Self {
        Self {
            http,
            url: config.url.clone(),
            auth_header: config.auth_header.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(
        &self,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(payload).map_err(DeliveryError::Encode)?;
        debug!(
            subject = payload.subject_id,
            bytes = body.len(),
            "Posting payload"
        );

        let mut request = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.timeout);
        if let Some(ref auth) = self.auth_header {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            result = request.send() => result.map_err(DeliveryError::Transport)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status,
                body: excerpt(&body),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordSet;
    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> Payload {
        Payload {
            subject_id: 11,
            fetched_at: Utc::now(),
            records: RecordSet::default(),
        }
    }

    fn delivery_for(server: &MockServer, auth_header: Option<&str>) -> HttpDelivery {
        HttpDelivery::new(
            reqwest::Client::new(),
            &DeliveryConfig {
                url: format!("{}/integration/vestro", server.uri()),
                auth_header: auth_header.map(str::to_string),
                timeout_seconds: 5,
            },
        )
    }

    #[tokio::test]
    async fn test_posts_json_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/integration/vestro"))
            .and(header("content-type", "application/json"))
            .and(header("authorization", "Bearer downstream"))
            .and(body_partial_json(serde_json::json!({ "produtor_id": 11 })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        assert_ok!(
            delivery_for(&server, Some("Bearer downstream"))
                .deliver(&payload(), &CancellationToken::new())
                .await
        );
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let err = assert_err!(
            delivery_for(&server, None)
                .deliver(&payload(), &CancellationToken::new())
                .await
        );
        match err {
            DeliveryError::Status { status, body } => {
                assert_eq!(status.as_u16(), 422);
                assert_eq!(body, "bad payload");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = assert_err!(delivery_for(&server, None).deliver(&payload(), &cancel).await);
        assert!(matches!(err, DeliveryError::Cancelled));
    }
}
