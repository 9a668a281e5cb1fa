// Outbound call dispatch

use crate::config::DispatchSettings;
use crate::errors::DispatchError;
use crate::models::CallJob;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

/// Hands a claimed call job to the calling infrastructure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallDispatcher: Send + Sync {
    async fn dispatch(&self, job: &CallJob) -> Result<(), DispatchError>;
}

/// Dispatcher that POSTs call jobs to the voice gateway HTTP API.
pub struct HttpCallDispatcher {
    client: Client,
    endpoint: String,
    timeout_ms: u64,
}

impl HttpCallDispatcher {
    pub fn new(config: &DispatchSettings) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                DispatchError::RequestFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout_ms: config.timeout_seconds * 1000,
        })
    }
}

#[async_trait]
impl CallDispatcher for HttpCallDispatcher {
    #[instrument(skip(self, job), fields(job_id = %job.id, user_id = %job.user_id))]
    async fn dispatch(&self, job: &CallJob) -> Result<(), DispatchError> {
        let payload = json!({
            "job_id": job.id,
            "campaign_id": job.campaign_id,
            "user_id": job.user_id,
            "phone_number": job.phone_number,
            "attempt": job.attempts + 1,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(self.timeout_ms)
                } else {
                    DispatchError::RequestFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status, body });
        }

        debug!("Call dispatched to voice gateway");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallJobStatus;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(phone_number: &str) -> CallJob {
        CallJob {
            id: Uuid::new_v4(),
            campaign_id: Some(Uuid::new_v4()),
            user_id: Uuid::new_v4(),
            phone_number: phone_number.to_string(),
            status: CallJobStatus::Dispatching,
            scheduled_for: None,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn dispatcher(server: &MockServer) -> HttpCallDispatcher {
        let settings = DispatchSettings {
            endpoint: format!("{}/calls", server.uri()),
            timeout_seconds: 5,
        };
        HttpCallDispatcher::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_posts_job_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls"))
            .and(body_partial_json(json!({ "phone_number": "+15550000001" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = dispatcher(&server).dispatch(&job("+15550000001")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls"))
            .respond_with(ResponseTemplate::new(503).set_body_string("over capacity"))
            .mount(&server)
            .await;

        let err = dispatcher(&server)
            .dispatch(&job("+15550000002"))
            .await
            .unwrap_err();
        match err {
            DispatchError::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "over capacity");
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_unreachable_gateway_is_request_failed() {
        let settings = DispatchSettings {
            endpoint: "http://127.0.0.1:1/calls".to_string(),
            timeout_seconds: 1,
        };
        let dispatcher = HttpCallDispatcher::new(&settings).unwrap();

        let err = dispatcher.dispatch(&job("+15550000003")).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RequestFailed(_) | DispatchError::Timeout(_)
        ));
    }
}
