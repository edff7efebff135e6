//! HTTP implementation of the accrual service port.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use tracing::debug;

use super::{AccrualApi, ClientError, PollReply, Submission};
use crate::domain::{AccrualOutcome, AccrualReply, OrderRegistration};

/// Client for the accrual HTTP service.
///
/// Every request runs under the configured timeout; the timeout is a
/// transport property, independent of the engine's backoff delays.
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl AccrualApi for HttpAccrualClient {
    async fn submit_order(&self, number: &str) -> Result<Submission, ClientError> {
        let url = format!("{}/api/orders", self.base_url);
        let body = OrderRegistration::new(number);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let retry_after = retry_after_secs(&response);
        let submission = classify_submit(response.status(), retry_after)?;
        debug!(order = number, ?submission, "order submitted");
        Ok(submission)
    }

    async fn fetch_accrual(&self, number: &str) -> Result<PollReply, ClientError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let retry_after = retry_after_secs(&response);
        classify_poll_status(response.status(), retry_after)?;

        let reply: AccrualReply = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        debug!(order = number, status = %reply.status, "accrual reply");

        if reply.status.is_terminal() {
            Ok(PollReply::Done(AccrualOutcome::from(reply)))
        } else {
            Ok(PollReply::Processing)
        }
    }
}

fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Map a submit response code onto the submission contract.
///
/// 202 is acceptance; 200/204/409 all mean the service already knows the
/// order (registered, registered-no-content, processed) and are success
/// no-ops; 429 and 5xx are transient; any other 4xx is a rejection of the
/// order itself.
fn classify_submit(
    status: StatusCode,
    retry_after: Option<u64>,
) -> Result<Submission, ClientError> {
    match status {
        StatusCode::ACCEPTED => Ok(Submission::Accepted),
        StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::CONFLICT => {
            Ok(Submission::AlreadyKnown)
        }
        StatusCode::TOO_MANY_REQUESTS => Err(ClientError::RateLimited { retry_after }),
        s if s.is_server_error() => Err(ClientError::Upstream(s.as_u16())),
        s if s.is_client_error() => Err(ClientError::Rejected(s.as_u16())),
        s => Err(ClientError::Upstream(s.as_u16())),
    }
}

/// Reject non-200 poll responses before the body is touched.
///
/// 204 means the order was never accepted upstream, which is fatal for the
/// order: no amount of polling will make it appear.
fn classify_poll_status(status: StatusCode, retry_after: Option<u64>) -> Result<(), ClientError> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::NO_CONTENT => Err(ClientError::NotFound),
        StatusCode::TOO_MANY_REQUESTS => Err(ClientError::RateLimited { retry_after }),
        s if s.is_server_error() => Err(ClientError::Upstream(s.as_u16())),
        s if s.is_client_error() => Err(ClientError::Rejected(s.as_u16())),
        s => Err(ClientError::Upstream(s.as_u16())),
    }
}
