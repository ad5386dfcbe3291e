// src/panel/client.rs
//
// Client for one panel's user API:
//   POST   /api/users
//   GET    /api/users/{id}
//   PUT    /api/users/{id}/renew
//   DELETE /api/users/{id}
// Every call is bounded by a timeout and retried on transient failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::{PanelConfig, PanelConfigError, PanelError};
use crate::models::PanelId;

#[derive(Debug, Clone, Serialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub days: i64,
    /// 0 = unlimited
    pub quota_gb: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewUserRequest {
    pub days: i64,
    pub quota_gb: i64,
    pub reset_usage: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PanelUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub used_bytes: i64,
    #[serde(default)]
    pub data_limit_bytes: i64,
    #[serde(default)]
    pub subscription_url: Option<String>,
}

impl PanelUser {
    /// Share of the quota already used, or None when the user is unlimited.
    pub fn usage_ratio(&self) -> Option<f64> {
        (self.data_limit_bytes > 0).then(|| self.used_bytes as f64 / self.data_limit_bytes as f64)
    }
}

pub struct PanelClient {
    config: PanelConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl PanelClient {
    pub fn new(
        config: PanelConfig,
        call_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, PanelConfigError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .connect_timeout(call_timeout)
            .build()
            .map_err(|e| PanelConfigError::Client(e.to_string()))?;

        Ok(Self {
            config,
            http,
            retry,
        })
    }

    pub fn id(&self) -> &PanelId {
        &self.config.id
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub async fn create_user(&self, req: &CreateUserRequest) -> Result<PanelUser, PanelError> {
        let body = serde_json::to_value(req).map_err(|e| PanelError::Rejected(e.to_string()))?;
        let text = self
            .call(
                Method::POST,
                "/api/users".to_string(),
                Some(body),
                PanelError::is_safe_to_resend,
            )
            .await?;
        parse_user(&text)
    }

    pub async fn get_user(&self, external_id: &str) -> Result<PanelUser, PanelError> {
        let text = self
            .call(
                Method::GET,
                format!("/api/users/{external_id}"),
                None,
                PanelError::is_retryable,
            )
            .await?;
        parse_user(&text)
    }

    pub async fn renew_user(
        &self,
        external_id: &str,
        req: &RenewUserRequest,
    ) -> Result<PanelUser, PanelError> {
        let body = serde_json::to_value(req).map_err(|e| PanelError::Rejected(e.to_string()))?;
        let text = self
            .call(
                Method::PUT,
                format!("/api/users/{external_id}/renew"),
                Some(body),
                PanelError::is_retryable,
            )
            .await?;
        parse_user(&text)
    }

    /// `NotFound` is passed through; callers decide whether absence is success.
    pub async fn delete_user(&self, external_id: &str) -> Result<(), PanelError> {
        self.call(
            Method::DELETE,
            format!("/api/users/{external_id}"),
            None,
            PanelError::is_retryable,
        )
        .await
            .map(|_| ())
    }

    async fn call(
        &self,
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
        retryable: fn(&PanelError) -> bool,
    ) -> Result<String, PanelError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let result = retry_with_backoff(&self.retry, retryable, |attempt| {
            let method = method.clone();
            let url = url.clone();
            let body = body.clone();
            async move {
                log::debug!(
                    "panel call panel={} {} {} attempt={}",
                    self.config.id,
                    method,
                    url,
                    attempt
                );
                self.send_once(method, &url, body.as_ref()).await
            }
        })
        .await;

        if let Err(e) = &result {
            log::warn!(
                "panel call failed panel={} {} {} error={}",
                self.config.id,
                method,
                url,
                e
            );
        }
        result
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, PanelError> {
        let (header, value) = self.config.auth.header();
        let mut request = self.http.request(method, url).header(header, value);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;

        match classify_status(status, &text) {
            Some(err) => Err(err),
            None => Ok(text),
        }
    }
}

fn transport_error(e: reqwest::Error) -> PanelError {
    if e.is_builder() {
        PanelError::Rejected(e.to_string())
    } else if e.is_timeout() && !e.is_connect() {
        // Sent, but no answer in time.
        PanelError::Timeout
    } else {
        PanelError::Transient(e.to_string())
    }
}

/// Maps an HTTP status to the panel error taxonomy; `None` means success.
pub fn classify_status(status: StatusCode, body: &str) -> Option<PanelError> {
    if status.is_success() {
        return None;
    }

    let detail = format!("status={} body={}", status.as_u16(), truncate(body, 200));
    Some(match status {
        StatusCode::NOT_FOUND => PanelError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PanelError::Unauthorized(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => PanelError::Transient(detail),
        s if s.is_server_error() => PanelError::Transient(detail),
        _ => PanelError::Rejected(detail),
    })
}

fn parse_user(text: &str) -> Result<PanelUser, PanelError> {
    serde_json::from_str(text).map_err(|e| {
        PanelError::Rejected(format!("invalid response: {e}; body={}", truncate(text, 200)))
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
