// src/panel/mod.rs
//
// External provisioning panels: validated configuration, the retrying HTTP
// client for one panel, and the copy-on-write registry of all of them.

pub mod client;
pub mod config;
pub mod registry;
pub mod retry;

use serde::Serialize;
use thiserror::Error;

pub use client::{CreateUserRequest, PanelClient, PanelUser, RenewUserRequest};
pub use config::{PanelAuth, PanelConfig, PanelConfigError};
pub use registry::{ClientSettings, PanelRegistry};
pub use retry::RetryPolicy;

/// Typed outcome of a failed panel call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PanelError {
    /// The user does not exist on the panel.
    #[error("not found on panel")]
    NotFound,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Network error or 5xx. Retried.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Any other 4xx or a malformed answer. Never retried.
    #[error("rejected: {0}")]
    Rejected(String),
    /// No answer before the per-call timeout or the fan-out deadline.
    /// The request may still have taken effect on the panel.
    #[error("timed out waiting for the panel")]
    Timeout,
    #[error("panel is not configured or disabled")]
    Unconfigured,
}

impl PanelError {
    /// Retry predicate for idempotent calls.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PanelError::Transient(_) | PanelError::Timeout)
    }

    /// Retry predicate for calls that create something. A timed-out request
    /// may have been applied, so only failures the panel answered (or that
    /// never connected) are sent again.
    pub fn is_safe_to_resend(&self) -> bool {
        matches!(self, PanelError::Transient(_))
    }
}
