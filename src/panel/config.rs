// src/panel/config.rs

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::PanelId;

/// How a panel expects to be authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelAuth {
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// Custom header, e.g. `X-Api-Key: <key>`
    ApiKey { header: String, key: String },
}

impl PanelAuth {
    pub fn header(&self) -> (String, String) {
        match self {
            PanelAuth::Bearer { token } => ("Authorization".to_string(), format!("Bearer {token}")),
            PanelAuth::ApiKey { header, key } => (header.clone(), key.clone()),
        }
    }

    fn redacted(&self) -> Self {
        match self {
            PanelAuth::Bearer { .. } => PanelAuth::Bearer {
                token: "***".to_string(),
            },
            PanelAuth::ApiKey { header, .. } => PanelAuth::ApiKey {
                header: header.clone(),
                key: "***".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PanelConfig {
    pub id: PanelId,
    pub name: String,
    pub base_url: String,
    pub auth: PanelAuth,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PanelConfigError {
    #[error("panel id must not be empty")]
    EmptyId,
    #[error("invalid panel url {0:?}")]
    InvalidUrl(String),
    #[error("panel credential must not be empty")]
    EmptyCredential,
    #[error("invalid auth header: {0}")]
    InvalidHeader(String),
    #[error("failed to build http client: {0}")]
    Client(String),
}

impl PanelConfig {
    pub fn validate(&self) -> Result<(), PanelConfigError> {
        if self.id.as_str().trim().is_empty() {
            return Err(PanelConfigError::EmptyId);
        }

        let url = Url::parse(&self.base_url)
            .map_err(|_| PanelConfigError::InvalidUrl(self.base_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(PanelConfigError::InvalidUrl(self.base_url.clone()));
        }

        let (name, value) = self.auth.header();
        let secret = match &self.auth {
            PanelAuth::Bearer { token } => token,
            PanelAuth::ApiKey { key, .. } => key,
        };
        if secret.trim().is_empty() {
            return Err(PanelConfigError::EmptyCredential);
        }
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| PanelConfigError::InvalidHeader(name.clone()))?;
        HeaderValue::from_str(&value).map_err(|_| PanelConfigError::InvalidHeader(name))?;

        Ok(())
    }

    /// Copy safe to return from the admin API.
    pub fn redacted(&self) -> Self {
        Self {
            auth: self.auth.redacted(),
            ..self.clone()
        }
    }
}
