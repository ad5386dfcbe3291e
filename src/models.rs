// src/models.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Telegram-style opaque user id.
pub type AccountId = i64;
pub type PlanId = i64;
pub type ServiceId = i64;

/// Amounts are stored in the smallest currency unit.
pub type Amount = i64;

/// Logical identifier of a configured panel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct PanelId(pub String);

impl PanelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PanelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Account {
    pub id: AccountId,
    pub balance: Amount,
    pub banned: bool,
    pub trial_used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    Purchase,
    Renewal,
    Refund,
    Transfer,
    GiftRedemption,
    AdminAdjustment,
    ReferralBonus,
    Release,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::Purchase => "purchase",
            EntryReason::Renewal => "renewal",
            EntryReason::Refund => "refund",
            EntryReason::Transfer => "transfer",
            EntryReason::GiftRedemption => "gift_redemption",
            EntryReason::AdminAdjustment => "admin_adjustment",
            EntryReason::ReferralBonus => "referral_bonus",
            EntryReason::Release => "release",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: AccountId,
    pub amount: Amount,
    pub reason: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub price: Amount,
    pub duration_days: i64,
    /// 0 = unlimited
    pub quota_gb: i64,
    pub visible: bool,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Service {
    pub id: ServiceId,
    pub account_id: AccountId,
    /// None for trial or admin-issued services
    pub plan_id: Option<PlanId>,
    pub display_name: String,
    pub status: String, // active | disabled
    pub quota_gb: i64,
    pub expires_at: DateTime<Utc>,
    pub low_usage_alert_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub endpoints: Vec<Endpoint>,
}

impl Service {
    pub fn endpoint(&self, panel_id: &PanelId) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| &e.panel_id == panel_id)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Endpoint {
    pub service_id: ServiceId,
    pub panel_id: PanelId,
    pub external_id: String,
    pub expires_at: DateTime<Utc>,
    pub reachable: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconciliationTask {
    pub id: i64,
    pub kind: String,
    pub service_id: Option<ServiceId>,
    pub panel_id: Option<String>,
    pub external_id: Option<String>,
    pub detail: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}
