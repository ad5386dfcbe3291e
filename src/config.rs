// src/config.rs

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::fanout::FanOutConfig;
use crate::models::PanelId;
use crate::orchestrator::{OrchestratorConfig, RenewalChargePolicy};
use crate::panel::{ClientSettings, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub fanout: FanOutConfig,
    pub client: ClientSettings,
    pub orchestrator: OrchestratorConfig,
    pub default_panel: Option<PanelId>,
    /// None disables the background sweep.
    pub reconcile_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            get("DATABASE_URL").unwrap_or_else(|| "sqlite://panel-shop.db?mode=rwc".to_string());
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8065".to_string());

        let fanout = FanOutConfig {
            concurrency: parse(&get, "FANOUT_CONCURRENCY", 20usize)?,
            deadline: Duration::from_secs(parse(&get, "FANOUT_DEADLINE_SECS", 30u64)?),
        };
        if fanout.concurrency == 0 {
            return Err(invalid("FANOUT_CONCURRENCY", "0", "must be at least 1"));
        }

        let retry_defaults = RetryPolicy::default();
        let client = ClientSettings {
            call_timeout: Duration::from_secs(parse(&get, "PANEL_TIMEOUT_SECS", 10u64)?),
            retry: RetryPolicy {
                max_attempts: parse(&get, "PANEL_MAX_ATTEMPTS", retry_defaults.max_attempts)?
                    .max(1),
                base_delay: Duration::from_millis(parse(&get, "PANEL_RETRY_BASE_MS", 250u64)?),
                max_delay: retry_defaults.max_delay,
            },
        };

        let orchestrator_defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            renewal_charge: parse(&get, "RENEWAL_CHARGE_POLICY", RenewalChargePolicy::Full)?,
            trial_days: parse(&get, "TRIAL_DAYS", orchestrator_defaults.trial_days)?,
            trial_quota_gb: parse(&get, "TRIAL_QUOTA_GB", orchestrator_defaults.trial_quota_gb)?,
        };
        if orchestrator.trial_days <= 0 {
            return Err(invalid(
                "TRIAL_DAYS",
                &orchestrator.trial_days.to_string(),
                "must be positive",
            ));
        }

        let default_panel = get("DEFAULT_PANEL").map(|v| PanelId::new(v.trim()));

        let reconcile_secs: u64 = parse(&get, "RECONCILE_INTERVAL_SECS", 300u64)?;
        let reconcile_interval = (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs));

        Ok(Self {
            database_url,
            bind_addr,
            fanout,
            client,
            orchestrator,
            default_panel,
            reconcile_interval,
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8065");
        assert_eq!(config.fanout.concurrency, 20);
        assert_eq!(config.fanout.deadline, Duration::from_secs(30));
        assert_eq!(config.client.retry.max_attempts, 3);
        assert_eq!(config.client.call_timeout, Duration::from_secs(10));
        assert_eq!(config.orchestrator.renewal_charge, RenewalChargePolicy::Full);
        assert_eq!(config.default_panel, None);
        assert_eq!(config.reconcile_interval, Some(Duration::from_secs(300)));
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("FANOUT_CONCURRENCY", "5"),
            ("FANOUT_DEADLINE_SECS", "7"),
            ("PANEL_MAX_ATTEMPTS", "1"),
            ("RENEWAL_CHARGE_POLICY", "prorated"),
            ("DEFAULT_PANEL", " de-1 "),
            ("TRIAL_DAYS", "3"),
            ("RECONCILE_INTERVAL_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.fanout.concurrency, 5);
        assert_eq!(config.fanout.deadline, Duration::from_secs(7));
        assert_eq!(config.client.retry.max_attempts, 1);
        assert_eq!(
            config.orchestrator.renewal_charge,
            RenewalChargePolicy::Prorated
        );
        assert_eq!(config.default_panel, Some(PanelId::new("de-1")));
        assert_eq!(config.orchestrator.trial_days, 3);
        assert_eq!(config.reconcile_interval, None);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            load(&[("FANOUT_CONCURRENCY", "many")]),
            Err(ConfigError::Invalid { key: "FANOUT_CONCURRENCY", .. })
        ));
        assert!(load(&[("FANOUT_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("RENEWAL_CHARGE_POLICY", "half")]).is_err());
        assert!(load(&[("TRIAL_DAYS", "-1")]).is_err());
    }
}
