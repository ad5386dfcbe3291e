// src/panel/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use super::{PanelClient, PanelConfig, PanelConfigError, RetryPolicy};
use crate::models::PanelId;

type PanelMap = BTreeMap<PanelId, Arc<PanelClient>>;

/// Settings every client built by the registry shares.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Panel id -> client. Readers load an immutable snapshot; writers publish a
/// whole new map, so a fan-out never sees a half-edited entry.
pub struct PanelRegistry {
    panels: ArcSwap<PanelMap>,
    settings: ClientSettings,
    default_panel: Option<PanelId>,
}

impl PanelRegistry {
    pub fn new(settings: ClientSettings, default_panel: Option<PanelId>) -> Self {
        Self {
            panels: ArcSwap::from_pointee(BTreeMap::new()),
            settings,
            default_panel,
        }
    }

    pub fn with_panels(
        settings: ClientSettings,
        default_panel: Option<PanelId>,
        configs: Vec<PanelConfig>,
    ) -> Result<Self, PanelConfigError> {
        let registry = Self::new(settings, default_panel);
        for config in configs {
            registry.upsert(config)?;
        }
        Ok(registry)
    }

    /// Adds or replaces a panel. The config is validated before anything changes.
    pub fn upsert(&self, config: PanelConfig) -> Result<(), PanelConfigError> {
        let id = config.id.clone();
        let client = Arc::new(PanelClient::new(
            config,
            self.settings.call_timeout,
            self.settings.retry,
        )?);

        self.panels.rcu(|current| {
            let mut next = PanelMap::clone(current);
            next.insert(id.clone(), client.clone());
            next
        });

        log::info!("panel registry upsert panel={}", id);
        Ok(())
    }

    /// Returns `true` if the panel was present.
    pub fn remove(&self, id: &PanelId) -> bool {
        let mut removed = false;
        self.panels.rcu(|current| {
            let mut next = PanelMap::clone(current);
            removed = next.remove(id).is_some();
            next
        });

        if removed {
            log::info!("panel registry remove panel={}", id);
        }
        removed
    }

    /// Enabled client for `id`.
    pub fn resolve(&self, id: &PanelId) -> Option<Arc<PanelClient>> {
        self.panels
            .load()
            .get(id)
            .filter(|client| client.config().enabled)
            .cloned()
    }

    /// Configured default if enabled, otherwise the first enabled panel.
    pub fn default_panel(&self) -> Option<Arc<PanelClient>> {
        if let Some(client) = self.default_panel.as_ref().and_then(|id| self.resolve(id)) {
            return Some(client);
        }
        self.panels
            .load()
            .values()
            .find(|client| client.config().enabled)
            .cloned()
    }

    pub fn list(&self) -> Vec<PanelConfig> {
        self.panels
            .load()
            .values()
            .map(|client| client.config().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.panels.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.load().is_empty()
    }
}
