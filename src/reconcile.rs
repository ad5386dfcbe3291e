// src/reconcile.rs
//
// Periodic sweep over issued services: checks every endpoint, keeps the
// reachability flags current, raises low-usage alerts and surfaces
// inconsistencies for an operator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::credentials::{CredentialStore, StoreError};
use crate::fanout::FanOut;
use crate::journal::Journal;
use crate::models::Service;
use crate::panel::{PanelClient, PanelError, PanelRegistry};

/// Share of the quota at which the owner gets a low-usage alert.
pub const LOW_USAGE_THRESHOLD: f64 = 0.8;

const NO_REACHABLE_ENDPOINT: &str = "no_reachable_endpoint";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileSummary {
    pub services_checked: usize,
    pub endpoints_reachable: usize,
    pub endpoints_unreachable: usize,
    pub unreachable_services: usize,
    pub low_usage_alerts: usize,
    pub stale_transactions: usize,
}

pub struct Reconciler {
    store: CredentialStore,
    journal: Journal,
    registry: Arc<PanelRegistry>,
    fanout: FanOut,
    stale_after: chrono::Duration,
}

impl Reconciler {
    pub fn new(
        store: CredentialStore,
        journal: Journal,
        registry: Arc<PanelRegistry>,
        fanout: FanOut,
    ) -> Self {
        Self {
            store,
            journal,
            registry,
            fanout,
            stale_after: chrono::Duration::minutes(10),
        }
    }

    /// How long a journal row may sit in a non-terminal state before it is reported.
    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub async fn run_once(&self) -> Result<ReconcileSummary, StoreError> {
        let mut summary = ReconcileSummary::default();

        for service in self.store.list_all_services().await? {
            if service.status != "active" {
                continue;
            }
            summary.services_checked += 1;
            self.check_service(&service, &mut summary).await?;
        }

        let stale = self.journal.stale(Utc::now() - self.stale_after).await?;
        for txn in &stale {
            log::warn!(
                "stale transaction id={} kind={} state={} account_id={} updated_at={}",
                txn.id,
                txn.kind,
                txn.state,
                txn.account_id,
                txn.updated_at
            );
        }
        summary.stale_transactions = stale.len();

        log::info!(
            "reconcile done services={} reachable={} unreachable={} alerts={} stale={}",
            summary.services_checked,
            summary.endpoints_reachable,
            summary.endpoints_unreachable,
            summary.low_usage_alerts,
            summary.stale_transactions
        );
        Ok(summary)
    }

    async fn check_service(
        &self,
        service: &Service,
        summary: &mut ReconcileSummary,
    ) -> Result<(), StoreError> {
        let mut targets = Vec::new();
        for endpoint in &service.endpoints {
            match self.registry.resolve(&endpoint.panel_id) {
                Some(client) => targets.push((
                    endpoint.panel_id.clone(),
                    (client, endpoint.external_id.clone()),
                )),
                None => {
                    self.store
                        .set_endpoint_reachability(service.id, &endpoint.panel_id, false)
                        .await?;
                    summary.endpoints_unreachable += 1;
                }
            }
        }

        let report = self
            .fanout
            .run(
                "get_user",
                targets,
                |_, (client, external_id): (Arc<PanelClient>, String)| async move {
                    client.get_user(&external_id).await
                },
            )
            .await;

        let mut reachable = 0;
        let mut over_threshold = false;
        for (panel_id, outcome) in &report.outcomes {
            let ok = outcome.is_ok();
            self.store
                .set_endpoint_reachability(service.id, panel_id, ok)
                .await?;

            match outcome {
                Ok(user) => {
                    reachable += 1;
                    if user.usage_ratio().is_some_and(|r| r >= LOW_USAGE_THRESHOLD) {
                        over_threshold = true;
                    }
                }
                Err(PanelError::NotFound) => {
                    log::warn!(
                        "reconcile service_id={} panel={} user missing on panel",
                        service.id,
                        panel_id
                    );
                }
                Err(e) => {
                    log::debug!(
                        "reconcile service_id={} panel={} unreachable error={}",
                        service.id,
                        panel_id,
                        e
                    );
                }
            }
        }
        summary.endpoints_reachable += reachable;
        summary.endpoints_unreachable += report.outcomes.len() - reachable;

        if over_threshold && self.store.mark_low_usage_alert(service.id).await? {
            log::info!(
                "low usage alert service_id={} account_id={}",
                service.id,
                service.account_id
            );
            summary.low_usage_alerts += 1;
        }

        // An active service without endpoints is as dead as one whose panels are down.
        if reachable == 0 {
            summary.unreachable_services += 1;
            if !self
                .store
                .has_open_reconciliation(NO_REACHABLE_ENDPOINT, service.id)
                .await?
            {
                self.store
                    .record_reconciliation(
                        NO_REACHABLE_ENDPOINT,
                        Some(service.id),
                        None,
                        None,
                        "no endpoint answered during reconciliation",
                    )
                    .await?;
            }
        }

        Ok(())
    }
}

/// Runs [`Reconciler::run_once`] every `interval` until the process exits.
pub fn spawn_reconcile_loop(reconciler: Arc<Reconciler>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = reconciler.run_once().await {
                log::error!("reconcile error: {e}");
            }
        }
    })
}
