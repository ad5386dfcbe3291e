// src/fanout.rs
//
// Runs one operation against many panels at once and reports every panel's
// outcome. Each target runs on its own task behind a shared semaphore; tasks
// are never aborted, so a dropped caller or an expired deadline cannot leave a
// half-sent request behind.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::models::PanelId;
use crate::panel::PanelError;

#[derive(Debug, Clone, Copy)]
pub struct FanOutConfig {
    /// Max calls in flight for one fan-out.
    pub concurrency: usize,
    /// Overall deadline; panels still pending when it passes report `Timeout`.
    pub deadline: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct FanOutReport<T> {
    pub outcomes: BTreeMap<PanelId, Result<T, PanelError>>,
}

impl<T> FanOutReport<T> {
    pub fn succeeded(&self) -> impl Iterator<Item = (&PanelId, &T)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().ok().map(|v| (id, v)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&PanelId, &PanelError)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().err().map(|e| (id, e)))
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    /// True for an empty report too: nothing succeeded.
    pub fn all_failed(&self) -> bool {
        self.success_count() == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(Result::is_ok)
    }

    /// Records an outcome decided without a call (e.g. an unconfigured panel).
    pub fn insert(&mut self, panel_id: PanelId, outcome: Result<T, PanelError>) {
        self.outcomes.insert(panel_id, outcome);
    }

    pub fn into_parts(self) -> (BTreeMap<PanelId, T>, BTreeMap<PanelId, PanelError>) {
        let mut ok = BTreeMap::new();
        let mut failed = BTreeMap::new();
        for (id, outcome) in self.outcomes {
            match outcome {
                Ok(v) => {
                    ok.insert(id, v);
                }
                Err(e) => {
                    failed.insert(id, e);
                }
            }
        }
        (ok, failed)
    }
}

#[derive(Debug, Clone)]
pub struct FanOut {
    config: FanOutConfig,
}

impl FanOut {
    pub fn new(config: FanOutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Runs `op` once per target and waits for all of them or the deadline.
    ///
    /// Duplicate panel ids are dropped (first one wins).
    pub async fn run<C, T, F, Fut>(
        &self,
        op_name: &'static str,
        targets: Vec<(PanelId, C)>,
        op: F,
    ) -> FanOutReport<T>
    where
        C: Send + 'static,
        T: Send + 'static,
        F: Fn(PanelId, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PanelError>> + Send + 'static,
    {
        let deadline = Instant::now() + self.config.deadline;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let op = Arc::new(op);
        let (tx, mut rx) = mpsc::unbounded_channel::<(PanelId, Result<T, PanelError>)>();

        let mut pending = BTreeSet::new();
        for (panel_id, ctx) in targets {
            if !pending.insert(panel_id.clone()) {
                log::warn!("fan-out {} duplicate target panel={} skipped", op_name, panel_id);
                continue;
            }

            let semaphore = semaphore.clone();
            let op = op.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = {
                    let _permit = semaphore.acquire_owned().await.ok();
                    op(panel_id.clone(), ctx).await
                };
                if tx.send((panel_id.clone(), outcome)).is_err() {
                    log::warn!(
                        "fan-out {} outcome for panel={} arrived after the caller left",
                        op_name,
                        panel_id
                    );
                }
            });
        }
        drop(tx);

        let mut outcomes = BTreeMap::new();
        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((panel_id, outcome))) => {
                    pending.remove(&panel_id);
                    outcomes.insert(panel_id, outcome);
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "fan-out {} deadline passed with {} panel(s) pending",
                        op_name,
                        pending.len()
                    );
                    break;
                }
            }
        }

        for panel_id in pending {
            outcomes.insert(panel_id, Err(PanelError::Timeout));
        }

        let report = FanOutReport { outcomes };
        log::debug!(
            "fan-out {} finished ok={} failed={}",
            op_name,
            report.success_count(),
            report.outcomes.len() - report.success_count()
        );
        report
    }
}
