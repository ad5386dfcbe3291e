pub mod api;
pub mod config;
pub mod credentials;
pub mod db;
pub mod docs;
pub mod fanout;
pub mod gifts;
pub mod journal;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod panel;
pub mod reconcile;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::credentials::CredentialStore;
use crate::fanout::{FanOut, FanOutConfig};
use crate::gifts::GiftCodes;
use crate::journal::Journal;
use crate::ledger::Ledger;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::panel::PanelRegistry;
use crate::reconcile::Reconciler;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub ledger: Ledger,
    pub store: CredentialStore,
    pub journal: Journal,
    pub gifts: GiftCodes,
    pub registry: Arc<PanelRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        registry: Arc<PanelRegistry>,
        fanout: FanOutConfig,
        orchestrator: OrchestratorConfig,
    ) -> Self {
        let ledger = Ledger::new(pool.clone());
        let store = CredentialStore::new(pool.clone());
        let journal = Journal::new(pool.clone());
        let fanout = FanOut::new(fanout);

        let orchestrator = Arc::new(Orchestrator::new(
            ledger.clone(),
            store.clone(),
            journal.clone(),
            registry.clone(),
            fanout.clone(),
            orchestrator,
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            journal.clone(),
            registry.clone(),
            fanout,
        ));

        Self {
            gifts: GiftCodes::new(pool.clone()),
            pool,
            ledger,
            store,
            journal,
            registry,
            orchestrator,
            reconciler,
        }
    }
}
