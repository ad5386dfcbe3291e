// src/orchestrator.rs
//
// Ties money to provisioning. Funds are reserved before any panel is called,
// and the reservation is finalized only after the panels answered and the
// local records were written; every other path releases it.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::{CredentialStore, NewEndpoint, NewService, StoreError};
use crate::fanout::{FanOut, FanOutReport};
use crate::journal::{Journal, TxnKind, TxnState};
use crate::ledger::{Ledger, LedgerError, ReservationToken};
use crate::models::{
    Account, AccountId, Amount, EntryReason, PanelId, PlanId, Service, ServiceId,
};
use crate::panel::{
    CreateUserRequest, PanelClient, PanelError, PanelRegistry, PanelUser, RenewUserRequest,
};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("account {0} is banned")]
    Banned(AccountId),
    #[error("plan {0} not found")]
    PlanNotFound(PlanId),
    #[error("plan {0} is not available")]
    PlanUnavailable(PlanId),
    #[error("service {0} not found")]
    ServiceNotFound(ServiceId),
    #[error("no panel available: {0}")]
    NoPanel(String),
    #[error("trial already used")]
    TrialAlreadyUsed,
    #[error("provisioning failed on every panel: {}", describe(.failures))]
    ProvisioningFailed {
        failures: BTreeMap<PanelId, PanelError>,
    },
    /// Panels answered but the local write failed; the charge was rolled back.
    #[error("local write failed after provisioning: {source}")]
    Inconsistent { source: StoreError },
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Store(StoreError),
    #[error("journal error: {0}")]
    Journal(#[from] sqlx::Error),
}

impl From<LedgerError> for OrderError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientFunds(_) => OrderError::InsufficientFunds,
            LedgerError::NotFound(id) => OrderError::AccountNotFound(id),
            other => OrderError::Ledger(other),
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ServiceNotFound(id) => OrderError::ServiceNotFound(id),
            StoreError::PlanNotFound(id) => OrderError::PlanNotFound(id),
            other => OrderError::Store(other),
        }
    }
}

/// What a renewal costs when only some endpoints renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewalChargePolicy {
    /// Full price as soon as one endpoint renewed.
    #[default]
    Full,
    /// price * renewed / total, rounded up; the rest is refunded.
    Prorated,
}

impl RenewalChargePolicy {
    pub fn charge(&self, price: Amount, renewed: usize, total: usize) -> Amount {
        match self {
            RenewalChargePolicy::Full => price,
            RenewalChargePolicy::Prorated if total == 0 || renewed >= total => price,
            RenewalChargePolicy::Prorated => {
                let (renewed, total) = (renewed as i64, total as i64);
                (price * renewed + total - 1) / total
            }
        }
    }
}

impl FromStr for RenewalChargePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(RenewalChargePolicy::Full),
            "prorated" => Ok(RenewalChargePolicy::Prorated),
            other => Err(format!("unknown renewal charge policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub renewal_charge: RenewalChargePolicy,
    pub trial_days: i64,
    pub trial_quota_gb: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            renewal_charge: RenewalChargePolicy::Full,
            trial_days: 1,
            trial_quota_gb: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PurchaseOptions {
    /// Explicit locations; the default panel when empty.
    pub panels: Vec<PanelId>,
    pub display_name: Option<String>,
}

#[derive(Debug)]
pub enum PurchaseOutcome {
    Provisioned(Service),
    /// Usable, but some requested locations failed.
    PartiallyProvisioned {
        service: Service,
        failures: BTreeMap<PanelId, PanelError>,
    },
}

impl PurchaseOutcome {
    pub fn service(&self) -> &Service {
        match self {
            PurchaseOutcome::Provisioned(service) => service,
            PurchaseOutcome::PartiallyProvisioned { service, .. } => service,
        }
    }
}

#[derive(Debug)]
pub enum RenewOutcome {
    Renewed(Service),
    /// Some endpoints were renewed, the rest keep their old expiry.
    PartiallyRenewed {
        service: Service,
        failures: BTreeMap<PanelId, PanelError>,
    },
}

impl RenewOutcome {
    pub fn service(&self) -> &Service {
        match self {
            RenewOutcome::Renewed(service) => service,
            RenewOutcome::PartiallyRenewed { service, .. } => service,
        }
    }
}

#[derive(Debug)]
pub struct DeleteReport {
    pub service_id: ServiceId,
    pub removed: Vec<PanelId>,
    /// Panels that still may hold the credential; queued for reconciliation.
    pub failures: BTreeMap<PanelId, PanelError>,
}

pub struct Orchestrator {
    ledger: Ledger,
    store: CredentialStore,
    journal: Journal,
    registry: Arc<PanelRegistry>,
    fanout: FanOut,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        ledger: Ledger,
        store: CredentialStore,
        journal: Journal,
        registry: Arc<PanelRegistry>,
        fanout: FanOut,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            journal,
            registry,
            fanout,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn purchase(
        &self,
        account_id: AccountId,
        plan_id: PlanId,
        options: PurchaseOptions,
    ) -> Result<PurchaseOutcome, OrderError> {
        self.ensure_active(account_id).await?;
        let plan = self.store.get_plan(plan_id).await?;
        if !plan.visible {
            return Err(OrderError::PlanUnavailable(plan_id));
        }
        let clients = self.resolve_targets(&options.panels)?;

        let token = self
            .reserve(account_id, plan.price, EntryReason::Purchase)
            .await?;
        let txn = self
            .begin(TxnKind::Purchase, account_id, Some(plan_id), None, token.as_ref())
            .await?;

        let username = options
            .display_name
            .unwrap_or_else(|| generate_username("u", account_id));
        let request = CreateUserRequest {
            username: username.clone(),
            days: plan.duration_days,
            quota_gb: plan.quota_gb,
            note: Some(format!("account={account_id} plan={plan_id}")),
        };
        let report = self.create_on(clients, request).await;

        if report.all_failed() {
            let (_, failures) = report.into_parts();
            self.release(token.as_ref()).await?;
            self.note(txn, TxnState::Cancelled, None, Some(&describe(&failures)))
                .await;
            self.flag_timed_out_creates(&failures, &username).await;
            log::warn!(
                "purchase failed account_id={} plan_id={} failures={}",
                account_id,
                plan_id,
                describe(&failures)
            );
            return Err(OrderError::ProvisioningFailed { failures });
        }
        self.note(txn, TxnState::Provisioned, None, None).await;

        let (created, failures) = report.into_parts();
        let expires_at = Utc::now() + Duration::days(plan.duration_days);
        let endpoints = new_endpoints(&created, expires_at);
        let new_service = NewService {
            account_id,
            plan_id: Some(plan_id),
            display_name: username.clone(),
            quota_gb: plan.quota_gb,
            expires_at,
        };

        let service = match self
            .store
            .create_service_with_endpoints(new_service, &endpoints)
            .await
        {
            Ok(service) => service,
            Err(e) => {
                log::error!(
                    "purchase store write failed account_id={} plan_id={} error={}",
                    account_id,
                    plan_id,
                    e
                );
                self.rollback_created(&endpoints).await;
                self.release(token.as_ref()).await?;
                self.note(
                    txn,
                    TxnState::Cancelled,
                    None,
                    Some(&format!("store write failed: {e}")),
                )
                .await;
                return Err(OrderError::Inconsistent { source: e });
            }
        };

        if let Some(token) = &token {
            self.close_reservation(token, token.amount, service.id).await;
        }
        self.note(txn, TxnState::Finalized, Some(service.id), None)
            .await;
        self.flag_timed_out_creates(&failures, &username).await;

        log::info!(
            "purchase ok account_id={} plan_id={} service_id={} endpoints={} failed={}",
            account_id,
            plan_id,
            service.id,
            service.endpoints.len(),
            failures.len()
        );

        Ok(if failures.is_empty() {
            PurchaseOutcome::Provisioned(service)
        } else {
            PurchaseOutcome::PartiallyProvisioned { service, failures }
        })
    }

    pub async fn renew(
        &self,
        account_id: AccountId,
        service_id: ServiceId,
        plan_id: PlanId,
    ) -> Result<RenewOutcome, OrderError> {
        self.ensure_active(account_id).await?;
        let service = self.owned_service(account_id, service_id).await?;
        let plan = self.store.get_plan(plan_id).await?;
        if !plan.visible && service.plan_id != Some(plan_id) {
            return Err(OrderError::PlanUnavailable(plan_id));
        }
        if service.endpoints.is_empty() {
            return Err(OrderError::NoPanel(format!(
                "service {service_id} has no endpoints"
            )));
        }

        let token = self
            .reserve(account_id, plan.price, EntryReason::Renewal)
            .await?;
        let txn = self
            .begin(
                TxnKind::Renewal,
                account_id,
                Some(plan_id),
                Some(service_id),
                token.as_ref(),
            )
            .await?;

        let request = RenewUserRequest {
            days: plan.duration_days,
            quota_gb: plan.quota_gb,
            reset_usage: true,
        };
        let mut targets = Vec::new();
        let mut unconfigured = Vec::new();
        for endpoint in &service.endpoints {
            match self.registry.resolve(&endpoint.panel_id) {
                Some(client) => targets.push((
                    endpoint.panel_id.clone(),
                    (client, endpoint.external_id.clone(), request.clone()),
                )),
                None => unconfigured.push(endpoint.panel_id.clone()),
            }
        }

        let mut report = self
            .fanout
            .run(
                "renew_user",
                targets,
                |_, (client, external_id, req): (Arc<PanelClient>, String, RenewUserRequest)| async move {
                    client.renew_user(&external_id, &req).await
                },
            )
            .await;
        for panel_id in unconfigured {
            report.insert(panel_id, Err(PanelError::Unconfigured));
        }

        if report.all_failed() {
            let (_, failures) = report.into_parts();
            self.release(token.as_ref()).await?;
            self.note(txn, TxnState::Cancelled, None, Some(&describe(&failures)))
                .await;
            log::warn!(
                "renewal failed service_id={} failures={}",
                service_id,
                describe(&failures)
            );
            return Err(OrderError::ProvisioningFailed { failures });
        }
        self.note(txn, TxnState::Provisioned, None, None).await;

        let total = service.endpoints.len();
        let (renewed, failures) = report.into_parts();
        let now = Utc::now();
        let extended: BTreeMap<PanelId, DateTime<Utc>> = service
            .endpoints
            .iter()
            .filter(|e| renewed.contains_key(&e.panel_id))
            .map(|e| {
                (
                    e.panel_id.clone(),
                    e.expires_at.max(now) + Duration::days(plan.duration_days),
                )
            })
            .collect();
        let service_expiry = service
            .endpoints
            .iter()
            .map(|e| extended.get(&e.panel_id).copied().unwrap_or(e.expires_at))
            .max()
            .unwrap_or(now);

        if let Err(e) = self
            .store
            .record_renewal(service_id, &plan, service_expiry, &extended)
            .await
        {
            log::error!(
                "renewal store write failed service_id={} error={}",
                service_id,
                e
            );
            for panel_id in extended.keys() {
                let external_id = service
                    .endpoint(panel_id)
                    .map(|endpoint| endpoint.external_id.as_str());
                self.queue_reconciliation(
                    "renewal_not_recorded",
                    Some(service_id),
                    Some(panel_id),
                    external_id,
                    &format!("panel renewed but local write failed: {e}"),
                )
                .await;
            }
            self.release(token.as_ref()).await?;
            self.note(
                txn,
                TxnState::Cancelled,
                None,
                Some(&format!("store write failed: {e}")),
            )
            .await;
            return Err(OrderError::Inconsistent { source: e });
        }

        let charge = self
            .config
            .renewal_charge
            .charge(plan.price, renewed.len(), total);
        if let Some(token) = &token {
            self.close_reservation(token, charge, service_id).await;
        }
        self.note(txn, TxnState::Finalized, Some(service_id), None)
            .await;

        log::info!(
            "renewal ok service_id={} plan_id={} renewed={}/{} charged={}",
            service_id,
            plan_id,
            renewed.len(),
            total,
            charge
        );

        let service = self.store.get_service(service_id).await?;
        Ok(if failures.is_empty() {
            RenewOutcome::Renewed(service)
        } else {
            RenewOutcome::PartiallyRenewed { service, failures }
        })
    }

    /// Owner-initiated delete.
    pub async fn delete_owned(
        &self,
        account_id: AccountId,
        service_id: ServiceId,
    ) -> Result<DeleteReport, OrderError> {
        self.owned_service(account_id, service_id).await?;
        self.delete(service_id).await
    }

    /// De-provisions every endpoint, then drops the local record whatever the
    /// panels said. A panel that no longer knows the user counts as success.
    pub async fn delete(&self, service_id: ServiceId) -> Result<DeleteReport, OrderError> {
        let service = self.store.get_service(service_id).await?;

        let mut targets = Vec::new();
        let mut unconfigured = Vec::new();
        for endpoint in &service.endpoints {
            match self.registry.resolve(&endpoint.panel_id) {
                Some(client) => targets.push((
                    endpoint.panel_id.clone(),
                    (client, endpoint.external_id.clone()),
                )),
                None => unconfigured.push(endpoint.panel_id.clone()),
            }
        }

        let mut report = self.delete_on(targets).await;
        for panel_id in unconfigured {
            report.insert(panel_id, Err(PanelError::Unconfigured));
        }

        self.store.delete_service(service_id).await?;

        let (removed, failures) = report.into_parts();
        for (panel_id, error) in &failures {
            let external_id = service
                .endpoint(panel_id)
                .map(|endpoint| endpoint.external_id.as_str());
            self.queue_reconciliation(
                "delete_failed",
                Some(service_id),
                Some(panel_id),
                external_id,
                &error.to_string(),
            )
            .await;
        }

        log::info!(
            "service deleted service_id={} removed={} failed={}",
            service_id,
            removed.len(),
            failures.len()
        );

        Ok(DeleteReport {
            service_id,
            removed: removed.into_keys().collect(),
            failures,
        })
    }

    /// One free service per account on the default panel. No ledger movement.
    pub async fn issue_trial(&self, account_id: AccountId) -> Result<Service, OrderError> {
        self.ensure_active(account_id).await?;
        let client = self
            .registry
            .default_panel()
            .ok_or_else(|| OrderError::NoPanel("no panel configured".to_string()))?;

        if !self.ledger.claim_trial(account_id).await? {
            return Err(OrderError::TrialAlreadyUsed);
        }

        let txn = match self
            .journal
            .begin(TxnKind::Trial, account_id, None, None, None)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.ledger.restore_trial(account_id).await?;
                return Err(e.into());
            }
        };

        let username = generate_username("trial", account_id);
        let request = CreateUserRequest {
            username: username.clone(),
            days: self.config.trial_days,
            quota_gb: self.config.trial_quota_gb,
            note: Some(format!("account={account_id} trial")),
        };
        let (created, failures) = self.create_on(vec![client], request).await.into_parts();

        if created.is_empty() {
            self.ledger.restore_trial(account_id).await?;
            self.note(txn, TxnState::Cancelled, None, Some(&describe(&failures)))
                .await;
            self.flag_timed_out_creates(&failures, &username).await;
            return Err(OrderError::ProvisioningFailed { failures });
        }
        self.note(txn, TxnState::Provisioned, None, None).await;

        let expires_at = Utc::now() + Duration::days(self.config.trial_days);
        let endpoints = new_endpoints(&created, expires_at);
        let new_service = NewService {
            account_id,
            plan_id: None,
            display_name: username,
            quota_gb: self.config.trial_quota_gb,
            expires_at,
        };

        match self
            .store
            .create_service_with_endpoints(new_service, &endpoints)
            .await
        {
            Ok(service) => {
                self.note(txn, TxnState::Finalized, Some(service.id), None)
                    .await;
                log::info!(
                    "trial issued account_id={} service_id={}",
                    account_id,
                    service.id
                );
                Ok(service)
            }
            Err(e) => {
                log::error!(
                    "trial store write failed account_id={} error={}",
                    account_id,
                    e
                );
                self.rollback_created(&endpoints).await;
                self.ledger.restore_trial(account_id).await?;
                self.note(
                    txn,
                    TxnState::Cancelled,
                    None,
                    Some(&format!("store write failed: {e}")),
                )
                .await;
                Err(OrderError::Inconsistent { source: e })
            }
        }
    }

    async fn ensure_active(&self, account_id: AccountId) -> Result<Account, OrderError> {
        let account = self.ledger.get_account(account_id).await?;
        if account.banned {
            return Err(OrderError::Banned(account_id));
        }
        Ok(account)
    }

    async fn owned_service(
        &self,
        account_id: AccountId,
        service_id: ServiceId,
    ) -> Result<Service, OrderError> {
        let service = self.store.get_service(service_id).await?;
        if service.account_id != account_id {
            return Err(OrderError::ServiceNotFound(service_id));
        }
        Ok(service)
    }

    fn resolve_targets(&self, requested: &[PanelId]) -> Result<Vec<Arc<PanelClient>>, OrderError> {
        if requested.is_empty() {
            return self
                .registry
                .default_panel()
                .map(|client| vec![client])
                .ok_or_else(|| OrderError::NoPanel("no panel configured".to_string()));
        }

        requested
            .iter()
            .map(|id| {
                self.registry
                    .resolve(id)
                    .ok_or_else(|| OrderError::NoPanel(format!("panel {id} is unavailable")))
            })
            .collect()
    }

    /// Free plans skip the ledger entirely.
    async fn reserve(
        &self,
        account_id: AccountId,
        price: Amount,
        reason: EntryReason,
    ) -> Result<Option<ReservationToken>, OrderError> {
        if price <= 0 {
            return Ok(None);
        }
        Ok(Some(self.ledger.reserve(account_id, price, reason).await?))
    }

    async fn release(&self, token: Option<&ReservationToken>) -> Result<(), OrderError> {
        if let Some(token) = token {
            self.ledger.release(token).await?;
        }
        Ok(())
    }

    async fn begin(
        &self,
        kind: TxnKind,
        account_id: AccountId,
        plan_id: Option<PlanId>,
        service_id: Option<ServiceId>,
        token: Option<&ReservationToken>,
    ) -> Result<Uuid, OrderError> {
        match self
            .journal
            .begin(kind, account_id, plan_id, service_id, token.map(|t| t.id))
            .await
        {
            Ok(id) => Ok(id),
            Err(e) => {
                self.release(token).await?;
                Err(e.into())
            }
        }
    }

    /// Journal transitions after the external effect happened are logged, not fatal.
    async fn note(
        &self,
        txn: Uuid,
        state: TxnState,
        service_id: Option<ServiceId>,
        detail: Option<&str>,
    ) {
        if let Err(e) = self.journal.advance(txn, state, service_id, detail).await {
            log::error!(
                "journal advance failed txn={} state={} error={}",
                txn,
                state.as_str(),
                e
            );
        }
    }

    async fn create_on(
        &self,
        clients: Vec<Arc<PanelClient>>,
        request: CreateUserRequest,
    ) -> FanOutReport<PanelUser> {
        let targets = clients
            .into_iter()
            .map(|client| (client.id().clone(), (client, request.clone())))
            .collect();

        self.fanout
            .run(
                "create_user",
                targets,
                |_, (client, req): (Arc<PanelClient>, CreateUserRequest)| async move {
                    client.create_user(&req).await
                },
            )
            .await
    }

    async fn delete_on(&self, targets: Vec<(PanelId, (Arc<PanelClient>, String))>) -> FanOutReport<()> {
        self.fanout
            .run(
                "delete_user",
                targets,
                |_, (client, external_id): (Arc<PanelClient>, String)| async move {
                    match client.delete_user(&external_id).await {
                        Err(PanelError::NotFound) => Ok(()),
                        other => other,
                    }
                },
            )
            .await
    }

    /// Settles a reservation whose service is already recorded. The funds
    /// were taken at reserve time, so a failure here leaves the reservation
    /// held and is queued for an operator instead of failing the order.
    async fn close_reservation(
        &self,
        token: &ReservationToken,
        consumed: Amount,
        service_id: ServiceId,
    ) {
        if let Err(e) = self.ledger.settle(token, consumed).await {
            log::error!(
                "reservation not closed reservation={} service_id={} consumed={} error={}",
                token.id,
                service_id,
                consumed,
                e
            );
            self.queue_reconciliation(
                "reservation_not_closed",
                Some(service_id),
                None,
                Some(&token.id.to_string()),
                &format!("settle to {consumed} failed after the service was recorded: {e}"),
            )
            .await;
        }
    }

    /// Best-effort removal of credentials whose local record could not be written.
    async fn rollback_created(&self, endpoints: &[NewEndpoint]) {
        let targets = endpoints
            .iter()
            .filter_map(|endpoint| {
                self.registry.resolve(&endpoint.panel_id).map(|client| {
                    (
                        endpoint.panel_id.clone(),
                        (client, endpoint.external_id.clone()),
                    )
                })
            })
            .collect();

        let report = self.delete_on(targets).await;
        for endpoint in endpoints {
            let error = match report.outcomes.get(&endpoint.panel_id) {
                Some(Ok(())) => continue,
                Some(Err(e)) => e.clone(),
                None => PanelError::Unconfigured,
            };
            self.queue_reconciliation(
                "orphaned_credential",
                None,
                Some(&endpoint.panel_id),
                Some(&endpoint.external_id),
                &format!("de-provision after failed local write failed: {error}"),
            )
            .await;
        }
    }

    /// A create that timed out may still land on the panel later.
    async fn flag_timed_out_creates(
        &self,
        failures: &BTreeMap<PanelId, PanelError>,
        username: &str,
    ) {
        for (panel_id, error) in failures {
            if *error == PanelError::Timeout {
                self.queue_reconciliation(
                    "create_timed_out",
                    None,
                    Some(panel_id),
                    Some(username),
                    "create_user got no answer in time; the panel may hold the user",
                )
                .await;
            }
        }
    }

    async fn queue_reconciliation(
        &self,
        kind: &str,
        service_id: Option<ServiceId>,
        panel_id: Option<&PanelId>,
        external_id: Option<&str>,
        detail: &str,
    ) {
        if let Err(e) = self
            .store
            .record_reconciliation(kind, service_id, panel_id, external_id, detail)
            .await
        {
            log::error!(
                "could not queue reconciliation kind={} service_id={:?} panel_id={:?} external_id={:?} detail={} error={}",
                kind,
                service_id,
                panel_id,
                external_id,
                detail,
                e
            );
        }
    }
}

fn new_endpoints(
    created: &BTreeMap<PanelId, PanelUser>,
    expires_at: DateTime<Utc>,
) -> Vec<NewEndpoint> {
    created
        .iter()
        .map(|(panel_id, user)| NewEndpoint {
            panel_id: panel_id.clone(),
            external_id: user.id.clone(),
            expires_at,
        })
        .collect()
}

fn generate_username(prefix: &str, account_id: AccountId) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{account_id}_{}", &suffix[..8])
}

pub fn describe(failures: &BTreeMap<PanelId, PanelError>) -> String {
    failures
        .iter()
        .map(|(panel_id, error)| format!("{panel_id}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}
