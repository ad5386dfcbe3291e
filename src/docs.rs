use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::accounts::get_account,
        crate::api::accounts::ensure_account,
        crate::api::accounts::credit,
        crate::api::accounts::debit,
        crate::api::accounts::set_banned,
        crate::api::accounts::list_entries,
        crate::api::accounts::list_transactions,
        crate::api::accounts::transfer,
        crate::api::accounts::issue_trial,
        crate::api::accounts::redeem_gift,
        crate::api::accounts::create_gift,
        crate::api::plans::list_plans,
        crate::api::plans::create_plan,
        crate::api::plans::update_plan,
        crate::api::services::purchase,
        crate::api::services::list_services,
        crate::api::services::get_service,
        crate::api::services::renew,
        crate::api::services::delete_service,
        crate::api::panels::list_panels,
        crate::api::panels::upsert_panel,
        crate::api::panels::remove_panel,
        crate::api::reconciliation::list_tasks,
        crate::api::reconciliation::resolve_task,
        crate::api::reconciliation::run_now
    ),
    components(
        schemas(
            crate::api::ErrorBody,
            crate::api::accounts::AmountRequest,
            crate::api::accounts::BalanceResponse,
            crate::api::accounts::BanRequest,
            crate::api::accounts::TransferRequest,
            crate::api::accounts::RedeemRequest,
            crate::api::services::PurchaseRequest,
            crate::api::services::RenewRequest,
            crate::api::services::ServiceOutcome,
            crate::api::services::DeleteResponse,
            crate::credentials::PlanInput,
            crate::gifts::GiftCode,
            crate::gifts::NewGiftCode,
            crate::journal::TransactionRecord,
            crate::models::Account,
            crate::models::EntryReason,
            crate::models::LedgerEntry,
            crate::models::Plan,
            crate::models::Service,
            crate::models::Endpoint,
            crate::models::PanelId,
            crate::models::ReconciliationTask,
            crate::panel::PanelConfig,
            crate::panel::PanelAuth,
            crate::reconcile::ReconcileSummary
        )
    ),
    tags(
        (name = "accounts", description = "Wallets and ledger"),
        (name = "gifts", description = "Gift codes"),
        (name = "plans", description = "Sellable plans"),
        (name = "services", description = "Purchase, renewal and deletion of services"),
        (name = "panels", description = "Provisioning panel configuration"),
        (name = "reconciliation", description = "Inconsistencies awaiting an operator")
    )
)]
pub struct ApiDoc;
