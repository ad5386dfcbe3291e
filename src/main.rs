// src/main.rs
use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use utoipa::OpenApi;

use panel_shop::config::Config;
use panel_shop::panel::PanelRegistry;
use panel_shop::reconcile::spawn_reconcile_loop;
use panel_shop::{api, db, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[get("/api-docs/openapi.json")]
async fn openapi() -> impl Responder {
    HttpResponse::Ok().json(docs::ApiDoc::openapi())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().expect("invalid configuration");

    let pool = db::connect(&config.database_url)
        .await
        .expect("Failed to connect to DB");
    db::migrate(&pool).await.expect("Failed to run migrations");

    let panels = db::load_panels(&pool).await.expect("Failed to load panels");
    let registry = Arc::new(PanelRegistry::new(config.client, config.default_panel.clone()));
    for panel in panels {
        let id = panel.id.clone();
        if let Err(e) = registry.upsert(panel) {
            log::error!("panel {id} skipped: {e}");
        }
    }
    log::info!("loaded {} panel(s)", registry.len());

    let state = AppState::new(pool, registry, config.fanout, config.orchestrator.clone());

    if let Some(interval) = config.reconcile_interval {
        spawn_reconcile_loop(state.reconciler.clone(), interval);
    }

    let state = web::Data::new(state);
    log::info!("listening on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(openapi)
            .configure(api::configure)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
