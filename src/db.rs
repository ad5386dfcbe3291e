// src/db.rs

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::models::PanelId;
use crate::panel::{PanelAuth, PanelConfig};

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
}

/// Private in-memory database. One connection that never expires, since the
/// data lives and dies with it.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(pool).await
}

/// Panels whose stored auth no longer parses are skipped with an error log.
pub async fn load_panels(pool: &SqlitePool) -> Result<Vec<PanelConfig>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, name, base_url, auth, enabled
           FROM panels
           ORDER BY id ASC"#,
    )
    .fetch_all(pool)
    .await?;

    let mut panels = Vec::with_capacity(rows.len());
    for r in rows {
        let id: String = r.get("id");
        let raw_auth: String = r.get("auth");
        let auth: PanelAuth = match serde_json::from_str(&raw_auth) {
            Ok(auth) => auth,
            Err(e) => {
                log::error!("panel {id} has unreadable auth, skipping: {e}");
                continue;
            }
        };

        panels.push(PanelConfig {
            id: PanelId(id),
            name: r.get("name"),
            base_url: r.get("base_url"),
            auth,
            enabled: r.get("enabled"),
        });
    }
    Ok(panels)
}

pub async fn save_panel(pool: &SqlitePool, panel: &PanelConfig) -> Result<(), sqlx::Error> {
    let auth = serde_json::to_string(&panel.auth).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"INSERT INTO panels (id, name, base_url, auth, enabled, updated_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT (id)
           DO UPDATE SET name = excluded.name,
                         base_url = excluded.base_url,
                         auth = excluded.auth,
                         enabled = excluded.enabled,
                         updated_at = excluded.updated_at"#,
    )
    .bind(panel.id.as_str())
    .bind(&panel.name)
    .bind(&panel.base_url)
    .bind(auth)
    .bind(panel.enabled)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Returns `true` if a row was deleted.
pub async fn delete_panel(pool: &SqlitePool, id: &PanelId) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM panels WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
