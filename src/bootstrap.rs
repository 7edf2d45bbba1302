use std::sync::Arc;
use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::ledger::repository::PgLedgerStore;
use crate::service::LedgerService;

pub type PgLedgerService = LedgerService<PgLedgerStore>;

/// Connect, migrate and wire the ledger service.
pub async fn initialize_ledger(config: &Config) -> AppResult<Arc<PgLedgerService>> {
    info!("Initializing ledger core ...");

    let pool = initialize_database(config).await?;
    let service = LedgerService::from_config(PgLedgerStore::new(pool), config)?;

    info!(
        lock_policy = ?config.lock_policy()?,
        commission_scale = config.commission_scale,
        max_conflict_retries = config.max_conflict_retries,
        "✓ Ledger service ready"
    );

    Ok(Arc::new(service))
}

async fn initialize_database(config: &Config) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "✓ Database pool configured"
    );

    if config.run_migrations {
        info!("🔄 Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    info!("✓ Database initialized");
    Ok(pool)
}
