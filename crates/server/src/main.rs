use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Handle;

use shopgeo_core::SystemClock;
use shopgeo_infra::geodata::OverpassResolver;
use shopgeo_infra::store::PostgresValidationStore;
use shopgeo_infra::ShopValidationScheduler;

mod config;

use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shopgeo_observability::init();

    let config = ServerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Arc::new(PostgresValidationStore::new(pool, Handle::current()));
    if config.validation.ensure_schema {
        store.ensure_schema().await.context("failed to create schema")?;
        tracing::info!("database schema ensured");
    }

    let resolver = Arc::new(OverpassResolver::new(
        config.validation.overpass_url.clone(),
        Handle::current(),
    )?);
    tracing::info!(endpoint = %resolver.endpoint(), "using overpass geodata source");

    let testing = config.validation.testing;
    if testing {
        tracing::warn!("SHOPGEO_TESTING is set; geodata resolver may be replaced at runtime");
    }
    let scheduler = Arc::new(ShopValidationScheduler::new(
        store,
        config.validation,
        Arc::new(SystemClock),
    )?);

    // Startup reconciliation talks to the store synchronously.
    {
        let scheduler = scheduler.clone();
        tokio::task::spawn_blocking(move || scheduler.start(resolver, testing))
            .await
            .context("scheduler start task failed")??;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    tokio::task::spawn_blocking(move || scheduler.stop_and_join())
        .await
        .context("scheduler shutdown task failed")?;
    tracing::info!("shutdown complete");
    Ok(())
}
