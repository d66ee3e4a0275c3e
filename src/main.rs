//! Application entry point for the `fieldsense-ingest` backend service.
//!
//! This binary orchestrates the full startup sequence for the sensor
//! reading ingestion API, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Wiring the ingestion collaborators (caches, directories, geofence
//!   index, stores, event publisher) into the orchestrator
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `BIND_ADDR` (optional) – listen address (default: `0.0.0.0:8080`)
//! - `DEDUP_RETENTION_SECS` / `DEVICE_CACHE_TTL_SECS` / `GEOFENCE_TTL_SECS`
//!   (optional) – pipeline TTL tuning
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! pipeline semantics to `ingest`, and route registration to `routes`.
use std::{env, io::IsTerminal, sync::Arc};

use axum::Router;
use chrono::Duration;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod cache;
mod config;
mod directory;
mod geofence;
mod ingest;
mod models;
mod publisher;
mod routes;
mod schema;
mod store;
#[cfg(test)]
mod testsupport;
mod validation;

use cache::{InMemoryDedupStore, InMemoryDeviceCache};
use directory::{DeviceDirectory, PgDeviceDirectory, PgPlotDirectory, PlotDirectory};
use geofence::GeofenceIndex;
use ingest::Ingestor;
use publisher::BroadcastPublisher;
use store::{ErrorStore, PgErrorStore, PgReadingStore, ReadingStore};

// ---

/// Shared application state handed to the route gateway.
///
/// The orchestrator owns the full collaborator set; the read paths keep
/// direct handles to the stores they query.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub readings: Arc<dyn ReadingStore>,
    pub devices: Arc<dyn DeviceDirectory>,
}

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database: {}", cfg.db_url);

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database '{}': {}", cfg.db_url, e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    // Wire the pipeline collaborators; every seam is injected explicitly.
    let dedup = Arc::new(InMemoryDedupStore::new(Duration::seconds(
        cfg.dedup_retention_secs,
    )));
    let device_cache = Arc::new(InMemoryDeviceCache::new(Duration::seconds(
        cfg.device_cache_ttl_secs,
    )));
    let devices: Arc<dyn DeviceDirectory> = Arc::new(PgDeviceDirectory::new(pool.clone()));
    let plots: Arc<dyn PlotDirectory> = Arc::new(PgPlotDirectory::new(pool.clone()));
    let readings: Arc<dyn ReadingStore> = Arc::new(PgReadingStore::new(pool.clone()));
    let errors: Arc<dyn ErrorStore> = Arc::new(PgErrorStore::new(pool.clone()));
    let publisher = Arc::new(BroadcastPublisher::new(cfg.event_channel_capacity));

    let geofence = Arc::new(GeofenceIndex::new(
        plots.clone(),
        Duration::seconds(cfg.geofence_ttl_secs),
    ));

    // Warm the geofence snapshot so the first geo-resolved reading does not
    // pay the rebuild latency. Not fatal: lookups retry lazily.
    if let Err(e) = geofence.refresh().await {
        tracing::warn!("initial geofence refresh failed, continuing: {e:#}");
    }

    let ingestor = Arc::new(Ingestor::new(
        dedup,
        device_cache,
        devices.clone(),
        plots,
        geofence,
        readings.clone(),
        errors,
        publisher,
    ));

    let state = AppState {
        ingestor,
        readings,
        devices,
    };

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(state);

    tracing::info!("Listening on {}", cfg.bind_addr);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
