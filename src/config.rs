//! Configuration loader for the `fieldsense-ingest` backend service.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). By consolidating configuration logic
//! here, we avoid scattering `env::var` calls throughout the codebase.

use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional 64-bit integer environment variable with a default.
macro_rules! parse_env_i64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<i64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent
/// configuration snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Socket address the HTTP server binds to.
    pub bind_addr: String,

    /// Deduplication marker retention, seconds.
    pub dedup_retention_secs: i64,

    /// Device→talhão cache entry TTL, seconds.
    pub device_cache_ttl_secs: i64,

    /// Geofence snapshot refresh TTL, seconds.
    pub geofence_ttl_secs: i64,

    /// Capacity of the reading-event broadcast channel.
    pub event_channel_capacity: usize,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `DEDUP_RETENTION_SECS` – dedup marker retention (default: 7 days)
/// - `DEVICE_CACHE_TTL_SECS` – device cache TTL (default: 24 hours)
/// - `GEOFENCE_TTL_SECS` – geofence refresh TTL (default: 5 minutes)
/// - `EVENT_CHANNEL_CAPACITY` – broadcast channel size (default: 256)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let dedup_retention_secs = parse_env_i64!("DEDUP_RETENTION_SECS", 7 * 24 * 3600);
    let device_cache_ttl_secs = parse_env_i64!("DEVICE_CACHE_TTL_SECS", 24 * 3600);
    let geofence_ttl_secs = parse_env_i64!("GEOFENCE_TTL_SECS", 5 * 60);
    let event_channel_capacity = parse_env_u32!("EVENT_CHANNEL_CAPACITY", 256) as usize;

    Ok(Config {
        db_url,
        db_pool_max,
        bind_addr,
        dedup_retention_secs,
        device_cache_ttl_secs,
        geofence_ttl_secs,
        event_channel_capacity,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        // Mask the password in the database URL for security
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL           : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX            : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR              : {}", self.bind_addr);
        tracing::info!("  DEDUP_RETENTION_SECS   : {}", self.dedup_retention_secs);
        tracing::info!("  DEVICE_CACHE_TTL_SECS  : {}", self.device_cache_ttl_secs);
        tracing::info!("  GEOFENCE_TTL_SECS      : {}", self.geofence_ttl_secs);
        tracing::info!("  EVENT_CHANNEL_CAPACITY : {}", self.event_channel_capacity);
    }
}
