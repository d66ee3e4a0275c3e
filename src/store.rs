//! Durable reading and error stores over PostgreSQL.
//!
//! Readings are append-only and keyed on the deterministic event id; the
//! insert is idempotent (`ON CONFLICT DO NOTHING`) so a retry that lost its
//! dedup marker cannot create a second row. Error records follow the same
//! exactly-once-per-event-id rule.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::models::{IngestionErrorRecord, Reading};

// ---

/// Durable reading log plus its consumer-facing read paths.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert a reading keyed on event id. Returns `false` when a reading
    /// with the same event id already exists (idempotent replay).
    async fn insert(&self, reading: &Reading) -> Result<bool>;

    /// Most recent reading per requested talhão.
    async fn latest_per_talhao(&self, talhao_ids: &[String]) -> Result<Vec<LatestReadingRow>>;

    /// Hourly-averaged soil moisture over the trailing 24 hours per talhão.
    async fn hourly_moisture_history(
        &self,
        talhao_ids: &[String],
    ) -> Result<Vec<MoistureHistoryRow>>;
}

/// Audit log of failed ingestion attempts.
#[async_trait]
pub trait ErrorStore: Send + Sync {
    async fn record(&self, error: &IngestionErrorRecord) -> Result<()>;
}

// ---

/// Read-path row for `GET /v1/readings/latest`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LatestReadingRow {
    pub event_id: String,
    pub device_id: String,
    pub talhao_id: String,
    pub resolved_by: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub soil_moisture: Option<f64>,
    pub soil_temp: Option<f64>,
    pub precipitation: Option<f64>,
    pub ph: Option<f64>,
    pub conductivity: Option<f64>,
    pub battery: Option<f64>,
    pub signal: Option<f64>,
}

/// Read-path row for `GET /v1/readings/history`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MoistureHistoryRow {
    pub talhao_id: String,
    pub hour: DateTime<Utc>,
    pub avg_soil_moisture: Option<f64>,
}

// ---

pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert(&self, reading: &Reading) -> Result<bool> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO readings (
                event_id, device_id, talhao_id, resolved_by, timestamp,
                lat, lon,
                soil_moisture, soil_temp, precipitation, ph, conductivity,
                battery, signal, seq, ingested_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&reading.event_id)
        .bind(&reading.device_id)
        .bind(&reading.talhao_id)
        .bind(reading.resolved_by.as_str())
        .bind(reading.timestamp)
        .bind(reading.lat)
        .bind(reading.lon)
        .bind(reading.soil_moisture)
        .bind(reading.soil_temp)
        .bind(reading.precipitation)
        .bind(reading.ph)
        .bind(reading.conductivity)
        .bind(reading.battery)
        .bind(reading.signal)
        .bind(reading.seq)
        .bind(reading.ingested_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_per_talhao(&self, talhao_ids: &[String]) -> Result<Vec<LatestReadingRow>> {
        // ---
        let rows = sqlx::query_as::<_, LatestReadingRow>(
            r#"
            SELECT DISTINCT ON (talhao_id)
                event_id, device_id, talhao_id, resolved_by, timestamp,
                lat, lon,
                soil_moisture, soil_temp, precipitation, ph, conductivity,
                battery, signal
            FROM readings
            WHERE talhao_id = ANY($1)
            ORDER BY talhao_id, timestamp DESC
            "#,
        )
        .bind(talhao_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn hourly_moisture_history(
        &self,
        talhao_ids: &[String],
    ) -> Result<Vec<MoistureHistoryRow>> {
        // ---
        let rows = sqlx::query_as::<_, MoistureHistoryRow>(
            r#"
            SELECT
                talhao_id,
                date_trunc('hour', timestamp) AS hour,
                AVG(soil_moisture) AS avg_soil_moisture
            FROM readings
            WHERE talhao_id = ANY($1)
              AND timestamp >= NOW() - INTERVAL '24 hours'
              AND soil_moisture IS NOT NULL
            GROUP BY talhao_id, date_trunc('hour', timestamp)
            ORDER BY talhao_id, hour
            "#,
        )
        .bind(talhao_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

pub struct PgErrorStore {
    pool: PgPool,
}

impl PgErrorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ErrorStore for PgErrorStore {
    async fn record(&self, error: &IngestionErrorRecord) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO ingestion_errors (
                event_id, device_id, timestamp, lat, lon,
                raw_payload, error_type, error_code, error_message, ingested_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&error.event_id)
        .bind(&error.device_id)
        .bind(error.timestamp)
        .bind(error.lat)
        .bind(error.lon)
        .bind(&error.raw_payload)
        .bind(error.error_type.as_str())
        .bind(&error.error_code)
        .bind(&error.error_message)
        .bind(error.ingested_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
