//! Database schema management for `fieldsense-ingest`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the append-only `readings` and `ingestion_errors` logs plus the
/// `devices` / `talhoes` master-data tables. Safe to call on every startup;
/// no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Append-only reading log, keyed on the deterministic event id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id             BIGSERIAL PRIMARY KEY,
            event_id       TEXT        NOT NULL UNIQUE,
            device_id      TEXT        NOT NULL,
            talhao_id      TEXT        NOT NULL,
            resolved_by    TEXT        NOT NULL,
            timestamp      TIMESTAMPTZ NOT NULL,
            lat            DOUBLE PRECISION NOT NULL,
            lon            DOUBLE PRECISION NOT NULL,
            soil_moisture  DOUBLE PRECISION,
            soil_temp      DOUBLE PRECISION,
            precipitation  DOUBLE PRECISION,
            ph             DOUBLE PRECISION,
            conductivity   DOUBLE PRECISION,
            battery        DOUBLE PRECISION,
            signal         DOUBLE PRECISION,
            seq            BIGINT      NOT NULL,
            ingested_at    TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Audit log of rejected/failed attempts, also keyed on event id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_errors (
            id            BIGSERIAL PRIMARY KEY,
            event_id      TEXT        NOT NULL UNIQUE,
            device_id     TEXT,
            timestamp     TIMESTAMPTZ,
            lat           DOUBLE PRECISION,
            lon           DOUBLE PRECISION,
            raw_payload   JSONB       NOT NULL,
            error_type    TEXT        NOT NULL,
            error_code    TEXT        NOT NULL,
            error_message TEXT        NOT NULL,
            ingested_at   TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Master data: device registrations and talhão geometry.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            device_id TEXT PRIMARY KEY,
            talhao_id TEXT NOT NULL,
            active    BOOLEAN NOT NULL DEFAULT TRUE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS talhoes (
            talhao_id TEXT PRIMARY KEY,
            name      TEXT,
            active    BOOLEAN NOT NULL DEFAULT TRUE,
            geometry  JSONB
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Secondary access patterns: by device+time and by talhão+time.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_device_time
            ON readings (device_id, timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_talhao_time
            ON readings (talhao_id, timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_ingestion_errors_device_time
            ON ingestion_errors (device_id, timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
