//! Authoritative master-data collaborators over PostgreSQL.
//!
//! The device directory owns the device→talhão registration; the plot
//! directory owns talhão existence/activity and geometry. Both are narrow
//! traits so the orchestrator and geofence index can be exercised against
//! in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Row};

// ---

/// Authoritative device→talhão mapping.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Talhão the device is registered to, if any (active rows only).
    async fn find_talhao_for_device(&self, device_id: &str) -> Result<Option<String>>;

    /// Full active device→talhão mapping, for the admin read path.
    async fn list_active_mappings(&self) -> Result<Vec<DeviceMappingRow>>;
}

/// One row of the active device→talhão mapping.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMappingRow {
    pub device_id: String,
    pub talhao_id: String,
}

/// Authoritative talhão existence/activity and geometry.
#[async_trait]
pub trait PlotDirectory: Send + Sync {
    /// Whether the talhão exists and is active.
    async fn talhao_is_active(&self, talhao_id: &str) -> Result<bool>;

    /// All active talhões carrying geometry, as stored GeoJSON values.
    async fn fetch_active_geometries(&self) -> Result<Vec<PlotGeometryRow>>;
}

/// One talhão's stored geometry, still unparsed.
#[derive(Debug, Clone)]
pub struct PlotGeometryRow {
    pub talhao_id: String,
    pub geometry: serde_json::Value,
}

// ---

pub struct PgDeviceDirectory {
    pool: PgPool,
}

impl PgDeviceDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceDirectory for PgDeviceDirectory {
    async fn find_talhao_for_device(&self, device_id: &str) -> Result<Option<String>> {
        // ---
        let talhao_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT talhao_id FROM devices
            WHERE device_id = $1 AND active
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(talhao_id)
    }

    async fn list_active_mappings(&self) -> Result<Vec<DeviceMappingRow>> {
        // ---
        let rows = sqlx::query_as::<_, DeviceMappingRow>(
            r#"
            SELECT device_id, talhao_id FROM devices
            WHERE active
            ORDER BY device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

pub struct PgPlotDirectory {
    pool: PgPool,
}

impl PgPlotDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlotDirectory for PgPlotDirectory {
    async fn talhao_is_active(&self, talhao_id: &str) -> Result<bool> {
        // ---
        let active: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM talhoes WHERE talhao_id = $1 AND active
            )
            "#,
        )
        .bind(talhao_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }

    async fn fetch_active_geometries(&self) -> Result<Vec<PlotGeometryRow>> {
        // ---
        let rows = sqlx::query(
            r#"
            SELECT talhao_id, geometry FROM talhoes
            WHERE active AND geometry IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PlotGeometryRow {
                talhao_id: row.get("talhao_id"),
                geometry: row.get("geometry"),
            })
            .collect())
    }
}
