//! In-memory geofence index: talhão → (polygon, bounding box).
//!
//! The index is a snapshot rebuilt wholesale from the plot directory when
//! it is empty or older than the refresh TTL. Readers clone an `Arc` to the
//! current snapshot and never block on a refresh; the refresh lock only
//! serializes rebuilds. A failed rebuild leaves the previous snapshot in
//! service (stale-but-available).
//!
//! Geometry is GeoJSON in EPSG:4326 (positions are `[lon, lat]` degrees).
//! Lookups run a cheap axis-aligned bounding-box test per talhão before the
//! exact ray-casting containment test.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::directory::PlotDirectory;

// ---

/// Axis-aligned envelope of a geometry, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// A linear ring as `(lon, lat)` pairs, GeoJSON position order.
type Ring = Vec<(f64, f64)>;

/// One polygon: exterior ring plus interior holes.
#[derive(Debug, Clone)]
struct PolygonRings {
    exterior: Ring,
    holes: Vec<Ring>,
}

impl PolygonRings {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        ring_contains(&self.exterior, lat, lon)
            && !self.holes.iter().any(|h| ring_contains(h, lat, lon))
    }
}

/// Parsed geometry for one talhão: one or more polygons (MultiPolygon).
#[derive(Debug, Clone)]
struct PlotGeometry {
    polygons: Vec<PolygonRings>,
}

impl PlotGeometry {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        self.polygons.iter().any(|p| p.contains(lat, lon))
    }

    fn bounding_box(&self) -> Option<BoundingBox> {
        // ---
        // The exterior rings cover all holes, so they alone define the envelope.
        let mut points = self
            .polygons
            .iter()
            .flat_map(|p| p.exterior.iter().copied());

        let (first_lon, first_lat) = points.next()?;
        let mut bbox = BoundingBox {
            min_lat: first_lat,
            max_lat: first_lat,
            min_lon: first_lon,
            max_lon: first_lon,
        };
        for (lon, lat) in points {
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
        }
        Some(bbox)
    }
}

/// Even-odd ray casting: does the ring contain the point?
fn ring_contains(ring: &[(f64, f64)], lat: f64, lon: f64) -> bool {
    // ---
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > lat) != (yj > lat) && lon < (xj - xi) * (lat - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

// ---

/// One indexed talhão.
#[derive(Debug, Clone)]
struct GeofenceEntry {
    geometry: PlotGeometry,
    bbox: BoundingBox,
}

/// The immutable snapshot published to readers.
struct Snapshot {
    entries: HashMap<String, GeofenceEntry>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            refreshed_at: None,
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => self.entries.is_empty() || now - at > ttl,
        }
    }
}

/// Point-in-polygon resolver over a TTL-refreshed snapshot of all active
/// talhão geometries.
pub struct GeofenceIndex {
    plots: Arc<dyn PlotDirectory>,
    snapshot: RwLock<Arc<Snapshot>>,
    refresh_lock: Mutex<()>,
    ttl: Duration,
}

impl GeofenceIndex {
    pub fn new(plots: Arc<dyn PlotDirectory>, ttl: Duration) -> Self {
        Self {
            plots,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            refresh_lock: Mutex::new(()),
            ttl,
        }
    }

    /// Which talhão contains this coordinate?
    ///
    /// Refreshes the snapshot first if it is empty or stale; a refresh
    /// failure is logged and the previous snapshot keeps serving. With
    /// non-overlapping geometries the first containing talhão is the
    /// answer; iteration order across overlapping talhões is unspecified.
    pub async fn find_talhao(&self, lat: f64, lon: f64) -> Option<String> {
        // ---
        self.ensure_fresh().await;

        let snapshot = self.snapshot.read().await.clone();
        for (talhao_id, entry) in &snapshot.entries {
            if !entry.bbox.contains(lat, lon) {
                continue;
            }
            if entry.geometry.contains(lat, lon) {
                debug!("geofence hit: ({lat}, {lon}) -> {talhao_id}");
                return Some(talhao_id.clone());
            }
        }
        None
    }

    /// Rebuild the snapshot from the plot directory and swap it in.
    ///
    /// Only one refresh runs at a time; concurrent callers wait on the
    /// refresh lock and then skip the rebuild if the winner already
    /// refreshed. Talhões whose geometry fails to parse are skipped.
    pub async fn refresh(&self) -> Result<()> {
        // ---
        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited on the lock.
        if !self.snapshot.read().await.is_stale(Utc::now(), self.ttl) {
            return Ok(());
        }

        let rows = self
            .plots
            .fetch_active_geometries()
            .await
            .context("fetching talhao geometries for geofence refresh")?;
        let fetched = rows.len();

        let mut entries = HashMap::with_capacity(fetched);
        for row in rows {
            match parse_geometry(&row.geometry) {
                Ok(geometry) => {
                    let Some(bbox) = geometry.bounding_box() else {
                        warn!("talhao {} has empty geometry, skipping", row.talhao_id);
                        continue;
                    };
                    entries.insert(row.talhao_id, GeofenceEntry { geometry, bbox });
                }
                Err(err) => {
                    warn!("talhao {} geometry failed to parse, skipping: {err:#}", row.talhao_id);
                }
            }
        }

        let indexed = entries.len();
        let next = Arc::new(Snapshot {
            entries,
            refreshed_at: Some(Utc::now()),
        });
        *self.snapshot.write().await = next;

        info!("geofence index refreshed: {indexed} talhoes indexed ({fetched} fetched)");
        Ok(())
    }

    async fn ensure_fresh(&self) {
        // ---
        let stale = self.snapshot.read().await.is_stale(Utc::now(), self.ttl);
        if stale {
            if let Err(err) = self.refresh().await {
                warn!("geofence refresh failed, serving previous snapshot: {err:#}");
            }
        }
    }
}

// ---

/// Parse a stored GeoJSON value into polygon rings.
///
/// Accepts a bare geometry, a `Feature` wrapper, or a `FeatureCollection`
/// (first feature). `Polygon` and `MultiPolygon` geometries are supported.
fn parse_geometry(value: &Value) -> Result<PlotGeometry> {
    // ---
    let geometry = unwrap_feature(value)?;
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("geometry has no type"))?;
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| anyhow!("geometry has no coordinates"))?;

    let polygons = match kind {
        "Polygon" => vec![parse_polygon(coordinates)?],
        "MultiPolygon" => coordinates
            .as_array()
            .ok_or_else(|| anyhow!("MultiPolygon coordinates must be an array"))?
            .iter()
            .map(parse_polygon)
            .collect::<Result<Vec<_>>>()?,
        other => bail!("unsupported geometry type '{other}'"),
    };
    if polygons.is_empty() {
        bail!("geometry contains no polygons");
    }

    Ok(PlotGeometry { polygons })
}

/// Strip `Feature` / `FeatureCollection` wrappers down to the geometry object.
fn unwrap_feature(value: &Value) -> Result<&Value> {
    // ---
    match value.get("type").and_then(Value::as_str) {
        Some("Feature") => value
            .get("geometry")
            .filter(|g| !g.is_null())
            .ok_or_else(|| anyhow!("Feature has no geometry")),
        Some("FeatureCollection") => {
            let first = value
                .get("features")
                .and_then(Value::as_array)
                .and_then(|f| f.first())
                .ok_or_else(|| anyhow!("FeatureCollection has no features"))?;
            unwrap_feature(first)
        }
        Some(_) => Ok(value),
        None => bail!("geometry value has no type"),
    }
}

fn parse_polygon(coordinates: &Value) -> Result<PolygonRings> {
    // ---
    let rings = coordinates
        .as_array()
        .ok_or_else(|| anyhow!("Polygon coordinates must be an array of rings"))?
        .iter()
        .map(parse_ring)
        .collect::<Result<Vec<_>>>()?;

    let mut rings = rings.into_iter();
    let exterior = rings.next().ok_or_else(|| anyhow!("Polygon has no exterior ring"))?;
    Ok(PolygonRings {
        exterior,
        holes: rings.collect(),
    })
}

fn parse_ring(ring: &Value) -> Result<Ring> {
    // ---
    ring.as_array()
        .ok_or_else(|| anyhow!("ring must be an array of positions"))?
        .iter()
        .map(|position| {
            let coords = position
                .as_array()
                .ok_or_else(|| anyhow!("position must be an array"))?;
            let lon = coords
                .first()
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow!("position has no longitude"))?;
            let lat = coords
                .get(1)
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow!("position has no latitude"))?;
            Ok((lon, lat))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::directory::PlotGeometryRow;

    /// Unit square-ish polygon around the origin, `[lon, lat]` order.
    fn square(
        talhao_id: &str,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> PlotGeometryRow {
        // ---
        PlotGeometryRow {
            talhao_id: talhao_id.to_string(),
            geometry: json!({
                "type": "Polygon",
                "coordinates": [[
                    [min_lon, min_lat],
                    [max_lon, min_lat],
                    [max_lon, max_lat],
                    [min_lon, max_lat],
                    [min_lon, min_lat]
                ]]
            }),
        }
    }

    struct FakePlots {
        rows: Vec<PlotGeometryRow>,
        fail: AtomicBool,
        fetch_calls: AtomicUsize,
    }

    impl FakePlots {
        fn new(rows: Vec<PlotGeometryRow>) -> Self {
            Self {
                rows,
                fail: AtomicBool::new(false),
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PlotDirectory for FakePlots {
        async fn talhao_is_active(&self, _talhao_id: &str) -> Result<bool> {
            Ok(true)
        }

        async fn fetch_active_geometries(&self) -> Result<Vec<PlotGeometryRow>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                bail!("plot directory unreachable");
            }
            Ok(self.rows.clone())
        }
    }

    fn index_over(rows: Vec<PlotGeometryRow>) -> (Arc<FakePlots>, GeofenceIndex) {
        // ---
        let plots = Arc::new(FakePlots::new(rows));
        let index = GeofenceIndex::new(plots.clone(), Duration::minutes(5));
        (plots, index)
    }

    #[tokio::test]
    async fn point_inside_polygon_resolves() {
        // ---
        let (_, index) = index_over(vec![square("TAL-001", -46.80, -23.54, -46.78, -23.52)]);
        assert_eq!(
            index.find_talhao(-23.532, -46.791).await.as_deref(),
            Some("TAL-001")
        );
    }

    #[tokio::test]
    async fn point_outside_all_polygons_returns_none() {
        // ---
        let (_, index) = index_over(vec![square("TAL-001", -46.80, -23.54, -46.78, -23.52)]);
        assert_eq!(index.find_talhao(10.0, 10.0).await, None);
    }

    #[tokio::test]
    async fn point_in_bbox_but_outside_polygon_is_rejected() {
        // ---
        // A triangle occupying the lower-left half of its bbox: the
        // upper-right corner area passes the bbox test but must fail
        // the exact containment test.
        let triangle = PlotGeometryRow {
            talhao_id: "TAL-TRI".to_string(),
            geometry: json!({
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [0.0, 0.0]]]
            }),
        };
        let (_, index) = index_over(vec![triangle]);
        assert_eq!(index.find_talhao(1.0, 1.0).await.as_deref(), Some("TAL-TRI"));
        assert_eq!(index.find_talhao(9.0, 9.0).await, None);
    }

    #[tokio::test]
    async fn hole_excludes_contained_point() {
        // ---
        let donut = PlotGeometryRow {
            talhao_id: "TAL-DONUT".to_string(),
            geometry: json!({
                "type": "Polygon",
                "coordinates": [
                    [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
                    [[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]]
                ]
            }),
        };
        let (_, index) = index_over(vec![donut]);
        assert_eq!(index.find_talhao(2.0, 2.0).await.as_deref(), Some("TAL-DONUT"));
        assert_eq!(index.find_talhao(5.0, 5.0).await, None);
    }

    #[tokio::test]
    async fn multipolygon_matches_any_part() {
        // ---
        let pair = PlotGeometryRow {
            talhao_id: "TAL-MP".to_string(),
            geometry: json!({
                "type": "MultiPolygon",
                "coordinates": [
                    [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]],
                    [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 6.0], [5.0, 5.0]]]
                ]
            }),
        };
        let (_, index) = index_over(vec![pair]);
        assert_eq!(index.find_talhao(0.5, 0.5).await.as_deref(), Some("TAL-MP"));
        assert_eq!(index.find_talhao(5.5, 5.5).await.as_deref(), Some("TAL-MP"));
        assert_eq!(index.find_talhao(3.0, 3.0).await, None);
    }

    #[tokio::test]
    async fn feature_and_collection_wrappers_are_accepted() {
        // ---
        let feature = PlotGeometryRow {
            talhao_id: "TAL-F".to_string(),
            geometry: json!({
                "type": "Feature",
                "properties": {"name": "north field"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            }),
        };
        let collection = PlotGeometryRow {
            talhao_id: "TAL-FC".to_string(),
            geometry: json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [
                            [[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 6.0], [5.0, 5.0]]
                        ]
                    }
                }]
            }),
        };
        let (_, index) = index_over(vec![feature, collection]);
        assert_eq!(index.find_talhao(0.5, 0.5).await.as_deref(), Some("TAL-F"));
        assert_eq!(index.find_talhao(5.5, 5.5).await.as_deref(), Some("TAL-FC"));
    }

    #[tokio::test]
    async fn unparseable_geometry_is_skipped_not_fatal() {
        // ---
        let bad = PlotGeometryRow {
            talhao_id: "TAL-BAD".to_string(),
            geometry: json!({"type": "Point", "coordinates": [1.0, 1.0]}),
        };
        let good = square("TAL-GOOD", 0.0, 0.0, 1.0, 1.0);
        let (_, index) = index_over(vec![bad, good]);

        index.refresh().await.unwrap();
        assert_eq!(index.find_talhao(0.5, 0.5).await.as_deref(), Some("TAL-GOOD"));
        assert_eq!(index.snapshot.read().await.entries.len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        // ---
        let (plots, index) = index_over(vec![square("TAL-001", 0.0, 0.0, 1.0, 1.0)]);
        index.refresh().await.unwrap();

        // Directory goes down; force staleness so the next lookup retries.
        plots.fail.store(true, Ordering::SeqCst);
        {
            let mut snapshot = index.snapshot.write().await;
            *snapshot = Arc::new(Snapshot {
                entries: snapshot.entries.clone(),
                refreshed_at: Some(Utc::now() - Duration::hours(1)),
            });
        }

        // Lookup still answers from the stale snapshot, no error.
        assert_eq!(index.find_talhao(0.5, 0.5).await.as_deref(), Some("TAL-001"));
        assert!(plots.fetch_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn fresh_snapshot_is_not_refetched() {
        // ---
        let (plots, index) = index_over(vec![square("TAL-001", 0.0, 0.0, 1.0, 1.0)]);
        index.find_talhao(0.5, 0.5).await;
        index.find_talhao(0.5, 0.5).await;
        index.find_talhao(10.0, 10.0).await;
        assert_eq!(plots.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_refresh_propagates_directory_failure() {
        // ---
        let (plots, index) = index_over(vec![]);
        plots.fail.store(true, Ordering::SeqCst);
        assert!(index.refresh().await.is_err());
    }
}
