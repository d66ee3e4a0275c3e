//! In-memory fakes for the pipeline collaborators, shared by the
//! orchestrator and route unit tests.
//!
//! Every fake records what it was asked to do so tests can assert on side
//! effects: readings persisted, error records written, events published,
//! directory lookups counted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;

use crate::cache::{InMemoryDedupStore, InMemoryDeviceCache};
use crate::directory::{DeviceDirectory, DeviceMappingRow, PlotDirectory, PlotGeometryRow};
use crate::geofence::GeofenceIndex;
use crate::ingest::Ingestor;
use crate::models::{
    GeoPoint, IngestionErrorRecord, MeasurementFields, RawReadingPayload, Reading, ReadingEvent,
};
use crate::publisher::EventPublisher;
use crate::store::{ErrorStore, LatestReadingRow, MoistureHistoryRow, ReadingStore};

// ---

pub struct FakeDevices {
    pub mappings: HashMap<String, String>,
    pub lookups: AtomicUsize,
}

impl FakeDevices {
    pub fn new(mappings: &[(&str, &str)]) -> Self {
        Self {
            mappings: mappings
                .iter()
                .map(|(d, t)| (d.to_string(), t.to_string()))
                .collect(),
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DeviceDirectory for FakeDevices {
    async fn find_talhao_for_device(&self, device_id: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.mappings.get(device_id).cloned())
    }

    async fn list_active_mappings(&self) -> Result<Vec<DeviceMappingRow>> {
        Ok(self
            .mappings
            .iter()
            .map(|(d, t)| DeviceMappingRow {
                device_id: d.clone(),
                talhao_id: t.clone(),
            })
            .collect())
    }
}

pub struct FakePlots {
    pub active: HashSet<String>,
    pub geometries: Vec<PlotGeometryRow>,
}

impl FakePlots {
    pub fn new(active: &[&str]) -> Self {
        Self {
            active: active.iter().map(|t| t.to_string()).collect(),
            geometries: Vec::new(),
        }
    }

    pub fn with_square(
        mut self,
        talhao_id: &str,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Self {
        // ---
        self.geometries.push(PlotGeometryRow {
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
        });
        self
    }
}

#[async_trait]
impl PlotDirectory for FakePlots {
    async fn talhao_is_active(&self, talhao_id: &str) -> Result<bool> {
        Ok(self.active.contains(talhao_id))
    }

    async fn fetch_active_geometries(&self) -> Result<Vec<PlotGeometryRow>> {
        Ok(self.geometries.clone())
    }
}

#[derive(Default)]
pub struct FakeReadings {
    pub rows: Mutex<Vec<Reading>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ReadingStore for FakeReadings {
    async fn insert(&self, reading: &Reading) -> Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("reading store unavailable");
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.event_id == reading.event_id) {
            return Ok(false);
        }
        rows.push(reading.clone());
        Ok(true)
    }

    async fn latest_per_talhao(&self, _talhao_ids: &[String]) -> Result<Vec<LatestReadingRow>> {
        unimplemented!("not exercised by pipeline tests")
    }

    async fn hourly_moisture_history(
        &self,
        _talhao_ids: &[String],
    ) -> Result<Vec<MoistureHistoryRow>> {
        unimplemented!("not exercised by pipeline tests")
    }
}

#[derive(Default)]
pub struct FakeErrors {
    pub records: Mutex<Vec<IngestionErrorRecord>>,
}

#[async_trait]
impl ErrorStore for FakeErrors {
    async fn record(&self, error: &IngestionErrorRecord) -> Result<()> {
        self.records.lock().unwrap().push(error.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub events: Mutex<Vec<ReadingEvent>>,
}

#[async_trait]
impl EventPublisher for FakePublisher {
    async fn publish(&self, event: &ReadingEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---

/// A fully wired orchestrator over fakes, with handles kept for assertions.
pub struct Pipeline {
    pub ingestor: Arc<Ingestor>,
    pub devices: Arc<FakeDevices>,
    pub readings: Arc<FakeReadings>,
    pub errors: Arc<FakeErrors>,
    pub publisher: Arc<FakePublisher>,
}

pub fn pipeline(devices: FakeDevices, plots: FakePlots) -> Pipeline {
    // ---
    let devices = Arc::new(devices);
    let plots: Arc<dyn PlotDirectory> = Arc::new(plots);
    let readings = Arc::new(FakeReadings::default());
    let errors = Arc::new(FakeErrors::default());
    let publisher = Arc::new(FakePublisher::default());
    let geofence = Arc::new(GeofenceIndex::new(plots.clone(), Duration::minutes(5)));

    let ingestor = Arc::new(Ingestor::new(
        Arc::new(InMemoryDedupStore::new(Duration::days(7))),
        Arc::new(InMemoryDeviceCache::new(Duration::hours(24))),
        devices.clone(),
        plots,
        geofence,
        readings.clone(),
        errors.clone(),
        publisher.clone(),
    ));

    Pipeline {
        ingestor,
        devices,
        readings,
        errors,
        publisher,
    }
}

/// A well-formed payload for the given device at a fixed instant.
pub fn sample_payload(device_id: &str) -> RawReadingPayload {
    // ---
    RawReadingPayload {
        device_id: Some(device_id.to_string()),
        timestamp: Some("2024-06-07T15:30:00Z".to_string()),
        geo: Some(GeoPoint {
            lat: -23.532,
            lon: -46.791,
        }),
        leituras: MeasurementFields {
            soil_moisture: Some(32.5),
            ..Default::default()
        },
        battery: Some(87.0),
        signal: Some(-71.0),
        seq: Some(12),
    }
}
