//! Ingestion orchestrator: the request-scoped pipeline that takes a raw
//! reading payload to exactly one durable, attributed reading.
//!
//! Steps, each short-circuiting to a terminal outcome:
//! 1. Derive the deterministic event id
//! 2. Validate the payload
//! 3. Deduplication check (idempotency boundary for at-least-once senders)
//! 4. Resolve the owning talhão (device cache → device directory → geofence)
//! 5. Verify the talhão exists and is active
//! 6. Persist the reading (idempotent insert keyed on event id)
//! 7. Mark the dedup store
//! 8. Publish the summary event
//!
//! Side effects are strictly staged: no reading is persisted before
//! resolution succeeds, no event is published before persistence, no error
//! record is written for a duplicate. Recoverable failures become typed
//! outcomes; unexpected store faults are recorded best-effort and then
//! propagated so the transport layer can answer with a 5xx.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cache::{DedupStore, DeviceCache};
use crate::directory::{DeviceDirectory, PlotDirectory};
use crate::geofence::GeofenceIndex;
use crate::models::{
    codes, ErrorType, IngestionErrorRecord, IngestionOutcome, RawReadingPayload, Reading,
    ReadingEvent, ResolutionMethod,
};
use crate::publisher::EventPublisher;
use crate::store::{ErrorStore, ReadingStore};
use crate::validation;

// ---

/// Composes the validators, caches, directories, stores and publisher into
/// one pipeline. All collaborators are injected behind narrow traits so
/// tests can substitute in-memory fakes.
pub struct Ingestor {
    dedup: Arc<dyn DedupStore>,
    device_cache: Arc<dyn DeviceCache>,
    devices: Arc<dyn DeviceDirectory>,
    plots: Arc<dyn PlotDirectory>,
    geofence: Arc<GeofenceIndex>,
    readings: Arc<dyn ReadingStore>,
    errors: Arc<dyn ErrorStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dedup: Arc<dyn DedupStore>,
        device_cache: Arc<dyn DeviceCache>,
        devices: Arc<dyn DeviceDirectory>,
        plots: Arc<dyn PlotDirectory>,
        geofence: Arc<GeofenceIndex>,
        readings: Arc<dyn ReadingStore>,
        errors: Arc<dyn ErrorStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            dedup,
            device_cache,
            devices,
            plots,
            geofence,
            readings,
            errors,
            publisher,
        }
    }

    /// Process one raw reading to a terminal outcome.
    ///
    /// `Ok` covers every recoverable branch; `Err` is reserved for
    /// unexpected processing faults, recorded best-effort before
    /// propagating.
    pub async fn process_reading(&self, payload: RawReadingPayload) -> Result<IngestionOutcome> {
        // ---
        let event_id = payload.event_id();
        debug!("processing reading {event_id}");

        match self.run(&event_id, &payload).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!("reading {event_id} failed unexpectedly: {err:#}");
                // Best-effort: the error store itself may be what failed.
                if let Err(record_err) = self
                    .record_error(
                        &event_id,
                        &payload,
                        ErrorType::Processing,
                        codes::EXCEPTION,
                        &format!("{err:#}"),
                    )
                    .await
                {
                    error!("could not record processing error for {event_id}: {record_err:#}");
                }
                Err(err)
            }
        }
    }

    async fn run(&self, event_id: &str, payload: &RawReadingPayload) -> Result<IngestionOutcome> {
        // ---
        // Step 2: validation, collecting every violation.
        let violations = validation::validate(payload);
        if !violations.is_empty() {
            let message = violations.join("; ");
            debug!("reading {event_id} rejected: {message}");
            self.record_error(
                event_id,
                payload,
                ErrorType::Validation,
                codes::INVALID_PAYLOAD,
                &message,
            )
            .await?;
            return Ok(IngestionOutcome::ValidationError {
                event_id: event_id.to_string(),
                message,
            });
        }

        // Step 3: idempotency boundary. No error record, no side effects.
        if self.dedup.is_duplicate(event_id).await {
            debug!("reading {event_id} is a duplicate, skipping");
            return Ok(IngestionOutcome::Duplicate {
                event_id: event_id.to_string(),
            });
        }

        // Validation guarantees these are present and well-formed.
        let device_id = payload.device_id.clone().unwrap_or_default();
        let geo = payload
            .geo
            .context("geo coordinate missing after validation")?;

        // Step 4: resolution chain.
        let Some((talhao_id, resolved_by)) = self.resolve(&device_id, geo.lat, geo.lon).await?
        else {
            let message = format!(
                "device {device_id} is not registered and its coordinate matches no talhao"
            );
            self.record_error(
                event_id,
                payload,
                ErrorType::Resolution,
                codes::DEVICE_NOT_FOUND,
                &message,
            )
            .await?;
            return Ok(IngestionOutcome::ResolutionError {
                event_id: event_id.to_string(),
                device_id,
                message,
            });
        };

        // Step 5: the resolved talhão must exist and be active.
        if !self.plots.talhao_is_active(&talhao_id).await? {
            let message = format!("talhao {talhao_id} does not exist or is inactive");
            self.record_error(
                event_id,
                payload,
                ErrorType::Resolution,
                codes::TALHAO_NOT_FOUND,
                &message,
            )
            .await?;
            return Ok(IngestionOutcome::TalhaoNotFound {
                event_id: event_id.to_string(),
                talhao_id,
                message,
            });
        }

        // Step 6: construct and persist. The strict re-parse cannot fail
        // after validation; treat a failure as an invariant violation.
        let raw_ts = payload
            .timestamp
            .as_deref()
            .context("timestamp missing after validation")?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .context("timestamp failed to re-parse after validation")?
            .with_timezone(&Utc);

        let reading = Reading {
            event_id: event_id.to_string(),
            device_id: device_id.clone(),
            talhao_id: talhao_id.clone(),
            resolved_by,
            timestamp,
            lat: geo.lat,
            lon: geo.lon,
            soil_moisture: payload.leituras.soil_moisture,
            soil_temp: payload.leituras.soil_temp,
            precipitation: payload.leituras.precipitation,
            ph: payload.leituras.ph,
            conductivity: payload.leituras.conductivity,
            battery: payload.battery,
            signal: payload.signal,
            seq: payload.seq.unwrap_or(0),
            ingested_at: Utc::now(),
        };

        let inserted = self.readings.insert(&reading).await?;
        if !inserted {
            // A retry of a reading whose dedup marker was lost (crash
            // between insert and mark, or marker expiry). Repair the marker
            // and report the replay.
            debug!("reading {event_id} already persisted, repairing dedup marker");
            self.dedup.mark(event_id).await;
            return Ok(IngestionOutcome::Duplicate {
                event_id: event_id.to_string(),
            });
        }

        // Step 7: mark only after successful persistence.
        self.dedup.mark(event_id).await;

        // Step 8: announce downstream.
        let event = ReadingEvent {
            event_id: event_id.to_string(),
            device_id: device_id.clone(),
            talhao_id: talhao_id.clone(),
            timestamp,
            resolved_by,
            soil_moisture: reading.soil_moisture,
            soil_temp: reading.soil_temp,
            precipitation: reading.precipitation,
        };
        self.publisher.publish(&event).await?;

        info!(
            "reading {event_id} ingested for talhao {talhao_id} (resolved by {})",
            resolved_by.as_str()
        );
        Ok(IngestionOutcome::Success {
            event_id: event_id.to_string(),
            device_id,
            talhao_id,
            resolved_by,
            timestamp,
        })
    }

    /// Resolution chain, cheapest and most specific first: device cache,
    /// then device directory (write-through on hit), then geofence.
    ///
    /// A geofence hit is deliberately not written to the device cache: a
    /// device's owning talhão should be pinned by the directory, not by one
    /// containment hit that might sit near a boundary.
    async fn resolve(
        &self,
        device_id: &str,
        lat: f64,
        lon: f64,
    ) -> Result<Option<(String, ResolutionMethod)>> {
        // ---
        if let Some(talhao_id) = self.device_cache.get_talhao_id(device_id).await {
            debug!("device {device_id} resolved from cache -> {talhao_id}");
            return Ok(Some((talhao_id, ResolutionMethod::Device)));
        }

        if let Some(talhao_id) = self.devices.find_talhao_for_device(device_id).await? {
            self.device_cache.set_talhao_id(device_id, &talhao_id).await;
            debug!("device {device_id} resolved from directory -> {talhao_id}");
            return Ok(Some((talhao_id, ResolutionMethod::Device)));
        }

        if let Some(talhao_id) = self.geofence.find_talhao(lat, lon).await {
            debug!("device {device_id} resolved by geofence -> {talhao_id}");
            return Ok(Some((talhao_id, ResolutionMethod::Geo)));
        }

        Ok(None)
    }

    async fn record_error(
        &self,
        event_id: &str,
        payload: &RawReadingPayload,
        error_type: ErrorType,
        error_code: &str,
        message: &str,
    ) -> Result<()> {
        // ---
        let record = IngestionErrorRecord {
            event_id: event_id.to_string(),
            device_id: payload.device_id.clone(),
            timestamp: payload
                .timestamp
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
            lat: payload.geo.map(|g| g.lat),
            lon: payload.geo.map(|g| g.lon),
            raw_payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            error_type,
            error_code: error_code.to_string(),
            error_message: message.to_string(),
            ingested_at: Utc::now(),
        };
        self.errors.record(&record).await
    }
}
