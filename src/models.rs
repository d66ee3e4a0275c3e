//! Data model for the ingestion pipeline.
//!
//! The pipeline works on three record families:
//! - [`RawReadingPayload`]: the untrusted wire payload as POSTed by a device
//!   or gateway. Every field is optional at this stage; validation happens
//!   inside the orchestrator, never in the transport layer.
//! - [`Reading`]: the resolved, validated observation. Append-only once
//!   persisted; never updated.
//! - [`IngestionErrorRecord`]: the audit record written for every rejected
//!   or failed attempt (duplicates excepted).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Stable error codes carried in error records and HTTP error bodies.
pub mod codes {
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    pub const DEVICE_NOT_FOUND: &str = "DEVICE_NOT_FOUND";
    pub const TALHAO_NOT_FOUND: &str = "TALHAO_NOT_FOUND";
    pub const EXCEPTION: &str = "EXCEPTION";
}

/// Geographic coordinate in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Sparse measurement fields of one observation (`leituras` on the wire).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementFields {
    /// Soil moisture, percent.
    pub soil_moisture: Option<f64>,
    /// Soil temperature, degrees Celsius.
    pub soil_temp: Option<f64>,
    /// Precipitation, millimeters.
    pub precipitation: Option<f64>,
    pub ph: Option<f64>,
    /// Electrical conductivity.
    pub conductivity: Option<f64>,
}

/// Raw reading payload as received on `POST /v1/readings`.
///
/// All fields are optional here: the payload may be arbitrarily malformed
/// and still has to yield a deterministic event identifier so that retries
/// of the same bad payload correlate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReadingPayload {
    pub device_id: Option<String>,
    /// ISO-8601 / RFC 3339 timestamp string, parsed strictly downstream.
    pub timestamp: Option<String>,
    pub geo: Option<GeoPoint>,
    #[serde(default)]
    pub leituras: MeasurementFields,
    /// Battery level, percent.
    pub battery: Option<f64>,
    /// Signal strength (RSSI, dBm).
    pub signal: Option<f64>,
    /// Device-side sequence number; carried through, not enforced.
    pub seq: Option<i64>,
}

impl RawReadingPayload {
    /// Derive the deterministic idempotency key for this payload.
    ///
    /// `"{device}:{timestamp}:{seq}"` with seq defaulting to 0. Must never
    /// depend on server-side clock or random values so that sender retries
    /// of the identical payload map to the same event.
    pub fn event_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.device_id.as_deref().unwrap_or(""),
            self.timestamp.as_deref().unwrap_or(""),
            self.seq.unwrap_or(0)
        )
    }
}

// ---

/// How the owning talhão was determined for a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
    /// Explicit device registration (device cache or device directory).
    Device,
    /// Spatial containment of the reading's coordinate.
    Geo,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::Device => "device",
            ResolutionMethod::Geo => "geo",
        }
    }
}

/// A resolved, validated sensor observation. Immutable once persisted.
#[derive(Debug, Clone)]
pub struct Reading {
    pub event_id: String,
    pub device_id: String,
    pub talhao_id: String,
    pub resolved_by: ResolutionMethod,
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
    pub seq: i64,
    pub ingested_at: DateTime<Utc>,
}

// ---

/// Classification of a failed ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Payload malformed or out of range (client fault).
    Validation,
    /// Device unmappable, or mapped talhão absent/inactive.
    Resolution,
    /// Unexpected internal failure (system fault).
    Processing,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Validation => "ValidationError",
            ErrorType::Resolution => "ResolutionError",
            ErrorType::Processing => "ProcessingError",
        }
    }
}

/// Audit record for a rejected or failed ingestion attempt.
///
/// Written exactly once per failed attempt (keyed on event id), never
/// updated. Optional fields reflect that the payload may not have parsed.
#[derive(Debug, Clone)]
pub struct IngestionErrorRecord {
    pub event_id: String,
    pub device_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub raw_payload: serde_json::Value,
    pub error_type: ErrorType,
    pub error_code: String,
    pub error_message: String,
    pub ingested_at: DateTime<Utc>,
}

// ---

/// Terminal outcome of one `process_reading` call.
///
/// The recoverable branches are data, not errors; only unexpected
/// processing faults propagate as `Err` past the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestionOutcome {
    Success {
        event_id: String,
        device_id: String,
        talhao_id: String,
        resolved_by: ResolutionMethod,
        timestamp: DateTime<Utc>,
    },
    /// Idempotent replay of an already-handled event. Not an error: no
    /// error record is written and no side effects run.
    Duplicate { event_id: String },
    ValidationError { event_id: String, message: String },
    ResolutionError {
        event_id: String,
        device_id: String,
        message: String,
    },
    TalhaoNotFound {
        event_id: String,
        talhao_id: String,
        message: String,
    },
}

/// Summary event broadcast once per successful ingestion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingEvent {
    pub event_id: String,
    pub device_id: String,
    pub talhao_id: String,
    pub timestamp: DateTime<Utc>,
    pub resolved_by: ResolutionMethod,
    pub soil_moisture: Option<f64>,
    pub soil_temp: Option<f64>,
    pub precipitation: Option<f64>,
}
