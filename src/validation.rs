//! Pure payload validation.
//!
//! Checks required fields and numeric ranges on a raw reading payload and
//! collects every violation (not fail-fast) so the client gets the full
//! picture in one response. No I/O happens here.

use chrono::DateTime;

use crate::models::RawReadingPayload;

// ---

/// Validate a raw payload, returning every violated rule.
///
/// An empty vector means the payload is acceptable. Rules:
/// - device id required, non-empty
/// - timestamp required, valid RFC 3339 instant
/// - coordinate required, lat in [-90, 90], lon in [-180, 180]
/// - soil moisture % in [0, 100] if present
/// - soil temperature °C in [-40, 80] if present
/// - precipitation mm >= 0 if present
/// - pH in [0, 14] if present
/// - electrical conductivity >= 0 if present
pub fn validate(payload: &RawReadingPayload) -> Vec<String> {
    // ---
    let mut violations = Vec::new();

    match payload.device_id.as_deref() {
        None | Some("") => violations.push("deviceId is required".to_string()),
        Some(_) => {}
    }

    match payload.timestamp.as_deref() {
        None | Some("") => violations.push("timestamp is required".to_string()),
        Some(ts) => {
            if DateTime::parse_from_rfc3339(ts).is_err() {
                violations.push(format!("timestamp '{ts}' is not a valid ISO-8601 instant"));
            }
        }
    }

    match payload.geo {
        None => violations.push("geo coordinate is required".to_string()),
        Some(geo) => {
            if !(-90.0..=90.0).contains(&geo.lat) {
                violations.push(format!("latitude {} out of range [-90, 90]", geo.lat));
            }
            if !(-180.0..=180.0).contains(&geo.lon) {
                violations.push(format!("longitude {} out of range [-180, 180]", geo.lon));
            }
        }
    }

    let m = &payload.leituras;
    if let Some(v) = m.soil_moisture {
        if !(0.0..=100.0).contains(&v) {
            violations.push(format!("soilMoisture {v} out of range [0, 100]"));
        }
    }
    if let Some(v) = m.soil_temp {
        if !(-40.0..=80.0).contains(&v) {
            violations.push(format!("soilTemp {v} out of range [-40, 80]"));
        }
    }
    if let Some(v) = m.precipitation {
        if v < 0.0 {
            violations.push(format!("precipitation {v} must be >= 0"));
        }
    }
    if let Some(v) = m.ph {
        if !(0.0..=14.0).contains(&v) {
            violations.push(format!("ph {v} out of range [0, 14]"));
        }
    }
    if let Some(v) = m.conductivity {
        if v < 0.0 {
            violations.push(format!("conductivity {v} must be >= 0"));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{GeoPoint, MeasurementFields};

    fn valid_payload() -> RawReadingPayload {
        // ---
        RawReadingPayload {
            device_id: Some("SENS-001".to_string()),
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

    #[test]
    fn accepts_well_formed_payload() {
        // ---
        assert!(validate(&valid_payload()).is_empty());
    }

    #[test]
    fn collects_all_violations_not_just_first() {
        // ---
        let payload = RawReadingPayload {
            geo: Some(GeoPoint {
                lat: -91.0,
                lon: 181.0,
            }),
            ..Default::default()
        };
        let violations = validate(&payload);
        // missing device id, missing timestamp, bad lat, bad lon
        assert_eq!(violations.len(), 4);
    }

    #[test]
    fn rejects_empty_device_id() {
        // ---
        let mut payload = valid_payload();
        payload.device_id = Some(String::new());
        assert!(validate(&payload)
            .iter()
            .any(|v| v.contains("deviceId is required")));
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        // ---
        let mut payload = valid_payload();
        payload.timestamp = Some("07/06/2024 15:30".to_string());
        let violations = validate(&payload);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("not a valid ISO-8601 instant"));
    }

    #[test]
    fn coordinate_boundaries() {
        // ---
        let mut payload = valid_payload();
        payload.geo = Some(GeoPoint {
            lat: -90.0,
            lon: 180.0,
        });
        assert!(validate(&payload).is_empty());

        payload.geo = Some(GeoPoint {
            lat: -91.0,
            lon: -46.791,
        });
        assert_eq!(validate(&payload).len(), 1);

        payload.geo = Some(GeoPoint {
            lat: -23.532,
            lon: 181.0,
        });
        assert_eq!(validate(&payload).len(), 1);
    }

    #[test]
    fn soil_moisture_boundaries() {
        // ---
        let mut payload = valid_payload();
        for valid in [0.0, 100.0] {
            payload.leituras.soil_moisture = Some(valid);
            assert!(validate(&payload).is_empty(), "moisture {valid} must pass");
        }
        for invalid in [-1.0, 101.0] {
            payload.leituras.soil_moisture = Some(invalid);
            assert_eq!(validate(&payload).len(), 1, "moisture {invalid} must fail");
        }
    }

    #[test]
    fn measurement_ranges() {
        // ---
        let mut payload = valid_payload();
        payload.leituras = MeasurementFields {
            soil_temp: Some(81.0),
            precipitation: Some(-0.1),
            ph: Some(14.5),
            conductivity: Some(-2.0),
            ..Default::default()
        };
        assert_eq!(validate(&payload).len(), 4);

        payload.leituras = MeasurementFields {
            soil_temp: Some(-40.0),
            precipitation: Some(0.0),
            ph: Some(14.0),
            conductivity: Some(0.0),
            ..Default::default()
        };
        assert!(validate(&payload).is_empty());
    }

    #[test]
    fn missing_optional_measurements_are_fine() {
        // ---
        let mut payload = valid_payload();
        payload.leituras = MeasurementFields::default();
        payload.battery = None;
        payload.signal = None;
        payload.seq = None;
        assert!(validate(&payload).is_empty());
    }
}
