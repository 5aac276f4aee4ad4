//! Parser for USGS GeoJSON summary feeds.
//!
//! Coordinates are `[lon, lat, depth_km]`; `properties.time` and
//! `properties.updated` are milliseconds since epoch.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{ParseOutcome, ParsedEvent, map_status};
use crate::errors::ParseError;
use crate::models::NormalizedEvent;
use crate::sources::SourceTag;

/// Top-level GeoJSON response envelope.
///
/// Features stay as raw values so one bad feature cannot poison the rest.
#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    features: Vec<Value>,
}

/// A single earthquake event.
#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    geometry: Geometry,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// Coordinates: [longitude, latitude, depth_km]
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    mag: Option<f64>,
    #[serde(rename = "magType")]
    mag_type: Option<String>,
    place: Option<String>,
    /// Event time (ms since epoch)
    time: i64,
    /// Last update time (ms since epoch)
    updated: Option<i64>,
    status: Option<String>,
    /// Network code
    net: Option<String>,
    /// Azimuthal gap (degrees)
    gap: Option<f64>,
    /// Magnitude standard error
    #[serde(rename = "magError")]
    mag_error: Option<f64>,
    url: Option<String>,
}

fn timestamp_ms(ms: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| format!("unrepresentable epoch millis: {ms}"))
}

fn convert(source: SourceTag, feature: Feature) -> Result<NormalizedEvent, String> {
    if feature.id.is_empty() {
        return Err("empty event id".into());
    }
    if feature.geometry.coordinates.len() < 3 {
        return Err(format!(
            "expected 3 coordinates, got {}",
            feature.geometry.coordinates.len()
        ));
    }

    let magnitude_value = feature.properties.mag.ok_or("missing magnitude")?;
    let magnitude_type = feature
        .properties
        .mag_type
        .filter(|t| !t.is_empty())
        .ok_or("missing magnitude type")?;

    let origin_time_utc = timestamp_ms(feature.properties.time)?;
    let updated_at = feature.properties.updated.map(timestamp_ms).transpose()?;

    Ok(NormalizedEvent {
        source,
        source_event_id: feature.id,
        origin_time_utc,
        longitude: feature.geometry.coordinates[0],
        latitude: feature.geometry.coordinates[1],
        depth_km: feature.geometry.coordinates[2],
        magnitude_value,
        magnitude_type,
        status: map_status(feature.properties.status.as_deref(), None),
        place: feature.properties.place,
        region: None,
        lat_error_km: None,
        lon_error_km: None,
        depth_error_km: None,
        mag_error: feature.properties.mag_error,
        time_error_sec: None,
        num_phases: None,
        azimuthal_gap: feature.properties.gap,
        author: feature.properties.net,
        url: feature.properties.url,
        updated_at,
    })
}

/// Parse a USGS GeoJSON payload.
#[must_use]
pub fn parse(source: SourceTag, bytes: &[u8]) -> ParseOutcome {
    let collection: FeatureCollection = match serde_json::from_slice(bytes) {
        Ok(c) => c,
        Err(e) => {
            return ParseOutcome::failed(ParseError::MalformedPayload {
                message: e.to_string(),
            });
        }
    };

    if collection.type_ != "FeatureCollection" {
        return ParseOutcome::failed(ParseError::MalformedPayload {
            message: format!(
                "expected type 'FeatureCollection', got '{}'",
                collection.type_
            ),
        });
    }

    let mut outcome = ParseOutcome::default();
    for raw in collection.features {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let converted = serde_json::from_value::<Feature>(raw.clone())
            .map_err(|e| e.to_string())
            .and_then(|f| convert(source, f));
        match converted {
            Ok(event) => outcome.events.push(ParsedEvent {
                event,
                raw: raw.to_string().into_bytes(),
            }),
            Err(message) => outcome.errors.push(ParseError::MalformedEvent {
                source_event_id: id,
                message,
                raw: raw.to_string().into_bytes(),
            }),
        }
    }
    outcome
}
