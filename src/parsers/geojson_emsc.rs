//! Parser for EMSC seismicportal GeoJSON.
//!
//! Same GeoJSON envelope as USGS but ISO-8601 timestamps and flat
//! `properties` naming (`unid`, `lastupdate`, `flynn_region`).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{ParseOutcome, ParsedEvent, map_status};
use crate::errors::ParseError;
use crate::models::NormalizedEvent;
use crate::sources::SourceTag;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    features: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<String>,
    geometry: Geometry,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// Coordinates: [longitude, latitude, -depth_km]
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    /// Stable EMSC event id
    unid: Option<String>,
    time: DateTime<Utc>,
    lastupdate: Option<DateTime<Utc>>,
    lat: f64,
    lon: f64,
    /// Depth in km, positive down (geometry carries it negated)
    depth: Option<f64>,
    mag: Option<f64>,
    magtype: Option<String>,
    auth: Option<String>,
    flynn_region: Option<String>,
}

fn convert(source: SourceTag, feature: Feature) -> Result<NormalizedEvent, String> {
    let source_event_id = feature
        .properties
        .unid
        .or(feature.id)
        .filter(|id| !id.is_empty())
        .ok_or("missing event id")?;

    let magnitude_value = feature.properties.mag.ok_or("missing magnitude")?;
    let magnitude_type = feature
        .properties
        .magtype
        .filter(|t| !t.is_empty())
        .ok_or("missing magnitude type")?;

    // properties.depth is authoritative; the geometry's third coordinate is
    // elevation-signed.
    let depth_km = match feature.properties.depth {
        Some(d) => d,
        None => {
            let coord = feature
                .geometry
                .coordinates
                .get(2)
                .ok_or("missing depth coordinate")?;
            -coord
        }
    };

    Ok(NormalizedEvent {
        source,
        source_event_id,
        origin_time_utc: feature.properties.time,
        latitude: feature.properties.lat,
        longitude: feature.properties.lon,
        depth_km,
        magnitude_value,
        magnitude_type,
        status: map_status(None, None),
        place: feature.properties.flynn_region.clone(),
        region: feature.properties.flynn_region,
        lat_error_km: None,
        lon_error_km: None,
        depth_error_km: None,
        mag_error: None,
        time_error_sec: None,
        num_phases: None,
        azimuthal_gap: None,
        author: feature.properties.auth,
        url: None,
        updated_at: feature.properties.lastupdate,
    })
}

/// Parse an EMSC GeoJSON payload.
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
            .pointer("/properties/unid")
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
