//! Parser for the FDSN event web-service text format.
//!
//! Pipe-delimited rows with a `#` header. Field order is fixed:
//! `EventID|Time|Latitude|Longitude|Depth/km|Author|Catalog|Contributor|ContributorID|MagType|Magnitude|MagAuthor|EventLocationName`

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{ParseOutcome, ParsedEvent};
use crate::errors::ParseError;
use crate::models::{NormalizedEvent, ReviewStatus};
use crate::sources::SourceTag;

const FIELD_COUNT: usize = 13;

/// FDSN text timestamps come with or without a trailing `Z` and with
/// variable sub-second precision.
fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| format!("bad time '{raw}': {e}"))
}

fn parse_f64(field: &'static str, raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| format!("bad {field}: '{raw}'"))
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn convert(source: SourceTag, line: &str) -> Result<NormalizedEvent, String> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < FIELD_COUNT {
        return Err(format!(
            "expected {FIELD_COUNT} fields, got {}",
            fields.len()
        ));
    }

    let source_event_id = non_empty(fields[0]).ok_or("empty event id")?;
    let origin_time_utc = parse_time(fields[1].trim())?;
    let latitude = parse_f64("latitude", fields[2])?;
    let longitude = parse_f64("longitude", fields[3])?;
    let depth_km = parse_f64("depth", fields[4])?;
    let magnitude_type = non_empty(fields[9]).ok_or("empty magnitude type")?;
    let magnitude_value = parse_f64("magnitude", fields[10])?;

    Ok(NormalizedEvent {
        source,
        source_event_id,
        origin_time_utc,
        latitude,
        longitude,
        depth_km,
        magnitude_value,
        magnitude_type,
        // The text format carries no review state
        status: ReviewStatus::Automatic,
        place: non_empty(fields[12]),
        region: None,
        lat_error_km: None,
        lon_error_km: None,
        depth_error_km: None,
        mag_error: None,
        time_error_sec: None,
        num_phases: None,
        azimuthal_gap: None,
        author: non_empty(fields[5]),
        url: None,
        updated_at: None,
    })
}

/// Parse an FDSN text payload.
#[must_use]
pub fn parse(source: SourceTag, bytes: &[u8]) -> ParseOutcome {
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(e) => {
            return ParseOutcome::failed(ParseError::MalformedPayload {
                message: format!("payload is not UTF-8: {e}"),
            });
        }
    };

    let mut outcome = ParseOutcome::default();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match convert(source, line) {
            Ok(event) => outcome.events.push(ParsedEvent {
                event,
                raw: line.as_bytes().to_vec(),
            }),
            Err(message) => {
                let source_event_id = line.split('|').next().and_then(non_empty);
                outcome.errors.push(ParseError::MalformedEvent {
                    source_event_id,
                    message,
                    raw: line.as_bytes().to_vec(),
                });
            }
        }
    }
    outcome
}
