//! Canonical-record validation.
//!
//! Bounds, required-field, and sanity checks. Failures collect every
//! violation so the dead-letter entry explains the whole problem at once.

use chrono::{DateTime, Duration, Utc};

use crate::errors::ValidationError;
use crate::models::{DeadLetterEntry, NormalizedEvent};

pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
pub const DEPTH_RANGE_KM: (f64, f64) = (-5.0, 1000.0);
pub const MAGNITUDE_RANGE: (f64, f64) = (-2.0, 11.0);

/// Furthest future origin time accepted, relative to `now`.
const MAX_FUTURE_DAYS: i64 = 1;

/// Oldest origin time accepted, relative to `now`.
const MAX_AGE_YEARS: i64 = 200;

fn check_range(
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
    errors: &mut Vec<ValidationError>,
) {
    if !value.is_finite() || value < min || value > max {
        errors.push(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
}

/// Validate one canonical record against `now`.
///
/// # Errors
///
/// Returns every violated constraint; an empty error list never occurs on
/// the `Err` path.
pub fn validate(event: &NormalizedEvent, now: DateTime<Utc>) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if event.source_event_id.is_empty() {
        errors.push(ValidationError::MissingField {
            field: "source_event_id",
        });
    }
    if event.magnitude_type.trim().is_empty() {
        errors.push(ValidationError::MissingField {
            field: "magnitude_type",
        });
    }

    check_range("latitude", event.latitude, LATITUDE_RANGE, &mut errors);
    check_range("longitude", event.longitude, LONGITUDE_RANGE, &mut errors);
    check_range("depth_km", event.depth_km, DEPTH_RANGE_KM, &mut errors);
    check_range(
        "magnitude_value",
        event.magnitude_value,
        MAGNITUDE_RANGE,
        &mut errors,
    );

    let future_limit = now + Duration::days(MAX_FUTURE_DAYS);
    let past_limit = now - Duration::days(MAX_AGE_YEARS * 365);
    if event.origin_time_utc > future_limit {
        errors.push(ValidationError::BadTimestamp {
            message: format!(
                "{} is more than {MAX_FUTURE_DAYS} day(s) in the future",
                event.origin_time_utc
            ),
        });
    } else if event.origin_time_utc < past_limit {
        errors.push(ValidationError::BadTimestamp {
            message: format!(
                "{} is more than {MAX_AGE_YEARS} years in the past",
                event.origin_time_utc
            ),
        });
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Build the dead-letter entry for a record that failed validation,
/// preserving the original payload bytes.
#[must_use]
pub fn to_dead_letter(
    event: &NormalizedEvent,
    errors: &[ValidationError],
    raw_payload: String,
    now: DateTime<Utc>,
) -> DeadLetterEntry {
    DeadLetterEntry {
        source: event.source,
        source_event_id: Some(event.source_event_id.clone()),
        raw_payload,
        error_messages: errors.iter().map(ToString::to_string).collect(),
        created_at: now,
    }
}
