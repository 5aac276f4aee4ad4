//! Shared builders for unit and integration tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::models::{NormalizedEvent, ReviewStatus};
use crate::sources::SourceTag;

/// Fixed reference instant used across tests.
#[must_use]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A valid canonical event in the Aegean with sensible defaults.
#[must_use]
pub fn sample_event(source: SourceTag, id: &str) -> NormalizedEvent {
    NormalizedEvent {
        source,
        source_event_id: id.to_string(),
        origin_time_utc: t0(),
        latitude: 35.0,
        longitude: 25.0,
        depth_km: 10.0,
        magnitude_value: 5.0,
        magnitude_type: "mw".to_string(),
        status: ReviewStatus::Automatic,
        place: None,
        region: None,
        lat_error_km: None,
        lon_error_km: None,
        depth_error_km: None,
        mag_error: None,
        time_error_sec: None,
        num_phases: None,
        azimuthal_gap: None,
        author: None,
        url: None,
        updated_at: Some(t0()),
    }
}

/// Same as [`sample_event`] with explicit coordinates, time offset, and magnitude.
#[must_use]
pub fn placed_event(
    source: SourceTag,
    id: &str,
    lat: f64,
    lon: f64,
    offset_secs: i64,
    mag: f64,
) -> NormalizedEvent {
    let mut event = sample_event(source, id);
    event.latitude = lat;
    event.longitude = lon;
    event.origin_time_utc = t0() + chrono::Duration::seconds(offset_secs);
    event.magnitude_value = mag;
    event
}
