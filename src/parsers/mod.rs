//! Wire-format parsers.
//!
//! One parser per format, each pure and deterministic: bytes in, canonical
//! events plus per-event errors out. Dispatch is a closed table keyed by
//! [`WireFormat`].

pub mod fdsn_text;
pub mod geojson_emsc;
pub mod geojson_usgs;
pub mod quakeml;

use crate::errors::ParseError;
use crate::models::NormalizedEvent;
use crate::sources::{SourceTag, WireFormat};

/// One canonical record with the sub-document it came from.
///
/// The raw bytes feed the append-only provenance log.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub event: NormalizedEvent,
    pub raw: Vec<u8>,
}

/// Result of parsing one payload.
///
/// A payload with K events may yield M ≤ K canonical records and K − M
/// per-event errors. A whole-payload failure yields zero events and a
/// single error.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub events: Vec<ParsedEvent>,
    pub errors: Vec<ParseError>,
}

impl ParseOutcome {
    /// Single whole-payload failure.
    #[must_use]
    pub fn failed(error: ParseError) -> Self {
        Self {
            events: Vec::new(),
            errors: vec![error],
        }
    }
}

/// Parse a payload in the given wire format, attributing events to `source`.
#[must_use]
pub fn parse(format: WireFormat, source: SourceTag, bytes: &[u8]) -> ParseOutcome {
    match format {
        WireFormat::GeojsonUsgs => geojson_usgs::parse(source, bytes),
        WireFormat::GeojsonEmsc => geojson_emsc::parse(source, bytes),
        WireFormat::FdsnText => fdsn_text::parse(source, bytes),
        WireFormat::Quakeml => quakeml::parse(source, bytes),
    }
}

/// Map an agency's review vocabulary onto the canonical status set.
pub(crate) fn map_status(mode: Option<&str>, status: Option<&str>) -> crate::models::ReviewStatus {
    use crate::models::ReviewStatus;

    if let Some(s) = status {
        if matches!(
            s.to_ascii_lowercase().as_str(),
            "reviewed" | "confirmed" | "final"
        ) {
            return ReviewStatus::Reviewed;
        }
    }
    match mode.map(str::to_ascii_lowercase).as_deref() {
        Some("manual") => ReviewStatus::Manual,
        Some("reviewed") => ReviewStatus::Reviewed,
        _ => ReviewStatus::Automatic,
    }
}
