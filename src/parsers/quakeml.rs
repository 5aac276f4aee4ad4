//! Parser for QuakeML 1.2 documents.
//!
//! Streaming reader over namespace-qualified XML. Resolution rules:
//! the preferred origin/magnitude referenced by the event win; absent a
//! `preferredMagnitudeID` the magnitude-type preference order
//! mw > mww > mb > ml > md > other decides, then station count, then
//! document order. Depth arrives in metres and is converted to km.

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{ParseOutcome, ParsedEvent, map_status};
use crate::errors::ParseError;
use crate::models::NormalizedEvent;
use crate::sources::SourceTag;

/// Kilometres per degree of latitude, for angular uncertainty conversion.
const KM_PER_DEGREE: f64 = 111.19;

#[derive(Debug, Default)]
struct RawEvent {
    public_id: Option<String>,
    preferred_origin_id: Option<String>,
    preferred_magnitude_id: Option<String>,
    description: Option<String>,
    creation_time: Option<String>,
    origins: Vec<RawOrigin>,
    magnitudes: Vec<RawMagnitude>,
    start_offset: usize,
}

#[derive(Debug, Default)]
struct RawOrigin {
    public_id: Option<String>,
    time: Option<String>,
    time_uncertainty: Option<String>,
    latitude: Option<String>,
    latitude_uncertainty: Option<String>,
    longitude: Option<String>,
    longitude_uncertainty: Option<String>,
    depth_m: Option<String>,
    depth_uncertainty_m: Option<String>,
    evaluation_mode: Option<String>,
    evaluation_status: Option<String>,
    used_phase_count: Option<String>,
    azimuthal_gap: Option<String>,
    author: Option<String>,
    creation_time: Option<String>,
}

#[derive(Debug, Default)]
struct RawMagnitude {
    public_id: Option<String>,
    value: Option<String>,
    uncertainty: Option<String>,
    mag_type: Option<String>,
    station_count: Option<String>,
}

/// Preference rank for magnitude types, 0 = most preferred.
fn magnitude_type_rank(mag_type: &str) -> u8 {
    match mag_type.to_ascii_lowercase().as_str() {
        "mw" => 0,
        "mww" => 1,
        "mb" => 2,
        "ml" => 3,
        "md" => 4,
        _ => 5,
    }
}

/// Reduce a QuakeML publicID URN to the bare agency event id.
fn strip_urn(public_id: &str) -> &str {
    if let Some((_, id)) = public_id.rsplit_once('=') {
        id
    } else if let Some((_, id)) = public_id.rsplit_once('/') {
        id
    } else {
        public_id
            .strip_prefix("smi:")
            .or_else(|| public_id.strip_prefix("quakeml:"))
            .unwrap_or(public_id)
    }
}

fn public_id_attr(start: &BytesStart<'_>) -> Option<String> {
    for attr in start.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"publicID" {
            if let Ok(value) = attr.unescape_value() {
                return Some(value.into_owned());
            }
        }
    }
    None
}

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

fn required<'a>(field: &'static str, value: Option<&'a String>) -> Result<&'a str, String> {
    value.map(String::as_str).ok_or_else(|| format!("missing {field}"))
}

impl RawEvent {
    fn preferred_origin(&self) -> Option<&RawOrigin> {
        if let Some(id) = &self.preferred_origin_id {
            if let Some(origin) = self
                .origins
                .iter()
                .find(|o| o.public_id.as_deref() == Some(id))
            {
                return Some(origin);
            }
        }
        self.origins.first()
    }

    fn preferred_magnitude(&self) -> Option<&RawMagnitude> {
        if let Some(id) = &self.preferred_magnitude_id {
            if let Some(magnitude) = self
                .magnitudes
                .iter()
                .find(|m| m.public_id.as_deref() == Some(id))
            {
                return Some(magnitude);
            }
        }
        // Some catalogs (notably ISC) publish no preferred id. Rank by the
        // magnitude-type preference order, then station count, then document
        // order.
        self.magnitudes.iter().enumerate().min_by_key(|(idx, m)| {
            let rank = m
                .mag_type
                .as_deref()
                .map_or(u8::MAX, magnitude_type_rank);
            let stations: i64 = m
                .station_count
                .as_deref()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(-1);
            (rank, std::cmp::Reverse(stations), *idx)
        })
        .map(|(_, m)| m)
    }

    fn convert(&self, source: SourceTag) -> Result<NormalizedEvent, String> {
        let public_id = required("event publicID", self.public_id.as_ref())?;
        let source_event_id = strip_urn(public_id).to_string();
        if source_event_id.is_empty() {
            return Err("empty event publicID".into());
        }

        let origin = self.preferred_origin().ok_or("event has no origin")?;
        let magnitude = self.preferred_magnitude().ok_or("event has no magnitude")?;

        let origin_time_utc = parse_time(required("origin time", origin.time.as_ref())?)?;
        let latitude = parse_f64("latitude", required("latitude", origin.latitude.as_ref())?)?;
        let longitude = parse_f64("longitude", required("longitude", origin.longitude.as_ref())?)?;
        // QuakeML depths are metres
        let depth_km = parse_f64("depth", required("depth", origin.depth_m.as_ref())?)? / 1000.0;

        let magnitude_value =
            parse_f64("magnitude", required("magnitude", magnitude.value.as_ref())?)?;
        let magnitude_type = magnitude
            .mag_type
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or("missing magnitude type")?;

        let lat_error_km = origin
            .latitude_uncertainty
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|deg| deg * KM_PER_DEGREE);
        let lon_error_km = origin
            .longitude_uncertainty
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|deg| deg * KM_PER_DEGREE);
        let depth_error_km = origin
            .depth_uncertainty_m
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|m| m / 1000.0);
        let mag_error = magnitude
            .uncertainty
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok());
        let time_error_sec = origin
            .time_uncertainty
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok());
        let num_phases = origin
            .used_phase_count
            .as_deref()
            .and_then(|v| v.trim().parse::<u32>().ok());
        let azimuthal_gap = origin
            .azimuthal_gap
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok());

        let updated_at = self
            .creation_time
            .as_deref()
            .or(origin.creation_time.as_deref())
            .and_then(|t| parse_time(t).ok());

        Ok(NormalizedEvent {
            source,
            source_event_id,
            origin_time_utc,
            latitude,
            longitude,
            depth_km,
            magnitude_value,
            magnitude_type,
            status: map_status(
                origin.evaluation_mode.as_deref(),
                origin.evaluation_status.as_deref(),
            ),
            place: self.description.clone(),
            region: None,
            lat_error_km,
            lon_error_km,
            depth_error_km,
            mag_error,
            time_error_sec,
            num_phases,
            azimuthal_gap,
            author: origin.author.clone(),
            url: None,
            updated_at,
        })
    }
}

/// Parse a QuakeML payload.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn parse(source: SourceTag, bytes: &[u8]) -> ParseOutcome {
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(e) => {
            return ParseOutcome::failed(ParseError::MalformedPayload {
                message: format!("payload is not UTF-8: {e}"),
            });
        }
    };

    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut outcome = ParseOutcome::default();
    let mut stack: Vec<String> = Vec::new();
    let mut event: Option<RawEvent> = None;
    let mut origin: Option<RawOrigin> = None;
    let mut magnitude: Option<RawMagnitude> = None;
    let mut last_pos = 0usize;

    loop {
        let next = reader.read_event();
        match next {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "event" if stack.last().is_some_and(|p| p == "eventParameters") => {
                        event = Some(RawEvent {
                            public_id: public_id_attr(&start),
                            start_offset: last_pos,
                            ..RawEvent::default()
                        });
                    }
                    "origin" if event.is_some() && stack.last().is_some_and(|p| p == "event") => {
                        origin = Some(RawOrigin {
                            public_id: public_id_attr(&start),
                            ..RawOrigin::default()
                        });
                    }
                    "magnitude" if event.is_some() && stack.last().is_some_and(|p| p == "event") => {
                        magnitude = Some(RawMagnitude {
                            public_id: public_id_attr(&start),
                            ..RawMagnitude::default()
                        });
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Text(t)) => {
                let value = match t.unescape() {
                    Ok(v) => v.into_owned(),
                    Err(_) => continue,
                };
                let leaf = stack.last().map(String::as_str).unwrap_or_default();
                let parent = stack
                    .len()
                    .checked_sub(2)
                    .and_then(|i| stack.get(i))
                    .map(String::as_str)
                    .unwrap_or_default();
                dispatch_text(
                    leaf,
                    parent,
                    value,
                    event.as_mut(),
                    origin.as_mut(),
                    magnitude.as_mut(),
                );
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                stack.pop();
                match name.as_str() {
                    "origin" => {
                        if let (Some(ev), Some(o)) = (event.as_mut(), origin.take()) {
                            ev.origins.push(o);
                        }
                    }
                    "magnitude" => {
                        if let (Some(ev), Some(m)) = (event.as_mut(), magnitude.take()) {
                            ev.magnitudes.push(m);
                        }
                    }
                    "event" => {
                        if let Some(ev) = event.take() {
                            let end_pos = reader.buffer_position();
                            let raw = text
                                .get(ev.start_offset..end_pos)
                                .unwrap_or_default()
                                .as_bytes()
                                .to_vec();
                            match ev.convert(source) {
                                Ok(normalized) => outcome.events.push(ParsedEvent {
                                    event: normalized,
                                    raw,
                                }),
                                Err(message) => {
                                    outcome.errors.push(ParseError::MalformedEvent {
                                        source_event_id: ev
                                            .public_id
                                            .as_deref()
                                            .map(|id| strip_urn(id).to_string()),
                                        message,
                                        raw,
                                    });
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return ParseOutcome::failed(ParseError::MalformedPayload {
                    message: e.to_string(),
                });
            }
        }
        last_pos = reader.buffer_position();
    }

    if outcome.events.is_empty() && outcome.errors.is_empty() && !text.contains("eventParameters") {
        return ParseOutcome::failed(ParseError::MalformedPayload {
            message: "no eventParameters element found".into(),
        });
    }

    outcome
}

fn push_text(slot: &mut Option<String>, value: String) {
    match slot {
        Some(existing) => existing.push_str(&value),
        None => *slot = Some(value),
    }
}

fn dispatch_text(
    leaf: &str,
    parent: &str,
    value: String,
    event: Option<&mut RawEvent>,
    origin: Option<&mut RawOrigin>,
    magnitude: Option<&mut RawMagnitude>,
) {
    if let Some(m) = magnitude {
        match (parent, leaf) {
            ("mag", "value") => push_text(&mut m.value, value),
            ("mag", "uncertainty") => push_text(&mut m.uncertainty, value),
            ("magnitude", "type") => push_text(&mut m.mag_type, value),
            ("magnitude", "stationCount") => push_text(&mut m.station_count, value),
            _ => {}
        }
        return;
    }

    if let Some(o) = origin {
        match (parent, leaf) {
            ("time", "value") => push_text(&mut o.time, value),
            ("time", "uncertainty") => push_text(&mut o.time_uncertainty, value),
            ("latitude", "value") => push_text(&mut o.latitude, value),
            ("latitude", "uncertainty") => push_text(&mut o.latitude_uncertainty, value),
            ("longitude", "value") => push_text(&mut o.longitude, value),
            ("longitude", "uncertainty") => push_text(&mut o.longitude_uncertainty, value),
            ("depth", "value") => push_text(&mut o.depth_m, value),
            ("depth", "uncertainty") => push_text(&mut o.depth_uncertainty_m, value),
            ("origin", "evaluationMode") => push_text(&mut o.evaluation_mode, value),
            ("origin", "evaluationStatus") => push_text(&mut o.evaluation_status, value),
            ("quality", "usedPhaseCount") => push_text(&mut o.used_phase_count, value),
            ("quality", "azimuthalGap") => push_text(&mut o.azimuthal_gap, value),
            ("creationInfo", "author") => push_text(&mut o.author, value),
            ("creationInfo", "creationTime") => push_text(&mut o.creation_time, value),
            _ => {}
        }
        return;
    }

    if let Some(ev) = event {
        match (parent, leaf) {
            ("event", "preferredOriginID") => push_text(&mut ev.preferred_origin_id, value),
            ("event", "preferredMagnitudeID") => push_text(&mut ev.preferred_magnitude_id, value),
            ("description", "text") => push_text(&mut ev.description, value),
            ("creationInfo", "creationTime") => push_text(&mut ev.creation_time, value),
            _ => {}
        }
    }
}
