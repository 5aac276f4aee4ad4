//! Output formatters for unified events.
//!
//! The batch binary emits fused events for terminals and pipes: a colored
//! human layout, a JSON array, or newline-delimited JSON.

use std::io::{self, Write};

use crate::models::UnifiedEvent;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Colored single-line-per-event terminal layout (default)
    #[default]
    Human,
    /// One pretty-printed JSON array
    Json,
    /// One JSON object per line, for piping
    Ndjson,
}

impl Format {
    /// Canonical names, in the order shown to the user.
    pub const NAMES: [&'static str; 3] = ["human", "json", "ndjson"];
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            other => Err(format!(
                "'{other}' is not an output format; choose one of {}",
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// Magnitude severity band, mapped to a terminal color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Great,
    Major,
    Strong,
    Moderate,
    Minor,
}

impl Severity {
    fn of(magnitude: f64) -> Self {
        if magnitude >= 7.5 {
            Self::Great
        } else if magnitude >= 6.5 {
            Self::Major
        } else if magnitude >= 5.0 {
            Self::Strong
        } else if magnitude >= 3.5 {
            Self::Moderate
        } else {
            Self::Minor
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Great => "\x1b[95m",    // magenta
            Self::Major => "\x1b[91m",    // red
            Self::Strong => "\x1b[93m",   // yellow
            Self::Moderate => "\x1b[96m", // cyan
            Self::Minor => "\x1b[92m",    // green
        }
    }
}

/// Write unified events in human-readable format.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_human<W: Write>(writer: &mut W, events: &[UnifiedEvent]) -> io::Result<()> {
    for event in events {
        let time = event.origin_time_utc.format("%Y-%m-%d %H:%M:%S");
        let place = event.place.as_deref().unwrap_or("Unknown location");
        let color = Severity::of(event.magnitude_value).color();
        writeln!(
            writer,
            "{color}{BOLD}M{:.1}{RESET} {DIM}{}{RESET} │ \
             {time} UTC │ \
             {DIM}{:>5.0}km{RESET} │ \
             {place} │ \
             {DIM}{} source(s), spread {:.1}km{RESET}",
            event.magnitude_value,
            event.magnitude_type,
            event.depth_km,
            event.num_sources,
            event.location_spread_km,
        )?;
    }
    Ok(())
}

/// Write unified events as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<W: Write>(writer: &mut W, events: &[UnifiedEvent]) -> io::Result<()> {
    let json = serde_json::to_string_pretty(events)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// Write unified events as newline-delimited JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_ndjson<W: Write>(writer: &mut W, events: &[UnifiedEvent]) -> io::Result<()> {
    for event in events {
        let json = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{json}")?;
    }
    Ok(())
}

/// Write unified events in the specified format.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_events<W: Write>(
    writer: &mut W,
    events: &[UnifiedEvent],
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Human => write_human(writer, events),
        Format::Json => write_json(writer, events),
        Format::Ndjson => write_ndjson(writer, events),
    }
}
