//! Error types for seismofuse.
//!
//! Uses `thiserror` for library-style error definitions. Each stage of the
//! pipeline has its own error enum; `PipelineError` is the umbrella surfaced
//! to run records and the operator.

use thiserror::Error;

use crate::sources::SourceTag;

/// Errors from the transport client.
///
/// Retryable variants are retried by the transport per policy; the rest
/// surface immediately.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Total deadline expired before a response arrived
    #[error("fetch from {agency} timed out after {deadline_ms}ms")]
    Timeout { agency: SourceTag, deadline_ms: u64 },

    /// Connection, DNS, or protocol failure
    #[error("network error fetching {agency}: {message}")]
    Network { agency: SourceTag, message: String },

    /// Client error other than 429; not retried
    #[error("{agency} returned HTTP {status}")]
    Http4xx { agency: SourceTag, status: u16 },

    /// Server error; retried
    #[error("{agency} returned HTTP {status}")]
    Http5xx { agency: SourceTag, status: u16 },

    /// HTTP 429; retried after backoff
    #[error("{agency} rate limited the request")]
    RateLimited { agency: SourceTag },
}

impl FetchError {
    /// Whether the retry loop should make another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Http5xx { .. } | Self::RateLimited { .. }
        )
    }

    /// Short kind label for log records and run telemetry.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::Http4xx { .. } => "http_4xx",
            Self::Http5xx { .. } => "http_5xx",
            Self::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Errors from the wire-format parsers.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    /// The whole payload is unusable (invalid JSON/XML, wrong envelope)
    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },

    /// One event within an otherwise usable payload failed
    #[error("malformed event {}: {message}", source_event_id.as_deref().unwrap_or("<unknown>"))]
    MalformedEvent {
        source_event_id: Option<String>,
        message: String,
        /// Offending sub-document, preserved for the dead-letter sink
        raw: Vec<u8>,
    },

    /// The registry advertised a format this build does not parse
    #[error("unsupported wire format: {format}")]
    UnsupportedFormat { format: String },
}

impl ParseError {
    /// Whether this error poisons the whole payload rather than one event.
    #[must_use]
    pub fn is_whole_payload(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload { .. } | Self::UnsupportedFormat { .. }
        )
    }
}

/// Errors from canonical-record validation. Always dead-lettered.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("{field} {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("implausible origin time: {message}")]
    BadTimestamp { message: String },
}

/// Corruption detected while reconciling against the external store.
///
/// Indicates a bug or store damage; fails the clustering run loudly.
#[derive(Error, Debug, Clone)]
pub enum IntegrityError {
    #[error("event uid {event_uid} appears under conflicting unified ids")]
    DuplicateUidConflict { event_uid: String },

    #[error("crosswalk row references unknown event uid {event_uid}")]
    CrosswalkOrphan { event_uid: String },
}

/// Configuration problems. Fatal at startup only.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures from an injected sink or store adapter.
#[derive(Error, Debug, Clone)]
#[error("store error during {operation}: {message}")]
pub struct StoreError {
    pub operation: &'static str,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Umbrella error recorded on pipeline-run rows.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let retry = [
            FetchError::Network {
                agency: SourceTag::Usgs,
                message: "connection reset".into(),
            },
            FetchError::Http5xx {
                agency: SourceTag::Emsc,
                status: 503,
            },
            FetchError::RateLimited {
                agency: SourceTag::Isc,
            },
        ];
        for e in retry {
            assert!(e.is_retryable(), "{} should be retryable", e.kind());
        }

        let no_retry = [
            FetchError::Timeout {
                agency: SourceTag::Usgs,
                deadline_ms: 10_000,
            },
            FetchError::Http4xx {
                agency: SourceTag::Gfz,
                status: 404,
            },
        ];
        for e in no_retry {
            assert!(!e.is_retryable(), "{} should not be retryable", e.kind());
        }
    }

    #[test]
    fn test_whole_payload_classification() {
        let whole = ParseError::MalformedPayload {
            message: "not json".into(),
        };
        assert!(whole.is_whole_payload());

        let per_event = ParseError::MalformedEvent {
            source_event_id: Some("us1".into()),
            message: "missing magnitude".into(),
            raw: b"{}".to_vec(),
        };
        assert!(!per_event.is_whole_payload());
    }
}
