//! Canonical data model for the fusion pipeline.
//!
//! Parsers emit [`NormalizedEvent`]s; clustering and unification produce
//! [`UnifiedEvent`]s and [`CrosswalkRow`]s. Everything here is plain data
//! with serde derives; behavior lives in the stage modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sources::SourceTag;

/// Review state of a source report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Automatic,
    Reviewed,
    Manual,
}

impl ReviewStatus {
    /// Reviewed reports outrank automatic ones during representative election.
    #[must_use]
    pub const fn is_reviewed(self) -> bool {
        matches!(self, Self::Reviewed)
    }
}

/// One source report in the canonical schema.
///
/// Produced by a parser, then validated. Re-ingestion of the same
/// `event_uid` replaces the record only when the source `updated_at`
/// is newer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub source: SourceTag,
    pub source_event_id: String,
    /// UTC origin time, millisecond precision
    pub origin_time_utc: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude_value: f64,
    pub magnitude_type: String,
    pub status: ReviewStatus,

    pub place: Option<String>,
    pub region: Option<String>,
    pub lat_error_km: Option<f64>,
    pub lon_error_km: Option<f64>,
    pub depth_error_km: Option<f64>,
    pub mag_error: Option<f64>,
    pub time_error_sec: Option<f64>,
    pub num_phases: Option<u32>,
    pub azimuthal_gap: Option<f64>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl NormalizedEvent {
    /// Globally unique identity: `"{source}:{source_event_id}"`.
    #[must_use]
    pub fn event_uid(&self) -> String {
        format!("{}:{}", self.source.as_str(), self.source_event_id)
    }

    /// Merge a re-ingested report for the same uid.
    ///
    /// The incoming record wins only if its `updated_at` is strictly newer;
    /// records without `updated_at` never displace an existing one.
    pub fn merge_newer(&mut self, incoming: Self) {
        let newer = match (self.updated_at, incoming.updated_at) {
            (Some(old), Some(new)) => new > old,
            (None, Some(_)) => true,
            _ => false,
        };
        if newer {
            *self = incoming;
        }
    }
}

/// Raw-log row: canonical fields plus the immutable provenance envelope
/// (fetch stamp and original payload). Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventRow {
    pub event_uid: String,
    #[serde(flatten)]
    pub event: NormalizedEvent,
    pub fetched_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub raw_payload: String,
}

impl RawEventRow {
    #[must_use]
    pub fn new(
        event: NormalizedEvent,
        fetched_at: DateTime<Utc>,
        ingested_at: DateTime<Utc>,
        raw_payload: String,
    ) -> Self {
        Self {
            event_uid: event.event_uid(),
            event,
            fetched_at,
            ingested_at,
            raw_payload,
        }
    }
}

/// Best-estimate record for one physical earthquake, fused from 1..N reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedEvent {
    pub unified_event_id: Uuid,
    pub origin_time_utc: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude_value: f64,
    pub magnitude_type: String,
    pub place: Option<String>,
    pub region: String,
    pub status: ReviewStatus,

    pub num_sources: u32,
    pub preferred_source: SourceTag,
    pub preferred_event_uid: String,
    /// Sorted distinct member uids
    pub source_event_uids: Vec<String>,

    /// Population standard deviation of member magnitudes; 0 for singletons
    pub magnitude_std: f64,
    /// Maximum pairwise great-circle distance between members; 0 for singletons
    pub location_spread_km: f64,
    /// Distinct sources divided by cluster size, in [0, 1]
    pub source_agreement_score: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Join row mapping a source report to its unified event.
///
/// Primary key is `(event_uid, unified_event_id)`; exactly one row per
/// unified id carries `is_preferred = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosswalkRow {
    pub event_uid: String,
    pub unified_event_id: Uuid,
    pub match_score: f64,
    pub is_preferred: bool,
    pub created_at: DateTime<Utc>,
}

/// A record the pipeline could not convert or validate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub source: SourceTag,
    pub source_event_id: Option<String>,
    pub raw_payload: String,
    pub error_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Failed,
}

/// Telemetry row for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub sources_fetched: Vec<SourceTag>,
    pub raw_events_count: u64,
    pub unified_events_count: u64,
    pub dead_letter_count: u64,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
}
