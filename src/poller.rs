//! Per-source ingestion: fetch, parse, validate, emit.
//!
//! One poll of one source runs the whole local path. A failing source never
//! blocks the others; its error is reported upward and lands on the run
//! record.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{ParseError, PipelineError};
use crate::models::{DeadLetterEntry, RawEventRow};
use crate::parsers;
use crate::sources::{self, SourceTag};
use crate::store::PipelineStore;
use crate::transport::FeedFetcher;
use crate::validate;

/// Counters from one successful poll of one source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceCounters {
    pub raw_events: u64,
    pub dead_letters: u64,
}

/// Drives fetch → parse → validate → emit for each configured source.
pub struct Poller<S, F> {
    fetcher: Arc<F>,
    store: Arc<S>,
}

impl<S: PipelineStore, F: FeedFetcher> Poller<S, F> {
    #[must_use]
    pub fn new(fetcher: Arc<F>, store: Arc<S>) -> Self {
        Self { fetcher, store }
    }

    /// Poll one source once.
    ///
    /// Partial success (some events validated, some dead-lettered) is
    /// success with counters. A fetch failure or whole-payload parse
    /// failure is an end-to-end failure for this source.
    ///
    /// # Errors
    ///
    /// Returns the terminal fetch, parse, or store error.
    pub async fn poll_source(&self, tag: SourceTag) -> Result<SourceCounters, PipelineError> {
        let fetched_at = Utc::now();
        let bytes = self.fetcher.fetch(tag, None).await?;
        debug!(agency = %tag, bytes = bytes.len(), "payload fetched");
        self.ingest_payload(tag, &bytes, fetched_at).await
    }

    /// Parse, validate, and emit one already-fetched payload.
    ///
    /// # Errors
    ///
    /// Returns a whole-payload parse error or a store write error.
    pub async fn ingest_payload(
        &self,
        tag: SourceTag,
        bytes: &[u8],
        fetched_at: chrono::DateTime<Utc>,
    ) -> Result<SourceCounters, PipelineError> {
        let spec = sources::spec_for(tag);
        let outcome = parsers::parse(spec.format, tag, bytes);
        if let Some(error) = outcome.errors.iter().find(|e| e.is_whole_payload()) {
            return Err(error.clone().into());
        }

        let ingested_at = Utc::now();
        let mut counters = SourceCounters::default();

        for error in &outcome.errors {
            let ParseError::MalformedEvent {
                source_event_id,
                message,
                raw,
            } = error
            else {
                continue;
            };
            self.store
                .append_dead_letter(DeadLetterEntry {
                    source: tag,
                    source_event_id: source_event_id.clone(),
                    raw_payload: String::from_utf8_lossy(raw).into_owned(),
                    error_messages: vec![message.clone()],
                    created_at: ingested_at,
                })
                .await?;
            counters.dead_letters += 1;
        }

        for parsed in outcome.events {
            match validate::validate(&parsed.event, ingested_at) {
                Ok(()) => {
                    let raw_payload = String::from_utf8_lossy(&parsed.raw).into_owned();
                    self.store
                        .append_raw(RawEventRow::new(
                            parsed.event,
                            fetched_at,
                            ingested_at,
                            raw_payload,
                        ))
                        .await?;
                    counters.raw_events += 1;
                }
                Err(errors) => {
                    warn!(
                        agency = %tag,
                        event_uid = %parsed.event.event_uid(),
                        violations = errors.len(),
                        "record failed validation"
                    );
                    let raw_payload = String::from_utf8_lossy(&parsed.raw).into_owned();
                    self.store
                        .append_dead_letter(validate::to_dead_letter(
                            &parsed.event,
                            &errors,
                            raw_payload,
                            ingested_at,
                        ))
                        .await?;
                    counters.dead_letters += 1;
                }
            }
        }

        info!(
            agency = %tag,
            raw = counters.raw_events,
            dead_lettered = counters.dead_letters,
            "poll complete"
        );
        Ok(counters)
    }
}
