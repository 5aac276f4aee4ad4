//! Store contract and the in-memory reference adapter.
//!
//! The core never talks to a broker or database directly; everything goes
//! through [`PipelineStore`]. Production adapters live outside this crate.
//! [`MemoryStore`] backs the bundled binary and the test suite.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    CrosswalkRow, DeadLetterEntry, NormalizedEvent, PipelineRun, RawEventRow, UnifiedEvent,
};

/// Operations the pipeline needs from an external store.
///
/// Upserts are replace-on-conflict: unified events by `unified_event_id`,
/// crosswalk rows by `(event_uid, unified_event_id)`. Reads and writes must
/// be safe under concurrent pollers.
pub trait PipelineStore: Send + Sync {
    /// Append one row to the raw event log.
    fn append_raw(
        &self,
        row: RawEventRow,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Append one dead-letter entry.
    fn append_dead_letter(
        &self,
        entry: DeadLetterEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replace-on-conflict write of unified events.
    fn upsert_unified(
        &self,
        events: &[UnifiedEvent],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replace-on-conflict write of crosswalk rows.
    fn upsert_crosswalk(
        &self,
        rows: &[CrosswalkRow],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Append one pipeline-run telemetry row.
    fn append_run(
        &self,
        run: PipelineRun,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read canonical events with origin time at or after `since`.
    fn read_window(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<NormalizedEvent>, StoreError>> + Send;

    /// Read crosswalk rows for any of the given uids.
    fn read_existing_crosswalk(
        &self,
        event_uids: &[String],
    ) -> impl Future<Output = Result<Vec<CrosswalkRow>, StoreError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryInner {
    raw_log: Vec<RawEventRow>,
    dead_letters: Vec<DeadLetterEntry>,
    unified: BTreeMap<Uuid, UnifiedEvent>,
    crosswalk: BTreeMap<(String, Uuid), CrosswalkRow>,
    runs: Vec<PipelineRun>,
}

/// In-memory adapter used by the binary and the tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail, to exercise the abort path.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn unified_events(&self) -> Vec<UnifiedEvent> {
        self.inner.lock().await.unified.values().cloned().collect()
    }

    pub async fn crosswalk_rows(&self) -> Vec<CrosswalkRow> {
        self.inner.lock().await.crosswalk.values().cloned().collect()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.inner.lock().await.dead_letters.clone()
    }

    pub async fn runs(&self) -> Vec<PipelineRun> {
        self.inner.lock().await.runs.clone()
    }

    pub async fn raw_count(&self) -> usize {
        self.inner.lock().await.raw_log.len()
    }
}

impl PipelineStore for MemoryStore {
    async fn append_raw(&self, row: RawEventRow) -> Result<(), StoreError> {
        self.inner.lock().await.raw_log.push(row);
        Ok(())
    }

    async fn append_dead_letter(&self, entry: DeadLetterEntry) -> Result<(), StoreError> {
        self.inner.lock().await.dead_letters.push(entry);
        Ok(())
    }

    async fn upsert_unified(&self, events: &[UnifiedEvent]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for event in events {
            inner.unified.insert(event.unified_event_id, event.clone());
        }
        Ok(())
    }

    async fn upsert_crosswalk(&self, rows: &[CrosswalkRow]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for row in rows {
            inner
                .crosswalk
                .insert((row.event_uid.clone(), row.unified_event_id), row.clone());
        }
        Ok(())
    }

    async fn append_run(&self, run: PipelineRun) -> Result<(), StoreError> {
        self.inner.lock().await.runs.push(run);
        Ok(())
    }

    async fn read_window(&self, since: DateTime<Utc>) -> Result<Vec<NormalizedEvent>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::new("read_window", "simulated read failure"));
        }
        let inner = self.inner.lock().await;
        Ok(inner
            .raw_log
            .iter()
            .filter(|row| row.event.origin_time_utc >= since)
            .map(|row| row.event.clone())
            .collect())
    }

    async fn read_existing_crosswalk(
        &self,
        event_uids: &[String],
    ) -> Result<Vec<CrosswalkRow>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::new(
                "read_existing_crosswalk",
                "simulated read failure",
            ));
        }
        let inner = self.inner.lock().await;
        Ok(inner
            .crosswalk
            .values()
            .filter(|row| event_uids.contains(&row.event_uid))
            .cloned()
            .collect())
    }
}
