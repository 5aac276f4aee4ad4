//! Pipeline orchestration.
//!
//! Two entry points over the same core: `run_batch` polls every enabled
//! source in parallel, clusters once, and exits; `run_worker` keeps
//! per-source tasks and a clustering task running until shutdown. All
//! writes for a clustering pass happen only after the pass fully computes,
//! so a failed pass leaves the previous unified state intact.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cluster;
use crate::config::Config;
use crate::errors::{IntegrityError, PipelineError};
use crate::models::{NormalizedEvent, PipelineRun, RunStatus};
use crate::poller::{Poller, SourceCounters};
use crate::sources::SourceTag;
use crate::store::PipelineStore;
use crate::transport::FeedFetcher;
use crate::unify::{self, UnifyInput};

/// Counters from one clustering pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassStats {
    pub window_events: usize,
    pub clusters: usize,
    pub unified_events: usize,
}

/// The assembled pipeline. Cheap to clone; all state is shared.
pub struct Pipeline<S, F> {
    poller: Arc<Poller<S, F>>,
    store: Arc<S>,
    config: Config,
}

impl<S, F> Clone for Pipeline<S, F> {
    fn clone(&self) -> Self {
        Self {
            poller: Arc::clone(&self.poller),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S, F> Pipeline<S, F>
where
    S: PipelineStore + 'static,
    F: FeedFetcher + 'static,
{
    #[must_use]
    pub fn new(fetcher: Arc<F>, store: Arc<S>, config: Config) -> Self {
        let poller = Arc::new(Poller::new(fetcher, Arc::clone(&store)));
        Self {
            poller,
            store,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// One clustering pass: read the window, cluster, unify, write.
    ///
    /// Store reads happen before any write; a read failure or integrity
    /// violation aborts with nothing written.
    ///
    /// # Errors
    ///
    /// Returns store and integrity errors; the caller records them on the
    /// run row.
    pub async fn clustering_pass(&self, now: DateTime<Utc>) -> Result<PassStats, PipelineError> {
        // Generous read bound; the precise window slides from the maximum
        // observed origin time inside select_window.
        let since = now - self.config.window_width() * 2;
        let events: Vec<NormalizedEvent> = self.store.read_window(since).await?;
        let window = cluster::select_window(events, self.config.window_width());

        let clusters = cluster::cluster_window(
            &window,
            &self.config.cluster,
            &self.config.matching,
            self.config.scoring.weights,
        );

        let uids: Vec<String> = window.iter().map(NormalizedEvent::event_uid).collect();
        let existing = self.store.read_existing_crosswalk(&uids).await?;

        // Rows for uids we never asked about indicate adapter corruption
        let uid_set: std::collections::HashSet<&str> = uids.iter().map(String::as_str).collect();
        if let Some(orphan) = existing
            .iter()
            .find(|row| !uid_set.contains(row.event_uid.as_str()))
        {
            return Err(IntegrityError::CrosswalkOrphan {
                event_uid: orphan.event_uid.clone(),
            }
            .into());
        }

        let outcome = unify::unify(&UnifyInput {
            clusters: &clusters,
            existing: &existing,
            weights: self.config.scoring.weights,
            now,
        })?;

        let stats = PassStats {
            window_events: window.len(),
            clusters: clusters.len(),
            unified_events: outcome.unified.len(),
        };

        self.store.upsert_unified(&outcome.unified).await?;
        self.store.upsert_crosswalk(&outcome.crosswalk).await?;

        info!(
            window = stats.window_events,
            clusters = stats.clusters,
            unified = stats.unified_events,
            "clustering pass complete"
        );
        Ok(stats)
    }

    /// Batch mode: poll all enabled sources in parallel, cluster once, exit.
    ///
    /// A failing source does not block the others; the run is `failed` only
    /// when no source delivered or the clustering pass aborted.
    ///
    /// # Errors
    ///
    /// Returns an error only when even the telemetry row cannot be written.
    pub async fn run_batch(&self) -> Result<PipelineRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let enabled = self.config.sources.enabled.clone();
        info!(%run_id, sources = enabled.len(), "batch run started");

        let mut tasks: JoinSet<(SourceTag, Result<SourceCounters, PipelineError>)> =
            JoinSet::new();
        for tag in enabled.clone() {
            let poller = Arc::clone(&self.poller);
            tasks.spawn(async move { (tag, poller.poll_source(tag).await) });
        }

        let mut sources_fetched: Vec<SourceTag> = Vec::new();
        let mut raw_events_count = 0u64;
        let mut dead_letter_count = 0u64;
        let mut source_errors: Vec<String> = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((tag, Ok(counters))) => {
                    sources_fetched.push(tag);
                    raw_events_count += counters.raw_events;
                    dead_letter_count += counters.dead_letters;
                }
                Ok((tag, Err(e))) => {
                    warn!(agency = %tag, error = %e, "source poll failed");
                    source_errors.push(format!("{tag}: {e}"));
                }
                Err(e) => {
                    error!(error = %e, "poll task panicked");
                    source_errors.push(format!("task join: {e}"));
                }
            }
        }
        sources_fetched.sort();

        let all_sources_failed = sources_fetched.is_empty() && !enabled.is_empty();
        let cluster_result = if all_sources_failed {
            None
        } else {
            Some(self.clustering_pass(Utc::now()).await)
        };

        let finished_at = Utc::now();
        let (status, unified_events_count, error_message) = match cluster_result {
            None => (RunStatus::Failed, 0, Some(source_errors.join("; "))),
            Some(Ok(stats)) => {
                let message = if source_errors.is_empty() {
                    None
                } else {
                    Some(source_errors.join("; "))
                };
                (RunStatus::Ok, stats.unified_events as u64, message)
            }
            Some(Err(e)) => {
                error!(error = %e, "clustering pass failed, unified state untouched");
                source_errors.push(e.to_string());
                (RunStatus::Failed, 0, Some(source_errors.join("; ")))
            }
        };

        let run = PipelineRun {
            run_id,
            started_at,
            finished_at,
            status,
            sources_fetched,
            raw_events_count,
            unified_events_count,
            dead_letter_count,
            error_message,
            duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        };
        self.store.append_run(run.clone()).await?;
        info!(%run_id, status = ?run.status, "batch run recorded");
        Ok(run)
    }

    /// Write the telemetry row for one worker clustering cycle.
    async fn record_pass(
        &self,
        started_at: DateTime<Utc>,
        result: &Result<PassStats, PipelineError>,
    ) -> Result<(), PipelineError> {
        let finished_at = Utc::now();
        let (status, unified_events_count, error_message) = match result {
            Ok(stats) => (RunStatus::Ok, stats.unified_events as u64, None),
            Err(e) => (RunStatus::Failed, 0, Some(e.to_string())),
        };
        self.store
            .append_run(PipelineRun {
                run_id: Uuid::new_v4(),
                started_at,
                finished_at,
                status,
                sources_fetched: Vec::new(),
                raw_events_count: 0,
                unified_events_count,
                dead_letter_count: 0,
                error_message,
                duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
            })
            .await?;
        Ok(())
    }

    /// Worker mode: independent per-source poll loops plus a clustering
    /// loop, all stopping promptly on shutdown.
    pub async fn run_worker(&self, shutdown: &broadcast::Sender<()>) {
        let mut tasks: JoinSet<()> = JoinSet::new();

        for tag in self.config.sources.enabled.clone() {
            let pipeline = self.clone();
            let mut stop = shutdown.subscribe();
            tasks.spawn(async move {
                let interval = pipeline.config.poll_interval_for(tag);
                loop {
                    tokio::select! {
                        biased;
                        _ = stop.recv() => break,
                        result = pipeline.poller.poll_source(tag) => {
                            if let Err(e) = result {
                                warn!(agency = %tag, error = %e, "poll failed, will retry next cycle");
                            }
                        }
                    }
                    tokio::select! {
                        biased;
                        _ = stop.recv() => break,
                        () = tokio::time::sleep(interval) => {}
                    }
                }
                info!(agency = %tag, "poller stopped");
            });
        }

        {
            let pipeline = self.clone();
            let mut stop = shutdown.subscribe();
            tasks.spawn(async move {
                let cadence =
                    std::time::Duration::from_secs(pipeline.config.worker.cluster_interval_secs);
                loop {
                    tokio::select! {
                        biased;
                        _ = stop.recv() => break,
                        () = tokio::time::sleep(cadence) => {}
                    }
                    let started_at = Utc::now();
                    let result = pipeline.clustering_pass(started_at).await;
                    if let Err(e) = pipeline.record_pass(started_at, &result).await {
                        error!(error = %e, "failed to record clustering run");
                    }
                    match result {
                        Ok(stats) => {
                            info!(unified = stats.unified_events, "worker clustering pass");
                        }
                        Err(e) => {
                            // Previous unified state stays intact
                            error!(error = %e, "worker clustering pass failed");
                        }
                    }
                }
                info!("clustering loop stopped");
            });
        }

        while tasks.join_next().await.is_some() {}
    }
}
