//! Density-based spatial-temporal clustering.
//!
//! Three passes over a sliding window: single-linkage spatial components on
//! great-circle distance, time/magnitude sub-partitioning against running
//! medians, and a centroid consistency filter that ejects poor matches into
//! singletons. Pure computation, no I/O, deterministic for a given input.

use tracing::warn;

use crate::config::{ClusterConfig, MatchConfig};
use crate::models::NormalizedEvent;
use crate::scoring::{MatchWeights, ScorePoint, haversine_km, score};

/// Input ceiling for the naive pairwise pass. Larger windows are clamped to
/// the most recent events so a pass stays within its time budget.
pub const MAX_WINDOW_EVENTS: usize = 5_000;

/// One final cluster: the members fused into a single unified event.
pub type Cluster = Vec<NormalizedEvent>;

/// Select the clustering window: events within `width` of the maximum
/// observed origin time, deduplicated by uid keeping the newest revision.
///
/// Sliding by observed time rather than wall clock keeps replays
/// deterministic.
#[must_use]
pub fn select_window(events: Vec<NormalizedEvent>, width: chrono::Duration) -> Vec<NormalizedEvent> {
    let Some(max_time) = events.iter().map(|e| e.origin_time_utc).max() else {
        return Vec::new();
    };
    let cutoff = max_time - width;

    let mut by_uid: std::collections::BTreeMap<String, NormalizedEvent> =
        std::collections::BTreeMap::new();
    for event in events {
        if event.origin_time_utc < cutoff {
            continue;
        }
        match by_uid.entry(event.event_uid()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(event);
            }
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                slot.get_mut().merge_newer(event);
            }
        }
    }

    let mut window: Vec<NormalizedEvent> = by_uid.into_values().collect();
    if window.len() > MAX_WINDOW_EVENTS {
        let dropped = window.len() - MAX_WINDOW_EVENTS;
        window.sort_by(|a, b| {
            b.origin_time_utc
                .cmp(&a.origin_time_utc)
                .then_with(|| a.event_uid().cmp(&b.event_uid()))
        });
        window.truncate(MAX_WINDOW_EVENTS);
        warn!(dropped, kept = MAX_WINDOW_EVENTS, "clustering window clamped");
    }

    // Canonical processing order: time, then uid
    window.sort_by(|a, b| {
        a.origin_time_utc
            .cmp(&b.origin_time_utc)
            .then_with(|| a.event_uid().cmp(&b.event_uid()))
    });
    window
}

/// Disjoint-set forest over event indices.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cursor = i;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Lower index wins so component ids are stable
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Running medians of a sub-cluster under construction.
#[derive(Default)]
struct RunningMedian {
    times_ms: Vec<f64>,
    magnitudes: Vec<f64>,
}

impl RunningMedian {
    fn push(&mut self, event: &NormalizedEvent) {
        let t = event.origin_time_utc.timestamp_millis() as f64;
        let pos = self.times_ms.partition_point(|x| *x < t);
        self.times_ms.insert(pos, t);
        let m = event.magnitude_value;
        let pos = self.magnitudes.partition_point(|x| *x < m);
        self.magnitudes.insert(pos, m);
    }

    fn accepts(&self, event: &NormalizedEvent, config: &ClusterConfig) -> bool {
        if self.times_ms.is_empty() {
            return true;
        }
        let dt_ms = (event.origin_time_utc.timestamp_millis() as f64 - median(&self.times_ms)).abs();
        let dmag = (event.magnitude_value - median(&self.magnitudes)).abs();
        dt_ms <= config.dt_s * 1000.0 && dmag <= config.dmag
    }
}

/// Split one spatial component into time/magnitude-coherent sub-clusters.
///
/// Members arrive sorted by origin time; a new sub-cluster starts whenever
/// the next event violates either bound against the running median of the
/// current one.
fn sub_partition(members: Vec<NormalizedEvent>, config: &ClusterConfig) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut current: Cluster = Vec::new();
    let mut running = RunningMedian::default();

    for event in members {
        if !running.accepts(&event, config) {
            clusters.push(std::mem::take(&mut current));
            running = RunningMedian::default();
        }
        running.push(&event);
        current.push(event);
    }
    if !current.is_empty() {
        clusters.push(current);
    }
    clusters
}

fn centroid(members: &[NormalizedEvent]) -> ScorePoint {
    let n = members.len() as f64;
    ScorePoint {
        origin_time_ms: (members
            .iter()
            .map(|e| e.origin_time_utc.timestamp_millis() as f64)
            .sum::<f64>()
            / n) as i64,
        latitude: members.iter().map(|e| e.latitude).sum::<f64>() / n,
        longitude: members.iter().map(|e| e.longitude).sum::<f64>() / n,
        magnitude_value: members.iter().map(|e| e.magnitude_value).sum::<f64>() / n,
    }
}

/// Eject members whose centroid match score falls below the threshold.
fn consistency_filter(
    cluster: Cluster,
    weights: MatchWeights,
    matching: &MatchConfig,
) -> Vec<Cluster> {
    if cluster.len() < 2 {
        return vec![cluster];
    }
    let center = centroid(&cluster);
    let mut kept: Cluster = Vec::new();
    let mut ejected: Vec<Cluster> = Vec::new();
    for event in cluster {
        if score(weights, ScorePoint::from(&event), center) >= matching.threshold {
            kept.push(event);
        } else {
            ejected.push(vec![event]);
        }
    }
    let mut result = Vec::with_capacity(1 + ejected.len());
    if !kept.is_empty() {
        result.push(kept);
    }
    result.extend(ejected);
    result
}

/// Cluster a window of events.
///
/// The assignment is total: every input event lands in exactly one cluster,
/// and every cluster has at least one member. Clusters come back ordered by
/// (first origin time, first uid) so downstream output is stable.
#[must_use]
pub fn cluster_window(
    window: &[NormalizedEvent],
    config: &ClusterConfig,
    matching: &MatchConfig,
    weights: MatchWeights,
) -> Vec<Cluster> {
    let n = window.len();
    let mut forest = UnionFind::new(n);

    // Naive pairwise pass; the window is clamped to MAX_WINDOW_EVENTS
    for i in 0..n {
        for j in (i + 1)..n {
            let d = haversine_km(
                window[i].latitude,
                window[i].longitude,
                window[j].latitude,
                window[j].longitude,
            );
            if d <= config.eps_km {
                forest.union(i, j);
            }
        }
    }

    let mut components: std::collections::BTreeMap<usize, Vec<NormalizedEvent>> =
        std::collections::BTreeMap::new();
    for (i, event) in window.iter().enumerate() {
        components
            .entry(forest.find(i))
            .or_default()
            .push(event.clone());
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for (_, mut members) in components {
        members.sort_by(|a, b| {
            a.origin_time_utc
                .cmp(&b.origin_time_utc)
                .then_with(|| a.event_uid().cmp(&b.event_uid()))
        });
        for sub in sub_partition(members, config) {
            clusters.extend(consistency_filter(sub, weights, matching));
        }
    }

    clusters.sort_by(|a, b| {
        a[0].origin_time_utc
            .cmp(&b[0].origin_time_utc)
            .then_with(|| a[0].event_uid().cmp(&b[0].event_uid()))
    });
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceTag;
    use crate::test_utils::{placed_event, sample_event, t0};

    fn defaults() -> (ClusterConfig, MatchConfig, MatchWeights) {
        (
            ClusterConfig::default(),
            MatchConfig::default(),
            MatchWeights::default(),
        )
    }

    #[test]
    fn test_nearby_events_cluster() {
        let (cfg, m, w) = defaults();
        // ~0.89 deg latitude ≈ 99 km
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.0);
        let b = placed_event(SourceTag::Emsc, "b", 35.89, 25.0, 10, 5.1);
        let clusters = cluster_window(&[a, b], &cfg, &m, w);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn test_distant_events_split() {
        let (cfg, m, w) = defaults();
        // ~0.91 deg latitude ≈ 101 km
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.0);
        let b = placed_event(SourceTag::Emsc, "b", 35.91, 25.0, 10, 5.1);
        let clusters = cluster_window(&[a, b], &cfg, &m, w);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_density_chaining_allowed() {
        let (cfg, m, mut w) = defaults();
        // Three points in a line, 99 km between neighbors; the ends are
        // ~198 km apart but connected through the middle. Relax the
        // consistency threshold so only the spatial pass is under test.
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.0);
        let b = placed_event(SourceTag::Emsc, "b", 35.89, 25.0, 5, 5.0);
        let c = placed_event(SourceTag::Gfz, "c", 36.78, 25.0, 10, 5.0);
        w = MatchWeights {
            time: 0.5,
            distance: 0.0,
            magnitude: 0.5,
        };
        let clusters = cluster_window(&[a, b, c], &cfg, &m, w);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
    }

    #[test]
    fn test_time_gap_splits() {
        let (cfg, m, w) = defaults();
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.0);
        let b = placed_event(SourceTag::Usgs, "b", 35.0, 25.0, 30, 5.0);
        let clusters = cluster_window(&[a.clone(), b], &cfg, &m, w);
        assert_eq!(clusters.len(), 1, "30s delta stays together");

        let c = placed_event(SourceTag::Usgs, "c", 35.0, 25.0, 31, 5.0);
        let clusters = cluster_window(&[a, c], &cfg, &m, w);
        assert_eq!(clusters.len(), 2, "31s delta splits");
    }

    #[test]
    fn test_aftershock_magnitude_split() {
        let (cfg, m, w) = defaults();
        // Same location, 45s apart, magnitudes 5.0 and 4.2: both bounds broken
        let main = placed_event(SourceTag::Usgs, "main", 35.0, 25.0, 0, 5.0);
        let aftershock = placed_event(SourceTag::Usgs, "after", 35.0, 25.0, 45, 4.2);
        let clusters = cluster_window(&[main, aftershock], &cfg, &m, w);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_consistency_filter_ejects_outlier() {
        let (cfg, mut m, w) = defaults();
        m.threshold = 0.85;
        // Two tight reports and one straggler that passes the median bounds
        // but scores poorly against the centroid
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.0);
        let b = placed_event(SourceTag::Emsc, "b", 35.0, 25.0, 2, 5.0);
        let straggler = placed_event(SourceTag::Gfz, "c", 35.15, 25.15, 28, 5.45);
        let clusters = cluster_window(&[a, b, straggler], &cfg, &m, w);
        assert_eq!(clusters.len(), 2);
        let sizes: Vec<usize> = clusters.iter().map(Vec::len).collect();
        assert!(sizes.contains(&2) && sizes.contains(&1));
    }

    #[test]
    fn test_assignment_is_total() {
        let (cfg, m, w) = defaults();
        let events: Vec<_> = (0..20)
            .map(|i| {
                placed_event(
                    SourceTag::Usgs,
                    &format!("e{i}"),
                    30.0 + f64::from(i) * 2.0,
                    20.0,
                    i64::from(i) * 100,
                    4.0 + f64::from(i % 3),
                )
            })
            .collect();
        let clusters = cluster_window(&events, &cfg, &m, w);
        let total: usize = clusters.iter().map(Vec::len).sum();
        assert_eq!(total, events.len());
        assert!(clusters.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_clustering_is_deterministic() {
        let (cfg, m, w) = defaults();
        let events: Vec<_> = (0..10)
            .map(|i| {
                placed_event(
                    SourceTag::Emsc,
                    &format!("e{i}"),
                    35.0 + f64::from(i) * 0.01,
                    25.0,
                    i64::from(i),
                    5.0,
                )
            })
            .collect();
        let first = cluster_window(&events, &cfg, &m, w);
        let second = cluster_window(&events, &cfg, &m, w);
        assert_eq!(first, second);
    }

    #[test]
    fn test_window_selection_and_dedup() {
        let width = chrono::Duration::hours(24);
        let recent = sample_event(SourceTag::Usgs, "recent");
        let mut old = sample_event(SourceTag::Usgs, "old");
        old.origin_time_utc = t0() - chrono::Duration::hours(30);

        let mut revised = recent.clone();
        revised.magnitude_value = 5.5;
        revised.updated_at = Some(t0() + chrono::Duration::hours(1));

        let window = select_window(vec![recent, old, revised], width);
        assert_eq!(window.len(), 1);
        assert!((window[0].magnitude_value - 5.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_window() {
        let window = select_window(Vec::new(), chrono::Duration::hours(24));
        assert!(window.is_empty());
        let (cfg, m, w) = defaults();
        assert!(cluster_window(&window, &cfg, &m, w).is_empty());
    }
}
