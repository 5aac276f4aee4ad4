//! Cluster unification.
//!
//! Turns each cluster into one best-estimate unified event with quality
//! metrics, a stable identity recovered from the existing crosswalk, and
//! one crosswalk row per member. Pure computation; all writes happen in the
//! pipeline layer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cluster::Cluster;
use crate::errors::IntegrityError;
use crate::models::{CrosswalkRow, NormalizedEvent, UnifiedEvent};
use crate::regions::{self, Region};
use crate::scoring::{MatchWeights, haversine_km, score_events};

/// Everything one unification pass needs.
pub struct UnifyInput<'a> {
    pub clusters: &'a [Cluster],
    /// Crosswalk rows previously written for any member uid
    pub existing: &'a [CrosswalkRow],
    pub weights: MatchWeights,
    /// Stamp for newly minted identities
    pub now: DateTime<Utc>,
}

/// Replace-on-conflict payloads for the external store.
#[derive(Debug, Default, PartialEq)]
pub struct UnifyOutcome {
    pub unified: Vec<UnifiedEvent>,
    pub crosswalk: Vec<CrosswalkRow>,
}

/// Latest identity claim per event uid, recovered from seeded crosswalk rows.
fn identity_index(
    existing: &[CrosswalkRow],
) -> Result<HashMap<String, (Uuid, DateTime<Utc>)>, IntegrityError> {
    let mut index: HashMap<String, (Uuid, DateTime<Utc>)> = HashMap::new();
    for row in existing {
        match index.get(&row.event_uid) {
            None => {
                index.insert(row.event_uid.clone(), (row.unified_event_id, row.created_at));
            }
            Some((id, created)) => {
                if row.created_at > *created {
                    index.insert(row.event_uid.clone(), (row.unified_event_id, row.created_at));
                } else if row.created_at == *created && row.unified_event_id != *id {
                    // Two equally fresh claims on one uid is store corruption
                    return Err(IntegrityError::DuplicateUidConflict {
                        event_uid: row.event_uid.clone(),
                    });
                }
            }
        }
    }
    Ok(index)
}

/// Earliest creation stamp per unified id among the seeded rows.
fn creation_index(existing: &[CrosswalkRow]) -> HashMap<Uuid, DateTime<Utc>> {
    let mut index: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
    for row in existing {
        index
            .entry(row.unified_event_id)
            .and_modify(|t| *t = (*t).min(row.created_at))
            .or_insert(row.created_at);
    }
    index
}

fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

fn max_pairwise_spread_km(members: &[NormalizedEvent]) -> f64 {
    let mut max = 0.0f64;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            let d = haversine_km(
                members[i].latitude,
                members[i].longitude,
                members[j].latitude,
                members[j].longitude,
            );
            max = max.max(d);
        }
    }
    max
}

fn centroid_region(members: &[NormalizedEvent]) -> Region {
    let n = members.len() as f64;
    let lat = members.iter().map(|e| e.latitude).sum::<f64>() / n;
    let lon = members.iter().map(|e| e.longitude).sum::<f64>() / n;
    regions::classify(lat, lon)
}

/// Deterministic update stamp: the freshest member revision, falling back
/// to the preferred origin time. Keeps re-runs byte-stable.
fn updated_stamp(members: &[NormalizedEvent], preferred: &NormalizedEvent) -> DateTime<Utc> {
    members
        .iter()
        .filter_map(|e| e.updated_at)
        .max()
        .unwrap_or(preferred.origin_time_utc)
}

/// Unify every cluster.
///
/// # Errors
///
/// Returns an [`IntegrityError`] when the seeded crosswalk carries
/// conflicting identity claims; the caller must abort the batch without
/// partial writes.
pub fn unify(input: &UnifyInput<'_>) -> Result<UnifyOutcome, IntegrityError> {
    let identities = identity_index(input.existing)?;
    let creations = creation_index(input.existing);
    let existing_rows: HashMap<(String, Uuid), DateTime<Utc>> = input
        .existing
        .iter()
        .map(|r| ((r.event_uid.clone(), r.unified_event_id), r.created_at))
        .collect();

    let mut outcome = UnifyOutcome::default();

    for members in input.clusters {
        if members.is_empty() {
            continue;
        }
        let region = centroid_region(members);
        let refs: Vec<&NormalizedEvent> = members.iter().collect();
        // Clusters are non-empty, so an elected representative always exists.
        let Some(preferred) = regions::select_preferred(region, &refs) else {
            continue;
        };
        let preferred_uid = preferred.event_uid();

        // Reuse the identity claimed by the plurality of members; smallest
        // uuid breaks ties so replays converge.
        let mut claims: BTreeMap<Uuid, usize> = BTreeMap::new();
        for member in members {
            if let Some((id, _)) = identities.get(&member.event_uid()) {
                *claims.entry(*id).or_insert(0) += 1;
            }
        }
        let reused = claims
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, _)| *id);

        let (unified_event_id, created_at) = match reused {
            Some(id) => (id, creations.get(&id).copied().unwrap_or(input.now)),
            None => (Uuid::new_v4(), input.now),
        };

        let source_event_uids: Vec<String> = members
            .iter()
            .map(NormalizedEvent::event_uid)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let distinct_sources = members
            .iter()
            .map(|e| e.source)
            .collect::<BTreeSet<_>>()
            .len();
        let magnitudes: Vec<f64> = members.iter().map(|e| e.magnitude_value).collect();

        outcome.unified.push(UnifiedEvent {
            unified_event_id,
            origin_time_utc: preferred.origin_time_utc,
            latitude: preferred.latitude,
            longitude: preferred.longitude,
            depth_km: preferred.depth_km,
            magnitude_value: preferred.magnitude_value,
            magnitude_type: preferred.magnitude_type.clone(),
            place: preferred.place.clone(),
            region: preferred
                .region
                .clone()
                .unwrap_or_else(|| region.as_str().to_string()),
            status: preferred.status,
            num_sources: distinct_sources as u32,
            preferred_source: preferred.source,
            preferred_event_uid: preferred_uid.clone(),
            source_event_uids,
            magnitude_std: population_std(&magnitudes),
            location_spread_km: max_pairwise_spread_km(members),
            source_agreement_score: distinct_sources as f64 / members.len() as f64,
            created_at,
            updated_at: updated_stamp(members, preferred),
        });

        for member in members {
            let event_uid = member.event_uid();
            let created_at = existing_rows
                .get(&(event_uid.clone(), unified_event_id))
                .copied()
                .unwrap_or(input.now);
            outcome.crosswalk.push(CrosswalkRow {
                match_score: score_events(input.weights, member, preferred),
                is_preferred: event_uid == preferred_uid,
                event_uid,
                unified_event_id,
                created_at,
            });
        }
    }

    outcome
        .unified
        .sort_by(|a, b| a.unified_event_id.cmp(&b.unified_event_id));
    outcome.crosswalk.sort_by(|a, b| {
        a.unified_event_id
            .cmp(&b.unified_event_id)
            .then_with(|| a.event_uid.cmp(&b.event_uid))
    });
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReviewStatus;
    use crate::sources::SourceTag;
    use crate::test_utils::{placed_event, t0};

    fn two_agency_cluster() -> Cluster {
        let mut usgs = placed_event(SourceTag::Usgs, "us1", 35.0, 25.0, 0, 5.2);
        usgs.status = ReviewStatus::Reviewed;
        let mut emsc = placed_event(SourceTag::Emsc, "em1", 35.05, 25.03, 10, 5.1);
        emsc.status = ReviewStatus::Automatic;
        vec![usgs, emsc]
    }

    fn input<'a>(clusters: &'a [Cluster], existing: &'a [CrosswalkRow]) -> UnifyInput<'a> {
        UnifyInput {
            clusters,
            existing,
            weights: MatchWeights::default(),
            now: t0(),
        }
    }

    #[test]
    fn test_two_agencies_fuse() {
        let clusters = vec![two_agency_cluster()];
        let outcome = unify(&input(&clusters, &[])).unwrap();
        assert_eq!(outcome.unified.len(), 1);

        let unified = &outcome.unified[0];
        assert_eq!(unified.num_sources, 2);
        // Reviewed USGS beats EMSC despite the Europe region table
        assert_eq!(unified.preferred_source, SourceTag::Usgs);
        assert_eq!(unified.preferred_event_uid, "usgs:us1");
        assert!((unified.magnitude_value - 5.2).abs() < f64::EPSILON);
        assert!((unified.magnitude_std - 0.05).abs() < 1e-9);
        assert!(unified.location_spread_km > 5.0 && unified.location_spread_km < 7.0);
        assert!((unified.source_agreement_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            unified.source_event_uids,
            vec!["emsc:em1".to_string(), "usgs:us1".to_string()]
        );
    }

    #[test]
    fn test_crosswalk_has_exactly_one_preferred() {
        let clusters = vec![two_agency_cluster()];
        let outcome = unify(&input(&clusters, &[])).unwrap();
        assert_eq!(outcome.crosswalk.len(), 2);
        let preferred: Vec<_> = outcome.crosswalk.iter().filter(|r| r.is_preferred).collect();
        assert_eq!(preferred.len(), 1);
        assert_eq!(preferred[0].event_uid, "usgs:us1");
        assert!((preferred[0].match_score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_preferred_uid_is_member() {
        let clusters = vec![two_agency_cluster()];
        let outcome = unify(&input(&clusters, &[])).unwrap();
        let unified = &outcome.unified[0];
        assert!(
            unified
                .source_event_uids
                .contains(&unified.preferred_event_uid)
        );
    }

    #[test]
    fn test_singleton_metrics_are_zero() {
        let clusters = vec![vec![placed_event(SourceTag::Isc, "i1", 10.0, 60.0, 0, 4.4)]];
        let outcome = unify(&input(&clusters, &[])).unwrap();
        let unified = &outcome.unified[0];
        assert_eq!(unified.num_sources, 1);
        assert!(unified.magnitude_std.abs() < f64::EPSILON);
        assert!(unified.location_spread_km.abs() < f64::EPSILON);
        assert!((unified.source_agreement_score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_identity_reuse_from_crosswalk() {
        let clusters = vec![two_agency_cluster()];
        let first = unify(&input(&clusters, &[])).unwrap();
        let id = first.unified[0].unified_event_id;

        let second = unify(&input(&clusters, &first.crosswalk)).unwrap();
        assert_eq!(second.unified[0].unified_event_id, id);
    }

    #[test]
    fn test_seeded_rerun_is_byte_stable() {
        let clusters = vec![two_agency_cluster()];
        let first = unify(&input(&clusters, &[])).unwrap();

        // Later run, different wall clock, seeded with the first crosswalk
        let later = UnifyInput {
            clusters: &clusters,
            existing: &first.crosswalk,
            weights: MatchWeights::default(),
            now: t0() + chrono::Duration::hours(6),
        };
        let second = unify(&later).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_conflicting_claims_fail_loudly() {
        let clusters = vec![two_agency_cluster()];
        let conflicting = vec![
            CrosswalkRow {
                event_uid: "usgs:us1".into(),
                unified_event_id: Uuid::from_u128(1),
                match_score: 1.0,
                is_preferred: true,
                created_at: t0(),
            },
            CrosswalkRow {
                event_uid: "usgs:us1".into(),
                unified_event_id: Uuid::from_u128(2),
                match_score: 1.0,
                is_preferred: true,
                created_at: t0(),
            },
        ];
        let result = unify(&input(&clusters, &conflicting));
        assert!(matches!(
            result,
            Err(IntegrityError::DuplicateUidConflict { .. })
        ));
    }

    #[test]
    fn test_newer_claim_wins_over_stale_row() {
        let clusters = vec![two_agency_cluster()];
        let newer = Uuid::from_u128(7);
        let rows = vec![
            CrosswalkRow {
                event_uid: "usgs:us1".into(),
                unified_event_id: Uuid::from_u128(1),
                match_score: 1.0,
                is_preferred: true,
                created_at: t0() - chrono::Duration::days(2),
            },
            CrosswalkRow {
                event_uid: "usgs:us1".into(),
                unified_event_id: newer,
                match_score: 1.0,
                is_preferred: true,
                created_at: t0(),
            },
        ];
        let outcome = unify(&input(&clusters, &rows)).unwrap();
        assert_eq!(outcome.unified[0].unified_event_id, newer);
    }

    #[test]
    fn test_metrics_ignore_member_order() {
        let mut cluster = two_agency_cluster();
        let forward_clusters = vec![cluster.clone()];
        let forward = unify(&input(&forward_clusters, &[])).unwrap();
        cluster.reverse();
        let reversed_clusters = vec![cluster];
        let reversed = unify(&input(&reversed_clusters, &[])).unwrap();
        assert!(
            (forward.unified[0].magnitude_std - reversed.unified[0].magnitude_std).abs() < 1e-12
        );
        assert_eq!(
            forward.unified[0].source_event_uids,
            reversed.unified[0].source_event_uids
        );
        assert_eq!(
            forward.unified[0].preferred_event_uid,
            reversed.unified[0].preferred_event_uid
        );
    }
}
