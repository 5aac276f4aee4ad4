//! Region classification and per-region source priority.
//!
//! Regions are coarse longitude/latitude boxes; each region carries a fixed
//! agency preference order used when electing a cluster's representative.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::NormalizedEvent;
use crate::sources::{self, SourceTag};

/// Coarse geographic region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Americas,
    Europe,
    Africa,
    AsiaPacific,
}

impl Region {
    /// Get the canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Americas => "americas",
            Self::Europe => "europe",
            Self::Africa => "africa",
            Self::AsiaPacific => "asia_pacific",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "americas" => Ok(Self::Americas),
            "europe" => Ok(Self::Europe),
            "africa" => Ok(Self::Africa),
            "asia_pacific" => Ok(Self::AsiaPacific),
            _ => Err(format!("unknown region: {s}")),
        }
    }
}

/// Classify a coordinate into a region by boxed ranges.
///
/// Boxes are checked in listed order; the narrow mid-Atlantic band south of
/// 30N that no box covers falls to `Africa` as the nearest neighbor.
#[must_use]
pub fn classify(lat: f64, lon: f64) -> Region {
    if (-170.0..=-30.0).contains(&lon) {
        Region::Americas
    } else if (-30.0..=45.0).contains(&lon) && lat >= 30.0 {
        Region::Europe
    } else if (-20.0..=55.0).contains(&lon) && lat < 30.0 {
        Region::Africa
    } else if lon > 45.0 || lon < -170.0 {
        Region::AsiaPacific
    } else {
        Region::Africa
    }
}

/// Agency preference order per region, most trusted first.
#[must_use]
pub const fn priority_table(region: Region) -> [SourceTag; 6] {
    use SourceTag::{Emsc, Geonet, Gfz, Ipgp, Isc, Usgs};
    match region {
        Region::Americas => [Usgs, Emsc, Gfz, Isc, Ipgp, Geonet],
        Region::Europe => [Emsc, Gfz, Usgs, Isc, Ipgp, Geonet],
        Region::Africa => [Isc, Emsc, Ipgp, Usgs, Gfz, Geonet],
        Region::AsiaPacific => [Isc, Usgs, Geonet, Emsc, Gfz, Ipgp],
    }
}

/// Rank of an agency within a region's table, 0 = most trusted.
#[must_use]
pub fn priority_rank(region: Region, tag: SourceTag) -> u8 {
    let table = priority_table(region);
    // Tables are total over SourceTag, so position always exists.
    table
        .iter()
        .position(|t| *t == tag)
        .map_or(u8::MAX, |p| p as u8)
}

/// Ordering used to elect a preferred representative.
///
/// Reviewed status beats automatic regardless of region; then region rank,
/// then freshest `updated_at`, then `event_uid` for a stable total order.
#[must_use]
pub fn preferred_order(region: Region, a: &NormalizedEvent, b: &NormalizedEvent) -> Ordering {
    b.status
        .is_reviewed()
        .cmp(&a.status.is_reviewed())
        .then_with(|| priority_rank(region, a.source).cmp(&priority_rank(region, b.source)))
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.event_uid().cmp(&b.event_uid()))
}

/// Elect the preferred representative among cluster members.
///
/// The registry's coverage list gates eligibility first: reports from
/// agencies not listed for the region compete only when no listed agency
/// reported, so an out-of-network bulletin echo cannot outrank a local
/// solution. Within the eligible pool, [`preferred_order`] decides.
///
/// Returns `None` only for an empty candidate slice.
#[must_use]
pub fn select_preferred<'a>(
    region: Region,
    candidates: &[&'a NormalizedEvent],
) -> Option<&'a NormalizedEvent> {
    let covered: Vec<&NormalizedEvent> = candidates
        .iter()
        .copied()
        .filter(|e| sources::spec_for(e.source).covers(region))
        .collect();
    let pool: &[&NormalizedEvent] = if covered.is_empty() { candidates } else { &covered };
    pool.iter()
        .copied()
        .min_by(|a, b| preferred_order(region, a, b))
}
