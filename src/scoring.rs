//! Pairwise similarity between source reports.
//!
//! The match score drives crosswalk scoring and the cluster consistency
//! filter. Pure functions, no I/O.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::models::NormalizedEvent;

/// Mean Earth radius in kilometers for haversine calculations.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Time delta at which the time component reaches zero.
const TIME_SCALE_SECS: f64 = 60.0;

/// Distance at which the distance component reaches zero.
const DISTANCE_SCALE_KM: f64 = 100.0;

/// Magnitude delta at which the magnitude component reaches zero.
const MAGNITUDE_SCALE: f64 = 2.0;

/// Calculate the great-circle distance between two points using the
/// haversine formula.
///
/// Returns distance in kilometers.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1 * PI / 180.0;
    let lat2_rad = lat2 * PI / 180.0;
    let delta_lat = (lat2 - lat1) * PI / 180.0;
    let delta_lon = (lon2 - lon1) * PI / 180.0;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Component weights for the match score. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub time: f64,
    pub distance: f64,
    pub magnitude: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            time: 0.4,
            distance: 0.4,
            magnitude: 0.2,
        }
    }
}

impl MatchWeights {
    /// Whether the weights form a convex combination.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.time >= 0.0
            && self.distance >= 0.0
            && self.magnitude >= 0.0
            && ((self.time + self.distance + self.magnitude) - 1.0).abs() < 1e-9
    }
}

/// A point a report can be scored against: either another report or a
/// cluster centroid.
#[derive(Debug, Clone, Copy)]
pub struct ScorePoint {
    pub origin_time_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude_value: f64,
}

impl From<&NormalizedEvent> for ScorePoint {
    fn from(e: &NormalizedEvent) -> Self {
        Self {
            origin_time_ms: e.origin_time_utc.timestamp_millis(),
            latitude: e.latitude,
            longitude: e.longitude,
            magnitude_value: e.magnitude_value,
        }
    }
}

/// Weighted similarity in [0, 1]. Symmetric; `score(a, a) = 1.0`.
#[must_use]
pub fn score(weights: MatchWeights, a: ScorePoint, b: ScorePoint) -> f64 {
    let dt_secs = ((a.origin_time_ms - b.origin_time_ms).abs() as f64) / 1000.0;
    let t_sim = (1.0 - dt_secs / TIME_SCALE_SECS).max(0.0);

    let dist_km = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
    let d_sim = (1.0 - dist_km / DISTANCE_SCALE_KM).max(0.0);

    let dmag = (a.magnitude_value - b.magnitude_value).abs();
    let m_sim = (1.0 - dmag / MAGNITUDE_SCALE).max(0.0);

    weights.time * t_sim + weights.distance * d_sim + weights.magnitude * m_sim
}

/// Score two canonical reports against each other.
#[must_use]
pub fn score_events(weights: MatchWeights, a: &NormalizedEvent, b: &NormalizedEvent) -> f64 {
    score(weights, ScorePoint::from(a), ScorePoint::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceTag;
    use crate::test_utils::placed_event;

    #[test]
    fn test_haversine_known_distance() {
        // SF to LA is roughly 560 km
        let distance = haversine_km(37.77, -122.41, 34.05, -118.24);
        assert!(distance > 500.0 && distance < 620.0);
    }

    #[test]
    fn test_score_identity() {
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.0);
        let s = score_events(MatchWeights::default(), &a, &a);
        assert!((s - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_score_symmetric() {
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.2);
        let b = placed_event(SourceTag::Emsc, "b", 35.05, 25.03, 10, 5.1);
        let w = MatchWeights::default();
        assert!((score_events(w, &a, &b) - score_events(w, &b, &a)).abs() < 1e-12);
    }

    #[test]
    fn test_score_bounded() {
        // Opposite side of the planet, an hour apart, wildly different magnitude
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 2.0);
        let b = placed_event(SourceTag::Emsc, "b", -35.0, -155.0, 3600, 9.0);
        let s = score_events(MatchWeights::default(), &a, &b);
        assert!((0.0..=1.0).contains(&s));
        assert!(s.abs() < 1e-12);
    }

    #[test]
    fn test_component_scales() {
        let w = MatchWeights::default();
        let a = placed_event(SourceTag::Usgs, "a", 35.0, 25.0, 0, 5.0);

        // 30s apart, same place and magnitude: t_sim = 0.5
        let b = placed_event(SourceTag::Emsc, "b", 35.0, 25.0, 30, 5.0);
        let s = score_events(w, &a, &b);
        assert!((s - (0.4 * 0.5 + 0.4 + 0.2)).abs() < 1e-9);

        // 1 magnitude unit apart: m_sim = 0.5
        let c = placed_event(SourceTag::Emsc, "c", 35.0, 25.0, 0, 6.0);
        let s = score_events(w, &a, &c);
        assert!((s - (0.4 + 0.4 + 0.2 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_weights_normalized_check() {
        assert!(MatchWeights::default().is_normalized());
        assert!(!MatchWeights {
            time: 0.5,
            distance: 0.5,
            magnitude: 0.5
        }
        .is_normalized());
    }
}
