//! Hotspot clustering.
//!
//! Fixed-radius star clustering: each unclaimed report in input order claims
//! every unclaimed report within the radius, and the group becomes a hotspot
//! when it has at least three members. Overlapping stars are never merged.
//! The functions here are pure; scheduling lives in [`crate::hotspots`].

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::f64::consts::PI;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{Hotspot, Report};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default proximity threshold, about 0.05 degrees at the equator.
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Smallest group that is reported as a hotspot.
pub const MIN_REPORTS: usize = 3;

const MAX_INTENSITY: f64 = 10.0;
const MIN_RADIUS_DEG: f64 = 0.01;
const MAX_RADIUS_DEG: f64 = 0.1;

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let to_rad = |deg: f64| deg * PI / 180.0;

    let dlat = to_rad(lat2 - lat1);
    let dlng = to_rad(lng2 - lng1);

    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlng / 2.0).sin().powi(2);

    // Clamp guards against a > 1 from floating point error on antipodes
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub radius_km: f64,
    pub min_reports: usize,
    /// Reports newer than this count toward the recency bonus.
    pub recent_window: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_RADIUS_KM,
            min_reports: MIN_REPORTS,
            recent_window: Duration::hours(24),
        }
    }
}

impl ClusterConfig {
    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.radius_km = radius_km;
        self
    }
}

/// Hotspot intensity on a 0..=10 scale.
///
/// `round(min(10, count * 2 + avg_severity * 1.5 + recent * 3))`
pub fn intensity(report_count: usize, avg_severity: f64, recent_count: usize) -> u8 {
    let raw = report_count as f64 * 2.0 + avg_severity * 1.5 + recent_count as f64 * 3.0;
    raw.min(MAX_INTENSITY).max(0.0).round() as u8
}

/// Rendering radius in degrees for a given intensity.
pub fn hotspot_radius(intensity: u8) -> f64 {
    (f64::from(intensity) / 20.0).clamp(MIN_RADIUS_DEG, MAX_RADIUS_DEG)
}

/// Group reports into hotspots, sorted by descending intensity.
///
/// Ties keep discovery order. Hotspot ids are fresh on every call.
pub fn cluster<R: Borrow<Report>>(
    reports: &[R],
    config: &ClusterConfig,
    now: DateTime<Utc>,
) -> Vec<Hotspot> {
    let mut claimed = vec![false; reports.len()];
    let mut hotspots = Vec::new();

    for (anchor_idx, anchor) in reports.iter().enumerate() {
        if claimed[anchor_idx] {
            continue;
        }
        let anchor = anchor.borrow();

        let neighbors: Vec<usize> = reports
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != anchor_idx && !claimed[*idx])
            .filter(|(_, other)| {
                let other = (*other).borrow();
                haversine_km(anchor.latitude, anchor.longitude, other.latitude, other.longitude)
                    <= config.radius_km
            })
            .map(|(idx, _)| idx)
            .collect();

        if neighbors.len() + 1 < config.min_reports {
            continue;
        }

        let mut members = Vec::with_capacity(neighbors.len() + 1);
        members.push(anchor);
        claimed[anchor_idx] = true;
        for idx in neighbors {
            claimed[idx] = true;
            members.push(reports[idx].borrow());
        }

        hotspots.push(build_hotspot(&members, config, now));
    }

    hotspots.sort_by(|a, b| b.intensity.cmp(&a.intensity));
    hotspots
}

fn build_hotspot(members: &[&Report], config: &ClusterConfig, now: DateTime<Utc>) -> Hotspot {
    let count = members.len();
    let latitude = members.iter().map(|r| r.latitude).sum::<f64>() / count as f64;
    let longitude = members.iter().map(|r| r.longitude).sum::<f64>() / count as f64;

    let severities: Vec<f64> = members
        .iter()
        .filter_map(|r| r.severity_score)
        .map(f64::from)
        .collect();
    let avg_severity = if severities.is_empty() {
        1.0
    } else {
        severities.iter().sum::<f64>() / severities.len() as f64
    };

    let cutoff = now - config.recent_window;
    let recent = members.iter().filter(|r| r.created_at > cutoff).count();

    let intensity = intensity(count, avg_severity, recent);

    Hotspot {
        id: format!("hotspot_{}", Uuid::new_v4().simple()),
        latitude,
        longitude,
        intensity,
        radius: hotspot_radius(intensity),
        report_count: count,
        avg_severity: (avg_severity * 10.0).round() / 10.0,
        hazard_types: members.iter().map(|r| r.hazard_type).collect::<BTreeSet<_>>(),
        report_ids: members.iter().map(|r| r.id.clone()).collect(),
        last_updated: now,
    }
}



#[cfg(test)]
mod property_tests {
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    use crate::cluster::test_support::report_at;
    use crate::cluster::{cluster, intensity, ClusterConfig};
    use crate::models::Report;

    fn reports_strategy() -> impl Strategy<Value = Vec<Report>> {
        prop::collection::vec(
            (
                12.0f64..12.3,
                77.0f64..77.3,
                prop::option::of(1u8..=10),
                0i64..72,
            ),
            0..30,
        )
        .prop_map(|rows| {
            let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            rows.into_iter()
                .enumerate()
                .map(|(i, (lat, lng, sev, hours))| {
                    report_at(
                        &format!("r{i}"),
                        lat,
                        lng,
                        sev,
                        base - chrono::Duration::hours(hours),
                    )
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn hotspots_have_at_least_three_reports(reports in reports_strategy()) {
            let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            for hotspot in cluster(&reports, &ClusterConfig::default(), now) {
                prop_assert!(hotspot.report_count >= 3);
                prop_assert_eq!(hotspot.report_count, hotspot.report_ids.len());
                prop_assert!(hotspot.intensity <= 10);
                prop_assert!((0.01..=0.1).contains(&hotspot.radius));
            }
        }

        #[test]
        fn each_report_in_at_most_one_hotspot(reports in reports_strategy()) {
            let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            let hotspots = cluster(&reports, &ClusterConfig::default(), now);
            let mut seen = std::collections::HashSet::new();
            for id in hotspots.iter().flat_map(|h| h.report_ids.iter()) {
                prop_assert!(seen.insert(id.clone()));
            }
        }

        #[test]
        fn clustering_is_idempotent(reports in reports_strategy()) {
            let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            let config = ClusterConfig::default();
            let first = cluster(&reports, &config, now);
            let second = cluster(&reports, &config, now);

            prop_assert_eq!(first.len(), second.len());
            for (a, b) in first.iter().zip(second.iter()) {
                prop_assert_eq!(&a.report_ids, &b.report_ids);
                prop_assert_eq!(a.intensity, b.intensity);
                prop_assert_eq!(a.avg_severity, b.avg_severity);
            }
        }

        #[test]
        fn intensity_is_monotonic(
            count in 3usize..50,
            avg in 1.0f64..10.0,
            recent in 0usize..50,
            bump in 0.0f64..5.0,
        ) {
            let base = intensity(count, avg, recent);
            prop_assert!(intensity(count + 1, avg, recent) >= base);
            prop_assert!(intensity(count, avg + bump, recent) >= base);
            prop_assert!(intensity(count, avg, recent + 1) >= base);
        }
    }
}
