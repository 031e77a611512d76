//! Stop-arrival detection by reference-point crossing.
//!
//! A vehicle is taken to have arrived when two consecutive samples of the
//! same pattern bracket the reference distance, `a < reference <= b`. The
//! arrival time is interpolated linearly in distance between the two sample
//! times. Testing for a *passed* point rather than proximity keeps detection
//! working when polls are minutes apart.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::analysis::types::StopArrival;
use crate::telemetry::VehiclePosition;

/// Interpolated time at which the vehicle passed `reference` between `a` and `b`.
///
/// Returns `None` for pairs that cannot represent a forward crossing: missing
/// distance or pattern on either side, a pattern change, zero progress, or a
/// reference outside `(a, b]`.
pub fn interpolate_crossing(
    a: &VehiclePosition,
    b: &VehiclePosition,
    reference: f64,
) -> Option<DateTime<Utc>> {
    let (da, pattern_a) = a.progress()?;
    let (db, pattern_b) = b.progress()?;

    if pattern_a != pattern_b {
        return None;
    }
    if !(da < reference && reference <= db) {
        return None;
    }

    let fraction = (reference - da) / (db - da);
    let span_ms = (b.sample_time - a.sample_time).num_milliseconds() as f64;
    let offset = Duration::milliseconds((span_ms * fraction).round() as i64);

    Some(a.sample_time + offset)
}

/// Drops any time within `min_gap` of the previously kept one.
///
/// `times` must be sorted ascending; the first of each cluster is kept.
pub fn suppress_duplicates(times: &[DateTime<Utc>], min_gap: Duration) -> Vec<DateTime<Utc>> {
    let mut kept: Vec<DateTime<Utc>> = Vec::with_capacity(times.len());
    for &t in times {
        match kept.last() {
            Some(&last) if t - last < min_gap => {
                trace!(suppressed = %t, kept = %last, "Duplicate crossing suppressed");
            }
            _ => kept.push(t),
        }
    }
    kept
}

/// Raw crossing times for one vehicle's samples, sorted ascending.
fn vehicle_crossings(samples: &mut [&VehiclePosition], reference: f64) -> Vec<DateTime<Utc>> {
    samples.sort_by_key(|p| p.sample_time);

    let mut crossings: Vec<DateTime<Utc>> = samples
        .windows(2)
        .filter_map(|pair| interpolate_crossing(pair[0], pair[1], reference))
        .collect();
    crossings.sort();
    crossings
}

/// Detects de-duplicated arrivals at `reference` for every vehicle on a route.
///
/// Samples without a distance or pattern are excluded before pairing.
/// Vehicles are visited in id order; no ordering across vehicles is implied.
pub fn detect_arrivals(
    route: &str,
    positions: &[&VehiclePosition],
    reference: f64,
    min_gap: Duration,
) -> Vec<StopArrival> {
    let mut by_vehicle: BTreeMap<&str, Vec<&VehiclePosition>> = BTreeMap::new();
    for p in positions.iter().copied().filter(|p| p.progress().is_some()) {
        by_vehicle.entry(p.vehicle_id.as_str()).or_default().push(p);
    }

    let mut arrivals = Vec::new();
    let mut raw_total = 0usize;

    for (vehicle_id, mut samples) in by_vehicle {
        let raw = vehicle_crossings(&mut samples, reference);
        raw_total += raw.len();

        arrivals.extend(
            suppress_duplicates(&raw, min_gap)
                .into_iter()
                .map(|arrival_time| StopArrival {
                    route: route.to_string(),
                    vehicle_id: vehicle_id.to_string(),
                    arrival_time,
                    crossing_distance: reference,
                }),
        );
    }

    debug!(
        route,
        reference,
        raw_crossings = raw_total,
        arrivals = arrivals.len(),
        "Arrivals detected"
    );

    arrivals
}
