//! Picks the reference point ("virtual stop") for a route.

use crate::analysis::types::{InsufficientData, ReferencePoint};
use crate::telemetry::VehiclePosition;

/// Resolves the reference distance for one route's samples.
///
/// The midpoint of the observed distance range is used unless `override_distance`
/// is given. Either way the result lies strictly inside `(min, max)`; samples
/// without a usable distance are ignored.
pub fn resolve(
    positions: &[&VehiclePosition],
    override_distance: Option<f64>,
) -> Result<ReferencePoint, InsufficientData> {
    if positions.is_empty() {
        return Err(InsufficientData::NoTelemetry);
    }

    let mut range: Option<(f64, f64)> = None;
    for d in positions
        .iter()
        .filter_map(|p| p.along_route_distance)
        .filter(|d| d.is_finite())
    {
        range = Some(match range {
            None => (d, d),
            Some((lo, hi)) => (lo.min(d), hi.max(d)),
        });
    }

    let (min, max) = match range {
        None => {
            return Err(InsufficientData::UnresolvableReference {
                distinct_distances: 0,
            });
        }
        Some((lo, hi)) if lo == hi => {
            return Err(InsufficientData::UnresolvableReference {
                distinct_distances: 1,
            });
        }
        Some(r) => r,
    };

    let (distance, overridden) = match override_distance {
        Some(d) => (d, true),
        None => (min + (max - min) / 2.0, false),
    };

    if !(min < distance && distance < max) {
        return Err(InsufficientData::ReferenceOutOfRange {
            reference: distance,
            min,
            max,
        });
    }

    Ok(ReferencePoint {
        distance,
        observed_min: min,
        observed_max: max,
        overridden,
    })
}
