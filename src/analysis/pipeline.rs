//! Resolver → detector → aggregator, run per route.
//!
//! Every route is processed independently: a route without usable data
//! yields [`RouteOutcome::InsufficientData`] and the run carries on.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::analysis::arrivals::detect_arrivals;
use crate::analysis::headways::compute_headways;
use crate::analysis::metrics::compute_metrics;
use crate::analysis::reference::resolve;
use crate::analysis::types::{
    AdherenceMetrics, InsufficientData, ReferencePoint, RouteOutcome, StopArrival,
};
use crate::config::AnalysisConfig;
use crate::telemetry::{TelemetrySnapshot, VehiclePosition};

/// Arrivals detected on a route together with the summarised outcome.
#[derive(Debug, Clone)]
pub struct RouteRun {
    pub arrivals: Vec<StopArrival>,
    pub outcome: RouteOutcome,
}

/// Runs the full pipeline over one route's samples.
///
/// `reference_override` pins the reference distance; otherwise the configured
/// override for the route, or the observed midpoint, is used.
pub fn run_route(
    route: &str,
    positions: &[&VehiclePosition],
    config: &AnalysisConfig,
    reference_override: Option<f64>,
) -> RouteRun {
    let insufficient =
        |reference: Option<ReferencePoint>, arrivals: Vec<StopArrival>, detail: InsufficientData| {
        warn!(route, reason = %detail, "Insufficient data");
        RouteRun {
            outcome: RouteOutcome::InsufficientData {
                route: route.to_string(),
                reference,
                arrival_count: arrivals.len(),
                detail,
            },
            arrivals,
        }
    };

    let pinned = reference_override.or_else(|| config.reference_overrides.get(route).copied());
    let reference = match resolve(positions, pinned) {
        Ok(r) => r,
        Err(detail) => return insufficient(None, Vec::new(), detail),
    };

    let arrivals = detect_arrivals(route, positions, reference.distance, config.min_gap());
    if arrivals.is_empty() {
        let detail = InsufficientData::NoCrossings {
            samples: positions.len(),
        };
        return insufficient(Some(reference), arrivals, detail);
    }

    let series = compute_headways(
        &arrivals,
        &config.service_windows,
        config.timezone,
        config.max_headway_minutes,
    );

    if series.headways.len() < config.min_headways.max(1) {
        let detail = InsufficientData::TooFewHeadways {
            headways: series.headways.len(),
            required: config.min_headways.max(1),
        };
        return insufficient(Some(reference), arrivals, detail);
    }

    let metrics = AdherenceMetrics {
        arrivals_in_service: series.arrivals_in_service,
        headways_over_cap: series.over_cap,
        ..compute_metrics(
            route,
            arrivals.len(),
            &series.minutes(),
            &config.metric_thresholds(),
        )
    };

    RouteRun {
        arrivals,
        outcome: RouteOutcome::Measured { reference, metrics },
    }
}

pub fn analyze_route(
    route: &str,
    positions: &[&VehiclePosition],
    config: &AnalysisConfig,
) -> RouteOutcome {
    run_route(route, positions, config, None).outcome
}

/// Sorted, de-duplicated route ids to process: `routes`, or every route in
/// `by_route` when `routes` is empty.
pub fn select_routes<'a, V>(
    by_route: &BTreeMap<&'a str, V>,
    routes: &'a [String],
) -> Vec<&'a str> {
    let mut wanted: Vec<&str> = if routes.is_empty() {
        by_route.keys().copied().collect()
    } else {
        routes.iter().map(String::as_str).collect()
    };
    wanted.sort_unstable();
    wanted.dedup();
    wanted
}

/// Analyzes each of `routes` in the snapshot; all routes present when `routes` is empty.
///
/// Outcomes come back in route order. Routes with no samples are reported as
/// [`InsufficientData::NoTelemetry`].
pub fn analyze_snapshot(
    snapshot: &TelemetrySnapshot,
    routes: &[String],
    config: &AnalysisConfig,
) -> Vec<RouteOutcome> {
    let by_route = snapshot.by_route();

    let outcomes: Vec<RouteOutcome> = select_routes(&by_route, routes)
        .into_iter()
        .map(|route| {
            let positions = by_route.get(route).map(Vec::as_slice).unwrap_or_default();
            analyze_route(route, positions, config)
        })
        .collect();

    let measured = outcomes.iter().filter(|o| o.metrics().is_some()).count();
    info!(
        routes = outcomes.len(),
        measured,
        insufficient = outcomes.len() - measured,
        "Snapshot analyzed"
    );

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::tests::sample;

    /// Vehicles `n` minutes apart each driving 0 -> 10000 over 20 minutes.
    fn steady_route(vehicles: usize, spacing: f64) -> Vec<VehiclePosition> {
        let mut out = Vec::new();
        for v in 0..vehicles {
            let start = v as f64 * spacing;
            for step in 0..=4 {
                out.push(sample(
                    &format!("{v}"),
                    start + step as f64 * 5.0,
                    Some(step as f64 * 2500.0),
                    "A",
                ));
            }
        }
        out
    }

    #[test]
    fn test_steady_service_is_measured() {
        let samples = steady_route(6, 8.0);
        let refs: Vec<_> = samples.iter().collect();

        let outcome = analyze_route("79", &refs, &AnalysisConfig::default());
        let metrics = outcome.metrics().expect("measured");
        assert_eq!(outcome.reference().unwrap().distance, 5000.0);
        assert_eq!(metrics.arrival_count, 6);
        assert_eq!(metrics.headway_count, 5);
        assert!((metrics.mean_headway - 8.0).abs() < 1e-9);
        assert!((metrics.pct_le_threshold - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_never_bracketing_reference_is_insufficient() {
        // vehicle 1 changes pattern mid-pair and vehicle 2 only moves
        // backwards, so the midpoint is never passed
        let samples = vec![
            sample("1", 0.0, Some(100.0), "A"),
            sample("1", 5.0, Some(900.0), "B"),
            sample("2", 0.0, Some(900.0), "A"),
            sample("2", 5.0, Some(100.0), "A"),
        ];
        let refs: Vec<_> = samples.iter().collect();

        let outcome = analyze_route("79", &refs, &AnalysisConfig::default());
        assert!(matches!(
            outcome,
            RouteOutcome::InsufficientData {
                detail: InsufficientData::NoCrossings { samples: 4 },
                ..
            }
        ));
        assert_eq!(outcome.reference().unwrap().distance, 500.0);
    }

    #[test]
    fn test_single_arrival_is_too_few_headways() {
        let samples = steady_route(1, 8.0);
        let refs: Vec<_> = samples.iter().collect();

        let outcome = analyze_route("79", &refs, &AnalysisConfig::default());
        assert!(matches!(
            outcome,
            RouteOutcome::InsufficientData {
                arrival_count: 1,
                detail: InsufficientData::TooFewHeadways {
                    headways: 0,
                    required: 1
                },
                ..
            }
        ));
    }

    #[test]
    fn test_configured_override_is_used() {
        let samples = steady_route(3, 8.0);
        let refs: Vec<_> = samples.iter().collect();
        let mut config = AnalysisConfig::default();
        config.reference_overrides.insert("79".to_string(), 2500.0);

        let outcome = analyze_route("79", &refs, &config);
        let reference = outcome.reference().unwrap();
        assert_eq!(reference.distance, 2500.0);
        assert!(reference.overridden);
    }

    #[test]
    fn test_missing_route_does_not_stop_others() {
        let snapshot = TelemetrySnapshot::new(steady_route(4, 9.0));
        let routes = vec!["79".to_string(), "4".to_string()];

        let outcomes = analyze_snapshot(&snapshot, &routes, &AnalysisConfig::default());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].route(), "4");
        assert!(matches!(
            outcomes[0],
            RouteOutcome::InsufficientData {
                detail: InsufficientData::NoTelemetry,
                ..
            }
        ));
        assert!(outcomes[1].metrics().is_some());
    }

    #[test]
    fn test_select_routes_sorts_and_dedups() {
        let snapshot = TelemetrySnapshot::new(steady_route(1, 8.0));
        let by_route = snapshot.by_route();

        assert_eq!(select_routes(&by_route, &[]), vec!["79"]);
        let asked = vec!["9".to_string(), "4".to_string(), "9".to_string()];
        assert_eq!(select_routes(&by_route, &asked), vec!["4", "9"]);
    }

    #[test]
    fn test_arrival_count_means_detected_arrivals() {
        // the third bus passes at 21:30 local, after the window closes
        let mut samples = steady_route(2, 8.0);
        for step in 0..=4 {
            samples.push(sample(
                "late",
                800.0 + step as f64 * 5.0,
                Some(step as f64 * 2500.0),
                "A",
            ));
        }
        let refs: Vec<_> = samples.iter().collect();

        let outcome = analyze_route("79", &refs, &AnalysisConfig::default());
        let metrics = outcome.metrics().expect("measured");
        assert_eq!(outcome.arrival_count(), 3);
        assert_eq!(metrics.arrival_count, 3);
        assert_eq!(metrics.arrivals_in_service, 2);
        assert_eq!(metrics.headway_count, 1);
    }

    #[test]
    fn test_capped_headways_are_counted() {
        let mut config = AnalysisConfig::default();

        // arrivals at +10, +160 and +180 minutes
        let mut samples = steady_route(2, 150.0);
        samples.extend(steady_route(1, 0.0).into_iter().map(|mut p| {
            p.vehicle_id = "x".to_string();
            p.sample_time += chrono::Duration::minutes(170);
            p
        }));
        let refs: Vec<_> = samples.iter().collect();

        let outcome = analyze_route("79", &refs, &config);
        let metrics = outcome.metrics().expect("measured");
        assert_eq!(metrics.headway_count, 1);
        assert_eq!(metrics.headways_over_cap, 1);
        assert!((metrics.mean_headway - 20.0).abs() < 1e-9);

        config.max_headway_minutes = None;
        let outcome = analyze_route("79", &refs, &config);
        let metrics = outcome.metrics().expect("measured");
        assert_eq!(metrics.headway_count, 2);
        assert_eq!(metrics.headways_over_cap, 0);
    }

    #[test]
    fn test_rerun_is_identical() {
        let snapshot = TelemetrySnapshot::new(steady_route(7, 11.0));
        let config = AnalysisConfig::default();

        let first = analyze_snapshot(&snapshot, &[], &config);
        let second = analyze_snapshot(&snapshot, &[], &config);
        assert_eq!(first, second);
    }
}
