//! Promise-vs-reality comparison against scheduled headways.
//!
//! Scheduled summaries come from an external GTFS step as a CSV with
//! `route,scheduled_pct_le_threshold,scheduled_mean_headway`. A route with no
//! scheduled summary is measured against the promise itself (100 %).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::analysis::grade::Grade;
use crate::analysis::types::{AdherenceMetrics, InsufficientData, ReferencePoint, RouteOutcome};
use crate::analysis::utility::{mean, pct};
use crate::config::AnalysisConfig;
use crate::telemetry::DataCoverage;

/// Scheduled headway summary for one route. Percentages are 0–100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSummary {
    pub route: String,
    pub scheduled_pct_le_threshold: f64,
    pub scheduled_mean_headway: Option<f64>,
}

pub type Schedule = BTreeMap<String, ScheduledSummary>;

/// Loads scheduled summaries keyed by route.
pub fn load_schedule(path: impl AsRef<Path>) -> Result<Schedule> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening schedule {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut schedule = Schedule::new();
    for result in rdr.deserialize() {
        let record: ScheduledSummary = result?;
        schedule.insert(record.route.clone(), record);
    }

    info!(routes = schedule.len(), "Schedule loaded");
    Ok(schedule)
}

/// Minutes past midnight for a GTFS `HH:MM[:SS]` time; hours may exceed 23.
fn gtfs_minutes(time: &str) -> Result<f64> {
    let mut parts = time.trim().split(':');
    let mut next = |what: &str| -> Result<u32> {
        parts
            .next()
            .map(|p| p.parse::<u32>())
            .transpose()
            .with_context(|| format!("bad {what} in {time:?}"))
            .map(Option::unwrap_or_default)
    };

    let hours = next("hours")?;
    let minutes = next("minutes")?;
    let seconds = next("seconds")?;
    if minutes >= 60 || seconds >= 60 {
        anyhow::bail!("time out of range: {time:?}");
    }
    Ok(hours as f64 * 60.0 + minutes as f64 + seconds as f64 / 60.0)
}

/// Derives a summary from one stop's scheduled arrival times for a route.
pub fn summarize_scheduled_times(
    route: &str,
    arrival_times: &[&str],
    threshold_minutes: f64,
) -> Result<ScheduledSummary> {
    let mut minutes = arrival_times
        .iter()
        .map(|t| gtfs_minutes(t))
        .collect::<Result<Vec<_>>>()?;
    minutes.sort_by(f64::total_cmp);

    let headways: Vec<f64> = minutes.windows(2).map(|w| w[1] - w[0]).collect();

    Ok(ScheduledSummary {
        route: route.to_string(),
        scheduled_pct_le_threshold: pct(&headways, |h| h <= threshold_minutes),
        scheduled_mean_headway: (!headways.is_empty()).then(|| mean(&headways)),
    })
}

/// Scheduled vs observed for one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteComparison {
    pub route: String,
    pub name: String,
    pub phase: Option<u8>,
    pub scheduled_pct: f64,
    pub scheduled_mean_headway: Option<f64>,
    pub observed_pct: Option<f64>,
    pub observed_mean_headway: Option<f64>,
    pub headway_count: usize,
    /// Observed minus scheduled, in percentage points.
    pub delta_pp: Option<f64>,
    /// Observed over scheduled; `None` when nothing was scheduled to meet the promise.
    pub delivery_ratio: Option<f64>,
    pub grade: Option<Grade>,
    /// Detected arrivals at the reference point.
    pub arrival_count: usize,
    pub reference: Option<ReferencePoint>,
    pub metrics: Option<AdherenceMetrics>,
    pub insufficient_data: Option<InsufficientData>,
}

/// Averages over the measured routes only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateComparison {
    pub routes_measured: usize,
    pub routes_insufficient: usize,
    pub avg_scheduled_pct: Option<f64>,
    pub avg_observed_pct: Option<f64>,
    pub avg_delta_pp: Option<f64>,
}

/// The headline promise-vs-reality report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub generated_at: DateTime<Utc>,
    pub threshold_minutes: f64,
    pub routes: Vec<RouteComparison>,
    pub aggregate: AggregateComparison,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<DataCoverage>,
}

impl ComparisonReport {
    /// Attaches the span and volume of the telemetry behind the report.
    pub fn with_coverage(mut self, coverage: DataCoverage) -> Self {
        self.coverage = Some(coverage);
        self
    }
}

/// Joins observed outcomes with scheduled summaries.
///
/// Routes are ordered by observed adherence, best first; routes without a
/// figure follow, each group by route id.
pub fn compare(
    outcomes: &[RouteOutcome],
    schedule: &Schedule,
    config: &AnalysisConfig,
    generated_at: DateTime<Utc>,
) -> ComparisonReport {
    let mut routes: Vec<RouteComparison> = outcomes
        .iter()
        .map(|outcome| {
            let route = outcome.route();
            let info = config.route_info(route);
            let scheduled = schedule.get(route);
            let scheduled_pct = scheduled.map_or(100.0, |s| s.scheduled_pct_le_threshold);
            let metrics = outcome.metrics();
            let observed_pct = metrics.map(|m| m.pct_le_threshold);

            RouteComparison {
                route: route.to_string(),
                name: info.map_or_else(|| route.to_string(), |i| i.name.clone()),
                phase: info.map(|i| i.phase),
                scheduled_pct,
                scheduled_mean_headway: scheduled.and_then(|s| s.scheduled_mean_headway),
                observed_pct,
                observed_mean_headway: metrics.map(|m| m.mean_headway),
                headway_count: metrics.map_or(0, |m| m.headway_count),
                delta_pp: observed_pct.map(|o| o - scheduled_pct),
                delivery_ratio: observed_pct
                    .filter(|_| scheduled_pct > 0.0)
                    .map(|o| o / scheduled_pct),
                grade: observed_pct.map(Grade::from_pct),
                arrival_count: outcome.arrival_count(),
                reference: outcome.reference().copied(),
                metrics: metrics.cloned(),
                insufficient_data: match outcome {
                    RouteOutcome::InsufficientData { detail, .. } => Some(detail.clone()),
                    RouteOutcome::Measured { .. } => None,
                },
            }
        })
        .collect();

    routes.sort_by(|a, b| match (a.observed_pct, b.observed_pct) {
        (Some(x), Some(y)) => y.total_cmp(&x).then_with(|| a.route.cmp(&b.route)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.route.cmp(&b.route),
    });

    let measured: Vec<&RouteComparison> =
        routes.iter().filter(|r| r.observed_pct.is_some()).collect();
    let avg = |f: fn(&RouteComparison) -> Option<f64>| -> Option<f64> {
        let values: Vec<f64> = measured.iter().filter_map(|r| f(r)).collect();
        (!values.is_empty()).then(|| mean(&values))
    };

    let aggregate = AggregateComparison {
        routes_measured: measured.len(),
        routes_insufficient: routes.len() - measured.len(),
        avg_scheduled_pct: avg(|r| Some(r.scheduled_pct)),
        avg_observed_pct: avg(|r| r.observed_pct),
        avg_delta_pp: avg(|r| r.delta_pp),
    };

    ComparisonReport {
        generated_at,
        threshold_minutes: config.threshold_minutes,
        routes,
        aggregate,
        coverage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn measured(route: &str, pct_le_threshold: f64) -> RouteOutcome {
        RouteOutcome::Measured {
            reference: ReferencePoint {
                distance: 5000.0,
                observed_min: 0.0,
                observed_max: 10000.0,
                overridden: false,
            },
            metrics: AdherenceMetrics {
                route: route.to_string(),
                arrival_count: 11,
                arrivals_in_service: 11,
                headway_count: 10,
                headways_over_cap: 0,
                mean_headway: 9.5,
                pct_le_threshold,
                median_headway: 9.0,
                std_headway: 1.0,
                cv_headway: 0.1,
                pct_le_grace: 100.0,
                pct_over_15: 0.0,
                pct_over_20: 0.0,
                max_headway: 12.0,
                bunching_rate: 0.0,
                excess_wait_time: 0.1,
            },
        }
    }

    fn insufficient(route: &str) -> RouteOutcome {
        RouteOutcome::InsufficientData {
            route: route.to_string(),
            reference: None,
            arrival_count: 0,
            detail: InsufficientData::NoTelemetry,
        }
    }

    #[test]
    fn test_compare_against_promise_by_default() {
        let outcomes = vec![measured("79", 60.0), insufficient("4"), measured("9", 80.0)];
        let report = compare(&outcomes, &Schedule::new(), &AnalysisConfig::default(), Utc::now());

        let order: Vec<_> = report.routes.iter().map(|r| r.route.as_str()).collect();
        assert_eq!(order, vec!["9", "79", "4"]);

        let r79 = &report.routes[1];
        assert_eq!(r79.name, "79th");
        assert_eq!(r79.phase, Some(1));
        assert_eq!(r79.scheduled_pct, 100.0);
        assert_eq!(r79.delta_pp, Some(-40.0));
        assert_eq!(r79.delivery_ratio, Some(0.6));
        assert_eq!(r79.grade, Some(Grade::D));
        assert_eq!(r79.arrival_count, 11);
        assert_eq!(r79.reference.map(|r| r.distance), Some(5000.0));
        assert_eq!(r79.metrics.as_ref().map(|m| m.excess_wait_time), Some(0.1));

        let r4 = &report.routes[2];
        assert_eq!(r4.observed_pct, None);
        assert_eq!(r4.insufficient_data, Some(InsufficientData::NoTelemetry));
        assert_eq!(r4.metrics, None);
        assert_eq!(r4.reference, None);
        assert_eq!(report.coverage, None);

        assert_eq!(report.aggregate.routes_measured, 2);
        assert_eq!(report.aggregate.routes_insufficient, 1);
        assert_eq!(report.aggregate.avg_observed_pct, Some(70.0));
        assert_eq!(report.aggregate.avg_delta_pp, Some(-30.0));
    }

    #[test]
    fn test_compare_uses_scheduled_summary() {
        let mut schedule = Schedule::new();
        schedule.insert(
            "79".to_string(),
            ScheduledSummary {
                route: "79".to_string(),
                scheduled_pct_le_threshold: 80.0,
                scheduled_mean_headway: Some(8.5),
            },
        );

        let report = compare(
            &[measured("79", 60.0)],
            &schedule,
            &AnalysisConfig::default(),
            Utc::now(),
        );
        let r = &report.routes[0];
        assert_eq!(r.scheduled_pct, 80.0);
        assert_eq!(r.scheduled_mean_headway, Some(8.5));
        assert_eq!(r.delta_pp, Some(-20.0));
        assert_eq!(r.delivery_ratio, Some(0.75));
    }

    #[test]
    fn test_no_measured_routes_has_no_averages() {
        let report = compare(
            &[insufficient("4")],
            &Schedule::new(),
            &AnalysisConfig::default(),
            Utc::now(),
        );
        assert_eq!(report.aggregate.avg_observed_pct, None);
        assert_eq!(report.aggregate.avg_scheduled_pct, None);
    }

    #[test]
    fn test_load_schedule_csv() {
        let path = format!("{}/headway_check_schedule.csv", env::temp_dir().display());
        fs::write(
            &path,
            "route,scheduled_pct_le_threshold,scheduled_mean_headway\n79,96.5,8.1\n4,100,\n",
        )
        .unwrap();

        let schedule = load_schedule(&path).unwrap();
        assert_eq!(schedule["79"].scheduled_pct_le_threshold, 96.5);
        assert_eq!(schedule["4"].scheduled_mean_headway, None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_summarize_scheduled_times_past_midnight() {
        let times = ["23:50:00", "24:02:00", "23:40:00", "24:20:30"];
        let summary = summarize_scheduled_times("79", &times, 10.0).unwrap();

        // gaps: 10, 12, 18.5
        assert!((summary.scheduled_pct_le_threshold - 100.0 / 3.0).abs() < 1e-9);
        assert!((summary.scheduled_mean_headway.unwrap() - 40.5 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_gtfs_minutes() {
        assert_eq!(gtfs_minutes("06:30:30").unwrap(), 390.5);
        assert_eq!(gtfs_minutes("25:00").unwrap(), 1500.0);
        assert!(gtfs_minutes("06:75:00").is_err());
        assert!(gtfs_minutes("six").is_err());
    }
}
