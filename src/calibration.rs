//! Polling-rate calibration.
//!
//! Runs the pipeline on a high-frequency ground-truth capture, then again on
//! the same capture thinned to a lower polling rate, and reports how many
//! arrivals survive and how far the adherence figure moves. The downsampled
//! pass reuses each route's full-rate reference point so the only variable
//! is the sampling.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::analysis::pipeline::run_route;
use crate::analysis::utility::{mean, median};
use crate::config::{AnalysisConfig, CalibrationThresholds, DownsampleMethod};
use crate::error::{Breach, BreachKind, CalibrationError};
use crate::telemetry::{TelemetrySnapshot, VehiclePosition};

/// Thins each vehicle's samples to approximately one per `interval`.
///
/// Deterministic: the same input always keeps the same samples. Output is
/// grouped by vehicle id, each vehicle in time order.
pub fn downsample<'a>(
    positions: &[&'a VehiclePosition],
    interval: Duration,
    method: DownsampleMethod,
) -> Vec<&'a VehiclePosition> {
    let mut by_vehicle: BTreeMap<&str, Vec<&'a VehiclePosition>> = BTreeMap::new();
    for &p in positions {
        by_vehicle.entry(p.vehicle_id.as_str()).or_default().push(p);
    }

    let interval_secs = interval.num_seconds().max(1);
    let mut kept = Vec::new();

    for (_, mut samples) in by_vehicle {
        samples.sort_by_key(|p| p.sample_time);
        match method {
            DownsampleMethod::Aligned => keep_first_per_bucket(&samples, interval_secs, &mut kept),
            DownsampleMethod::Stride => keep_every_nth(&samples, interval_secs, &mut kept),
        }
    }

    kept
}

/// Keeps the first sample at or after each `interval`-aligned epoch boundary.
fn keep_first_per_bucket<'a>(
    samples: &[&'a VehiclePosition],
    interval_secs: i64,
    kept: &mut Vec<&'a VehiclePosition>,
) {
    let mut last_bucket = None;
    for &p in samples {
        let bucket = p.sample_time.timestamp().div_euclid(interval_secs);
        if last_bucket != Some(bucket) {
            kept.push(p);
            last_bucket = Some(bucket);
        }
    }
}

/// Keeps every Nth sample, N = interval / the vehicle's median sampling gap.
fn keep_every_nth<'a>(
    samples: &[&'a VehiclePosition],
    interval_secs: i64,
    kept: &mut Vec<&'a VehiclePosition>,
) {
    let gaps: Vec<f64> = samples
        .windows(2)
        .map(|w| (w[1].sample_time - w[0].sample_time).num_milliseconds() as f64 / 1000.0)
        .collect();
    let base = median(&gaps);

    if base <= 0.0 {
        kept.extend_from_slice(samples);
        return;
    }

    let step = ((interval_secs as f64 / base).round() as usize).max(1);
    kept.extend(samples.iter().step_by(step).copied());
}

/// One route compared at full and reduced polling rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteCalibration {
    pub route: String,
    pub reference: Option<f64>,
    pub samples_full: usize,
    pub samples_downsampled: usize,
    pub arrivals_full: usize,
    pub arrivals_downsampled: usize,
    pub detection_rate: Option<f64>,
    pub pct_le_threshold_full: Option<f64>,
    pub pct_le_threshold_downsampled: Option<f64>,
    pub adherence_error_pp: Option<f64>,
}

/// All routes at one simulated polling interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationPass {
    pub interval_secs: i64,
    pub routes: Vec<RouteCalibration>,
    pub arrivals_full: usize,
    pub arrivals_downsampled: usize,
    /// Pooled downsampled/full arrival ratio, capped at 1.0.
    pub detection_rate: f64,
    /// Mean per-route absolute adherence difference, in percentage points.
    pub adherence_error_pp: Option<f64>,
    /// Mean signed (downsampled minus full) adherence difference.
    pub mean_delta_pp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub generated_at: DateTime<Utc>,
    pub method: DownsampleMethod,
    pub passes: Vec<CalibrationPass>,
    /// `false` when some longer interval detected more than a shorter one.
    pub monotone: bool,
}

fn ratio(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| (part as f64 / whole as f64).min(1.0))
}

/// Runs the full-rate pass once and one downsampled pass per interval.
///
/// `routes` restricts the routes considered; all routes in the snapshot when empty.
#[tracing::instrument(skip_all, fields(samples = snapshot.len(), ?intervals_secs, ?method))]
pub fn calibrate(
    snapshot: &TelemetrySnapshot,
    routes: &[String],
    config: &AnalysisConfig,
    intervals_secs: &[i64],
    method: DownsampleMethod,
    generated_at: DateTime<Utc>,
) -> Result<CalibrationReport, CalibrationError> {
    let by_route = snapshot.by_route();
    let selected: Vec<(&str, &Vec<&VehiclePosition>)> = by_route
        .iter()
        .filter(|(route, _)| routes.is_empty() || routes.iter().any(|r| r == *route))
        .map(|(route, positions)| (*route, positions))
        .collect();

    let full: Vec<_> = selected
        .iter()
        .map(|&(route, positions)| (route, positions, run_route(route, positions, config, None)))
        .collect();

    let ground_truth: usize = full.iter().map(|(_, _, run)| run.arrivals.len()).sum();
    if ground_truth == 0 {
        return Err(CalibrationError::NoGroundTruth);
    }

    let passes: Vec<CalibrationPass> = intervals_secs
        .iter()
        .map(|&interval_secs| {
            let routes: Vec<RouteCalibration> = full
                .iter()
                .map(|(route, positions, full_run)| {
                    let reference = full_run.outcome.reference().map(|r| r.distance);
                    let thinned =
                        downsample(positions, Duration::seconds(interval_secs), method);
                    let down_run =
                        reference.map(|d| run_route(route, &thinned, config, Some(d)));

                    let arrivals_downsampled = down_run.as_ref().map_or(0, |r| r.arrivals.len());
                    let full_pct = full_run.outcome.metrics().map(|m| m.pct_le_threshold);
                    let down_pct = down_run
                        .as_ref()
                        .and_then(|r| r.outcome.metrics())
                        .map(|m| m.pct_le_threshold);

                    RouteCalibration {
                        route: route.to_string(),
                        reference,
                        samples_full: positions.len(),
                        samples_downsampled: thinned.len(),
                        arrivals_full: full_run.arrivals.len(),
                        arrivals_downsampled,
                        detection_rate: ratio(arrivals_downsampled, full_run.arrivals.len()),
                        pct_le_threshold_full: full_pct,
                        pct_le_threshold_downsampled: down_pct,
                        adherence_error_pp: full_pct.zip(down_pct).map(|(f, d)| (d - f).abs()),
                    }
                })
                .collect();

            summarize_pass(interval_secs, routes)
        })
        .collect();

    let rises = rate_rises(&passes);
    for b in &rises {
        warn!(breach = %b, "Detection rate rose with polling interval");
    }

    Ok(CalibrationReport {
        generated_at,
        method,
        monotone: rises.is_empty(),
        passes,
    })
}

/// Each pass whose rate exceeds that of the next-shorter interval.
fn rate_rises(passes: &[CalibrationPass]) -> Vec<Breach> {
    let mut ordered: Vec<&CalibrationPass> = passes.iter().collect();
    ordered.sort_by_key(|p| p.interval_secs);

    ordered
        .windows(2)
        .filter(|w| w[1].interval_secs > w[0].interval_secs)
        .filter(|w| w[1].detection_rate > w[0].detection_rate)
        .map(|w| Breach {
            interval_secs: w[1].interval_secs,
            kind: BreachKind::NonMonotone {
                shorter_interval_secs: w[0].interval_secs,
                shorter_rate: w[0].detection_rate,
                observed: w[1].detection_rate,
            },
        })
        .collect()
}

fn summarize_pass(interval_secs: i64, routes: Vec<RouteCalibration>) -> CalibrationPass {
    let arrivals_full: usize = routes.iter().map(|r| r.arrivals_full).sum();
    let arrivals_downsampled: usize = routes
        .iter()
        .filter(|r| r.arrivals_full > 0)
        .map(|r| r.arrivals_downsampled)
        .sum();

    let deltas: Vec<f64> = routes
        .iter()
        .filter_map(|r| {
            r.pct_le_threshold_full
                .zip(r.pct_le_threshold_downsampled)
                .map(|(f, d)| d - f)
        })
        .collect();
    let errors: Vec<f64> = deltas.iter().map(|d| d.abs()).collect();

    let pass = CalibrationPass {
        interval_secs,
        arrivals_full,
        arrivals_downsampled,
        detection_rate: ratio(arrivals_downsampled, arrivals_full).unwrap_or(0.0),
        adherence_error_pp: (!errors.is_empty()).then(|| mean(&errors)),
        mean_delta_pp: (!deltas.is_empty()).then(|| mean(&deltas)),
        routes,
    };

    info!(
        interval_secs,
        arrivals_full,
        arrivals_downsampled,
        detection_rate = pass.detection_rate,
        adherence_error_pp = ?pass.adherence_error_pp,
        "Calibration pass complete"
    );

    pass
}

impl CalibrationReport {
    /// Checks every pass against `thresholds`.
    pub fn validate(&self, thresholds: &CalibrationThresholds) -> Result<(), CalibrationError> {
        let mut breaches = Vec::new();

        for pass in &self.passes {
            if pass.detection_rate < thresholds.min_detection_rate {
                breaches.push(Breach {
                    interval_secs: pass.interval_secs,
                    kind: BreachKind::DetectionRate {
                        observed: pass.detection_rate,
                        minimum: thresholds.min_detection_rate,
                    },
                });
            }

            match pass.adherence_error_pp {
                Some(err) if err > thresholds.max_adherence_error_pp => breaches.push(Breach {
                    interval_secs: pass.interval_secs,
                    kind: BreachKind::AdherenceError {
                        observed: err,
                        maximum: thresholds.max_adherence_error_pp,
                    },
                }),
                Some(_) => {}
                None => breaches.push(Breach {
                    interval_secs: pass.interval_secs,
                    kind: BreachKind::AdherenceUnmeasured,
                }),
            }
        }

        breaches.extend(rate_rises(&self.passes));

        if breaches.is_empty() {
            Ok(())
        } else {
            for b in &breaches {
                warn!(breach = %b, "Calibration threshold breached");
            }
            Err(CalibrationError::ThresholdBreach(breaches))
        }
    }
}
