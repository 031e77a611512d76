//! Data types derived by the headway pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// The along-route distance standing in for a virtual stop on one route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferencePoint {
    pub distance: f64,
    pub observed_min: f64,
    pub observed_max: f64,
    /// `true` when the distance came from configuration rather than the midpoint.
    pub overridden: bool,
}

/// One vehicle passing the reference point once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopArrival {
    pub route: String,
    pub vehicle_id: String,
    pub arrival_time: DateTime<Utc>,
    pub crossing_distance: f64,
}

/// Gap between two chronologically consecutive arrivals on a route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headway {
    pub route: String,
    pub start_arrival: DateTime<Utc>,
    pub end_arrival: DateTime<Utc>,
    pub start_vehicle: String,
    pub end_vehicle: String,
    pub duration_minutes: f64,
}

impl Headway {
    pub fn between(start: &StopArrival, end: &StopArrival) -> Self {
        let elapsed = end.arrival_time - start.arrival_time;
        Self {
            route: end.route.clone(),
            start_arrival: start.arrival_time,
            end_arrival: end.arrival_time,
            start_vehicle: start.vehicle_id.clone(),
            end_vehicle: end.vehicle_id.clone(),
            duration_minutes: elapsed.num_milliseconds() as f64 / 60_000.0,
        }
    }
}

/// Per-route adherence summary. Percentages are 0–100.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdherenceMetrics {
    pub route: String,
    /// Arrivals the detector produced, before service-window filtering.
    pub arrival_count: usize,
    pub arrivals_in_service: usize,
    pub headway_count: usize,
    /// Headways dropped as service gaps by the outlier cap.
    pub headways_over_cap: usize,
    pub mean_headway: f64,
    pub pct_le_threshold: f64,
    pub median_headway: f64,
    pub std_headway: f64,
    pub cv_headway: f64,
    pub pct_le_grace: f64,
    pub pct_over_15: f64,
    pub pct_over_20: f64,
    pub max_headway: f64,
    pub bunching_rate: f64,
    pub excess_wait_time: f64,
}

/// Why a route produced no adherence figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InsufficientData {
    NoTelemetry,
    UnresolvableReference { distinct_distances: usize },
    ReferenceOutOfRange { reference: f64, min: f64, max: f64 },
    NoCrossings { samples: usize },
    TooFewHeadways { headways: usize, required: usize },
}

impl fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsufficientData::NoTelemetry => write!(f, "no telemetry"),
            InsufficientData::UnresolvableReference { distinct_distances } => write!(
                f,
                "unresolvable reference point ({distinct_distances} distinct distance values)"
            ),
            InsufficientData::ReferenceOutOfRange { reference, min, max } => write!(
                f,
                "reference {reference} outside observed range ({min}, {max})"
            ),
            InsufficientData::NoCrossings { samples } => {
                write!(f, "no crossings in {samples} samples")
            }
            InsufficientData::TooFewHeadways { headways, required } => {
                write!(f, "{headways} headways, {required} required")
            }
        }
    }
}

/// Result of running the pipeline over one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteOutcome {
    Measured {
        reference: ReferencePoint,
        metrics: AdherenceMetrics,
    },
    InsufficientData {
        route: String,
        reference: Option<ReferencePoint>,
        /// Arrivals the detector produced, before service-window filtering.
        arrival_count: usize,
        detail: InsufficientData,
    },
}

impl RouteOutcome {
    pub fn route(&self) -> &str {
        match self {
            RouteOutcome::Measured { metrics, .. } => &metrics.route,
            RouteOutcome::InsufficientData { route, .. } => route,
        }
    }

    pub fn metrics(&self) -> Option<&AdherenceMetrics> {
        match self {
            RouteOutcome::Measured { metrics, .. } => Some(metrics),
            RouteOutcome::InsufficientData { .. } => None,
        }
    }

    pub fn reference(&self) -> Option<&ReferencePoint> {
        match self {
            RouteOutcome::Measured { reference, .. } => Some(reference),
            RouteOutcome::InsufficientData { reference, .. } => reference.as_ref(),
        }
    }

    /// Detected arrivals, with the same meaning for both variants.
    pub fn arrival_count(&self) -> usize {
        match self {
            RouteOutcome::Measured { metrics, .. } => metrics.arrival_count,
            RouteOutcome::InsufficientData { arrival_count, .. } => *arrival_count,
        }
    }
}
