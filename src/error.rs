use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failures of the calibration harness.
///
/// `NoGroundTruth` is a data problem; `ThresholdBreach` means the detector or
/// its parameters need review at the tested polling interval.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("full-rate telemetry produced no arrivals to calibrate against")]
    NoGroundTruth,
    #[error("calibration thresholds breached: {}", join(.0))]
    ThresholdBreach(Vec<Breach>),
}

/// One acceptance bound missed by one calibration pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breach {
    pub interval_secs: i64,
    #[serde(flatten)]
    pub kind: BreachKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "breach", rename_all = "snake_case")]
pub enum BreachKind {
    DetectionRate { observed: f64, minimum: f64 },
    AdherenceError { observed: f64, maximum: f64 },
    /// No route had adherence figures at both polling rates.
    AdherenceUnmeasured,
    /// Detection improved when polling less often than a shorter interval.
    NonMonotone {
        shorter_interval_secs: i64,
        shorter_rate: f64,
        observed: f64,
    },
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BreachKind::DetectionRate { observed, minimum } => write!(
                f,
                "{}s: detection rate {:.1}% below {:.1}%",
                self.interval_secs,
                observed * 100.0,
                minimum * 100.0
            ),
            BreachKind::AdherenceError { observed, maximum } => write!(
                f,
                "{}s: adherence error {observed:.2}pp above {maximum:.2}pp",
                self.interval_secs
            ),
            BreachKind::AdherenceUnmeasured => {
                write!(f, "{}s: adherence not measurable", self.interval_secs)
            }
            BreachKind::NonMonotone {
                shorter_interval_secs,
                shorter_rate,
                observed,
            } => write!(
                f,
                "{}s: detection rate {:.1}% above {:.1}% at {shorter_interval_secs}s",
                self.interval_secs,
                observed * 100.0,
                shorter_rate * 100.0
            ),
        }
    }
}

fn join(breaches: &[Breach]) -> String {
    breaches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
