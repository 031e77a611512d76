//! Analysis configuration.
//!
//! Stored as a JSON object on disk. Every field has a default, so a partial
//! file only overrides what it names:
//! ```json
//! {
//!   "timezone": "America/Chicago",
//!   "min_gap_minutes": 30,
//!   "reference_overrides": { "79": 41250.0 },
//!   "calibration": { "interval_secs": 300, "thresholds": { "min_detection_rate": 0.9 } }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::analysis::window::{ServiceWindow, ServiceWindows};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Zone used to place arrivals into service windows.
    pub timezone: Tz,
    pub threshold_minutes: f64,
    pub grace_minutes: f64,
    pub bunching_minutes: f64,
    /// Two detections of the same vehicle closer than this are one arrival.
    pub min_gap_minutes: i64,
    /// Headways above this are treated as service gaps and dropped.
    pub max_headway_minutes: Option<f64>,
    /// Routes with fewer headways than this (never less than one) are reported
    /// as insufficient data.
    pub min_headways: usize,
    pub service_windows: ServiceWindows,
    pub routes: Vec<RouteInfo>,
    pub reference_overrides: BTreeMap<String, f64>,
    pub calibration: CalibrationConfig,
}

/// Display metadata for one audited route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub route: String,
    pub name: String,
    pub phase: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DownsampleMethod {
    /// First sample of each vehicle in every epoch-aligned interval bucket.
    Aligned,
    /// Every Nth sample of each vehicle, N derived from its median gap.
    Stride,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub interval_secs: i64,
    pub method: DownsampleMethod,
    pub thresholds: CalibrationThresholds,
}

/// Acceptance bounds for a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationThresholds {
    /// Lowest acceptable downsampled/full arrival ratio (0.0–1.0).
    pub min_detection_rate: f64,
    /// Largest acceptable adherence error, in percentage points.
    pub max_adherence_error_pp: f64,
}

/// Headway cut-offs (minutes) used when summarising a route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricThresholds {
    pub threshold: f64,
    pub grace: f64,
    pub bunching: f64,
}

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            grace: 12.0,
            bunching: 2.0,
        }
    }
}

impl Default for CalibrationThresholds {
    fn default() -> Self {
        Self {
            min_detection_rate: 0.90,
            max_adherence_error_pp: 2.0,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            method: DownsampleMethod::Aligned,
            thresholds: CalibrationThresholds::default(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Chicago,
            threshold_minutes: 10.0,
            grace_minutes: 12.0,
            bunching_minutes: 2.0,
            min_gap_minutes: 30,
            max_headway_minutes: Some(120.0),
            min_headways: 1,
            service_windows: ServiceWindows {
                weekday: ServiceWindow::new(6, 21),
                weekend: ServiceWindow::new(9, 21),
            },
            routes: frequent_network(),
            reference_overrides: BTreeMap::new(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_gap_minutes < 0 || Duration::try_minutes(self.min_gap_minutes).is_none() {
            anyhow::bail!("min_gap_minutes out of range: {}", self.min_gap_minutes);
        }
        for (name, value) in [
            ("threshold_minutes", self.threshold_minutes),
            ("grace_minutes", self.grace_minutes),
            ("bunching_minutes", self.bunching_minutes),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("{name} must be a non-negative number, got {value}");
            }
        }
        if self.max_headway_minutes.is_some_and(|m| !(m.is_finite() && m > 0.0)) {
            anyhow::bail!("max_headway_minutes must be positive");
        }
        if self.calibration.interval_secs <= 0 {
            anyhow::bail!("calibration.interval_secs must be positive");
        }
        self.service_windows.weekday.validate()?;
        self.service_windows.weekend.validate()?;
        Ok(())
    }

    /// Saturates instead of panicking for configs that skipped [`Self::load`].
    pub fn min_gap(&self) -> Duration {
        Duration::try_minutes(self.min_gap_minutes).unwrap_or(Duration::MAX)
    }

    pub fn metric_thresholds(&self) -> MetricThresholds {
        MetricThresholds {
            threshold: self.threshold_minutes,
            grace: self.grace_minutes,
            bunching: self.bunching_minutes,
        }
    }

    pub fn route_info(&self, route: &str) -> Option<&RouteInfo> {
        self.routes.iter().find(|r| r.route == route)
    }

    pub fn route_ids(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.route.clone()).collect()
    }
}

/// The 20 Frequent Network routes, by launch phase.
fn frequent_network() -> Vec<RouteInfo> {
    const ROSTER: &[(&str, &str, u8)] = &[
        ("J14", "Jeffery Jump", 1),
        ("34", "South Michigan", 1),
        ("47", "47th", 1),
        ("54", "Cicero", 1),
        ("60", "Blue Island/26th", 1),
        ("63", "63rd", 1),
        ("79", "79th", 1),
        ("95", "95th", 1),
        ("4", "Cottage Grove", 2),
        ("20", "Madison", 2),
        ("49", "Western", 2),
        ("66", "Chicago", 2),
        ("53", "Pulaski", 3),
        ("55", "Garfield", 3),
        ("77", "Belmont", 3),
        ("82", "Kimball/Homan", 3),
        ("9", "Ashland", 4),
        ("12", "Roosevelt", 4),
        ("72", "North", 4),
        ("81", "Lawrence", 4),
    ];

    ROSTER
        .iter()
        .map(|&(route, name, phase)| RouteInfo {
            route: route.to_string(),
            name: name.to_string(),
            phase,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    #[test]
    fn test_defaults_cover_frequent_network() {
        let config = AnalysisConfig::default();
        assert_eq!(config.routes.len(), 20);
        assert_eq!(config.route_info("79").unwrap().phase, 1);
        assert_eq!(config.route_info("81").unwrap().name, "Lawrence");
        assert_eq!(config.min_gap(), Duration::minutes(30));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = format!("{}/headway_check_partial_config.json", env::temp_dir().display());
        fs::write(
            &path,
            r#"{ "min_gap_minutes": 20, "reference_overrides": { "79": 5000.0 },
                 "calibration": { "thresholds": { "min_detection_rate": 0.8 } } }"#,
        )
        .unwrap();

        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.min_gap_minutes, 20);
        assert_eq!(config.reference_overrides.get("79"), Some(&5000.0));
        assert_eq!(config.calibration.thresholds.min_detection_rate, 0.8);
        assert_eq!(config.calibration.thresholds.max_adherence_error_pp, 2.0);
        assert_eq!(config.calibration.interval_secs, 300);
        assert_eq!(config.timezone, chrono_tz::America::Chicago);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rejects_inverted_window() {
        let path = format!("{}/headway_check_bad_window.json", env::temp_dir().display());
        fs::write(
            &path,
            r#"{ "service_windows": { "weekday": { "start_hour": 21, "end_hour": 6 },
                                      "weekend": { "start_hour": 9, "end_hour": 21 } } }"#,
        )
        .unwrap();

        assert!(AnalysisConfig::load(&path).is_err());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rejects_out_of_range_min_gap() {
        let path = format!("{}/headway_check_huge_gap.json", env::temp_dir().display());
        fs::write(&path, r#"{ "min_gap_minutes": 9223372036854775807 }"#).unwrap();

        let err = AnalysisConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("min_gap_minutes"));

        fs::remove_file(&path).unwrap();

        let config = AnalysisConfig {
            min_gap_minutes: i64::MAX,
            ..AnalysisConfig::default()
        };
        assert_eq!(config.min_gap(), Duration::MAX);
    }

    #[test]
    fn test_rejects_non_finite_thresholds() {
        let mut config = AnalysisConfig::default();
        assert!(config.validate().is_ok());

        config.threshold_minutes = f64::NAN;
        assert!(config.validate().is_err());

        config.threshold_minutes = 10.0;
        config.bunching_minutes = f64::INFINITY;
        assert!(config.validate().is_err());

        config.bunching_minutes = 2.0;
        config.max_headway_minutes = Some(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_path_is_default() {
        let config = AnalysisConfig::load_or_default(None).unwrap();
        assert_eq!(config.threshold_minutes, 10.0);
    }
}
