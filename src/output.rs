//! Report persistence: JSON files, per-route CSV, and S3 upload.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info};

use crate::analysis::grade::Grade;
use crate::schedule::ComparisonReport;

/// Logs any report as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes `value` as pretty JSON to `path`, creating parent directories.
pub fn write_json_report(path: impl AsRef<Path>, value: &impl Serialize) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;

    info!(path = %path.display(), "Report written");
    Ok(())
}

/// One CSV row per route in the comparison, in report order.
#[derive(Debug, Serialize)]
struct RouteRow<'a> {
    route: &'a str,
    name: &'a str,
    phase: Option<u8>,
    scheduled_pct: f64,
    observed_pct: Option<f64>,
    delta_pp: Option<f64>,
    observed_mean_headway: Option<f64>,
    headway_count: usize,
    grade: Option<Grade>,
    status: String,
}

/// Writes the per-route table of `report` to `path`, replacing any existing file.
pub fn write_route_csv(path: impl AsRef<Path>, report: &ComparisonReport) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    for r in &report.routes {
        writer.serialize(RouteRow {
            route: &r.route,
            name: &r.name,
            phase: r.phase,
            scheduled_pct: r.scheduled_pct,
            observed_pct: r.observed_pct,
            delta_pp: r.delta_pp,
            observed_mean_headway: r.observed_mean_headway,
            headway_count: r.headway_count,
            grade: r.grade,
            status: r
                .insufficient_data
                .as_ref()
                .map_or_else(|| "measured".to_string(), ToString::to_string),
        })?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = report.routes.len(), "Route CSV written");
    Ok(())
}

/// Serializes a value to JSON and uploads it to an S3 bucket with `application/json` content type.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json")
        .send()
        .await
        .with_context(|| format!("uploading s3://{bucket}/{key}"))?;

    info!(bucket, key, "Report uploaded");
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{InsufficientData, RouteOutcome};
    use crate::config::AnalysisConfig;
    use crate::schedule::compare;
    use chrono::Utc;
    use std::env;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn empty_report() -> ComparisonReport {
        compare(&[], &Default::default(), &AnalysisConfig::default(), Utc::now())
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&empty_report()).unwrap();
    }

    #[test]
    fn test_write_json_report_creates_dirs() {
        let dir = temp_path("headway_check_test_json");
        let _ = fs::remove_dir_all(&dir);
        let path = format!("{dir}/nested/report.json");

        write_json_report(&path, &empty_report()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["threshold_minutes"], 10.0);
        assert_eq!(value["aggregate"]["routes_measured"], 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_route_csv_overwrites() {
        let path = temp_path("headway_check_test_routes.csv");
        let _ = fs::remove_file(&path);

        let outcomes = vec![RouteOutcome::InsufficientData {
            route: "79".to_string(),
            reference: None,
            arrival_count: 0,
            detail: InsufficientData::NoTelemetry,
        }];
        let report = compare(
            &outcomes,
            &Default::default(),
            &AnalysisConfig::default(),
            Utc::now(),
        );
        write_route_csv(&path, &report).unwrap();
        write_route_csv(&path, &report).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("route,name,phase"));
        assert_eq!(lines[1], "79,79th,1,100.0,,,,0,,no telemetry");

        fs::remove_file(&path).unwrap();
    }
}
