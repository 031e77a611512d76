//! CLI entry point for the headway adherence checker.
//!
//! Provides subcommands for measuring observed headways against the promise,
//! calibrating the detector against a reduced polling rate, and inspecting
//! the reference point chosen for each route.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use headway_check::analysis::pipeline::{analyze_snapshot, select_routes};
use headway_check::analysis::reference::resolve;
use headway_check::calibration::calibrate;
use headway_check::config::{AnalysisConfig, DownsampleMethod};
use headway_check::error::CalibrationError;
use headway_check::output::{print_json, write_json_report, write_json_to_s3, write_route_csv};
use headway_check::schedule::{Schedule, compare, load_schedule};
use headway_check::telemetry::{TelemetrySnapshot, load_snapshot};
use std::ffi::OsStr;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "headway_check")]
#[command(about = "Measure bus headway adherence from vehicle-position telemetry", long_about = None)]
struct Cli {
    /// JSON analysis config; defaults apply when omitted
    #[arg(short, long, global = true, env = "HEADWAY_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Telemetry source shared by every subcommand.
#[derive(clap::Args)]
struct TelemetryArgs {
    /// Path or URL of the telemetry CSV export (optionally gzipped)
    #[arg(value_name = "FILE_OR_URL")]
    telemetry: String,

    /// Only use samples at or after this instant (RFC 3339)
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Only use samples before this instant (RFC 3339)
    #[arg(long)]
    until: Option<DateTime<Utc>>,

    /// Route to include; repeatable. Defaults to the configured roster
    #[arg(short, long = "route")]
    routes: Vec<String>,

    /// Include every route present in the telemetry instead of the roster
    #[arg(long, default_value_t = false, conflicts_with = "routes")]
    all_routes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare observed headway adherence with the schedule
    Analyze {
        #[command(flatten)]
        input: TelemetryArgs,

        /// Scheduled summaries CSV; every route is scored against 100% when omitted
        #[arg(short, long)]
        schedule: Option<String>,

        /// JSON report to write
        #[arg(short, long, default_value = "headway_report.json")]
        output: String,

        /// Optional per-route CSV table
        #[arg(long)]
        csv: Option<String>,

        /// Optional: S3 bucket to upload the JSON report to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,
    },
    /// Validate detection at a reduced polling rate against full-rate telemetry
    Calibrate {
        #[command(flatten)]
        input: TelemetryArgs,

        /// Simulated polling interval in seconds; repeatable. Defaults to the config
        #[arg(short, long = "interval")]
        intervals: Vec<i64>,

        /// Downsampling method; defaults to the config
        #[arg(short, long, value_enum)]
        method: Option<DownsampleMethod>,

        /// JSON report to write
        #[arg(short, long, default_value = "calibration_report.json")]
        output: String,
    },
    /// Log the reference point resolved for each route
    References {
        #[command(flatten)]
        input: TelemetryArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/headway_check.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("headway_check.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<CalibrationError>() {
            Some(breach @ CalibrationError::ThresholdBreach(_)) => {
                error!(error = %breach, "Calibration failed");
                ExitCode::from(2)
            }
            _ => {
                error!(error = %format!("{e:#}"), "Run failed");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AnalysisConfig::load_or_default(cli.config.as_deref())?;
    let token = std::env::var("TELEMETRY_API_TOKEN").ok();

    match cli.command {
        Commands::Analyze {
            input,
            schedule,
            output,
            csv,
            s3_bucket,
        } => {
            let snapshot = read_telemetry(&input, token).await?;
            let routes = selected_routes(&input, &config);

            let schedule = match schedule {
                Some(path) => load_schedule(path)?,
                None => {
                    info!("No schedule supplied, scoring routes against the promise");
                    Schedule::new()
                }
            };

            let outcomes = analyze_snapshot(&snapshot, &routes, &config);
            let report = compare(&outcomes, &schedule, &config, Utc::now())
                .with_coverage(snapshot.coverage());

            if report.aggregate.routes_measured == 0 {
                warn!("No route could be measured");
            }
            print_json(&report.aggregate)?;
            if report.coverage.as_ref().is_some_and(|c| c.preliminary) {
                warn!("Less than two weeks of telemetry, results are preliminary");
            }

            write_json_report(&output, &report)?;
            if let Some(path) = csv {
                write_route_csv(path, &report)?;
            }

            if let Some(bucket) = s3_bucket {
                let s3_config = aws_config::load_from_env().await;
                let client = aws_sdk_s3::Client::new(&s3_config);
                let key = format!(
                    "headways/date={}/report.json",
                    report.generated_at.format("%Y-%m-%d")
                );
                write_json_to_s3(&client, &bucket, &key, &report).await?;
            }
        }
        Commands::Calibrate {
            input,
            intervals,
            method,
            output,
        } => {
            let snapshot = read_telemetry(&input, token).await?;
            let routes = selected_routes(&input, &config);

            let intervals = if intervals.is_empty() {
                vec![config.calibration.interval_secs]
            } else {
                intervals
            };
            if let Some(bad) = intervals.iter().find(|&&i| i <= 0) {
                anyhow::bail!("interval must be positive, got {bad}");
            }
            let method = method.unwrap_or(config.calibration.method);

            let report = calibrate(&snapshot, &routes, &config, &intervals, method, Utc::now())?;
            write_json_report(&output, &report)?;
            report.validate(&config.calibration.thresholds)?;

            info!(passes = report.passes.len(), "Calibration within thresholds");
        }
        Commands::References { input } => {
            let snapshot = read_telemetry(&input, token).await?;
            let routes = selected_routes(&input, &config);
            let by_route = snapshot.by_route();

            for route in select_routes(&by_route, &routes) {
                let positions = by_route.get(route).map(Vec::as_slice).unwrap_or_default();
                let pinned = config.reference_overrides.get(route).copied();
                match resolve(positions, pinned) {
                    Ok(r) => info!(
                        route,
                        distance = r.distance,
                        observed_min = r.observed_min,
                        observed_max = r.observed_max,
                        overridden = r.overridden,
                        "Reference point"
                    ),
                    Err(reason) => warn!(route, reason = %reason, "No reference point"),
                }
            }
        }
    }

    Ok(())
}

async fn read_telemetry(input: &TelemetryArgs, token: Option<String>) -> Result<TelemetrySnapshot> {
    let snapshot = load_snapshot(&input.telemetry, token)
        .await?
        .within(input.since, input.until);
    if snapshot.is_empty() {
        warn!(source = %input.telemetry, "Telemetry snapshot is empty");
    }
    Ok(snapshot)
}

/// Explicit routes, every route in the data, or the configured roster.
fn selected_routes(input: &TelemetryArgs, config: &AnalysisConfig) -> Vec<String> {
    if input.all_routes {
        Vec::new()
    } else if input.routes.is_empty() {
        config.route_ids()
    } else {
        input.routes.clone()
    }
}
