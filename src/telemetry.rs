//! Vehicle-position telemetry as written by the poller.
//!
//! The store is append-only and is read here as a snapshot: a CSV export
//! (optionally gzip-compressed) from a local path or an HTTP endpoint.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use tracing::{debug, info, warn};

use crate::fetch::{ApiKey, BasicClient, fetch_bytes};

/// One polled vehicle sample. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub collected_at: DateTime<Utc>,
    #[serde(alias = "vid")]
    pub vehicle_id: String,
    #[serde(alias = "tmstmp")]
    pub sample_time: DateTime<Utc>,
    #[serde(alias = "rt")]
    pub route: String,
    pub direction: Option<String>,
    pub destination: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    /// Progress along the current pattern; resets when a new trip starts.
    #[serde(alias = "pdist")]
    pub along_route_distance: Option<f64>,
    #[serde(alias = "pid")]
    pub pattern_id: Option<String>,
    #[serde(alias = "delayed_flag", default, deserialize_with = "flag")]
    pub delayed: bool,
}

impl VehiclePosition {
    /// Distance and pattern, when both are present and the distance is finite.
    pub fn progress(&self) -> Option<(f64, &str)> {
        let distance = self.along_route_distance.filter(|d| d.is_finite())?;
        let pattern = self.pattern_id.as_deref().filter(|p| !p.is_empty())?;
        Some((distance, pattern))
    }
}

/// Accepts `true`/`false`, `1`/`0` and empty.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => other
            .to_ascii_lowercase()
            .parse::<bool>()
            .map_err(serde::de::Error::custom),
    }
}

/// Collection span below which results are flagged preliminary.
const PRELIMINARY_HOURS: i64 = 14 * 24;

/// How much telemetry a report rests on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataCoverage {
    pub first_poll: Option<DateTime<Utc>>,
    pub last_poll: Option<DateTime<Utc>>,
    /// Whole hours between the first and last poll.
    pub total_hours: i64,
    pub total_positions: usize,
    pub vehicles: usize,
    pub preliminary: bool,
}

/// A read-only view of the telemetry store at invocation time.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    positions: Vec<VehiclePosition>,
}

impl TelemetrySnapshot {
    pub fn new(positions: Vec<VehiclePosition>) -> Self {
        Self { positions }
    }

    pub fn positions(&self) -> &[VehiclePosition] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Parses CSV rows. Rows that fail to parse are skipped and counted.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut positions = Vec::new();
        let mut rejected = 0usize;

        for (line, result) in rdr.deserialize::<VehiclePosition>().enumerate() {
            match result {
                Ok(p) => positions.push(p),
                Err(e) => {
                    rejected += 1;
                    debug!(row = line + 1, error = %e, "Skipping malformed telemetry row");
                }
            }
        }

        if rejected > 0 {
            warn!(rejected, accepted = positions.len(), "Telemetry rows rejected");
        }

        Ok(Self { positions })
    }

    /// Parses a CSV export, transparently gunzipping it when compressed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(&[0x1f, 0x8b]) {
            Self::from_csv_reader(GzDecoder::new(bytes))
        } else {
            Self::from_csv_reader(bytes)
        }
    }

    /// Keeps samples with `since <= sample_time < until`.
    pub fn within(self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        let positions = self
            .positions
            .into_iter()
            .filter(|p| since.is_none_or(|s| p.sample_time >= s))
            .filter(|p| until.is_none_or(|u| p.sample_time < u))
            .collect();
        Self { positions }
    }

    /// Poll span and volume, by collection time.
    pub fn coverage(&self) -> DataCoverage {
        let first_poll = self.positions.iter().map(|p| p.collected_at).min();
        let last_poll = self.positions.iter().map(|p| p.collected_at).max();
        let total_hours = first_poll
            .zip(last_poll)
            .map_or(0, |(first, last)| (last - first).num_hours());
        let vehicles: BTreeSet<&str> = self.positions.iter().map(|p| p.vehicle_id.as_str()).collect();

        DataCoverage {
            first_poll,
            last_poll,
            total_hours,
            total_positions: self.positions.len(),
            vehicles: vehicles.len(),
            preliminary: total_hours < PRELIMINARY_HOURS,
        }
    }

    /// Samples grouped by route, in store order within each route.
    pub fn by_route(&self) -> BTreeMap<&str, Vec<&VehiclePosition>> {
        let mut routes: BTreeMap<&str, Vec<&VehiclePosition>> = BTreeMap::new();
        for p in &self.positions {
            routes.entry(p.route.as_str()).or_default().push(p);
        }
        routes
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Loads a snapshot from a local path or an `http(s)` URL.
///
/// When `token` is set the request carries `Authorization: Bearer <token>`.
#[tracing::instrument(skip(token), fields(source = %source))]
pub async fn load_snapshot(source: &str, token: Option<String>) -> Result<TelemetrySnapshot> {
    let bytes = if is_url(source) {
        match token {
            Some(token) => {
                let client = ApiKey::bearer(BasicClient::new(), &token)?;
                fetch_bytes(&client, source).await?
            }
            None => fetch_bytes(&BasicClient::new(), source).await?,
        }
    } else {
        std::fs::read(source).with_context(|| format!("reading telemetry {source}"))?
    };

    let snapshot = TelemetrySnapshot::from_bytes(&bytes)?;
    info!(samples = snapshot.len(), "Telemetry snapshot loaded");
    Ok(snapshot)
}
