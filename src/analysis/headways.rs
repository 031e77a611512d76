//! Route-level headways from merged arrival events.
//!
//! Headways are measured on elapsed wall-clock time between consecutive
//! arrivals regardless of which vehicle produced them, and only between two
//! arrivals inside the same service period.

use chrono_tz::Tz;
use tracing::debug;

use crate::analysis::types::{Headway, StopArrival};
use crate::analysis::window::{ServicePeriod, ServiceWindows};

/// Arrivals in service hours and the headways between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadwaySeries {
    pub arrivals_in_service: usize,
    pub headways: Vec<Headway>,
    /// Headways discarded for exceeding the outlier cap.
    pub over_cap: usize,
}

impl HeadwaySeries {
    pub fn minutes(&self) -> Vec<f64> {
        self.headways.iter().map(|h| h.duration_minutes).collect()
    }
}

/// Sorts arrivals and keeps those inside a service window, tagged with their period.
pub fn filter_to_service_window<'a>(
    arrivals: &'a [StopArrival],
    windows: &ServiceWindows,
    tz: Tz,
) -> Vec<(ServicePeriod, &'a StopArrival)> {
    let mut sorted: Vec<&StopArrival> = arrivals.iter().collect();
    sorted.sort_by(|a, b| {
        a.arrival_time
            .cmp(&b.arrival_time)
            .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
    });

    sorted
        .into_iter()
        .filter_map(|a| windows.period_of(a.arrival_time, tz).map(|p| (p, a)))
        .collect()
}

/// Computes headways between consecutive in-service arrivals of one route.
///
/// A pair straddling two service periods (e.g. overnight) produces no headway,
/// and neither does the first arrival of each period. When `max_minutes` is set,
/// longer headways are dropped as service gaps.
pub fn compute_headways(
    arrivals: &[StopArrival],
    windows: &ServiceWindows,
    tz: Tz,
    max_minutes: Option<f64>,
) -> HeadwaySeries {
    let in_service = filter_to_service_window(arrivals, windows, tz);

    let mut headways = Vec::with_capacity(in_service.len().saturating_sub(1));
    let mut over_cap = 0usize;

    for pair in in_service.windows(2) {
        let (prev_period, prev) = pair[0];
        let (period, cur) = pair[1];
        if prev_period != period {
            continue;
        }

        let headway = Headway::between(prev, cur);
        if max_minutes.is_some_and(|max| headway.duration_minutes > max) {
            over_cap += 1;
            continue;
        }
        headways.push(headway);
    }

    debug!(
        arrivals = arrivals.len(),
        in_service = in_service.len(),
        headways = headways.len(),
        over_cap,
        "Headways computed"
    );

    HeadwaySeries {
        arrivals_in_service: in_service.len(),
        headways,
        over_cap,
    }
}
