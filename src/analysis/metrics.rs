use crate::analysis::types::AdherenceMetrics;
use crate::analysis::utility::{mean, median, pct, sample_stddev};
use crate::config::MetricThresholds;

/// Summarises headway durations (minutes) for one route.
///
/// The series is taken as complete: every arrival counts as in service and
/// no headway as capped. The pipeline overrides both counts.
///
/// Excess wait time is `Σh² / (2Σh) − mean / 2`, the average extra wait a
/// randomly arriving rider sees over perfectly even service.
pub fn compute_metrics(
    route: &str,
    arrival_count: usize,
    headways: &[f64],
    thresholds: &MetricThresholds,
) -> AdherenceMetrics {
    let mean_h = mean(headways);
    let std_h = sample_stddev(headways, mean_h);

    let sum: f64 = headways.iter().sum();
    let sum_sq: f64 = headways.iter().map(|h| h * h).sum();
    let excess_wait_time = if sum > 0.0 {
        sum_sq / (2.0 * sum) - mean_h / 2.0
    } else {
        0.0
    };

    AdherenceMetrics {
        route: route.to_string(),
        arrival_count,
        arrivals_in_service: arrival_count,
        headway_count: headways.len(),
        headways_over_cap: 0,
        mean_headway: mean_h,
        pct_le_threshold: pct(headways, |h| h <= thresholds.threshold),
        median_headway: median(headways),
        std_headway: std_h,
        cv_headway: if mean_h > 0.0 { std_h / mean_h } else { 0.0 },
        pct_le_grace: pct(headways, |h| h <= thresholds.grace),
        pct_over_15: pct(headways, |h| h > 15.0),
        pct_over_20: pct(headways, |h| h > 20.0),
        max_headway: headways.iter().copied().fold(0.0, f64::max),
        bunching_rate: pct(headways, |h| h < thresholds.bunching),
        excess_wait_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [f64; 20] = [
        8.0, 9.0, 10.0, 11.0, 10.0, 9.0, 8.0, 12.0, 15.0, 10.0, 9.0, 11.0, 10.0, 2.0, 18.0, 10.0,
        9.0, 10.0, 11.0, 10.0,
    ];

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sample_metrics() {
        let m = compute_metrics("79", 21, &SAMPLE, &MetricThresholds::default());

        assert_eq!(m.headway_count, 20);
        assert_eq!(m.arrival_count, 21);
        assert!(close(m.mean_headway, 10.1));
        assert!(close(m.median_headway, 10.0));
        // 14 of 20 are <= 10
        assert!(close(m.pct_le_threshold, 70.0));
        // 18 of 20 are <= 12
        assert!(close(m.pct_le_grace, 90.0));
        assert!(close(m.pct_over_15, 5.0));
        assert!(close(m.pct_over_20, 0.0));
        assert!(close(m.max_headway, 18.0));
        // strictly below 2, so the 2-minute headway is not bunched
        assert!(close(m.bunching_rate, 0.0));
        assert!(close(m.cv_headway, m.std_headway / m.mean_headway));

        let sum: f64 = SAMPLE.iter().sum();
        let sum_sq: f64 = SAMPLE.iter().map(|h| h * h).sum();
        assert!(close(m.excess_wait_time, sum_sq / (2.0 * sum) - 10.1 / 2.0));
    }

    #[test]
    fn test_uniform_headways_have_no_excess_wait() {
        let m = compute_metrics("79", 6, &[10.0; 5], &MetricThresholds::default());
        assert!(close(m.excess_wait_time, 0.0));
        assert!(close(m.cv_headway, 0.0));
        assert!(close(m.pct_le_threshold, 100.0));
    }

    #[test]
    fn test_empty_headways() {
        let m = compute_metrics("79", 0, &[], &MetricThresholds::default());
        assert_eq!(m.headway_count, 0);
        assert_eq!(m.mean_headway, 0.0);
        assert_eq!(m.excess_wait_time, 0.0);
    }
}
