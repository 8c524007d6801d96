//! Pure numeric and text helpers for the diagnostics analyzers.

use once_cell::sync::Lazy;
use regex::Regex;

static AVERAGE_RATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"average rate:\s*([0-9]+(?:\.[0-9]+)?)").unwrap());
static BANDWIDTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*(B|KB|MB|GB)/s").unwrap());

/// `average rate: N` from `ros2 topic hz` output, -1 when absent.
pub fn parse_average_rate(text: &str) -> f64 {
    AVERAGE_RATE_RE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(-1.0)
}

/// Bandwidth in bytes/s from `ros2 topic bw` output, -1 when absent.
pub fn parse_bandwidth_bps(text: &str) -> f64 {
    let Some(caps) = BANDWIDTH_RE.captures(text) else {
        return -1.0;
    };
    let value: f64 = caps[1].parse().unwrap_or(-1.0);
    if value < 0.0 {
        return -1.0;
    }
    match &caps[2] {
        "GB" => value * 1024.0 * 1024.0 * 1024.0,
        "MB" => value * 1024.0 * 1024.0,
        "KB" => value * 1024.0,
        _ => value,
    }
}

/// Ordinary-least-squares slope over equally spaced samples; 0 for fewer
/// than 3 points or a degenerate denominator.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 {
        return 0.0;
    }
    let n_f = n as f64;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, &value) in values.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += value;
        sxy += x * value;
        sxx += x * x;
    }
    let denominator = n_f * sxx - sx * sx;
    if denominator.abs() < 1e-9 {
        return 0.0;
    }
    (n_f * sxy - sx * sy) / denominator
}

pub fn bps_to_mbps(bps: f64) -> f64 {
    bps * 8.0 / (1024.0 * 1024.0)
}

/// CPU percentage bucketed to the nearest 5%.
pub fn bucket_5(value: f64) -> f64 {
    (value / 5.0).round() * 5.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_average_rate() {
        assert_eq!(parse_average_rate("average rate: 9.987\n  min: 0.1"), 9.987);
        assert_eq!(parse_average_rate("average rate:30"), 30.0);
        assert_eq!(parse_average_rate("no match"), -1.0);
    }

    #[test]
    fn test_parse_bandwidth_units() {
        assert_eq!(parse_bandwidth_bps("12 B/s"), 12.0);
        assert_eq!(parse_bandwidth_bps("1.5 KB/s"), 1536.0);
        assert_eq!(parse_bandwidth_bps("2 MB/s"), 2.0 * 1024.0 * 1024.0);
        assert_eq!(parse_bandwidth_bps("1 GB/s"), 1024.0 * 1024.0 * 1024.0);
        assert_eq!(parse_bandwidth_bps("nothing"), -1.0);
    }

    #[test]
    fn test_linear_slope_ramp() {
        let values = [1.0, 1.1, 1.2, 1.3, 1.5, 1.7, 2.0, 2.3, 2.7, 3.1];
        let slope = linear_slope(&values);
        assert!(slope > 0.2 && slope < 0.25, "slope was {slope}");
    }

    #[test]
    fn test_linear_slope_short_series_is_zero() {
        assert_eq!(linear_slope(&[1.0, 2.0]), 0.0);
        assert_eq!(linear_slope(&[]), 0.0);
    }

    #[test]
    fn test_linear_slope_flat_is_zero() {
        let slope = linear_slope(&[5.0, 5.0, 5.0, 5.0]);
        assert!(slope.abs() < 1e-9);
    }

    #[test]
    fn test_bucket_5() {
        assert_eq!(bucket_5(0.0), 0.0);
        assert_eq!(bucket_5(12.4), 10.0);
        assert_eq!(bucket_5(12.6), 15.0);
        assert_eq!(bucket_5(97.5), 100.0);
    }
}
