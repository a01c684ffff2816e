//! Tracking error, jerk, overshoot and stall diagnostics (layers 1-3)

use crate::config::MetricsConfig;
use crate::stats;
use crate::types::{Micros, TrackingMetrics};

use super::CursorSample;

/// Minimum resampled points for a third difference
const MIN_JERK_POINTS: usize = 4;

pub fn tracking_metrics(
    samples: &[CursorSample],
    duration_sec: f64,
    config: &MetricsConfig,
) -> TrackingMetrics {
    let tracked: Vec<&CursorSample> = samples.iter().filter(|s| s.target.is_some()).collect();
    let errors: Vec<f64> = tracked.iter().filter_map(|s| s.error()).collect();
    if errors.is_empty() {
        return TrackingMetrics::default();
    }

    let on_target = errors
        .iter()
        .filter(|e| **e <= config.target_radius_px)
        .count();
    let positions: Vec<(Micros, f64, f64)> = tracked.iter().map(|s| (s.t, s.x, s.y)).collect();
    let grid = resample(&positions, config.resample_hz);
    let overshoot_count = count_overshoots(&errors, config.target_radius_px);
    let minutes = duration_sec / 60.0;

    TrackingMetrics {
        sample_count: errors.len() as u32,
        mean_error_px: Some(stats::mean(&errors)),
        error_variance: Some(stats::variance(&errors)),
        time_on_target: Some(on_target as f64 / errors.len() as f64),
        jerk_mean: jerk_mean(&grid, config.resample_hz),
        overshoot_count,
        overshoots_per_min: if minutes > 0.0 {
            overshoot_count as f64 / minutes
        } else {
            0.0
        },
    }
}

/// Linearly interpolate an irregular, time-sorted trace onto a fixed-rate
/// grid starting at the first sample. A single forward pointer walks the
/// samples, so the cost is linear in samples plus grid points.
pub fn resample(samples: &[(Micros, f64, f64)], hz: f64) -> Vec<(f64, f64)> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    if hz <= 0.0 {
        return Vec::new();
    }
    let step_us = 1_000_000.0 / hz;
    let span = last.0.saturating_sub(first.0) as f64;
    let points = (span / step_us).floor() as usize + 1;

    let mut out = Vec::with_capacity(points);
    let mut j = 0;
    for k in 0..points {
        let t = first.0 as f64 + k as f64 * step_us;
        while j + 1 < samples.len() && (samples[j + 1].0 as f64) < t {
            j += 1;
        }
        let a = samples[j];
        let Some(b) = samples.get(j + 1) else {
            out.push((a.1, a.2));
            continue;
        };
        let dt = b.0.saturating_sub(a.0) as f64;
        if dt <= 0.0 {
            out.push((b.1, b.2));
            continue;
        }
        let f = ((t - a.0 as f64) / dt).clamp(0.0, 1.0);
        out.push((a.1 + (b.1 - a.1) * f, a.2 + (b.2 - a.2) * f));
    }
    out
}

/// Mean jerk magnitude (px/s^3) from third differences on a grid sampled at
/// `hz`; `None` with fewer than four points
pub fn jerk_mean(grid: &[(f64, f64)], hz: f64) -> Option<f64> {
    if grid.len() < MIN_JERK_POINTS || hz <= 0.0 {
        return None;
    }
    let dt3 = (1.0 / hz).powi(3);
    let jerks: Vec<f64> = grid
        .windows(4)
        .map(|w| {
            let jx = (w[3].0 - 3.0 * w[2].0 + 3.0 * w[1].0 - w[0].0) / dt3;
            let jy = (w[3].1 - 3.0 * w[2].1 + 3.0 * w[1].1 - w[0].1) / dt3;
            jx.hypot(jy)
        })
        .collect();
    Some(stats::mean(&jerks))
}

/// Count approaches that closed in, entered the target radius, and then
/// started opening again
pub fn count_overshoots(errors: &[f64], radius: f64) -> u32 {
    let mut armed = false;
    let mut count = 0;
    for w in errors.windows(2) {
        let (prev, cur) = (w[0], w[1]);
        if cur < prev {
            if cur <= radius && prev > radius {
                armed = true;
            }
        } else if cur > prev && armed {
            count += 1;
            armed = false;
        }
    }
    count
}

/// Gaps between consecutive samples longer than `threshold_us`
pub fn count_stalls(times: &[Micros], threshold_us: f64) -> u32 {
    times
        .windows(2)
        .filter(|w| w[1].saturating_sub(w[0]) as f64 > threshold_us)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: Micros, x: f64, y: f64, tx: f64, ty: f64) -> CursorSample {
        CursorSample {
            t,
            x,
            y,
            target: Some((tx, ty)),
        }
    }

    #[test]
    fn test_tracking_error_and_time_on_target() {
        let samples = vec![
            sample(0, 0.0, 0.0, 3.0, 4.0),
            sample(16_667, 0.0, 0.0, 30.0, 40.0),
            sample(33_333, 0.0, 0.0, 0.0, 0.0),
        ];
        let m = tracking_metrics(&samples, 1.0, &MetricsConfig::default());
        assert_eq!(m.sample_count, 3);
        assert!((m.mean_error_px.unwrap() - 55.0 / 3.0).abs() < 1e-9);
        assert!((m.time_on_target.unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_target_samples_gives_empty_section() {
        let samples = vec![CursorSample {
            t: 0,
            x: 1.0,
            y: 1.0,
            target: None,
        }];
        let m = tracking_metrics(&samples, 1.0, &MetricsConfig::default());
        assert_eq!(m, TrackingMetrics::default());
    }

    #[test]
    fn test_resample_interpolates_irregular_trace() {
        let samples = vec![(0, 0.0, 0.0), (10_000, 10.0, 0.0), (50_000, 50.0, 20.0)];
        let grid = resample(&samples, 100.0);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0], (0.0, 0.0));
        assert!((grid[2].0 - 20.0).abs() < 1e-9);
        assert!((grid[2].1 - 5.0).abs() < 1e-9);
        assert!((grid[5].0 - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_jerk_zero_for_constant_velocity_and_acceleration() {
        let linear: Vec<(f64, f64)> = (0..10).map(|i| (i as f64 * 5.0, 0.0)).collect();
        assert!(jerk_mean(&linear, 60.0).unwrap().abs() < 1e-6);

        let quadratic: Vec<(f64, f64)> = (0..10).map(|i| ((i * i) as f64, 0.0)).collect();
        assert!(jerk_mean(&quadratic, 60.0).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_jerk_of_cubic() {
        // x = i^3 on a unit grid has third difference 6
        let cubic: Vec<(f64, f64)> = (0..6).map(|i| ((i * i * i) as f64, 0.0)).collect();
        assert!((jerk_mean(&cubic, 1.0).unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_jerk_requires_four_points() {
        assert_eq!(jerk_mean(&[(0.0, 0.0); 3], 60.0), None);
    }

    #[test]
    fn test_overshoot_detection() {
        // Approach, enter, drift away: one overshoot. Then approach without entering.
        let errors = [100.0, 60.0, 30.0, 20.0, 35.0, 80.0, 70.0, 50.0, 60.0];
        assert_eq!(count_overshoots(&errors, 40.0), 1);
    }

    #[test]
    fn test_stalls() {
        let times = [0, 16_667, 33_333, 133_333, 150_000];
        assert_eq!(count_stalls(&times, 50_000.0), 1);
    }
}
