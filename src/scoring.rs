//! Scoring engine
//!
//! Layer performance indices (LPI) from metrics against their baselines, the
//! degradation coefficient (DC) between the first and last layer, the
//! composite readiness score (CRS) and its alert level.
//!
//! Scoring never fails on missing data: anything that cannot be computed yet
//! is `None`, which callers read as "not yet meaningful".

use crate::config::ScoringConfig;
use crate::error::ComputeError;
use crate::stats;
use crate::types::{
    AlertLevel, BaselineKey, BaselineMap, BaselineScope, BaselineStats, CompositeScore,
    LayerMetrics, MetricDirection, MetricName, LAYER_COUNT,
};
use crate::weights::WeightProfile;

/// Position of `value` within a baseline, 0..=1, before direction is applied.
///
/// Short windows are scaled linearly between min and max. Windows at or
/// above `min_samples` use a 4-segment piecewise-linear CDF through
/// (min, Q1, median, Q3, max).
pub fn baseline_position(value: f64, baseline: &BaselineStats, min_samples: usize) -> f64 {
    let (lo, hi) = (baseline.min_val, baseline.max_val);
    if baseline.window_size < min_samples {
        if (hi - lo).abs() < f64::EPSILON {
            return 0.5;
        }
        return ((value - lo) / (hi - lo)).clamp(0.0, 1.0);
    }

    if value <= lo {
        return 0.0;
    }
    if value >= hi {
        return 1.0;
    }
    let breakpoints = [
        (lo, 0.0),
        (baseline.q1, 0.25),
        (baseline.median, 0.5),
        (baseline.q3, 0.75),
        (hi, 1.0),
    ];
    for w in breakpoints.windows(2) {
        let ((x0, p0), (x1, p1)) = (w[0], w[1]);
        if value <= x1 {
            if x1 - x0 <= f64::EPSILON {
                return p1;
            }
            return p0 + (value - x0) / (x1 - x0) * (p1 - p0);
        }
    }
    1.0
}

/// Direction-aware score in 0..=1 (1 is best)
pub fn metric_score(
    value: f64,
    direction: MetricDirection,
    baseline: &BaselineStats,
    min_samples: usize,
) -> f64 {
    let p = baseline_position(value, baseline, min_samples);
    match direction {
        MetricDirection::HigherIsBetter => p,
        MetricDirection::LowerIsBetter => 1.0 - p,
    }
}

/// LPI(3) / LPI(0), defined only when LPI(0) is positive and reaches the
/// validity floor
pub fn degradation_coefficient(lpi0: Option<f64>, lpi3: Option<f64>, floor: f64) -> Option<f64> {
    let (lpi0, lpi3) = (lpi0?, lpi3?);
    if !lpi3.is_finite() || !lpi0.is_finite() || lpi0 <= 0.0 || lpi0 < floor {
        return None;
    }
    Some((lpi3 / lpi0).clamp(0.0, 1.0))
}

/// CRS from mean LPI and DC; without DC the mean LPI stands alone
pub fn composite_readiness(mean_lpi: Option<f64>, dc: Option<f64>, alpha: f64) -> Option<f64> {
    let mean_lpi = mean_lpi.filter(|v| v.is_finite())?;
    let crs = match dc.filter(|v| v.is_finite()) {
        Some(dc) => 100.0 * (alpha * mean_lpi / 100.0 + (1.0 - alpha) * dc),
        None => mean_lpi,
    };
    Some(crs.clamp(0.0, 100.0))
}

/// Computes composite scores with a validated weight profile
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
    profile: WeightProfile,
}

impl ScoringEngine {
    /// Fails when the profile does not validate
    pub fn new(config: ScoringConfig, profile: WeightProfile) -> Result<Self, ComputeError> {
        profile.validate()?;
        Ok(Self { config, profile })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn profile(&self) -> &WeightProfile {
        &self.profile
    }

    /// User baseline for a metric, falling back to the population one
    fn lookup<'a>(baselines: &'a BaselineMap, metric: MetricName, layer: u8) -> Option<&'a BaselineStats> {
        [BaselineScope::User, BaselineScope::Population]
            .into_iter()
            .filter_map(|scope| baselines.get(&BaselineKey::layer_metric(scope, metric, layer)))
            .find(|stats| stats.window_size > 0)
    }

    /// Weighted LPI (0-100) for one layer. Metrics without a value or a
    /// baseline drop out and the remaining weights renormalize.
    pub fn layer_index(&self, metrics: &LayerMetrics, baselines: &BaselineMap) -> Option<f64> {
        let weights = self.profile.layer(metrics.layer);
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (&metric, &weight) in weights {
            let Some(value) = metrics.value(metric).filter(|v| v.is_finite()) else {
                continue;
            };
            let Some(baseline) = Self::lookup(baselines, metric, metrics.layer) else {
                continue;
            };
            let score = metric_score(
                value,
                metric.direction(),
                baseline,
                self.config.min_baseline_samples,
            );
            weighted += weight * score;
            total += weight;
        }
        if total <= 0.0 {
            return None;
        }
        Some((100.0 * weighted / total).clamp(0.0, 100.0))
    }

    /// Alert from the CRS modified z-score; suppressed until the CRS
    /// baseline holds enough sessions
    pub fn alert(&self, crs: Option<f64>, baselines: &BaselineMap) -> AlertLevel {
        let Some(crs) = crs else {
            return AlertLevel::None;
        };
        let Some(baseline) = baselines.get(&BaselineKey::crs(BaselineScope::User)) else {
            return AlertLevel::None;
        };
        if baseline.window_size < self.config.alert_min_window {
            return AlertLevel::None;
        }
        let z = stats::modified_z_score(crs, baseline.median, baseline.mad_scaled);
        if z < self.config.alert_critical_z {
            AlertLevel::Critical
        } else if z < self.config.alert_warning_z {
            AlertLevel::Warning
        } else {
            AlertLevel::None
        }
    }

    /// Composite outputs ignoring the calibration window
    pub fn compute(&self, metrics: &[LayerMetrics], baselines: &BaselineMap) -> CompositeScore {
        let mut lpi = [None; LAYER_COUNT];
        for m in metrics {
            if (m.layer as usize) < LAYER_COUNT {
                lpi[m.layer as usize] = self.layer_index(m, baselines);
            }
        }

        let available: Vec<f64> = lpi.iter().flatten().copied().collect();
        let mean_lpi = (!available.is_empty()).then(|| stats::mean(&available));
        let dc = degradation_coefficient(lpi[0], lpi[3], self.config.dc_validity_floor);
        let crs = composite_readiness(mean_lpi, dc, self.profile.alpha);

        CompositeScore {
            lpi,
            degradation_coefficient: dc,
            crs,
            alert: self.alert(crs, baselines),
            withheld: false,
        }
    }

    /// Composite outputs for the `session_number`-th session (1-based).
    /// Sessions inside the calibration window are withheld.
    pub fn score(
        &self,
        metrics: &[LayerMetrics],
        baselines: &BaselineMap,
        session_number: u32,
    ) -> CompositeScore {
        if self.in_calibration(session_number) {
            return CompositeScore {
                withheld: true,
                ..CompositeScore::default()
            };
        }
        self.compute(metrics, baselines)
    }

    pub fn in_calibration(&self, session_number: u32) -> bool {
        session_number <= self.config.calibration_sessions
    }
}
