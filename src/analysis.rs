//! Session-over-session analysis of a baseline history
//!
//! Trend (Theil-Sen with Kendall and Spearman), shift between the older and
//! recent halves (Mann-Whitney) and distribution shape over one metric's
//! rolling window.

use serde::{Deserialize, Serialize};

use crate::stats;
use crate::types::{BaselineKey, BaselineMetric, MetricDirection};

/// Significance level for calling a trend or shift
pub const SIGNIFICANCE: f64 = 0.05;

/// Fewest sessions worth analysing
pub const MIN_HISTORY: usize = 3;

/// KDE grid resolution for the mode estimate
const KDE_GRID_POINTS: usize = 256;

/// Reading of a trend once the metric's direction is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    /// Theil-Sen slope per session
    pub slope: f64,
    pub intercept: f64,
    pub kendall_tau: f64,
    pub kendall_p: Option<f64>,
    pub spearman: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftReport {
    pub older_median: f64,
    pub recent_median: f64,
    pub u: f64,
    /// Positive when the older half tends to be larger
    pub z: f64,
    pub p_value: Option<f64>,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeReport {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub skewness: f64,
    /// Excess kurtosis
    pub kurtosis: f64,
    pub kde_mode: Option<f64>,
}

/// Everything known about one metric's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub key: BaselineKey,
    pub sessions: usize,
    pub trend: TrendReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shift: Option<ShiftReport>,
    pub shape: ShapeReport,
}

fn direction_of(key: &BaselineKey) -> MetricDirection {
    match key.metric {
        BaselineMetric::Layer(metric) => metric.direction(),
        BaselineMetric::Crs => MetricDirection::HigherIsBetter,
    }
}

pub fn trend(values: &[f64], direction: MetricDirection) -> TrendReport {
    let x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let fit = stats::theil_sen(&x, values);
    let kendall = stats::kendall_tau(&x, values);

    let significant = kendall.p_value.map_or(false, |p| p < SIGNIFICANCE);
    let rising = fit.slope > 0.0;
    let direction = match (significant, rising, direction) {
        (false, _, _) => TrendDirection::Stable,
        (true, true, MetricDirection::HigherIsBetter) | (true, false, MetricDirection::LowerIsBetter) => {
            TrendDirection::Improving
        }
        (true, _, _) => TrendDirection::Declining,
    };

    TrendReport {
        slope: fit.slope,
        intercept: fit.intercept,
        kendall_tau: kendall.tau,
        kendall_p: kendall.p_value,
        spearman: stats::spearman(&x, values),
        direction,
    }
}

/// Compare the older half of a history with the recent half; `None` below
/// four values
pub fn shift(values: &[f64]) -> Option<ShiftReport> {
    if values.len() < 4 {
        return None;
    }
    let (older, recent) = values.split_at(values.len() / 2);
    let test = stats::mann_whitney_u(older, recent);
    Some(ShiftReport {
        older_median: stats::median(older),
        recent_median: stats::median(recent),
        u: test.u,
        z: test.z,
        p_value: test.p_value,
        significant: test.p_value.map_or(false, |p| p < SIGNIFICANCE),
    })
}

pub fn shape(values: &[f64]) -> ShapeReport {
    ShapeReport {
        mean: stats::mean(values),
        median: stats::median(values),
        std_dev: stats::std_dev(values),
        skewness: stats::skewness(values),
        kurtosis: stats::kurtosis(values),
        kde_mode: stats::kde_mode(values, KDE_GRID_POINTS),
    }
}

/// Full report for a baseline history, oldest value first
pub fn analyze(key: BaselineKey, values: &[f64]) -> Option<HistoryReport> {
    if values.len() < MIN_HISTORY {
        return None;
    }
    Some(HistoryReport {
        key,
        sessions: values.len(),
        trend: trend(values, direction_of(&key)),
        shift: shift(values),
        shape: shape(values),
    })
}
