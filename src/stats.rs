//! Robust statistics primitives
//!
//! Every function here is total: empty, single-element or zero-variance input
//! resolves to a neutral, finite value instead of failing. Non-finite samples
//! are ignored.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Scale factor making MAD consistent with the standard deviation of a normal distribution
pub const MAD_SCALE: f64 = 1.4826;

/// Above this many pairs Theil-Sen samples pairs instead of enumerating them
pub const THEIL_SEN_MAX_PAIRS: usize = 5_000;

/// Fixed seed so sampled Theil-Sen estimates are reproducible
const THEIL_SEN_SEED: u64 = 0x5EED_7E11_5E17;

/// Kendall's tau p-values use the normal approximation above this size
const KENDALL_MIN_N: usize = 10;

/// Mann-Whitney p-values need at least this many samples per group
const MANN_WHITNEY_MIN_N: usize = 8;

const EPSILON: f64 = 1e-12;

/// Spread below this fraction of a series' magnitude counts as no spread
const RELATIVE_SPREAD_TOLERANCE: f64 = 1e-12;

/// Finite values in ascending order
fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let mid = n / 2;
    if n % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Arithmetic mean (0 for empty input)
pub fn mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return 0.0;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

/// Population variance (0 for fewer than two values)
pub fn variance(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return 0.0;
    }
    let m = mean(&finite);
    finite.iter().map(|x| (x - m).powi(2)).sum::<f64>() / finite.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Median, averaging the two middle values for even counts
pub fn median(values: &[f64]) -> f64 {
    median_of_sorted(&sorted_finite(values))
}

/// First quartile, median and third quartile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quartiles {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

impl Quartiles {
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Quartiles as medians of the lower and upper halves.
///
/// The halves split at the median; for an odd count the middle element
/// belongs to both halves, so `[10, 20, 30, 40, 50]` gives Q1 = 20, Q3 = 40.
pub fn quartiles(values: &[f64]) -> Quartiles {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return Quartiles {
            q1: 0.0,
            median: 0.0,
            q3: 0.0,
        };
    }
    let lower = &sorted[..n.div_ceil(2)];
    let upper = &sorted[n / 2..];
    Quartiles {
        q1: median_of_sorted(lower),
        median: median_of_sorted(&sorted),
        q3: median_of_sorted(upper),
    }
}

/// Median absolute deviation scaled by 1.4826
pub fn mad_scaled(values: &[f64]) -> f64 {
    let sorted = sorted_finite(values);
    if sorted.is_empty() {
        return 0.0;
    }
    let med = median_of_sorted(&sorted);
    let deviations: Vec<f64> = sorted.iter().map(|x| (x - med).abs()).collect();
    median(&deviations) * MAD_SCALE
}

/// `(value - median) / mad_scaled`, 0 when the scale is degenerate
pub fn modified_z_score(value: f64, median: f64, mad_scaled: f64) -> f64 {
    if !value.is_finite() || !median.is_finite() || !mad_scaled.is_finite() || mad_scaled < EPSILON {
        return 0.0;
    }
    (value - median) / mad_scaled
}

/// Empirical CDF of `value`, interpolating linearly between sorted neighbours.
///
/// Returns 0 below the smallest sample and 1 above the largest.
pub fn empirical_cdf(value: f64, values: &[f64]) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 || !value.is_finite() {
        return 0.5;
    }
    if value < sorted[0] {
        return 0.0;
    }
    if value > sorted[n - 1] {
        return 1.0;
    }
    if n == 1 {
        return 0.5;
    }
    // Last index whose sample is <= value
    let idx = sorted.partition_point(|&s| s <= value).saturating_sub(1);
    if idx >= n - 1 {
        return 1.0;
    }
    let (lo, hi) = (sorted[idx], sorted[idx + 1]);
    let frac = if hi - lo > EPSILON { (value - lo) / (hi - lo) } else { 0.0 };
    ((idx as f64 + frac) / (n - 1) as f64).clamp(0.0, 1.0)
}

/// 1-based ranks in input order; ties receive the average of their ranks
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share the average of ranks i+1..=j+1
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Paired finite values, truncated to the shorter input
fn finite_pairs(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip()
}

/// Pearson correlation (0 when either side has no variance)
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let (x, y) = finite_pairs(x, y);
    let n = x.len();
    if n < 2 {
        return 0.0;
    }
    let (mx, my) = (mean(&x), mean(&y));
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(&y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx).powi(2);
        vy += (b - my).powi(2);
    }
    if is_flat(vx, &x) || is_flat(vy, &y) {
        return 0.0;
    }
    (cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0)
}

/// Whether a sum of squared deviations is rounding noise for these values
fn is_flat(sum_sq: f64, values: &[f64]) -> bool {
    let scale = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let floor = scale * RELATIVE_SPREAD_TOLERANCE;
    sum_sq <= values.len() as f64 * floor * floor
}

/// Spearman rank correlation with tie-averaged ranks
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let (x, y) = finite_pairs(x, y);
    pearson(&average_ranks(&x), &average_ranks(&y))
}

/// Robust linear fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TheilSen {
    pub slope: f64,
    pub intercept: f64,
}

/// Theil-Sen estimator: median of pairwise slopes, intercept as the median of
/// per-point intercepts. Large inputs sample a bounded number of pairs with a
/// fixed seed so the estimate is reproducible.
pub fn theil_sen(x: &[f64], y: &[f64]) -> TheilSen {
    let (x, y) = finite_pairs(x, y);
    let n = x.len();
    let total_pairs = n * n.saturating_sub(1) / 2;

    let mut slopes = Vec::with_capacity(total_pairs.min(THEIL_SEN_MAX_PAIRS));
    let mut push_slope = |i: usize, j: usize| {
        let dx = x[j] - x[i];
        if dx.abs() > EPSILON {
            slopes.push((y[j] - y[i]) / dx);
        }
    };

    if total_pairs <= THEIL_SEN_MAX_PAIRS {
        for i in 0..n {
            for j in (i + 1)..n {
                push_slope(i, j);
            }
        }
    } else {
        let mut rng = StdRng::seed_from_u64(THEIL_SEN_SEED);
        for _ in 0..THEIL_SEN_MAX_PAIRS {
            let i = rng.gen_range(0..n);
            let mut j = rng.gen_range(0..n - 1);
            if j >= i {
                j += 1;
            }
            push_slope(i.min(j), i.max(j));
        }
    }

    let slope = median(&slopes);
    let intercepts: Vec<f64> = x.iter().zip(&y).map(|(a, b)| b - slope * a).collect();
    TheilSen {
        slope,
        intercept: median(&intercepts),
    }
}

/// Kendall rank correlation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KendallTau {
    /// Tau-b (tie adjusted)
    pub tau: f64,
    pub concordant: u64,
    pub discordant: u64,
    /// Two-sided normal-approximation p-value, only for n > 10
    pub p_value: Option<f64>,
}

/// Kendall's tau-b with concordant/discordant pair counting
pub fn kendall_tau(x: &[f64], y: &[f64]) -> KendallTau {
    let (x, y) = finite_pairs(x, y);
    let n = x.len();
    let (mut concordant, mut discordant) = (0u64, 0u64);
    let (mut ties_x, mut ties_y) = (0u64, 0u64);

    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[j] - x[i];
            let dy = y[j] - y[i];
            let (sx, sy) = (dx.abs() > EPSILON, dy.abs() > EPSILON);
            match (sx, sy) {
                (true, true) if dx.signum() == dy.signum() => concordant += 1,
                (true, true) => discordant += 1,
                (false, true) => ties_x += 1,
                (true, false) => ties_y += 1,
                (false, false) => {}
            }
        }
    }

    let cd = (concordant + discordant) as f64;
    let denom = ((cd + ties_x as f64) * (cd + ties_y as f64)).sqrt();
    let tau = if denom > 0.0 {
        (concordant as f64 - discordant as f64) / denom
    } else {
        0.0
    };

    let p_value = (n > KENDALL_MIN_N).then(|| {
        let nf = n as f64;
        let var = 2.0 * (2.0 * nf + 5.0) / (9.0 * nf * (nf - 1.0));
        let z = tau / var.sqrt();
        (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
    });

    KendallTau {
        tau,
        concordant,
        discordant,
        p_value,
    }
}

/// Mann-Whitney U test result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MannWhitney {
    /// U statistic of the first sample
    pub u_first: f64,
    /// min(U1, U2)
    pub u: f64,
    /// Positive when the first sample tends to be larger
    pub z: f64,
    /// Two-sided p-value when both samples are large enough
    pub p_value: Option<f64>,
}

/// Mann-Whitney U with tie-averaged ranks and a tie-corrected normal
/// approximation for large samples
pub fn mann_whitney_u(first: &[f64], second: &[f64]) -> MannWhitney {
    let a: Vec<f64> = first.iter().copied().filter(|v| v.is_finite()).collect();
    let b: Vec<f64> = second.iter().copied().filter(|v| v.is_finite()).collect();
    let (n1, n2) = (a.len(), b.len());
    if n1 == 0 || n2 == 0 {
        return MannWhitney {
            u_first: 0.0,
            u: 0.0,
            z: 0.0,
            p_value: None,
        };
    }

    let combined: Vec<f64> = a.iter().chain(&b).copied().collect();
    let ranks = average_ranks(&combined);
    let rank_sum_first: f64 = ranks[..n1].iter().sum();
    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let u_first = rank_sum_first - n1f * (n1f + 1.0) / 2.0;
    let u_second = n1f * n2f - u_first;

    let total = n1f + n2f;
    let tie_term: f64 = tie_group_sizes(&combined)
        .into_iter()
        .map(|t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum();
    let sigma_sq = n1f * n2f / 12.0 * ((total + 1.0) - tie_term / (total * (total - 1.0)));
    let z = if sigma_sq > EPSILON {
        (u_first - n1f * n2f / 2.0) / sigma_sq.sqrt()
    } else {
        0.0
    };

    let p_value = (n1 >= MANN_WHITNEY_MIN_N && n2 >= MANN_WHITNEY_MIN_N)
        .then(|| (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0));

    MannWhitney {
        u_first,
        u: u_first.min(u_second),
        z,
        p_value,
    }
}

/// Sizes of groups of tied values (groups of one omitted)
fn tie_group_sizes(values: &[f64]) -> Vec<usize> {
    let sorted = sorted_finite(values);
    let mut groups = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1] == sorted[i] {
            j += 1;
        }
        if j > i {
            groups.push(j - i + 1);
        }
        i = j + 1;
    }
    groups
}

/// Standard normal CDF
pub fn normal_cdf(z: f64) -> f64 {
    if !z.is_finite() {
        return if z > 0.0 { 1.0 } else { 0.0 };
    }
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26 (max error 1.5e-7)
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Silverman-style KDE bandwidth using the robust spread
/// `min(mad_scaled, iqr / 1.349)`, falling back to the standard deviation
pub fn silverman_bandwidth(values: &[f64]) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n < 2 {
        return 1.0;
    }
    let mad = mad_scaled(&sorted);
    let iqr = quartiles(&sorted).iqr() / 1.349;
    let spread = match (mad > EPSILON, iqr > EPSILON) {
        (true, true) => mad.min(iqr),
        (true, false) => mad,
        (false, true) => iqr,
        (false, false) => std_dev(&sorted),
    };
    if spread < EPSILON {
        return 1.0;
    }
    0.9 * spread * (n as f64).powf(-0.2)
}

/// Gaussian kernel density of `values` evaluated at `points`
pub fn gaussian_kde(values: &[f64], points: &[f64]) -> Vec<f64> {
    let samples = sorted_finite(values);
    if samples.is_empty() {
        return vec![0.0; points.len()];
    }
    let h = silverman_bandwidth(&samples);
    let norm = 1.0 / (samples.len() as f64 * h * (2.0 * std::f64::consts::PI).sqrt());
    points
        .iter()
        .map(|&p| {
            samples
                .iter()
                .map(|&x| {
                    let u = (p - x) / h;
                    (-0.5 * u * u).exp()
                })
                .sum::<f64>()
                * norm
        })
        .collect()
}

/// Location of the highest KDE density on an evenly spaced grid
pub fn kde_mode(values: &[f64], grid_points: usize) -> Option<f64> {
    let samples = sorted_finite(values);
    let (first, last) = (*samples.first()?, *samples.last()?);
    let h = silverman_bandwidth(&samples);
    let (lo, hi) = (first - 3.0 * h, last + 3.0 * h);
    let steps = grid_points.max(2);
    let grid: Vec<f64> = (0..steps)
        .map(|i| lo + (hi - lo) * i as f64 / (steps - 1) as f64)
        .collect();
    let density = gaussian_kde(&samples, &grid);
    density
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| grid[i])
}

/// Central moments (m2, m3, m4) around the mean
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
    let m = mean(values);
    let n = values.len() as f64;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for x in values {
        let d = x - m;
        m2 += d * d;
        m3 += d * d * d;
        m4 += d * d * d * d;
    }
    (m2 / n, m3 / n, m4 / n)
}

/// Bias-corrected sample skewness (G1); 0 for n < 3 or zero variance
pub fn skewness(values: &[f64]) -> f64 {
    let finite = sorted_finite(values);
    let n = finite.len();
    if n < 3 {
        return 0.0;
    }
    let (m2, m3, _) = central_moments(&finite);
    if m2 < EPSILON {
        return 0.0;
    }
    let nf = n as f64;
    let g1 = m3 / m2.powf(1.5);
    g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0)
}

/// Bias-corrected excess kurtosis (G2); 0 for n < 4 or zero variance
pub fn kurtosis(values: &[f64]) -> f64 {
    let finite = sorted_finite(values);
    let n = finite.len();
    if n < 4 {
        return 0.0;
    }
    let (m2, _, m4) = central_moments(&finite);
    if m2 < EPSILON {
        return 0.0;
    }
    let nf = n as f64;
    let g2 = m4 / (m2 * m2) - 3.0;
    ((nf + 1.0) * g2 + 6.0) * (nf - 1.0) / ((nf - 2.0) * (nf - 3.0))
}
