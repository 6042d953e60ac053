//! Adaptive confidence-interval controller.
//!
//! Given a [`crate::sample::SampleBuffer`] after a sampling pass, decides
//! whether the observed relative CI width is acceptable and, if not, how
//! many total samples the next pass should contain.

use serde::Serialize;

use crate::sample::SampleBuffer;

/// Minimum count below which no CI is reported and a resample to this size
/// is always recommended.
pub const MIN_SAMPLE_SIZE: usize = 100;

const DF_CAP: usize = 30;
const QUALITY_EXCELLENT_MAX: f64 = 2.0;
const QUALITY_GOOD_MAX: f64 = 5.0;
const QUALITY_ACCEPTABLE_MAX: f64 = 10.0;

/// Qualitative bucket for an observed RCIW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unknown,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Quality::Excellent => "excellent",
            Quality::Good => "good",
            Quality::Acceptable => "acceptable",
            Quality::Poor => "poor",
            Quality::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Immutable value returned by [`CIController::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CIReport {
    /// Lower CI bound, ns.
    pub lower: f64,
    /// Upper CI bound, ns.
    pub upper: f64,
    /// Echoed confidence level, percent.
    pub level: f64,
    /// Observed relative CI width, percent.
    pub rciw_observed: f64,
    /// `n` this report was computed over.
    pub sample_size: usize,
    /// Qualitative bucket.
    pub quality: Quality,
    /// Score in `[0, 1]` combining sample-size and RCIW factors.
    pub confidence_score: f64,
    /// When present, the total sample count the next pass should reach.
    /// `None` means stop.
    pub resample_size: Option<usize>,
}

/// Decides when a [`SampleBuffer`] has collected enough samples.
///
/// The default controller supports *any* confidence level by falling back
/// to a continuous normal-quantile approximation (Acklam's algorithm) for
/// `df >= 30`, rather than a conservative flat `t* = 1.0` for unsupported
/// levels. Callers that want that flat-fallback behaviour can opt in via
/// [`CIController::with_legacy_fallback`].
#[derive(Debug, Clone, Copy)]
pub struct CIController {
    legacy_fallback: bool,
    hard_cap: usize,
}

impl Default for CIController {
    fn default() -> Self {
        Self::new()
    }
}

impl CIController {
    /// Controller using a continuous normal-quantile approximation beyond
    /// the t-table's degrees-of-freedom cap.
    pub fn new() -> Self {
        CIController {
            legacy_fallback: false,
            hard_cap: 1_000_000,
        }
    }

    /// Controller using a flat, conservative critical value: `t* = 1.0` for
    /// any large-sample confidence level outside `{90, 95, 99}` (with linear
    /// interpolation between 90 and 95).
    pub fn with_legacy_fallback() -> Self {
        CIController {
            legacy_fallback: true,
            hard_cap: 1_000_000,
        }
    }

    /// Set the hard cap on recommended resample size.
    pub fn with_hard_cap(mut self, cap: usize) -> Self {
        self.hard_cap = cap;
        self
    }

    /// Decide whether `buffer` has enough samples, and if not, how many it
    /// should grow to.
    pub fn decide(&self, buffer: &SampleBuffer) -> CIReport {
        let n = buffer.count();
        let cl = buffer.cl();

        if n < MIN_SAMPLE_SIZE {
            log::debug!("n={n} below minimum sample size {MIN_SAMPLE_SIZE}; recommending resample");
            return CIReport {
                lower: f64::NAN,
                upper: f64::NAN,
                level: cl,
                rciw_observed: f64::NAN,
                sample_size: n,
                quality: Quality::Unknown,
                confidence_score: Self::sample_size_factor(n) * 0.1,
                resample_size: Some(MIN_SAMPLE_SIZE),
            };
        }

        let mean = buffer.mean();
        let stderr = buffer.stderr();
        let target = buffer.rciw();

        if stderr <= f64::EPSILON {
            return CIReport {
                lower: mean,
                upper: mean,
                level: cl,
                rciw_observed: 0.0,
                sample_size: n,
                quality: Quality::Excellent,
                confidence_score: 1.0,
                resample_size: None,
            };
        }

        let df = (n - 1).min(DF_CAP);
        let t_star = self.critical_value(df, cl);
        let h = t_star * stderr;
        let lower = mean - h;
        let upper = mean + h;
        let rciw_observed = if mean.abs() < f64::EPSILON {
            f64::NAN
        } else {
            2.0 * h / mean * 100.0
        };

        let quality = Self::classify(rciw_observed);
        let confidence_score = Self::confidence_score(n, rciw_observed, target);

        let resample_size = if rciw_observed.is_nan() {
            Some(MIN_SAMPLE_SIZE.max(n + 1).min(self.hard_cap))
        } else if rciw_observed <= target {
            None
        } else {
            let ratio = rciw_observed / target;
            let n_target = ((n as f64) * ratio * ratio).ceil() as usize;
            let n_target = n_target.clamp(MIN_SAMPLE_SIZE, self.hard_cap);
            if n_target <= n {
                None
            } else {
                Some(n_target)
            }
        };

        match resample_size {
            Some(target_n) => log::debug!(
                "rciw {rciw_observed:.3}% > target {target:.3}% at n={n}; recommending resample to {target_n} (hard_cap={})",
                self.hard_cap
            ),
            None => log::debug!("rciw {rciw_observed:.3}% within target {target:.3}% at n={n}; stopping"),
        }

        CIReport {
            lower,
            upper,
            level: cl,
            rciw_observed,
            sample_size: n,
            quality,
            confidence_score,
            resample_size,
        }
    }

    fn critical_value(&self, df: usize, cl: f64) -> f64 {
        if df < DF_CAP {
            t_table_lookup(df, cl)
        } else if self.legacy_fallback {
            legacy_normal_quantile(cl)
        } else {
            let alpha = 1.0 - cl / 100.0;
            inverse_normal_cdf(1.0 - alpha / 2.0)
        }
    }

    fn classify(rciw: f64) -> Quality {
        if rciw.is_nan() {
            Quality::Unknown
        } else if rciw <= QUALITY_EXCELLENT_MAX {
            Quality::Excellent
        } else if rciw <= QUALITY_GOOD_MAX {
            Quality::Good
        } else if rciw <= QUALITY_ACCEPTABLE_MAX {
            Quality::Acceptable
        } else {
            Quality::Poor
        }
    }

    fn sample_size_factor(n: usize) -> f64 {
        (n as f64 / 200.0).min(1.0)
    }

    fn confidence_score(n: usize, rciw_observed: f64, target: f64) -> f64 {
        let size_factor = Self::sample_size_factor(n);
        let rciw_factor = if rciw_observed.is_nan() || target <= 0.0 {
            0.0
        } else {
            let ratio = rciw_observed / target;
            (1.0 - (ratio - 1.0).max(0.0) / 4.0).clamp(0.0, 1.0)
        };
        (size_factor * rciw_factor).clamp(0.0, 1.0)
    }
}

/// Two-sided t critical values, rows `df = 1..=30`, columns `{90, 95, 99}`
/// percent confidence.
#[rustfmt::skip]
const T_TABLE: [[f64; 3]; 30] = [
    [6.314, 12.706, 63.657],
    [2.920, 4.303, 9.925],
    [2.353, 3.182, 5.841],
    [2.132, 2.776, 4.604],
    [2.015, 2.571, 4.032],
    [1.943, 2.447, 3.707],
    [1.895, 2.365, 3.499],
    [1.860, 2.306, 3.355],
    [1.833, 2.262, 3.250],
    [1.812, 2.228, 3.169],
    [1.796, 2.201, 3.106],
    [1.782, 2.179, 3.055],
    [1.771, 2.160, 3.012],
    [1.761, 2.145, 2.977],
    [1.753, 2.131, 2.947],
    [1.746, 2.120, 2.921],
    [1.740, 2.110, 2.898],
    [1.734, 2.101, 2.878],
    [1.729, 2.093, 2.861],
    [1.725, 2.086, 2.845],
    [1.721, 2.080, 2.831],
    [1.717, 2.074, 2.819],
    [1.714, 2.069, 2.807],
    [1.711, 2.064, 2.797],
    [1.708, 2.060, 2.787],
    [1.706, 2.056, 2.779],
    [1.703, 2.052, 2.771],
    [1.701, 2.048, 2.763],
    [1.699, 2.045, 2.756],
    [1.697, 2.042, 2.750],
];

fn t_table_lookup(df: usize, cl: f64) -> f64 {
    let idx = df.clamp(1, 30) - 1;
    let row = T_TABLE[idx];
    interpolate_three_point(row[0], row[1], row[2], cl)
}

fn interpolate_three_point(v90: f64, v95: f64, v99: f64, cl: f64) -> f64 {
    if cl <= 95.0 {
        let t = (cl - 90.0) / 5.0;
        v90 + t * (v95 - v90)
    } else {
        let t = (cl - 95.0) / 4.0;
        v95 + t * (v99 - v95)
    }
}

fn legacy_normal_quantile(cl: f64) -> f64 {
    if (90.0..=95.0).contains(&cl) {
        let t = (cl - 90.0) / 5.0;
        1.645 + t * (1.96 - 1.645)
    } else if (cl - 99.0).abs() < 1e-9 {
        2.576
    } else {
        1.0
    }
}

/// Inverse standard normal CDF via Acklam's rational approximation.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;
    let p_high = 1.0 - P_LOW;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= p_high {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
