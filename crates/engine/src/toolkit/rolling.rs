//! Rolling-window and exponentially weighted statistics

use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};
use ta::{Next, Reset};

const NAN: f64 = f64::NAN;

/// `x[t] / x[t - lag] - 1`, NaN for the first `lag` elements
pub fn pct_change(x: &[f64], lag: usize) -> Vec<f64> {
    let mut out = vec![NAN; x.len()];
    if lag == 0 {
        return out;
    }
    for i in lag..x.len() {
        let (cur, prev) = (x[i], x[i - lag]);
        if cur.is_finite() && prev.is_finite() && prev != 0.0 {
            out[i] = cur / prev - 1.0;
        }
    }
    out
}

pub fn returns(close: &[f64]) -> Vec<f64> {
    pct_change(close, 1)
}

/// Log returns `ln(x[t] / x[t-1])`, NaN first
pub fn log_returns(close: &[f64]) -> Vec<f64> {
    let mut out = vec![NAN; close.len()];
    for i in 1..close.len() {
        if close[i] > 0.0 && close[i - 1] > 0.0 {
            out[i] = (close[i] / close[i - 1]).ln();
        }
    }
    out
}

/// Simple moving average. A NaN input restarts the window.
pub fn sma(x: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![NAN; x.len()];
    let Ok(mut indicator) = SimpleMovingAverage::new(window) else {
        return out;
    };
    let mut run = 0usize;
    for (i, &v) in x.iter().enumerate() {
        if !v.is_finite() {
            indicator.reset();
            run = 0;
            continue;
        }
        let avg = indicator.next(v);
        run += 1;
        if run >= window {
            out[i] = avg;
        }
    }
    out
}

/// Recursive EMA with `alpha = 2 / (span + 1)`, seeded at the first finite value.
/// NaN inputs produce NaN and leave the state untouched.
pub fn ewm_mean(x: &[f64], span: usize) -> Vec<f64> {
    let mut out = vec![NAN; x.len()];
    let Ok(mut indicator) = ExponentialMovingAverage::new(span) else {
        return out;
    };
    for (i, &v) in x.iter().enumerate() {
        if v.is_finite() {
            out[i] = indicator.next(v);
        }
    }
    out
}

/// Sample standard deviation (ddof = 1) over a full window of finite values
pub fn rolling_std(x: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![NAN; x.len()];
    if window < 2 || x.len() < window {
        return out;
    }
    for i in (window - 1)..x.len() {
        let slice = &x[i + 1 - window..=i];
        if slice.iter().all(|v| v.is_finite()) {
            let mean = slice.iter().sum::<f64>() / window as f64;
            let ss: f64 = slice.iter().map(|v| (v - mean).powi(2)).sum();
            out[i] = (ss / (window - 1) as f64).sqrt();
        }
    }
    out
}

/// Max of `|x|` over the trailing window, defined once `min_periods` finite values are seen
pub fn rolling_max_abs(x: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let mut out = vec![NAN; x.len()];
    if window == 0 {
        return out;
    }
    for i in 0..x.len() {
        let start = (i + 1).saturating_sub(window);
        let mut count = 0;
        let mut max = 0.0f64;
        for v in x[start..=i].iter().filter(|v| v.is_finite()) {
            count += 1;
            max = max.max(v.abs());
        }
        if count >= min_periods.max(1) {
            out[i] = max;
        }
    }
    out
}

/// Adjusted, bias-corrected exponentially weighted standard deviation.
///
/// Weights decay by `1 - alpha` every step, including steps with a NaN input,
/// which contributes no weight.
pub fn ewm_std(x: &[f64], span: usize, min_periods: usize) -> Vec<f64> {
    let mut out = vec![NAN; x.len()];
    if span == 0 {
        return out;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;

    let (mut sw, mut sw2, mut swx, mut swx2) = (0.0, 0.0, 0.0, 0.0);
    let mut count = 0usize;

    for (i, &v) in x.iter().enumerate() {
        sw *= decay;
        sw2 *= decay * decay;
        swx *= decay;
        swx2 *= decay;
        if v.is_finite() {
            sw += 1.0;
            sw2 += 1.0;
            swx += v;
            swx2 += v * v;
            count += 1;
        }
        if count >= min_periods.max(2) && sw > 0.0 {
            let mean = swx / sw;
            let biased = (swx2 / sw - mean * mean).max(0.0);
            let denom = sw * sw - sw2;
            if denom > 0.0 {
                out[i] = (biased * sw * sw / denom).sqrt();
            }
        }
    }
    out
}

/// Right-aligned OLS slope of `y` on `x` over each window
pub fn rolling_ols_slope(y: &[f64], x: &[f64], window: usize) -> Vec<f64> {
    let n = y.len().min(x.len());
    let mut out = vec![NAN; n];
    if window < 2 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let ys = &y[i + 1 - window..=i];
        let xs = &x[i + 1 - window..=i];
        if ys.iter().chain(xs).any(|v| !v.is_finite()) {
            continue;
        }
        let mx = xs.iter().sum::<f64>() / window as f64;
        let my = ys.iter().sum::<f64>() / window as f64;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (xv, yv) in xs.iter().zip(ys) {
            sxy += (xv - mx) * (yv - my);
            sxx += (xv - mx) * (xv - mx);
        }
        if sxx > 0.0 {
            out[i] = sxy / sxx;
        }
    }
    out
}

/// Right-aligned slope through the origin, `sum(a*b) / sum(b*b)`
pub fn rolling_slope_through_origin(a: &[f64], b: &[f64], window: usize) -> Vec<f64> {
    let n = a.len().min(b.len());
    let mut out = vec![NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let (mut sab, mut sbb) = (0.0, 0.0);
        let mut valid = true;
        for j in (i + 1 - window)..=i {
            if !a[j].is_finite() || !b[j].is_finite() {
                valid = false;
                break;
            }
            sab += a[j] * b[j];
            sbb += b[j] * b[j];
        }
        if valid && sbb > 0.0 {
            out[i] = sab / sbb;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_pct_change() {
        let r = pct_change(&[10.0, 11.0, 12.1, 6.05], 1);
        assert!(r[0].is_nan());
        assert!(close(r[1], 0.1));
        assert!(close(r[2], 0.1));
        assert!(close(r[3], -0.5));
        let r2 = pct_change(&[10.0, 11.0, 12.0], 2);
        assert!(close(r2[2], 0.2));
    }

    #[test]
    fn test_sma_warmup_and_nan_restart() {
        let out = sma(&[1.0, 2.0, 3.0, f64::NAN, 5.0, 7.0], 2);
        assert!(out[0].is_nan());
        assert!(close(out[1], 1.5));
        assert!(close(out[2], 2.5));
        assert!(out[3].is_nan());
        assert!(out[4].is_nan());
        assert!(close(out[5], 6.0));
    }

    #[test]
    fn test_ewm_mean_seeded_at_first_value() {
        let out = ewm_mean(&[f64::NAN, 10.0, 20.0], 3);
        assert!(out[0].is_nan());
        assert!(close(out[1], 10.0));
        assert!(close(out[2], 15.0));
    }

    #[test]
    fn test_rolling_std_sample() {
        let out = rolling_std(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[1].is_nan());
        assert!(close(out[2], 1.0));
        assert!(close(out[3], 1.0));
        let flat = rolling_std(&[5.0; 10], 4);
        assert_eq!(flat[9], 0.0);
    }

    #[test]
    fn test_rolling_max_abs_min_periods() {
        let out = rolling_max_abs(&[f64::NAN, -3.0, 1.0, 2.0], 2, 1);
        assert!(out[0].is_nan());
        assert!(close(out[1], 3.0));
        assert!(close(out[2], 3.0));
        assert!(close(out[3], 2.0));
    }

    #[test]
    fn test_ewm_std_matches_sample_std_for_equal_weights() {
        // with a huge span the weights are nearly equal
        let x = [1.0, 2.0, 3.0, 4.0];
        let out = ewm_std(&x, 1_000_000, 2);
        assert!((out[3] - 1.2909944).abs() < 1e-4);
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_ewm_std_zero_for_constant_input() {
        let out = ewm_std(&[0.0; 50], 10, 5);
        assert_eq!(out[49], 0.0);
        assert!(out[3].is_nan());
    }

    #[test]
    fn test_rolling_ols_slope_recovers_line() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 + 0.5 * v).collect();
        let slope = rolling_ols_slope(&y, &x, 10);
        assert!(slope[8].is_nan());
        assert!(close(slope[9], 0.5));
        assert!(close(slope[29], 0.5));
    }

    #[test]
    fn test_slope_through_origin() {
        let b = [1.0, 2.0, 3.0];
        let a = [2.0, 4.0, 6.0];
        let out = rolling_slope_through_origin(&a, &b, 3);
        assert!(close(out[2], 2.0));
    }
}
