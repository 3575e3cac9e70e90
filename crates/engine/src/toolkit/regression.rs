//! Least squares, correlation and unit-root tests

use nalgebra::{DMatrix, DVector};

use super::normal_cdf;

/// Ordinary least squares fit
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub residuals: Vec<f64>,
    /// Residual sum of squares
    pub rss: f64,
    pub nobs: usize,
}

impl OlsFit {
    /// t-statistic of coefficient `i`
    pub fn t_stat(&self, i: usize) -> f64 {
        self.coefficients[i] / self.std_errors[i]
    }

    /// Akaike information criterion of a Gaussian likelihood
    pub fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        let k = self.coefficients.len() as f64;
        let llf = -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.rss / n).ln() + 1.0);
        -2.0 * llf + 2.0 * k
    }
}

/// Solve `y = X b` by the normal equations. `columns` are the regressors; add a
/// column of ones for an intercept. `None` when the system is singular.
pub fn ols(y: &[f64], columns: &[Vec<f64>]) -> Option<OlsFit> {
    let n = y.len();
    let k = columns.len();
    if k == 0 || n <= k || columns.iter().any(|c| c.len() != n) {
        return None;
    }
    if y.iter().chain(columns.iter().flatten()).any(|v| !v.is_finite()) {
        return None;
    }

    let x = DMatrix::from_fn(n, k, |i, j| columns[j][i]);
    let yv = DVector::from_column_slice(y);
    let xt = x.transpose();
    let xtx_inv = (&xt * &x).try_inverse()?;
    let beta = &xtx_inv * (&xt * &yv);
    if beta.iter().any(|b| !b.is_finite()) {
        return None;
    }

    let residuals: Vec<f64> = (&yv - &x * &beta).iter().copied().collect();
    let rss: f64 = residuals.iter().map(|r| r * r).sum();
    let sigma2 = rss / (n - k) as f64;
    let std_errors = (0..k)
        .map(|j| (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt())
        .collect();

    Some(OlsFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        residuals,
        rss,
        nobs: n,
    })
}

/// Pearson correlation, `None` when either side has zero variance
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let ma = a[..n].iter().sum::<f64>() / n as f64;
    let mb = b[..n].iter().sum::<f64>() / n as f64;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let (da, db) = (a[i] - ma, b[i] - mb);
        sab += da * db;
        saa += da * da;
        sbb += db * db;
    }
    if saa <= 0.0 || sbb <= 0.0 {
        return None;
    }
    Some((sab / (saa * sbb).sqrt()).clamp(-1.0, 1.0))
}

/// Hedge ratio of `a` on `b` without intercept: `sum(a*b) / sum(b*b)`
pub fn slope_through_origin(a: &[f64], b: &[f64]) -> Option<f64> {
    let sab: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let sbb: f64 = b.iter().map(|y| y * y).sum();
    (sbb > 0.0).then(|| sab / sbb)
}

/// Mean-reversion half-life from `ds_t = a + b * s_{t-1}`: `-ln 2 / b` when `b < 0`
pub fn half_life(spread: &[f64]) -> Option<f64> {
    if spread.len() < 3 {
        return None;
    }
    let lagged: Vec<f64> = spread[..spread.len() - 1].to_vec();
    let delta: Vec<f64> = spread.windows(2).map(|w| w[1] - w[0]).collect();
    let fit = ols(&delta, &[vec![1.0; lagged.len()], lagged])?;
    let b = fit.coefficients[1];
    (b < 0.0).then(|| -std::f64::consts::LN_2 / b)
}

/// Deterministic terms of the ADF regression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdfRegression {
    NoConstant,
    Constant,
}

#[derive(Debug, Clone)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lag: usize,
    pub nobs: usize,
}

/// Augmented Dickey-Fuller test with AIC lag selection.
///
/// `max_lag` defaults to `ceil(12 * (n / 100)^(1/4))`. The p-value uses the
/// constant-term MacKinnon surface for one variable.
pub fn adf(series: &[f64], regression: AdfRegression, max_lag: Option<usize>) -> Option<AdfResult> {
    let statistic = adf_statistic(series, regression, max_lag)?;
    Some(AdfResult {
        p_value: mackinnon_p(statistic.0, 1),
        statistic: statistic.0,
        used_lag: statistic.1,
        nobs: statistic.2,
    })
}

/// Returns `(statistic, used_lag, nobs)`
fn adf_statistic(
    series: &[f64],
    regression: AdfRegression,
    max_lag: Option<usize>,
) -> Option<(f64, usize, usize)> {
    let n = series.len();
    if n < 12 || series.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let ntrend = match regression {
        AdfRegression::NoConstant => 0,
        AdfRegression::Constant => 1,
    };
    let default_lag = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    let cap = (n / 2).saturating_sub(ntrend + 2);
    let max_lag = max_lag.unwrap_or(default_lag).min(cap);

    let dy: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    // dy[t] regressed on y[t], dy[t-1..=t-lag] and the deterministic terms
    let design = |lag: usize, start: usize| -> (Vec<f64>, Vec<Vec<f64>>) {
        let rows = start..dy.len();
        let y: Vec<f64> = rows.clone().map(|t| dy[t]).collect();
        let mut cols = vec![rows.clone().map(|t| series[t]).collect::<Vec<f64>>()];
        for l in 1..=lag {
            cols.push(rows.clone().map(|t| dy[t - l]).collect());
        }
        if ntrend == 1 {
            cols.push(vec![1.0; y.len()]);
        }
        (y, cols)
    };

    let mut best_lag = 0;
    let mut best_aic = f64::INFINITY;
    for lag in 0..=max_lag {
        let (y, cols) = design(lag, max_lag);
        if let Some(fit) = ols(&y, &cols) {
            let aic = fit.aic();
            if aic < best_aic {
                best_aic = aic;
                best_lag = lag;
            }
        }
    }

    let (y, cols) = design(best_lag, best_lag);
    let fit = ols(&y, &cols)?;
    let stat = fit.t_stat(0);
    stat.is_finite().then_some((stat, best_lag, fit.nobs))
}

/// Engle-Granger cointegration p-value of `y` on `x`: ADF (no constant) on the
/// residuals of `y = a + b x`, read against the two-variable MacKinnon surface
pub fn engle_granger(y: &[f64], x: &[f64]) -> Option<f64> {
    if y.len() != x.len() {
        return None;
    }
    let fit = ols(y, &[vec![1.0; x.len()], x.to_vec()])?;
    let (stat, _, _) = adf_statistic(&fit.residuals, AdfRegression::NoConstant, None)?;
    Some(mackinnon_p(stat, 2))
}

// MacKinnon (1994) response surface, constant-only regression, N = 1..=6
const TAU_MAX_C: [f64; 6] = [2.74, 0.92, 0.55, 0.61, 0.79, 1.0];
const TAU_MIN_C: [f64; 6] = [-18.83, -18.86, -23.48, -28.07, -25.96, -23.27];
const TAU_STAR_C: [f64; 6] = [-1.61, -2.62, -3.13, -3.47, -3.78, -3.93];
const TAU_C_SMALLP: [[f64; 3]; 6] = [
    [2.1659, 1.4412, 0.038269],
    [2.92, 1.5012, 0.039796],
    [3.4699, 1.4856, 0.03164],
    [3.9673, 1.4777, 0.026315],
    [4.5509, 1.5338, 0.029545],
    [5.1399, 1.6036, 0.034445],
];
const TAU_C_LARGEP: [[f64; 4]; 6] = [
    [1.7339, 0.93202, -0.12745, -0.010368],
    [2.1945, 0.64695, -0.29198, -0.042377],
    [2.5893, 0.45168, -0.36529, -0.050074],
    [3.0387, 0.45452, -0.33666, -0.043221],
    [3.5049, 0.50763, -0.29076, -0.035877],
    [3.9288, 0.53303, -0.27357, -0.032528],
];

/// Approximate p-value of a unit-root t-statistic for `n_vars` integrated variables
pub fn mackinnon_p(stat: f64, n_vars: usize) -> f64 {
    let i = n_vars.clamp(1, 6) - 1;
    if stat > TAU_MAX_C[i] {
        return 1.0;
    }
    if stat < TAU_MIN_C[i] {
        return 0.0;
    }
    let z = if stat <= TAU_STAR_C[i] {
        let c = TAU_C_SMALLP[i];
        c[0] + c[1] * stat + c[2] * stat * stat
    } else {
        let c = TAU_C_LARGEP[i];
        c[0] + c[1] * stat + c[2] * stat * stat + c[3] * stat * stat * stat
    };
    normal_cdf(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{gaussian_noise, random_walk};

    #[test]
    fn test_ols_recovers_coefficients() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 + 3.0 * v).collect();
        let fit = ols(&y, &[vec![1.0; 50], x]).unwrap();
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-8);
        assert!((fit.coefficients[1] - 3.0).abs() < 1e-10);
        assert!(fit.rss < 1e-12);
    }

    #[test]
    fn test_ols_singular_is_none() {
        let ones = vec![1.0; 10];
        assert!(ols(&[1.0; 10], &[ones.clone(), ones]).is_none());
    }

    #[test]
    fn test_pearson() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[1.0; 4]), None);
    }

    #[test]
    fn test_half_life_of_ar1() {
        // s_t = 0.5 s_{t-1} + noise => b = -0.5, half-life ~ 1.39
        let noise = gaussian_noise(7, 2000);
        let mut s = vec![0.0; 2000];
        for t in 1..2000 {
            s[t] = 0.5 * s[t - 1] + noise[t];
        }
        let hl = half_life(&s).unwrap();
        assert!((hl - std::f64::consts::LN_2 / 0.5).abs() < 0.25, "half-life {}", hl);
    }

    #[test]
    fn test_half_life_none_for_trend() {
        let s: Vec<f64> = (0..100).map(|i| (i as f64).powi(2)).collect();
        assert_eq!(half_life(&s), None);
    }

    #[test]
    fn test_mackinnon_reference_points() {
        assert!((mackinnon_p(-2.86, 1) - 0.05).abs() < 0.003);
        assert!((mackinnon_p(-3.34, 2) - 0.05).abs() < 0.003);
        assert_eq!(mackinnon_p(5.0, 1), 1.0);
        assert_eq!(mackinnon_p(-30.0, 1), 0.0);
        assert!(mackinnon_p(0.0, 1) > 0.9);
    }

    #[test]
    fn test_adf_stationary_vs_explosive() {
        let noise = gaussian_noise(11, 500);
        let stationary = adf(&noise, AdfRegression::Constant, None).unwrap();
        assert!(stationary.p_value < 0.01, "p = {}", stationary.p_value);

        let mut explosive = vec![1.0; 200];
        for t in 1..200 {
            explosive[t] = 1.02 * explosive[t - 1] + 0.01 * noise[t];
        }
        let nonstationary = adf(&explosive, AdfRegression::Constant, None).unwrap();
        assert!(nonstationary.p_value > 0.05, "p = {}", nonstationary.p_value);
    }

    #[test]
    fn test_engle_granger_detects_cointegration() {
        let b = random_walk(3, 300, 50.0, 1.0);
        let noise = gaussian_noise(4, 300);
        let a: Vec<f64> = b.iter().zip(&noise).map(|(x, e)| x + e).collect();
        let p = engle_granger(&a, &b).unwrap();
        assert!(p < 0.05, "p = {}", p);
    }
}
