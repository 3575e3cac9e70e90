//! GARCH(1,1) with variance targeting, fitted by a deterministic grid search

use super::{mean, TRADING_DAYS};

const MIN_OBSERVATIONS: usize = 30;
const MAX_PERSISTENCE: f64 = 0.999;

#[derive(Debug, Clone)]
pub struct GarchFit {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    pub log_likelihood: f64,
    /// Conditional variance per observation, aligned with the input returns
    pub variances: Vec<f64>,
    /// De-meaned last return, used for the one-step forecast
    last_shock: f64,
}

impl GarchFit {
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// One-step-ahead variance
    pub fn forecast_variance(&self) -> f64 {
        let last = self.variances.last().copied().unwrap_or(0.0);
        self.omega + self.alpha * self.last_shock.powi(2) + self.beta * last
    }

    pub fn forecast_annualized_vol(&self) -> f64 {
        (self.forecast_variance() * TRADING_DAYS).sqrt()
    }

    pub fn annualized_vols(&self) -> Vec<f64> {
        self.variances
            .iter()
            .map(|v| (v * TRADING_DAYS).sqrt())
            .collect()
    }
}

/// Conditional variances and Gaussian log-likelihood (constants dropped)
fn filter(shocks: &[f64], omega: f64, alpha: f64, beta: f64, initial: f64) -> (Vec<f64>, f64) {
    let mut variances = Vec::with_capacity(shocks.len());
    let mut var = initial;
    let mut ll = 0.0;
    for (t, e) in shocks.iter().enumerate() {
        if t > 0 {
            var = omega + alpha * shocks[t - 1].powi(2) + beta * var;
        }
        let v = var.max(1e-20);
        ll -= 0.5 * (v.ln() + e * e / v);
        variances.push(v);
    }
    (variances, ll)
}

/// Fit GARCH(1,1) to daily returns. `omega` is pinned by variance targeting;
/// `(alpha, beta)` are searched on a coarse grid and refined twice.
pub fn fit_garch(returns: &[f64]) -> Option<GarchFit> {
    let clean: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    if clean.len() < MIN_OBSERVATIONS {
        return None;
    }
    let mu = mean(&clean)?;
    let shocks: Vec<f64> = clean.iter().map(|r| r - mu).collect();
    let sample_var = shocks.iter().map(|e| e * e).sum::<f64>() / shocks.len() as f64;
    if sample_var <= 0.0 {
        return None;
    }

    let evaluate = |alpha: f64, beta: f64| -> Option<f64> {
        if alpha < 0.0 || beta < 0.0 || alpha + beta >= MAX_PERSISTENCE {
            return None;
        }
        let omega = sample_var * (1.0 - alpha - beta);
        let (_, ll) = filter(&shocks, omega, alpha, beta, sample_var);
        ll.is_finite().then_some(ll)
    };

    let mut best = (0.05, 0.90, f64::NEG_INFINITY);
    for ai in 1..=15 {
        for bi in 0..=19 {
            let (alpha, beta) = (ai as f64 * 0.02, 0.60 + bi as f64 * 0.02);
            if let Some(ll) = evaluate(alpha, beta) {
                if ll > best.2 {
                    best = (alpha, beta, ll);
                }
            }
        }
    }

    for step in [0.005, 0.001] {
        let (a0, b0, _) = best;
        for da in -4..=4 {
            for db in -4..=4 {
                let (alpha, beta) = (a0 + da as f64 * step, b0 + db as f64 * step);
                if let Some(ll) = evaluate(alpha, beta) {
                    if ll > best.2 {
                        best = (alpha, beta, ll);
                    }
                }
            }
        }
    }

    let (alpha, beta, log_likelihood) = best;
    if !log_likelihood.is_finite() {
        return None;
    }
    let omega = sample_var * (1.0 - alpha - beta);
    let (variances, _) = filter(&shocks, omega, alpha, beta, sample_var);

    Some(GarchFit {
        omega,
        alpha,
        beta,
        log_likelihood,
        variances,
        last_shock: *shocks.last()?,
    })
}
