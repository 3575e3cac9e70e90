//! Adaptive time-series momentum (ATSMOM).
//!
//! Multi-horizon, volatility-adjusted momentum combined into a single signal,
//! sized to a volatility target, gated by a long-term trend filter and damped
//! when realized volatility runs above target.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::dispatcher::{parse_params, AnalysisInput, Analyzer, DataNeeds, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::frame::{align, BarFrame};
use crate::toolkit::rolling::{ewm_mean, pct_change, rolling_std, sma};
use crate::toolkit::volatility::realized_vol_ewma;
use crate::toolkit::{last_finite, sign, TRADING_DAYS};
use crate::types::{AnalysisResult, AnalyzerId, Period};

pub const LOOKBACKS: [usize; 7] = [10, 20, 40, 60, 120, 180, 260];
const MAX_WEIGHT: f64 = 1.5;
const MIN_WEIGHT: f64 = 1.0;
const VOL_SPAN: usize = 60;
const TREND_WINDOW: usize = 200;
const MIN_DENOMINATOR: f64 = 1e-12;
const MIN_BETA_OBSERVATIONS: usize = 20;
const STATUS_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AtsmomParams {
    pub max_leverage: f64,
    pub target_vol: f64,
    pub smoothing_span: usize,
    /// Overrides the configured benchmark
    pub benchmark: Option<String>,
}

impl Default for AtsmomParams {
    fn default() -> Self {
        Self {
            max_leverage: 3.0,
            target_vol: 0.4,
            smoothing_span: 5,
            benchmark: None,
        }
    }
}

impl AtsmomParams {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.max_leverage > 0.0 && self.max_leverage <= 10.0) {
            return Err(EngineError::Validation("max_leverage must be in (0, 10]".into()));
        }
        if !(self.target_vol > 0.0 && self.target_vol <= 2.0) {
            return Err(EngineError::Validation("target_vol must be in (0, 2]".into()));
        }
        if self.smoothing_span == 0 || self.smoothing_span > 60 {
            return Err(EngineError::Validation("smoothing_span must be in [1, 60]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MomentumStatus {
    Buy,
    Sell,
    Neutral,
}

impl MomentumStatus {
    pub fn from_signal(signal: f64) -> Self {
        if signal > STATUS_THRESHOLD {
            MomentumStatus::Buy
        } else if signal < -STATUS_THRESHOLD {
            MomentumStatus::Sell
        } else {
            MomentumStatus::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MomentumStatus::Buy => "BUY",
            MomentumStatus::Sell => "SELL",
            MomentumStatus::Neutral => "NEUTRAL",
        }
    }
}

/// Beta of the asset against its benchmark
#[derive(Debug, Clone, Copy)]
pub struct BetaEstimate {
    pub value: f64,
    pub observations: usize,
    /// Benchmark returns had zero variance
    pub degenerate: bool,
}

#[derive(Debug, Clone)]
pub struct AtsmomOutput {
    pub dates: Vec<NaiveDate>,
    pub close: Vec<f64>,
    pub returns: Vec<f64>,
    pub volatility: Vec<f64>,
    pub trend_strength: Vec<f64>,
    pub trend_filter: Vec<f64>,
    pub signal: Vec<f64>,
    pub warnings: Vec<String>,
}

/// Linear weights from 1.5 (shortest lookback) to 1.0 (longest)
pub fn lookback_weights() -> Vec<f64> {
    let steps = (LOOKBACKS.len() - 1) as f64;
    (0..LOOKBACKS.len())
        .map(|i| MAX_WEIGHT - (MAX_WEIGHT - MIN_WEIGHT) * i as f64 / steps)
        .collect()
}

/// Weighted mean of the per-lookback momentum signs, normalized by its max-abs
fn combined_momentum(close: &[f64], returns: &[f64], warnings: &mut Vec<String>) -> Vec<f64> {
    let n = close.len();
    let mut sums = vec![0.0; n];
    let mut counts = vec![0usize; n];

    for (&lookback, weight) in LOOKBACKS.iter().zip(lookback_weights()) {
        if lookback >= n {
            continue;
        }
        let period_return = pct_change(close, lookback);
        let std = rolling_std(returns, lookback);
        let scale = (lookback as f64).sqrt();
        for i in 0..n {
            let (pr, sd) = (period_return[i], std[i]);
            if !pr.is_finite() || !sd.is_finite() {
                continue;
            }
            let vol_adjusted = pr / (sd * scale).max(MIN_DENOMINATOR);
            sums[i] += sign(vol_adjusted) * weight;
            counts[i] += 1;
        }
    }

    let mut combined: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, c)| if *c > 0 { s / *c as f64 } else { f64::NAN })
        .collect();

    let max_abs = combined
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if max_abs > 0.0 {
        for v in combined.iter_mut() {
            *v /= max_abs;
        }
    } else {
        warnings.push("degenerate_momentum".to_string());
    }
    combined
}

pub fn compute(frame: &BarFrame, params: &AtsmomParams) -> AtsmomOutput {
    let mut warnings = Vec::new();
    let close = frame.closes();
    let returns = frame.returns();
    let dense: Vec<f64> = returns
        .iter()
        .map(|r| if r.is_finite() { *r } else { 0.0 })
        .collect();

    let volatility = realized_vol_ewma(&dense, VOL_SPAN);
    let trend_strength = combined_momentum(&close, &returns, &mut warnings);

    let daily_target = params.target_vol / TRADING_DAYS.sqrt();
    let long_term = sma(&close, TREND_WINDOW);
    let trend_filter: Vec<f64> = close
        .iter()
        .zip(&long_term)
        .map(|(c, m)| if m.is_finite() && c > m { 1.0 } else { -1.0 })
        .collect();

    let raw: Vec<f64> = (0..close.len())
        .map(|i| {
            let size = (daily_target / volatility[i]).clamp(-params.max_leverage, params.max_leverage);
            trend_strength[i] * size * trend_filter[i]
        })
        .collect();

    let smoothed = ewm_mean(&raw, params.smoothing_span);
    let signal = smoothed
        .iter()
        .zip(&volatility)
        .map(|(s, vol)| {
            let excess = (vol / params.target_vol - 1.0).max(0.0);
            s / (1.0 + excess)
        })
        .collect();

    AtsmomOutput {
        dates: frame.dates(),
        close,
        returns,
        volatility,
        trend_strength,
        trend_filter,
        signal,
        warnings,
    }
}

/// Sample covariance over benchmark variance of daily returns on shared dates
pub fn beta_vs_benchmark(asset: &BarFrame, benchmark: &BarFrame) -> BetaEstimate {
    let (a, b) = align(asset, benchmark);
    let pairs: Vec<(f64, f64)> = a
        .returns()
        .into_iter()
        .zip(b.returns())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    let n = pairs.len();
    if n < MIN_BETA_OBSERVATIONS {
        return BetaEstimate {
            value: 1.0,
            observations: n,
            degenerate: false,
        };
    }

    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
    let (mut cov, mut var) = (0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mx) * (y - my);
        var += (y - my) * (y - my);
    }
    if var <= f64::EPSILON * f64::EPSILON {
        return BetaEstimate {
            value: 0.0,
            observations: n,
            degenerate: true,
        };
    }
    BetaEstimate {
        value: cov / var,
        observations: n,
        degenerate: false,
    }
}

pub struct AtsmomAnalyzer;

impl AtsmomAnalyzer {
    fn benchmark(params: &AtsmomParams, config: &EngineConfig) -> String {
        let code = params.benchmark.as_deref().unwrap_or(&config.benchmark);
        config.normalize(code).into_string()
    }
}

impl Analyzer for AtsmomAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Atsmom
    }

    fn name(&self) -> &'static str {
        "Adaptive Time-Series Momentum"
    }

    fn default_period(&self) -> Period {
        Period::FiveYears
    }

    fn validate_params(&self, params: &Value) -> EngineResult<()> {
        parse_params::<AtsmomParams>(params)?.validate()
    }

    fn data_needs(&self, ctx: &RequestContext, config: &EngineConfig) -> EngineResult<DataNeeds> {
        let params: AtsmomParams = parse_params(&ctx.params)?;
        let benchmark = Self::benchmark(&params, config);
        Ok(DataNeeds::bars(
            [ctx.symbol.to_string(), benchmark],
            ctx.period,
        ))
    }

    fn analyze(
        &self,
        ctx: &RequestContext,
        input: &AnalysisInput,
        config: &EngineConfig,
    ) -> EngineResult<AnalysisResult> {
        let params: AtsmomParams = parse_params(&ctx.params)?;
        let frame = input.frame(ctx.symbol.as_str())?;
        let benchmark = input.frame(&Self::benchmark(&params, config))?;

        let output = compute(frame, &params);
        let beta = beta_vs_benchmark(frame, benchmark);

        let current_signal = output
            .signal
            .last()
            .copied()
            .filter(|s| s.is_finite())
            .ok_or_else(|| EngineError::InsufficientData("no finite momentum signal".into()))?;
        let status = MomentumStatus::from_signal(current_signal);
        let trend = last_finite(&output.trend_strength).unwrap_or(0.0);
        let volatility = last_finite(&output.volatility).unwrap_or(0.0);

        let mut result = AnalysisResult::ok(self.id(), ctx.symbol.as_str());
        result
            .metric("current_price", frame.last_close().unwrap_or(0.0))
            .metric("current_signal", current_signal)
            .metric("trend", trend)
            .metric("volatility", volatility * 100.0)
            .metric("status", status.as_str())
            .metric("beta", beta.value);

        for warning in &output.warnings {
            result.warn(warning.as_str());
        }
        if beta.degenerate {
            result.warn("beta_degenerate");
        }

        result.details = Some(json!({
            "benchmark": benchmark.symbol(),
            "beta_observations": beta.observations,
            "lookbacks": LOOKBACKS,
            "lookback_weights": lookback_weights(),
            "params": params,
        }));

        result.dates = output.dates;
        result
            .series("close", output.close)
            .series("returns", output.returns)
            .series("volatility", output.volatility)
            .series("trend_strength", output.trend_strength)
            .series("trend_filter", output.trend_filter)
            .series("signal", output.signal);

        Ok(result)
    }
}
