//! Hybrid-volatility price bands.
//!
//! GARCH(1,1) conditional volatility is blended with a boosted-stump
//! forecast of next-week realized volatility; the blend sets two- and
//! four-sigma log-normal bands over the chosen horizon.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::dispatcher::{parse_params, AnalysisInput, Analyzer, DataNeeds, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::frame::BarFrame;
use crate::toolkit::boost::{BoostParams, GradientBoostedStumps};
use crate::toolkit::garch::{fit_garch, GarchFit};
use crate::toolkit::rolling::{log_returns, sma};
use crate::toolkit::volatility::realized_vol_rolling;
use crate::toolkit::{last_finite, median, sample_std, TRADING_DAYS};
use crate::types::{AnalysisResult, AnalyzerId, Period};

pub const HYBRID_VOL_FLOOR: f64 = 0.05;
const GARCH_WEIGHT: f64 = 0.5;
const MIN_BARS: usize = 60;
const MIN_TRAINING_ROWS: usize = 30;
const TREND_WINDOW: usize = 50;
const FEATURE_WINDOWS: [usize; 3] = [5, 10, 20];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskBandsParams {
    /// Band horizon in trading days
    pub horizon_days: usize,
    /// Forward window of the realized-vol target the model learns
    pub target_days: usize,
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub min_leaf: usize,
}

impl Default for RiskBandsParams {
    fn default() -> Self {
        let boost = BoostParams::default();
        Self {
            horizon_days: 21,
            target_days: 5,
            n_rounds: boost.n_rounds,
            learning_rate: boost.learning_rate,
            min_leaf: boost.min_leaf,
        }
    }
}

impl RiskBandsParams {
    pub fn validate(&self) -> EngineResult<()> {
        if !(1..=252).contains(&self.horizon_days) {
            return Err(EngineError::Validation("horizon_days must be in [1, 252]".into()));
        }
        if !(2..=21).contains(&self.target_days) {
            return Err(EngineError::Validation("target_days must be in [2, 21]".into()));
        }
        if self.n_rounds == 0 || self.n_rounds > 500 {
            return Err(EngineError::Validation("n_rounds must be in [1, 500]".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(EngineError::Validation("learning_rate must be in (0, 1]".into()));
        }
        if self.min_leaf == 0 {
            return Err(EngineError::Validation("min_leaf must be positive".into()));
        }
        Ok(())
    }

    fn boost(&self) -> BoostParams {
        BoostParams {
            n_rounds: self.n_rounds,
            learning_rate: self.learning_rate,
            min_leaf: self.min_leaf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bands {
    pub plus_4s: f64,
    pub plus_2s: f64,
    pub center: f64,
    pub minus_2s: f64,
    pub minus_4s: f64,
}

impl Bands {
    /// `center * exp(k * sigma_h)` with `sigma_h = vol * sqrt(horizon / 252)`
    pub fn around(center: f64, annual_vol: f64, horizon_days: usize) -> Self {
        let sigma = annual_vol * (horizon_days as f64 / TRADING_DAYS).sqrt();
        Self {
            plus_4s: center * (4.0 * sigma).exp(),
            plus_2s: center * (2.0 * sigma).exp(),
            center,
            minus_2s: center * (-2.0 * sigma).exp(),
            minus_4s: center * (-4.0 * sigma).exp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolLevel {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Bull,
    Bear,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Vols {
    pub garch: f64,
    pub ml: f64,
    pub hybrid: f64,
}

pub fn blend(garch: f64, ml: f64) -> f64 {
    (GARCH_WEIGHT * garch + (1.0 - GARCH_WEIGHT) * ml).max(HYBRID_VOL_FLOOR)
}

#[derive(Debug, Clone)]
pub struct RiskBandsOutput {
    pub current_price: f64,
    pub vols: Vols,
    pub bands: Bands,
    pub vol_regime: VolLevel,
    pub trend: Trend,
    /// Per-row hybrid vol and bands; NaN before the first GARCH row
    pub row_hybrid: Vec<f64>,
    pub row_bands: Vec<Option<Bands>>,
    pub garch: Option<GarchFit>,
    pub training_rows: usize,
    pub stumps: usize,
    pub warnings: Vec<String>,
}

/// Engineered features per row: 5/10/20-day realized vol, |r| annualized, range over close
fn feature_rows(frame: &BarFrame, log_ret: &[f64]) -> Vec<Option<Vec<f64>>> {
    let vols: Vec<Vec<f64>> = FEATURE_WINDOWS
        .iter()
        .map(|w| realized_vol_rolling(log_ret, *w))
        .collect();
    let annual = TRADING_DAYS.sqrt();
    frame
        .bars()
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let mut row: Vec<f64> = vols.iter().map(|v| v[i]).collect();
            row.push(log_ret[i].abs() * annual);
            row.push((bar.high - bar.low) / bar.close);
            row.iter().all(|v| v.is_finite()).then_some(row)
        })
        .collect()
}

/// Annualized realized vol of the `days` returns after each row
fn forward_vol(log_ret: &[f64], days: usize) -> Vec<f64> {
    let n = log_ret.len();
    (0..n)
        .map(|i| {
            if i + days >= n {
                return f64::NAN;
            }
            sample_std(&log_ret[i + 1..=i + days]).map_or(f64::NAN, |s| s * TRADING_DAYS.sqrt())
        })
        .collect()
}

/// Annualized GARCH vol per row, aligned with the frame
fn garch_rows(fit: &GarchFit, log_ret: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; log_ret.len()];
    let mut vols = fit.annualized_vols().into_iter();
    for (i, r) in log_ret.iter().enumerate() {
        if r.is_finite() {
            if let Some(v) = vols.next() {
                out[i] = v;
            }
        }
    }
    out
}

pub fn compute(frame: &BarFrame, params: &RiskBandsParams) -> EngineResult<RiskBandsOutput> {
    if frame.len() < MIN_BARS {
        return Err(EngineError::InsufficientData(format!(
            "{} bars, need {}",
            frame.len(),
            MIN_BARS
        )));
    }
    let close = frame.closes();
    let current_price = frame
        .last_close()
        .ok_or_else(|| EngineError::InsufficientData("no closing price".into()))?;
    let log_ret = log_returns(&close);
    let mut warnings = Vec::new();

    let garch = fit_garch(&log_ret);
    let (garch_vol, garch_row) = match &garch {
        Some(fit) => (fit.forecast_annualized_vol(), garch_rows(fit, &log_ret)),
        None => {
            warnings.push("garch_fallback".to_string());
            let realized = realized_vol_rolling(&log_ret, 20);
            let current = last_finite(&realized).unwrap_or(0.0);
            (current, realized)
        }
    };

    let features = feature_rows(frame, &log_ret);
    let target = forward_vol(&log_ret, params.target_days);
    let (train_x, train_y): (Vec<Vec<f64>>, Vec<f64>) = features
        .iter()
        .zip(&target)
        .filter_map(|(row, y)| Some((row.clone()?, *y)).filter(|(_, y)| y.is_finite()))
        .unzip();
    let training_rows = train_x.len();

    let model = (training_rows >= MIN_TRAINING_ROWS)
        .then(|| GradientBoostedStumps::fit(&train_x, &train_y, &params.boost()))
        .flatten();
    let ml_row: Vec<f64> = features
        .iter()
        .map(|row| match (&model, row) {
            (Some(m), Some(row)) => m.predict(row).max(0.0),
            _ => f64::NAN,
        })
        .collect();
    let ml_vol = match ml_row.last() {
        Some(v) if v.is_finite() => *v,
        _ => {
            warnings.push("ml_fallback".to_string());
            garch_vol
        }
    };

    let hybrid = blend(garch_vol, ml_vol);
    let row_hybrid: Vec<f64> = garch_row
        .iter()
        .zip(&ml_row)
        .map(|(g, m)| match (g.is_finite(), m.is_finite()) {
            (true, true) => blend(*g, *m),
            (true, false) => blend(*g, *g),
            _ => f64::NAN,
        })
        .collect();
    let row_bands: Vec<Option<Bands>> = row_hybrid
        .iter()
        .zip(&close)
        .map(|(h, c)| h.is_finite().then(|| Bands::around(*c, *h, params.horizon_days)))
        .collect();

    let vol_regime = match median(&row_hybrid) {
        Some(m) if hybrid > m => VolLevel::High,
        _ => VolLevel::Low,
    };
    let trend = match sma(&close, TREND_WINDOW).last() {
        Some(m) if m.is_finite() && current_price > *m => Trend::Bull,
        _ => Trend::Bear,
    };

    Ok(RiskBandsOutput {
        current_price,
        vols: Vols {
            garch: garch_vol,
            ml: ml_vol,
            hybrid,
        },
        bands: Bands::around(current_price, hybrid, params.horizon_days),
        vol_regime,
        trend,
        row_hybrid,
        row_bands,
        stumps: model.as_ref().map_or(0, GradientBoostedStumps::n_stumps),
        garch,
        training_rows,
        warnings,
    })
}

pub struct RiskBandsAnalyzer;

impl Analyzer for RiskBandsAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::RiskBands
    }

    fn name(&self) -> &'static str {
        "Risk Bands"
    }

    fn default_period(&self) -> Period {
        Period::TwoYears
    }

    fn validate_params(&self, params: &Value) -> EngineResult<()> {
        parse_params::<RiskBandsParams>(params)?.validate()
    }

    fn data_needs(&self, ctx: &RequestContext, _config: &EngineConfig) -> EngineResult<DataNeeds> {
        Ok(DataNeeds::bars([ctx.symbol.to_string()], ctx.period))
    }

    fn analyze(
        &self,
        ctx: &RequestContext,
        input: &AnalysisInput,
        _config: &EngineConfig,
    ) -> EngineResult<AnalysisResult> {
        let params: RiskBandsParams = parse_params(&ctx.params)?;
        let frame = input.frame(ctx.symbol.as_str())?;
        let out = compute(frame, &params)?;

        let mut result = AnalysisResult::ok(self.id(), ctx.symbol.as_str());
        result
            .metric("current_price", out.current_price)
            .metric("garch_vol", out.vols.garch * 100.0)
            .metric("ml_vol", out.vols.ml * 100.0)
            .metric("hybrid_vol", out.vols.hybrid * 100.0)
            .metric("plus_4s", out.bands.plus_4s)
            .metric("plus_2s", out.bands.plus_2s)
            .metric("center", out.bands.center)
            .metric("minus_2s", out.bands.minus_2s)
            .metric("minus_4s", out.bands.minus_4s)
            .metric("vol_regime", if out.vol_regime == VolLevel::High { "High" } else { "Low" })
            .metric("trend", if out.trend == Trend::Bull { "Bull" } else { "Bear" })
            .metric("horizon_days", params.horizon_days);
        for warning in &out.warnings {
            result.warn(warning.as_str());
        }

        result.details = Some(json!({
            "vols": out.vols,
            "bands": out.bands,
            "regime": { "vol": out.vol_regime, "trend": out.trend },
            "garch": out.garch.as_ref().map(|g| json!({
                "omega": g.omega,
                "alpha": g.alpha,
                "beta": g.beta,
                "persistence": g.persistence(),
            })),
            "ml": { "training_rows": out.training_rows, "stumps": out.stumps },
            "params": params,
        }));

        let band = |pick: fn(&Bands) -> f64| -> Vec<f64> {
            out.row_bands
                .iter()
                .map(|b| b.as_ref().map_or(f64::NAN, pick))
                .collect()
        };
        result.dates = frame.dates();
        result
            .series("close", frame.closes())
            .series("plus_4s", band(|b| b.plus_4s))
            .series("plus_2s", band(|b| b.plus_2s))
            .series("minus_2s", band(|b| b.minus_2s))
            .series("minus_4s", band(|b| b.minus_4s))
            .series("hybrid_vol", out.row_hybrid.clone());
        Ok(result)
    }
}
