//! Volatility regime analyzer.
//!
//! Clusters realized volatility, Bollinger width and ATR into Low/Medium/High
//! regimes, then combines the current regime with return asymmetry and the
//! Bollinger/Keltner squeeze into an options trade suggestion.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::dispatcher::{parse_params, AnalysisInput, Analyzer, DataNeeds, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::frame::BarFrame;
use crate::toolkit::cluster::{kmeans, remap_by_feature, standardize};
use crate::toolkit::rolling::sma;
use crate::toolkit::volatility::{atr, bollinger_width, keltner_width, realized_vol_rolling};
use crate::toolkit::{last_finite, mean, sample_std};
use crate::types::{AnalysisResult, AnalyzerId, Period, Regime};

const MIN_ROWS: usize = 10;
const N_CLUSTERS: usize = 3;
const PUT_BIAS_RATIO: f64 = 1.5;
const CALL_BIAS_RATIO: f64 = 0.7;
const COMPRESSION_SCORE: f64 = 0.8;
const EXPANSION_SCORE: f64 = 1.5;
const BASE_CONFIDENCE: f64 = 50.0;
const MAX_CONFIDENCE: f64 = 95.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolRegimeParams {
    pub vol_window: usize,
    pub channel_window: usize,
    pub bollinger_k: f64,
    pub keltner_k: f64,
    pub atr_window: usize,
    pub squeeze_smoothing: usize,
    pub n_init: usize,
    /// Overrides the configured K-means seed
    pub seed: Option<u64>,
}

impl Default for VolRegimeParams {
    fn default() -> Self {
        Self {
            vol_window: 20,
            channel_window: 20,
            bollinger_k: 2.0,
            keltner_k: 2.0,
            atr_window: 20,
            squeeze_smoothing: 5,
            n_init: 10,
            seed: None,
        }
    }
}

impl VolRegimeParams {
    pub fn validate(&self) -> EngineResult<()> {
        for (name, value) in [
            ("vol_window", self.vol_window),
            ("channel_window", self.channel_window),
            ("atr_window", self.atr_window),
        ] {
            if !(2..=252).contains(&value) {
                return Err(EngineError::Validation(format!("{} must be in [2, 252]", name)));
            }
        }
        if !(self.bollinger_k > 0.0 && self.keltner_k > 0.0) {
            return Err(EngineError::Validation("channel multipliers must be positive".into()));
        }
        if self.squeeze_smoothing == 0 || self.squeeze_smoothing > 50 {
            return Err(EngineError::Validation("squeeze_smoothing must be in [1, 50]".into()));
        }
        if self.n_init == 0 || self.n_init > 100 {
            return Err(EngineError::Validation("n_init must be in [1, 100]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Asymmetry {
    PutBias,
    CallBias,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Squeeze {
    Compression,
    Expansion,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSignal {
    BuyVolatility,
    SellVolatility,
    PutBias,
    CallBias,
    Hold,
}

impl TradeSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSignal::BuyVolatility => "BUY_VOLATILITY",
            TradeSignal::SellVolatility => "SELL_VOLATILITY",
            TradeSignal::PutBias => "PUT_BIAS",
            TradeSignal::CallBias => "CALL_BIAS",
            TradeSignal::Hold => "HOLD",
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            TradeSignal::BuyVolatility => "long straddle",
            TradeSignal::SellVolatility => "iron condor",
            TradeSignal::PutBias => "put spread",
            TradeSignal::CallBias => "call spread",
            TradeSignal::Hold => "none",
        }
    }

    fn rule_bonus(&self) -> f64 {
        match self {
            TradeSignal::BuyVolatility => 30.0,
            TradeSignal::SellVolatility => 25.0,
            TradeSignal::PutBias | TradeSignal::CallBias => 20.0,
            TradeSignal::Hold => 0.0,
        }
    }
}

fn label(value: impl Serialize) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
pub struct AsymmetryReading {
    pub ratio: f64,
    pub signal: Asymmetry,
    pub strength: f64,
}

/// `std(negative returns) / std(positive returns)`; 1.0 when either side is too thin
pub fn asymmetry(returns: &[f64]) -> AsymmetryReading {
    let positive: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite() && *r > 0.0).collect();
    let negative: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite() && *r < 0.0).collect();
    let ratio = match (sample_std(&negative), sample_std(&positive)) {
        (Some(neg), Some(pos)) if pos > 0.0 => neg / pos,
        _ => 1.0,
    };

    if ratio > PUT_BIAS_RATIO {
        AsymmetryReading {
            ratio,
            signal: Asymmetry::PutBias,
            strength: ((ratio - 1.0) * 50.0).min(100.0),
        }
    } else if ratio < CALL_BIAS_RATIO && ratio > 0.0 {
        AsymmetryReading {
            ratio,
            signal: Asymmetry::CallBias,
            strength: ((1.0 / ratio - 1.0) * 50.0).min(100.0),
        }
    } else {
        AsymmetryReading {
            ratio,
            signal: Asymmetry::Neutral,
            strength: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqueezeReading {
    pub score: f64,
    pub signal: Squeeze,
    pub strength: f64,
}

/// Classify a smoothed `BB width / Keltner width` score
pub fn classify_squeeze(score: f64) -> SqueezeReading {
    let (signal, strength) = if !score.is_finite() {
        (Squeeze::Neutral, 0.0)
    } else if score < COMPRESSION_SCORE {
        (Squeeze::Compression, ((COMPRESSION_SCORE - score) * 100.0).min(100.0))
    } else if score > EXPANSION_SCORE {
        (Squeeze::Expansion, ((score - EXPANSION_SCORE) * 50.0).min(100.0))
    } else {
        (Squeeze::Neutral, 0.0)
    };
    SqueezeReading {
        score,
        signal,
        strength,
    }
}

/// Per-bar squeeze score, smoothed; undefined where the Keltner width is zero
pub fn squeeze_scores(bb_width: &[f64], kc_width: &[f64], smoothing: usize) -> Vec<f64> {
    let raw: Vec<f64> = bb_width
        .iter()
        .zip(kc_width)
        .map(|(bb, kc)| if *kc > 0.0 { bb / kc } else { f64::NAN })
        .collect();
    sma(&raw, smoothing)
}

#[derive(Debug, Clone)]
pub struct RegimeFit {
    /// Regime per clean row
    pub labels: Vec<Regime>,
    /// Frame index of each clean row
    pub rows: Vec<usize>,
    pub current: Regime,
    pub persistence: usize,
    /// Mean realized vol per regime, indexed by `Regime as usize`
    pub cluster_vol: [Option<f64>; N_CLUSTERS],
}

/// Cluster the standardized features and relabel by ascending mean realized vol.
/// `features[0]` must be the realized volatility column.
pub fn fit_regimes(features: &[Vec<f64>], rows: Vec<usize>, seed: u64, n_init: usize) -> Option<RegimeFit> {
    let realized = features.first()?;
    if realized.len() < MIN_ROWS {
        return None;
    }
    let points = standardize(features);
    let fit = kmeans(&points, N_CLUSTERS, seed, n_init)?;
    let labels: Vec<Regime> = remap_by_feature(&fit.labels, realized)
        .into_iter()
        .map(Regime::from_label)
        .collect();

    let current = *labels.last()?;
    let persistence = labels.iter().rev().take_while(|l| **l == current).count();
    let mut cluster_vol = [None; N_CLUSTERS];
    for regime in [Regime::Low, Regime::Medium, Regime::High] {
        let vols: Vec<f64> = labels
            .iter()
            .zip(realized)
            .filter(|(l, _)| **l == regime)
            .map(|(_, v)| *v)
            .collect();
        cluster_vol[regime as usize] = mean(&vols);
    }

    Some(RegimeFit {
        labels,
        rows,
        current,
        persistence,
        cluster_vol,
    })
}

/// Priority: compression, expansion in a calm regime, put bias, call bias
pub fn compose_signal(
    regime: Regime,
    persistence: usize,
    squeeze: &SqueezeReading,
    asymmetry: &AsymmetryReading,
) -> (TradeSignal, f64) {
    let signal = if squeeze.signal == Squeeze::Compression && regime <= Regime::Medium {
        TradeSignal::BuyVolatility
    } else if squeeze.signal == Squeeze::Expansion && regime == Regime::Low {
        TradeSignal::SellVolatility
    } else if asymmetry.signal == Asymmetry::PutBias {
        TradeSignal::PutBias
    } else if asymmetry.signal == Asymmetry::CallBias {
        TradeSignal::CallBias
    } else {
        TradeSignal::Hold
    };
    if signal == TradeSignal::Hold {
        return (signal, BASE_CONFIDENCE);
    }

    let mut confidence = BASE_CONFIDENCE + signal.rule_bonus();
    if persistence > 5 {
        confidence += 10.0;
    }
    if squeeze.strength > 70.0 {
        confidence += 15.0;
    }
    (signal, confidence.min(MAX_CONFIDENCE))
}

#[derive(Debug, Clone)]
pub struct VolRegimeOutput {
    pub returns: Vec<f64>,
    pub realized_vol: Vec<f64>,
    pub bb_width: Vec<f64>,
    pub kc_width: Vec<f64>,
    pub atr: Vec<f64>,
    pub squeeze_score: Vec<f64>,
    /// None when fewer than ten clean rows remain
    pub fit: Option<RegimeFit>,
    pub regime: Regime,
    pub persistence: usize,
    pub asymmetry: AsymmetryReading,
    pub squeeze: SqueezeReading,
    pub signal: TradeSignal,
    pub confidence: f64,
}

pub fn compute(frame: &BarFrame, params: &VolRegimeParams, seed: u64) -> VolRegimeOutput {
    let close = frame.closes();
    let returns = frame.returns();
    let realized_vol = realized_vol_rolling(&returns, params.vol_window);
    let bb_width = bollinger_width(&close, params.channel_window, params.bollinger_k);
    let kc_width = keltner_width(frame.bars(), params.channel_window, params.keltner_k);
    let atr = atr(frame.bars(), params.atr_window);

    let rows: Vec<usize> = (0..close.len())
        .filter(|&i| {
            [returns[i], realized_vol[i], bb_width[i], kc_width[i], atr[i]]
                .iter()
                .all(|v| v.is_finite())
        })
        .collect();
    let features: Vec<Vec<f64>> = [&realized_vol, &bb_width, &atr]
        .iter()
        .map(|col| rows.iter().map(|&i| col[i]).collect())
        .collect();
    let fit = fit_regimes(&features, rows, seed, params.n_init);
    let (regime, persistence) = fit
        .as_ref()
        .map_or((Regime::Medium, 0), |f| (f.current, f.persistence));

    let asymmetry = asymmetry(&returns);
    let squeeze_score = squeeze_scores(&bb_width, &kc_width, params.squeeze_smoothing);
    let squeeze = classify_squeeze(squeeze_score.last().copied().unwrap_or(f64::NAN));
    let (signal, confidence) = compose_signal(regime, persistence, &squeeze, &asymmetry);

    VolRegimeOutput {
        returns,
        realized_vol,
        bb_width,
        kc_width,
        atr,
        squeeze_score,
        fit,
        regime,
        persistence,
        asymmetry,
        squeeze,
        signal,
        confidence,
    }
}

pub struct VolRegimeAnalyzer;

impl Analyzer for VolRegimeAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::VolRegime
    }

    fn name(&self) -> &'static str {
        "Volatility Regime"
    }

    fn default_period(&self) -> Period {
        Period::OneYear
    }

    fn validate_params(&self, params: &Value) -> EngineResult<()> {
        parse_params::<VolRegimeParams>(params)?.validate()
    }

    fn data_needs(&self, ctx: &RequestContext, _config: &EngineConfig) -> EngineResult<DataNeeds> {
        Ok(DataNeeds::bars([ctx.symbol.to_string()], ctx.period))
    }

    fn analyze(
        &self,
        ctx: &RequestContext,
        input: &AnalysisInput,
        config: &EngineConfig,
    ) -> EngineResult<AnalysisResult> {
        let params: VolRegimeParams = parse_params(&ctx.params)?;
        let frame = input.frame(ctx.symbol.as_str())?;
        let seed = params.seed.unwrap_or(config.kmeans_seed);
        let out = compute(frame, &params, seed);

        let mut result = AnalysisResult::ok(self.id(), ctx.symbol.as_str());
        result
            .metric("current_price", frame.last_close().unwrap_or(0.0))
            .metric("regime", out.regime.as_str())
            .metric("regime_label", out.regime as i64)
            .metric("persistence", out.persistence)
            .metric("realized_vol", last_finite(&out.realized_vol).unwrap_or(0.0) * 100.0)
            .metric("asymmetry_ratio", out.asymmetry.ratio)
            .metric("asymmetry_signal", label(out.asymmetry.signal))
            .metric("asymmetry_strength", out.asymmetry.strength)
            .metric("squeeze_score", out.squeeze.score)
            .metric("squeeze_signal", label(out.squeeze.signal))
            .metric("squeeze_strength", out.squeeze.strength)
            .metric("signal", out.signal.as_str())
            .metric("strategy", out.signal.strategy())
            .metric("confidence", out.confidence);

        if out.fit.is_none() {
            result.warn("insufficient_rows");
        }
        if !out.squeeze.score.is_finite() {
            result.warn("squeeze_undefined");
        }

        let clean_rows = out.fit.as_ref().map_or(0, |f| f.rows.len());
        result.details = Some(json!({
            "clean_rows": clean_rows,
            "cluster_volatility": {
                "low": out.fit.as_ref().and_then(|f| f.cluster_vol[0]),
                "medium": out.fit.as_ref().and_then(|f| f.cluster_vol[1]),
                "high": out.fit.as_ref().and_then(|f| f.cluster_vol[2]),
            },
            "seed": seed,
            "params": params,
        }));

        result.dates = frame.dates();
        result
            .series("close", frame.closes())
            .series("returns", out.returns)
            .series("realized_vol", out.realized_vol)
            .series("bb_width", out.bb_width)
            .series("kc_width", out.kc_width)
            .series("atr", out.atr)
            .series("squeeze_score", out.squeeze_score);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{asymmetric_closes, bars_from_closes, constant_closes, frame, gaussian_noise};
    use crate::types::Symbol;
    use std::collections::HashMap;

    fn segmented_closes() -> Vec<f64> {
        let noise = gaussian_noise(9, 600);
        let mut price = 100.0;
        let mut closes = vec![price];
        for (i, z) in noise.iter().enumerate().skip(1) {
            let vol = match i / 200 {
                0 => 0.005,
                1 => 0.03,
                _ => 0.012,
            };
            price *= 1.0 + vol * z;
            closes.push(price);
        }
        closes
    }

    #[test]
    fn test_constant_prices_are_low_regime() {
        let out = compute(&frame("FLAT.SA", &constant_closes(300)), &VolRegimeParams::default(), 42);
        assert!(out.fit.is_some());
        assert_eq!(out.regime, Regime::Low);
        assert_eq!(out.asymmetry.signal, Asymmetry::Neutral);
        assert_eq!(out.asymmetry.ratio, 1.0);
    }

    #[test]
    fn test_put_bias_strength_from_asymmetric_returns() {
        // 300 returns: 75 full cycles of +1%, -1%, +2%, -3%
        let f = frame("SKEW.SA", &asymmetric_closes(301));
        let reading = asymmetry(&f.returns());
        assert!((reading.ratio - 2.0).abs() < 1e-9);
        assert_eq!(reading.signal, Asymmetry::PutBias);
        assert!((reading.strength - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_call_bias_mirrors_put_bias() {
        let returns = [-0.01, 0.01, -0.02, 0.03].repeat(20);
        let reading = asymmetry(&returns);
        assert_eq!(reading.signal, Asymmetry::CallBias);
        assert!((reading.strength - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_regime_labels_are_ordered_by_volatility() {
        let out = compute(&frame("SEG.SA", &segmented_closes()), &VolRegimeParams::default(), 42);
        let fit = out.fit.expect("enough rows");
        let vols: Vec<f64> = fit.cluster_vol.iter().flatten().copied().collect();
        assert_eq!(vols.len(), 3);
        assert!(vols.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fit.current, *fit.labels.last().unwrap());
    }

    #[test]
    fn test_clusters_volatility_bollinger_and_atr() {
        let f = frame("SEG.SA", &segmented_closes());
        let params = VolRegimeParams::default();
        let out = compute(&f, &params, 42);
        let fit = out.fit.expect("enough rows");

        let rv = realized_vol_rolling(&f.returns(), params.vol_window);
        let bb = bollinger_width(&f.closes(), params.channel_window, params.bollinger_k);
        let range = atr(f.bars(), params.atr_window);
        let features: Vec<Vec<f64>> = [&rv, &bb, &range]
            .iter()
            .map(|col| fit.rows.iter().map(|&i| col[i]).collect())
            .collect();
        let expected = fit_regimes(&features, fit.rows.clone(), 42, params.n_init).unwrap();

        assert_eq!(fit.rows.len(), 580);
        assert_eq!(fit.labels, expected.labels);
        assert_eq!(fit.persistence, expected.persistence);
    }

    #[test]
    fn test_skewed_returns_compose_put_spread() {
        // flat bars keep the squeeze score near 1.1, so asymmetry decides
        let symbol = Symbol::normalize("SKEW", ".SA", '^');
        let skewed = BarFrame::from_bars(symbol.as_str(), bars_from_closes(&asymmetric_closes(301))).unwrap();
        let input = AnalysisInput {
            bars: HashMap::from([(symbol.to_string(), Ok(skewed))]),
            ..Default::default()
        };
        let ctx = RequestContext {
            code: "SKEW".into(),
            symbol,
            period: Period::OneYear,
            params: Value::Null,
        };
        let result = VolRegimeAnalyzer
            .analyze(&ctx, &input, &EngineConfig::new(5.0))
            .unwrap();

        assert_eq!(result.get_text("asymmetry_signal"), Some("PUT_BIAS"));
        assert!((result.get_f64("asymmetry_strength").unwrap() - 50.0).abs() < 1e-6);
        assert_eq!(result.get_text("squeeze_signal"), Some("NEUTRAL"));
        assert_eq!(result.get_text("signal"), Some("PUT_BIAS"));
        assert_eq!(result.get_text("strategy"), Some("put spread"));
        let confidence = result.get_f64("confidence").unwrap();
        assert!(confidence == 70.0 || confidence == 80.0);
    }

    #[test]
    fn test_fit_is_deterministic_for_a_seed() {
        let f = frame("SEG.SA", &segmented_closes());
        let params = VolRegimeParams::default();
        let a = compute(&f, &params, 7);
        let b = compute(&f, &params, 7);
        assert_eq!(a.fit.unwrap().labels, b.fit.unwrap().labels);
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
    }

    #[test]
    fn test_short_history_falls_back_to_medium() {
        let out = compute(&frame("NEW.SA", &constant_closes(25)), &VolRegimeParams::default(), 42);
        assert!(out.fit.is_none());
        assert_eq!(out.regime, Regime::Medium);
        assert_eq!(out.persistence, 0);
    }

    #[test]
    fn test_squeeze_boundaries() {
        assert_eq!(classify_squeeze(0.79).signal, Squeeze::Compression);
        assert_eq!(classify_squeeze(0.8).signal, Squeeze::Neutral);
        assert_eq!(classify_squeeze(1.5).signal, Squeeze::Neutral);
        assert_eq!(classify_squeeze(1.7).signal, Squeeze::Expansion);
        assert!((classify_squeeze(1.7).strength - 10.0).abs() < 1e-9);
        assert!((classify_squeeze(0.5).strength - 30.0).abs() < 1e-9);
        assert_eq!(classify_squeeze(f64::NAN).signal, Squeeze::Neutral);

        // tighter Bollinger width lowers the score
        let kc = vec![0.1; 10];
        let wide = squeeze_scores(&vec![0.09; 10], &kc, 5);
        let tight = squeeze_scores(&vec![0.05; 10], &kc, 5);
        assert!(tight[9] < wide[9]);
        assert!(squeeze_scores(&[0.1], &[0.0], 1)[0].is_nan());
    }

    #[test]
    fn test_signal_priority_and_confidence() {
        let compression = classify_squeeze(0.05);
        let expansion = classify_squeeze(2.0);
        let quiet = classify_squeeze(1.0);
        let put = AsymmetryReading {
            ratio: 2.0,
            signal: Asymmetry::PutBias,
            strength: 50.0,
        };
        let flat = asymmetry(&[]);

        // 50 + 30 + 10 + 15 capped at 95
        assert_eq!(compose_signal(Regime::Low, 8, &compression, &put), (TradeSignal::BuyVolatility, 95.0));
        assert_eq!(compose_signal(Regime::High, 1, &compression, &put), (TradeSignal::PutBias, 85.0));
        assert_eq!(compose_signal(Regime::Low, 1, &expansion, &flat), (TradeSignal::SellVolatility, 75.0));
        assert_eq!(compose_signal(Regime::Medium, 9, &quiet, &flat), (TradeSignal::Hold, 50.0));
    }

    #[test]
    fn test_params_validation() {
        let analyzer = VolRegimeAnalyzer;
        assert!(analyzer.validate_params(&Value::Null).is_ok());
        assert!(analyzer.validate_params(&json!({"vol_window": 1})).is_err());
        assert!(analyzer.validate_params(&json!({"n_init": 0})).is_err());
    }
}
