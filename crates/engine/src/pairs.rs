//! Long-short pairs screener.
//!
//! Every unordered pair of the universe is tested for correlation,
//! mean reversion of the hedge spread and Engle-Granger cointegration.
//! Survivors are ranked and the ones stretched past `z_min` are reported
//! as opportunities with a beta-neutral sizing proposal.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use tracing::debug;

use crate::config::EngineConfig;
use crate::dispatcher::{parse_params, AnalysisInput, Analyzer, DataNeeds, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::frame::{align_closes, AlignedCloses, BarFrame};
use crate::toolkit::regression::{adf, engle_granger, half_life, pearson, slope_through_origin, AdfRegression};
use crate::toolkit::rolling::rolling_slope_through_origin;
use crate::toolkit::volatility::atr;
use crate::toolkit::{last_finite, mean, sample_std};
use crate::types::{AnalysisResult, AnalyzerId, Period};

pub const DEFAULT_UNIVERSE: [&str; 50] = [
    "PETR4", "VALE3", "ITUB4", "BBDC4", "BBAS3", "ABEV3", "B3SA3", "WEGE3", "RENT3", "SUZB3",
    "ITSA4", "ELET3", "JBSS3", "RDOR3", "RAIL3", "GGBR4", "CSNA3", "USIM5", "PRIO3", "EQTL3",
    "LREN3", "MGLU3", "HAPV3", "VIVT3", "TIMS3", "CMIG4", "CPLE6", "SBSP3", "EMBR3", "BPAC11",
    "SANB11", "KLBN11", "CCRO3", "RADL3", "HYPE3", "UGPA3", "CSAN3", "BRFS3", "MRFG3", "BEEF3",
    "GOAU4", "CMIN3", "TOTS3", "YDUQ3", "COGN3", "AZUL4", "CYRE3", "MRVE3", "EGIE3", "TAEE11",
];

const ATR_WINDOW: usize = 14;
const MIN_ROWS: usize = 30;
const CAUTION_SIGMAS: f64 = 1.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PairsParams {
    pub universe: Vec<String>,
    pub period_days: usize,
    pub min_corr: f64,
    pub max_coint: f64,
    pub max_adf: f64,
    pub min_half_life: f64,
    pub max_half_life: f64,
    pub z_min: f64,
    pub beta_window: usize,
    /// Target gross notional in BRL
    pub notional: f64,
    pub lot_size: u64,
    /// Explicit `[A, B]` pair to analyze and size
    pub pair: Option<Vec<String>>,
    pub stop_atr_mult: f64,
    pub gain_atr_mult: f64,
    pub max_results: usize,
    /// Minimum share of `period_days` a symbol must cover to stay in the universe
    pub min_coverage: f64,
}

impl Default for PairsParams {
    fn default() -> Self {
        Self {
            universe: DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect(),
            period_days: 240,
            min_corr: 0.7,
            max_coint: 0.05,
            max_adf: 0.05,
            min_half_life: 0.5,
            max_half_life: 50.0,
            z_min: 2.0,
            beta_window: 60,
            notional: 100_000.0,
            lot_size: 100,
            pair: None,
            stop_atr_mult: 2.0,
            gain_atr_mult: 3.0,
            max_results: 20,
            min_coverage: 0.9,
        }
    }
}

impl PairsParams {
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: &str| Err(EngineError::Validation(msg.to_string()));
        if self.universe.is_empty() || self.universe.len() > 100 {
            return invalid("universe must hold between 1 and 100 symbols");
        }
        if !(MIN_ROWS..=1260).contains(&self.period_days) {
            return invalid("period_days must be in [30, 1260]");
        }
        if !(0.0..=1.0).contains(&self.min_corr) {
            return invalid("min_corr must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.max_coint) || !(0.0..=1.0).contains(&self.max_adf) {
            return invalid("p-value thresholds must be in [0, 1]");
        }
        if !(self.min_half_life >= 0.0 && self.min_half_life <= self.max_half_life) {
            return invalid("half-life bounds must satisfy 0 <= min <= max");
        }
        if !(self.z_min >= 0.0) {
            return invalid("z_min must be non-negative");
        }
        if self.beta_window < 2 || self.beta_window > self.period_days {
            return invalid("beta_window must be in [2, period_days]");
        }
        if !(self.notional > 0.0) || self.lot_size == 0 {
            return invalid("notional and lot_size must be positive");
        }
        if !(self.stop_atr_mult > 0.0 && self.gain_atr_mult > 0.0) {
            return invalid("ATR multipliers must be positive");
        }
        if self.max_results == 0 {
            return invalid("max_results must be positive");
        }
        if !(self.min_coverage > 0.0 && self.min_coverage <= 1.0) {
            return invalid("min_coverage must be in (0, 1]");
        }
        if let Some(pair) = &self.pair {
            if pair.len() != 2 || pair[0].trim().eq_ignore_ascii_case(pair[1].trim()) {
                return invalid("pair must name two distinct symbols");
            }
        }
        Ok(())
    }
}

/// How far the latest rolling hedge ratio sits from its own history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BetaStability {
    Favorable,
    Caution,
    NotRecommended,
}

impl BetaStability {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetaStability::Favorable => "Favorable",
            BetaStability::Caution => "Caution",
            BetaStability::NotRecommended => "NotRecommended",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairStats {
    pub a: String,
    pub b: String,
    pub correlation: f64,
    /// Hedge ratio of A on B, no intercept
    pub beta: f64,
    #[serde(skip)]
    beta_reverse: f64,
    pub half_life: Option<f64>,
    pub adf_pvalue: f64,
    pub coint_pvalue: f64,
    pub z_score: f64,
    /// +1 buy A / sell B, -1 sell A / buy B, 0 flat
    pub direction: i8,
    pub stability: BetaStability,
    pub passes_filters: bool,
    pub signal: bool,
}

impl PairStats {
    /// Same statistics seen as (B, A)
    fn flipped(self) -> Self {
        Self {
            a: self.b,
            b: self.a,
            beta: self.beta_reverse,
            beta_reverse: self.beta,
            z_score: -self.z_score,
            direction: -self.direction,
            ..self
        }
    }

    fn apply_filters(&mut self, params: &PairsParams) {
        let half_life_ok = self
            .half_life
            .map_or(false, |h| h >= params.min_half_life && h <= params.max_half_life);
        self.passes_filters = self.correlation.abs() >= params.min_corr
            && self.coint_pvalue <= params.max_coint
            && self.adf_pvalue <= params.max_adf
            && half_life_ok;
        self.signal = self.passes_filters && self.z_score.abs() >= params.z_min;
    }

    pub fn direction_label(&self) -> String {
        match self.direction {
            1 => format!("BUY {} / SELL {}", self.a, self.b),
            -1 => format!("SELL {} / BUY {}", self.a, self.b),
            _ => "FLAT".to_string(),
        }
    }
}

fn direction_from_z(z: f64) -> i8 {
    if z > 0.0 {
        -1
    } else if z < 0.0 {
        1
    } else {
        0
    }
}

pub fn classify_stability(rolling_beta: &[f64]) -> BetaStability {
    let finite: Vec<f64> = rolling_beta.iter().copied().filter(|v| v.is_finite()).collect();
    let (Some(latest), Some(m), Some(sd)) = (finite.last(), mean(&finite), sample_std(&finite)) else {
        return BetaStability::Caution;
    };
    let delta = (latest - m).abs();
    if delta <= sd {
        BetaStability::Favorable
    } else if delta <= CAUTION_SIGMAS * sd {
        BetaStability::Caution
    } else {
        BetaStability::NotRecommended
    }
}

/// Statistics on the orientation given; callers go through [`pair_stats`]
fn oriented_stats(a_name: &str, a: &[f64], b_name: &str, b: &[f64], beta_window: usize) -> Option<PairStats> {
    let correlation = pearson(a, b)?;
    let beta = slope_through_origin(a, b)?;
    let beta_reverse = slope_through_origin(b, a)?;

    let spread: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - beta * y).collect();
    let z_score = match (mean(&spread), sample_std(&spread), spread.last()) {
        (Some(m), Some(sd), Some(last)) if sd > 0.0 => (last - m) / sd,
        _ => 0.0,
    };
    let adf_pvalue = adf(&spread, AdfRegression::Constant, None).map_or(1.0, |r| r.p_value);
    let coint_pvalue = engle_granger(a, b).unwrap_or(1.0);

    Some(PairStats {
        a: a_name.to_string(),
        b: b_name.to_string(),
        correlation,
        beta,
        beta_reverse,
        half_life: half_life(&spread),
        adf_pvalue,
        coint_pvalue,
        z_score,
        direction: direction_from_z(z_score),
        stability: classify_stability(&rolling_slope_through_origin(a, b, beta_window)),
        passes_filters: false,
        signal: false,
    })
}

/// Pair statistics computed on the alphabetical orientation, so that
/// correlation, half-life and the p-values do not depend on argument order
/// while z-score and direction flip sign.
pub fn pair_stats(a_name: &str, a: &[f64], b_name: &str, b: &[f64], params: &PairsParams) -> Option<PairStats> {
    let mut stats = if a_name <= b_name {
        oriented_stats(a_name, a, b_name, b, params.beta_window)?
    } else {
        oriented_stats(b_name, b, a_name, a, params.beta_window)?.flipped()
    };
    stats.apply_filters(params);
    Some(stats)
}

/// Lower p_coint first, then larger |z|, then shorter half-life
pub fn rank(x: &PairStats, y: &PairStats) -> Ordering {
    let hl = |s: &PairStats| s.half_life.unwrap_or(f64::INFINITY);
    x.coint_pvalue
        .total_cmp(&y.coint_pvalue)
        .then_with(|| y.z_score.abs().total_cmp(&x.z_score.abs()))
        .then_with(|| hl(x).total_cmp(&hl(y)))
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedSymbol {
    pub symbol: String,
    pub reason: String,
}

/// Aligned closes of the usable part of the universe
#[derive(Debug, Clone)]
pub struct Universe {
    pub closes: AlignedCloses,
    pub dropped: Vec<DroppedSymbol>,
}

/// Drop symbols that failed to load or cover too little of the window, then
/// intersect the dates of the rest and keep the last `period_days` rows
pub fn build_universe(symbols: &[String], input: &AnalysisInput, params: &PairsParams) -> Universe {
    let min_bars = (params.min_coverage * params.period_days as f64).ceil() as usize;
    let mut dropped = Vec::new();
    let mut tails = Vec::new();
    for symbol in symbols {
        match input.frame(symbol) {
            Ok(frame) if frame.len() >= min_bars => tails.push(frame.tail(params.period_days)),
            Ok(frame) => dropped.push(DroppedSymbol {
                symbol: symbol.clone(),
                reason: format!("insufficient_coverage ({} of {} bars)", frame.len(), min_bars),
            }),
            Err(e) => dropped.push(DroppedSymbol {
                symbol: symbol.clone(),
                reason: e.code(),
            }),
        }
    }

    let refs: Vec<&BarFrame> = tails.iter().collect();
    let mut closes = align_closes(&refs);
    if closes.len() > params.period_days {
        let skip = closes.len() - params.period_days;
        closes.dates.drain(..skip);
        for column in closes.columns.iter_mut() {
            column.drain(..skip);
        }
    }
    Universe { closes, dropped }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenOutcome {
    pub tested: usize,
    /// Number of pairs passing the statistical filters, before capping
    pub cointegrated: usize,
    /// Pairs passing the statistical filters, ranked and capped at `max_results`
    pub pairs: Vec<PairStats>,
    /// Filtered pairs stretched past `z_min`, ranked and capped on their own
    pub opportunities: Vec<PairStats>,
}

/// Rank the filtered pairs, select the `z_min` opportunities from the full
/// list, then cap both lists at `max_results`
pub fn rank_and_cap(mut pairs: Vec<PairStats>, max_results: usize) -> (Vec<PairStats>, Vec<PairStats>) {
    pairs.sort_by(rank);
    let mut opportunities: Vec<PairStats> = pairs.iter().filter(|s| s.signal).cloned().collect();
    opportunities.truncate(max_results);
    pairs.truncate(max_results);
    (pairs, opportunities)
}

/// Test every unordered pair. With `focus`, only pairs containing it are
/// tested and it is always leg A.
pub fn screen(closes: &AlignedCloses, focus: Option<&str>, params: &PairsParams) -> ScreenOutcome {
    let n = closes.symbols.len();
    let mut tested = 0;
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let (mut x, mut y) = (i, j);
            if let Some(focus) = focus {
                if closes.symbols[j] == focus {
                    (x, y) = (j, i);
                } else if closes.symbols[i] != focus {
                    continue;
                }
            }
            tested += 1;
            let stats = pair_stats(
                &closes.symbols[x],
                &closes.columns[x],
                &closes.symbols[y],
                &closes.columns[y],
                params,
            );
            if let Some(stats) = stats.filter(|s| s.passes_filters) {
                pairs.push(stats);
            }
        }
    }

    let cointegrated = pairs.len();
    let (pairs, opportunities) = rank_and_cap(pairs, params.max_results);
    debug!(tested, cointegrated, opportunities = opportunities.len(), "Pairs screen finished");

    ScreenOutcome {
        tested,
        cointegrated,
        pairs,
        opportunities,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leg {
    pub symbol: String,
    pub side: LegSide,
    pub quantity: u64,
    pub price: Decimal,
    pub notional: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairSizing {
    pub legs: [Leg; 2],
    pub total_notional: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

fn to_money(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(2))
}

fn round_to_lots(quantity: f64, lot: u64) -> u64 {
    let lots = (quantity / lot as f64).floor() as u64;
    lots.max(1) * lot
}

/// Beta-neutral sizing: `qty_A * p_A + qty_B * p_B ~ notional` with
/// `qty_B = |beta| * qty_A`, both floored to whole lots (at least one).
/// Stop and gain are ATR multiples of both legs weighted by quantity.
pub fn size_pair(
    stats: &PairStats,
    price_a: f64,
    price_b: f64,
    atr_a: f64,
    atr_b: f64,
    params: &PairsParams,
) -> Option<PairSizing> {
    if stats.direction == 0 || !(price_a > 0.0 && price_b > 0.0) || !atr_a.is_finite() || !atr_b.is_finite() {
        return None;
    }
    let hedge = stats.beta.abs();
    let raw_a = params.notional / (price_a + hedge * price_b);
    let qty_a = round_to_lots(raw_a, params.lot_size);
    let qty_b = round_to_lots(hedge * raw_a, params.lot_size);

    let side_a = if stats.direction > 0 { LegSide::Buy } else { LegSide::Sell };
    let opposite = if side_a == LegSide::Buy { LegSide::Sell } else { LegSide::Buy };
    let side_b = if stats.beta >= 0.0 { opposite } else { side_a };

    let leg = |symbol: &str, side, quantity: u64, price: f64| -> Option<Leg> {
        let price = to_money(price)?;
        Some(Leg {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            notional: price * Decimal::from(quantity),
        })
    };
    let legs = [
        leg(&stats.a, side_a, qty_a, price_a)?,
        leg(&stats.b, side_b, qty_b, price_b)?,
    ];

    let total_notional = legs[0].notional + legs[1].notional;
    let risk_unit = qty_a as f64 * atr_a + qty_b as f64 * atr_b;
    let stop_loss = to_money(params.stop_atr_mult * risk_unit)?;
    let take_profit = to_money(params.gain_atr_mult * risk_unit)?;
    let total = total_notional.to_f64().filter(|t| *t > 0.0)?;

    Some(PairSizing {
        stop_loss_pct: stop_loss.to_f64()? / total * 100.0,
        take_profit_pct: take_profit.to_f64()? / total * 100.0,
        legs,
        total_notional,
        stop_loss,
        take_profit,
    })
}

pub struct PairsAnalyzer;

impl PairsAnalyzer {
    /// Normalized symbols the request needs, focus first
    fn symbols(ctx: &RequestContext, params: &PairsParams, config: &EngineConfig) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        let mut push = |code: &str| {
            let symbol = config.normalize(code).into_string();
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        };
        if let Some(pair) = &params.pair {
            for code in pair {
                push(code.as_str());
            }
            return symbols;
        }
        if !ctx.is_universe() {
            push(ctx.symbol.as_str());
        }
        for code in &params.universe {
            push(code.as_str());
        }
        symbols
    }

    fn sizing_for(stats: &PairStats, input: &AnalysisInput, closes: &AlignedCloses, params: &PairsParams) -> Option<PairSizing> {
        let last = |s: &str| closes.column(s).and_then(|c| c.last().copied());
        let atr_of = |s: &str| {
            input
                .frame(s)
                .ok()
                .and_then(|f| last_finite(&atr(f.bars(), ATR_WINDOW)))
        };
        size_pair(
            stats,
            last(&stats.a)?,
            last(&stats.b)?,
            atr_of(&stats.a)?,
            atr_of(&stats.b)?,
            params,
        )
    }

    fn analyze_pair(
        &self,
        ctx: &RequestContext,
        symbols: &[String],
        universe: &Universe,
        input: &AnalysisInput,
        params: &PairsParams,
    ) -> EngineResult<AnalysisResult> {
        let closes = &universe.closes;
        let (a, b) = (&symbols[0], &symbols[1]);
        let (Some(col_a), Some(col_b)) = (closes.column(a), closes.column(b)) else {
            return Err(EngineError::InsufficientData(format!("no overlapping history for {}/{}", a, b)));
        };
        let stats = pair_stats(a, col_a, b, col_b, params)
            .ok_or_else(|| EngineError::InsufficientData("pair statistics undefined".into()))?;
        let sizing = Self::sizing_for(&stats, input, closes, params);

        let mut result = AnalysisResult::ok(self.id(), format!("{}/{}", a, b));
        result
            .metric("correlation", stats.correlation)
            .metric("beta", stats.beta)
            .metric("half_life", stats.half_life.unwrap_or(f64::NAN))
            .metric("adf_pvalue", stats.adf_pvalue)
            .metric("coint_pvalue", stats.coint_pvalue)
            .metric("z_score", stats.z_score)
            .metric("direction", stats.direction_label())
            .metric("stability", stats.stability.as_str())
            .metric("passes_filters", stats.passes_filters)
            .metric("signal", stats.signal);
        if stats.half_life.is_none() {
            result.warn("spread_not_mean_reverting");
        }
        if sizing.is_none() {
            result.warn("sizing_unavailable");
        }

        let spread: Vec<f64> = col_a.iter().zip(col_b).map(|(x, y)| x - stats.beta * y).collect();
        result.dates = closes.dates.clone();
        result
            .series("close_a", col_a.to_vec())
            .series("close_b", col_b.to_vec())
            .series("spread", spread);
        result.details = Some(json!({
            "pair": stats,
            "sizing": sizing,
            "rows": closes.len(),
            "dropped": universe.dropped,
            "requested_by": ctx.code,
        }));
        Ok(result)
    }
}

impl Analyzer for PairsAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Pairs
    }

    fn name(&self) -> &'static str {
        "Long-Short Pairs Screener"
    }

    fn default_period(&self) -> Period {
        Period::covering(PairsParams::default().period_days)
    }

    fn validate_params(&self, params: &Value) -> EngineResult<()> {
        parse_params::<PairsParams>(params)?.validate()
    }

    fn data_needs(&self, ctx: &RequestContext, config: &EngineConfig) -> EngineResult<DataNeeds> {
        let params: PairsParams = parse_params(&ctx.params)?;
        let period = Period::covering(params.period_days).max(ctx.period);
        Ok(DataNeeds::bars(Self::symbols(ctx, &params, config), period))
    }

    fn analyze(
        &self,
        ctx: &RequestContext,
        input: &AnalysisInput,
        config: &EngineConfig,
    ) -> EngineResult<AnalysisResult> {
        let params: PairsParams = parse_params(&ctx.params)?;
        let symbols = Self::symbols(ctx, &params, config);
        if params.pair.is_some() {
            for symbol in &symbols {
                input.frame(symbol)?;
            }
        } else if !ctx.is_universe() {
            input.frame(ctx.symbol.as_str())?;
        }
        let universe = build_universe(&symbols, input, &params);
        let closes = &universe.closes;

        if closes.symbols.len() < 2 {
            return Err(EngineError::InsufficientData(format!(
                "{} usable symbols after coverage filter",
                closes.symbols.len()
            )));
        }
        if closes.len() < MIN_ROWS.max(params.beta_window) {
            return Err(EngineError::InsufficientData(format!(
                "{} common dates across the universe",
                closes.len()
            )));
        }

        if params.pair.is_some() {
            return self.analyze_pair(ctx, &symbols, &universe, input, &params);
        }

        let focus = (!ctx.is_universe()).then(|| ctx.symbol.as_str());
        if let Some(focus) = focus {
            if closes.column(focus).is_none() {
                return Err(EngineError::InsufficientData(format!("{} lacks coverage", focus)));
            }
        }

        let outcome = screen(closes, focus, &params);
        let best = outcome.opportunities.first().or(outcome.pairs.first());
        let sizing = outcome
            .opportunities
            .first()
            .and_then(|s| Self::sizing_for(s, input, closes, &params));

        let label = if ctx.is_universe() { ctx.code.clone() } else { ctx.symbol.to_string() };
        let mut result = AnalysisResult::ok(self.id(), label);
        result
            .metric("universe_size", closes.symbols.len())
            .metric("dropped", universe.dropped.len())
            .metric("pairs_tested", outcome.tested)
            .metric("cointegrated", outcome.cointegrated)
            .metric("opportunities", outcome.opportunities.len())
            .metric("rows", closes.len());
        if let Some(best) = best {
            result
                .metric("top_pair", format!("{}/{}", best.a, best.b))
                .metric("top_z_score", best.z_score)
                .metric("top_coint_pvalue", best.coint_pvalue);
        }
        if !universe.dropped.is_empty() {
            result.warn("symbols_dropped");
        }

        result.details = Some(json!({
            "pairs": outcome.pairs,
            "opportunities": outcome.opportunities,
            "sizing": sizing,
            "dropped": universe.dropped,
            "first_date": closes.dates.first(),
            "last_date": closes.dates.last(),
        }));
        Ok(result)
    }
}
