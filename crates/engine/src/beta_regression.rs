//! Beta regression strategy: the normalized rolling slope of price over time
//! drives a long-only (optionally long/short) crossing strategy with a
//! fee-aware backtest.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::dispatcher::{parse_params, AnalysisInput, Analyzer, DataNeeds, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::frame::BarFrame;
use crate::toolkit::rolling::{returns, rolling_max_abs, rolling_ols_slope, sma};
use crate::types::{AnalysisResult, AnalyzerId, Period, TradeEvent, TradeSide};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BetaRegressionParams {
    pub window: usize,
    pub norm_window: usize,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub allow_short: bool,
    pub proximity_band: f64,
    /// Round-trip fee in basis points; the configured fee when absent
    pub fee_bps: Option<f64>,
}

impl Default for BetaRegressionParams {
    fn default() -> Self {
        Self {
            window: 60,
            norm_window: 252,
            entry_threshold: -0.5,
            exit_threshold: 0.5,
            allow_short: false,
            proximity_band: 0.15,
            fee_bps: None,
        }
    }
}

impl BetaRegressionParams {
    pub fn validate(&self) -> EngineResult<()> {
        if !(10..=500).contains(&self.window) {
            return Err(EngineError::Validation("window must be in [10, 500]".into()));
        }
        if self.norm_window < 2 || self.norm_window > 2000 {
            return Err(EngineError::Validation("norm_window must be in [2, 2000]".into()));
        }
        let in_band = |x: f64| (-1.0..=1.0).contains(&x);
        if !in_band(self.entry_threshold)
            || !in_band(self.exit_threshold)
            || self.entry_threshold >= self.exit_threshold
        {
            return Err(EngineError::Validation(
                "thresholds must satisfy -1 <= entry < exit <= 1".into(),
            ));
        }
        if !(self.proximity_band > 0.0 && self.proximity_band <= 1.0) {
            return Err(EngineError::Validation("proximity_band must be in (0, 1]".into()));
        }
        if let Some(fee) = self.fee_bps {
            if !(0.0..=500.0).contains(&fee) {
                return Err(EngineError::Validation("fee_bps must be in [0, 500]".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Proximity {
    NewBuy,
    PreparingBuy,
    ImminentSell,
    PreparingSell,
    Neutral,
}

impl Proximity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::NewBuy => "NEW_BUY",
            Proximity::PreparingBuy => "PREPARING_BUY",
            Proximity::ImminentSell => "IMMINENT_SELL",
            Proximity::PreparingSell => "PREPARING_SELL",
            Proximity::Neutral => "NEUTRAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BetaRegressionOutput {
    pub dates: Vec<NaiveDate>,
    pub close: Vec<f64>,
    pub mm: Vec<f64>,
    pub beta0: Vec<f64>,
    pub beta0_norm: Vec<f64>,
    /// Position held at the end of each bar: 1 long, -1 short, 0 flat
    pub trading: Vec<f64>,
    pub acc_returns: Vec<f64>,
    pub acc_returns_after_fees: Vec<f64>,
    pub trades: Vec<TradeEvent>,
    /// The last trade was still open and closed at the final bar
    pub closed_at_end: bool,
    pub position: i8,
    pub entered_on_last_bar: bool,
}

/// `beta0 / rolling max |beta0|`, undefined where the max is zero
fn normalize(beta0: &[f64], norm_window: usize) -> Vec<f64> {
    let max_abs = rolling_max_abs(beta0, norm_window, 1);
    beta0
        .iter()
        .zip(&max_abs)
        .map(|(b, m)| {
            if b.is_finite() && m.is_finite() && *m > 0.0 {
                b / m
            } else {
                f64::NAN
            }
        })
        .collect()
}

struct OpenTrade {
    side: TradeSide,
    entry: usize,
}

fn close_trade(open: &OpenTrade, exit: usize, dates: &[NaiveDate], close: &[f64]) -> TradeEvent {
    let (entry_price, exit_price) = (close[open.entry], close[exit]);
    TradeEvent {
        entry_date: dates[open.entry],
        exit_date: dates[exit],
        entry_price,
        exit_price,
        return_pct: open.side.sign() * (exit_price / entry_price - 1.0) * 100.0,
        side: open.side,
    }
}

pub fn compute(frame: &BarFrame, params: &BetaRegressionParams, fee_bps: f64) -> BetaRegressionOutput {
    let dates = frame.dates();
    let close = frame.closes();
    let n = close.len();
    let fee = fee_bps / 1e4;

    let t: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let beta0 = rolling_ols_slope(&close, &t, params.window);
    let beta0_norm = normalize(&beta0, params.norm_window);
    let mm = sma(&close, params.window);

    let (entry, exit) = (params.entry_threshold, params.exit_threshold);
    let mut trading = vec![0.0; n];
    let mut fees = vec![0.0; n];
    let mut trades = Vec::new();
    let mut open: Option<OpenTrade> = None;
    let mut prev: Option<f64> = None;
    let mut entered_at: Option<usize> = None;

    for i in 0..n {
        let cur = beta0_norm[i];
        if cur.is_finite() {
            // a missing previous reading counts as coming from the far side of the band
            let rose_above = |level: f64| prev.map_or(true, |p| p <= level) && cur > level;
            let fell_below = |level: f64| prev.map_or(true, |p| p >= level) && cur < level;
            let crossed_up = |level: f64| prev.is_some_and(|p| p <= level) && cur > level;
            let crossed_down = |level: f64| prev.is_some_and(|p| p >= level) && cur < level;

            match &open {
                None => {
                    if rose_above(entry) {
                        open = Some(OpenTrade { side: TradeSide::Long, entry: i });
                        entered_at = Some(i);
                    } else if params.allow_short && fell_below(exit) {
                        open = Some(OpenTrade { side: TradeSide::Short, entry: i });
                        entered_at = Some(i);
                    }
                }
                Some(trade) => {
                    let exit_now = match trade.side {
                        TradeSide::Long => crossed_up(exit),
                        TradeSide::Short => crossed_down(entry),
                    };
                    if exit_now {
                        trades.push(close_trade(trade, i, &dates, &close));
                        fees[i] += fee;
                        open = None;
                    }
                }
            }
            prev = Some(cur);
        }
        trading[i] = open.as_ref().map_or(0.0, |t| t.side.sign());
    }

    let position = trading.last().copied().unwrap_or(0.0) as i8;
    let closed_at_end = if let Some(trade) = &open {
        if n > 0 {
            trades.push(close_trade(trade, n - 1, &dates, &close));
            fees[n - 1] += fee;
        }
        true
    } else {
        false
    };

    let rets = returns(&close);
    let mut acc_returns = vec![0.0; n];
    let mut acc_returns_after_fees = vec![0.0; n];
    let (mut gross, mut net) = (1.0, 1.0);
    for i in 0..n {
        let strategy = if i > 0 && rets[i].is_finite() {
            rets[i] * trading[i - 1]
        } else {
            0.0
        };
        gross *= 1.0 + strategy;
        net *= 1.0 + strategy - fees[i];
        acc_returns[i] = gross - 1.0;
        acc_returns_after_fees[i] = net - 1.0;
    }

    BetaRegressionOutput {
        dates,
        close,
        mm,
        beta0,
        beta0_norm,
        trading,
        acc_returns,
        acc_returns_after_fees,
        trades,
        closed_at_end,
        position,
        entered_on_last_bar: n > 0 && entered_at == Some(n - 1),
    }
}

/// Classify how close the current reading is to the next long-side action
pub fn proximity(output: &BetaRegressionOutput, params: &BetaRegressionParams) -> Proximity {
    let mut readings = output.beta0_norm.iter().rev().filter(|v| v.is_finite());
    let Some(&cur) = readings.next() else {
        return Proximity::Neutral;
    };
    let slope = readings.next().map_or(0.0, |prev| cur - prev);

    match output.position {
        1 if output.entered_on_last_bar => Proximity::NewBuy,
        1 if slope > 0.0 && cur >= params.exit_threshold - params.proximity_band => {
            Proximity::ImminentSell
        }
        1 if slope > 0.0 && cur >= 0.0 => Proximity::PreparingSell,
        0 if slope > 0.0
            && cur <= params.entry_threshold
            && cur >= params.entry_threshold - params.proximity_band =>
        {
            Proximity::PreparingBuy
        }
        _ => Proximity::Neutral,
    }
}

pub struct BetaRegressionAnalyzer;

impl Analyzer for BetaRegressionAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::BetaRegression
    }

    fn name(&self) -> &'static str {
        "Beta Regression"
    }

    fn default_period(&self) -> Period {
        Period::TwoYears
    }

    fn validate_params(&self, params: &Value) -> EngineResult<()> {
        parse_params::<BetaRegressionParams>(params)?.validate()
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
        let params: BetaRegressionParams = parse_params(&ctx.params)?;
        let frame = input.frame(ctx.symbol.as_str())?;
        if frame.len() < params.window {
            return Err(EngineError::InsufficientData(format!(
                "{} bars, need at least {}",
                frame.len(),
                params.window
            )));
        }

        let fee_bps = params.fee_bps.unwrap_or(config.fee_bps);
        let output = compute(frame, &params, fee_bps);
        let signal = proximity(&output, &params);

        let last = |v: &[f64]| v.last().copied().unwrap_or(0.0);
        let wins = output.trades.iter().filter(|t| t.return_pct > 0.0).count();
        let win_rate = if output.trades.is_empty() {
            0.0
        } else {
            wins as f64 / output.trades.len() as f64 * 100.0
        };

        let mut result = AnalysisResult::ok(self.id(), ctx.symbol.as_str());
        result
            .metric("current_price", frame.last_close().unwrap_or(0.0))
            .metric("beta0_norm", last(&output.beta0_norm))
            .metric("position", output.position as i64)
            .metric("signal", signal.as_str())
            .metric("total_trades", output.trades.len())
            .metric("win_rate", win_rate)
            .metric("acc_return", last(&output.acc_returns) * 100.0)
            .metric("acc_return_after_fees", last(&output.acc_returns_after_fees) * 100.0)
            .metric("fee_bps", fee_bps);

        if output.beta0_norm.iter().all(|v| !v.is_finite()) {
            result.warn("beta_undefined");
        }

        result.details = Some(json!({
            "closed_at_end": output.closed_at_end,
            "params": params,
        }));
        result.trade_events = Some(output.trades);

        result.dates = output.dates;
        result
            .series("close", output.close)
            .series("mm", output.mm)
            .series("beta0_norm", output.beta0_norm)
            .series("trading", output.trading)
            .series("acc_returns", output.acc_returns)
            .series("acc_returns_after_fees", output.acc_returns_after_fees);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{constant_closes, frame, linear_closes};

    #[test]
    fn test_constant_prices_never_trade() {
        let out = compute(&frame("FLAT.SA", &constant_closes(300)), &BetaRegressionParams::default(), 5.0);
        assert!(out.trades.is_empty());
        assert!(out.trading.iter().all(|p| *p == 0.0));
        assert!(out.beta0_norm.iter().all(|v| v.is_nan()));
        assert_eq!(*out.acc_returns_after_fees.last().unwrap(), 0.0);
    }

    #[test]
    fn test_uptrend_enters_on_first_reading_and_closes_at_end() {
        let params = BetaRegressionParams::default();
        let out = compute(&frame("UP.SA", &linear_closes(300)), &params, 5.0);

        assert_eq!(out.trades.len(), 1);
        let trade = &out.trades[0];
        assert_eq!(trade.side, TradeSide::Long);
        assert_eq!(trade.entry_date, out.dates[params.window - 1]);
        assert_eq!(trade.exit_date, *out.dates.last().unwrap());
        assert!(out.closed_at_end);
        assert_eq!(out.position, 1);

        let gross = *out.acc_returns.last().unwrap();
        let net = *out.acc_returns_after_fees.last().unwrap();
        assert!(gross > 0.0);
        assert!(net > 0.0 && net < gross);
    }

    #[test]
    fn test_long_exit_and_fee_on_closing_day() {
        // falling, then rising: beta0_norm climbs from -1 through both thresholds
        let mut closes: Vec<f64> = (0..120).map(|t| 100.0 - 0.2 * t as f64).collect();
        let bottom = *closes.last().unwrap();
        closes.extend((1..=200).map(|t| bottom + 0.5 * t as f64));

        let params = BetaRegressionParams {
            window: 20,
            ..Default::default()
        };
        let out = compute(&frame("VEE.SA", &closes), &params, 10.0);

        let closed: Vec<&TradeEvent> = out
            .trades
            .iter()
            .filter(|t| t.exit_date != *out.dates.last().unwrap())
            .collect();
        assert!(!closed.is_empty());
        let first = closed[0];
        assert_eq!(first.side, TradeSide::Long);
        assert!(first.exit_date > first.entry_date);

        // net curve drops by the fee relative to gross on the exit day
        let exit_idx = out.dates.iter().position(|d| *d == first.exit_date).unwrap();
        let gross_step = (1.0 + out.acc_returns[exit_idx]) / (1.0 + out.acc_returns[exit_idx - 1]);
        let net_before = 1.0 + out.acc_returns_after_fees[exit_idx - 1];
        let net_after = 1.0 + out.acc_returns_after_fees[exit_idx];
        let expected = net_before * (gross_step - 0.001);
        assert!((net_after - expected).abs() < 1e-9);
    }

    #[test]
    fn test_short_side_is_opt_in() {
        let closes: Vec<f64> = (0..300).map(|t| 100.0 - 0.1 * t as f64).collect();
        let long_only = compute(&frame("DOWN.SA", &closes), &BetaRegressionParams::default(), 5.0);
        assert!(long_only.trades.is_empty());

        let params = BetaRegressionParams {
            allow_short: true,
            ..Default::default()
        };
        let with_short = compute(&frame("DOWN.SA", &closes), &params, 5.0);
        assert_eq!(with_short.trades.len(), 1);
        assert_eq!(with_short.trades[0].side, TradeSide::Short);
        assert!(with_short.trades[0].return_pct > 0.0);
    }

    #[test]
    fn test_proximity_new_buy() {
        let params = BetaRegressionParams::default();
        let out = compute(&frame("UP.SA", &linear_closes(60)), &params, 5.0);
        assert!(out.entered_on_last_bar);
        assert_eq!(proximity(&out, &params), Proximity::NewBuy);
    }

    #[test]
    fn test_params_validation() {
        let bad = BetaRegressionParams {
            entry_threshold: 0.6,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(BetaRegressionParams::default().validate().is_ok());
    }
}
