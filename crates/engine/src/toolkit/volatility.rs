//! Volatility estimators and channel widths

use ta::indicators::ExponentialMovingAverage;
use ta::Next;

use super::rolling::{ewm_std, rolling_std, sma};
use super::{TRADING_DAYS, VOL_FLOOR};
use crate::types::Bar;

/// Annualized EWMA volatility of a return series (`min_periods = span / 2`), floored
pub fn realized_vol_ewma(returns: &[f64], span: usize) -> Vec<f64> {
    let annual = TRADING_DAYS.sqrt();
    ewm_std(returns, span, span / 2)
        .into_iter()
        .map(|s| if s.is_finite() { (s * annual).max(VOL_FLOOR) } else { s })
        .collect()
}

/// Annualized rolling-window volatility (sample std)
pub fn realized_vol_rolling(returns: &[f64], window: usize) -> Vec<f64> {
    let annual = TRADING_DAYS.sqrt();
    rolling_std(returns, window)
        .into_iter()
        .map(|s| s * annual)
        .collect()
}

/// `max(high - low, |high - prev_close|, |low - prev_close|)`; the first bar uses its own range
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let range = bar.high - bar.low;
            if i == 0 {
                return range;
            }
            let prev_close = bars[i - 1].close;
            range
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect()
}

/// Average true range as the simple moving average of the true range
pub fn atr(bars: &[Bar], window: usize) -> Vec<f64> {
    sma(&true_range(bars), window)
}

/// Upper/middle/lower channel series
#[derive(Debug, Clone)]
pub struct Channel {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl Channel {
    /// `(upper - lower) / close`
    pub fn width(&self, close: &[f64]) -> Vec<f64> {
        self.upper
            .iter()
            .zip(&self.lower)
            .zip(close)
            .map(|((u, l), c)| if *c > 0.0 { (u - l) / c } else { f64::NAN })
            .collect()
    }
}

/// Bollinger bands: SMA +/- k sample standard deviations
pub fn bollinger(close: &[f64], window: usize, k: f64) -> Channel {
    let middle = sma(close, window);
    let std = rolling_std(close, window);
    let upper = middle.iter().zip(&std).map(|(m, s)| m + k * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - k * s).collect();
    Channel { upper, middle, lower }
}

/// Keltner channel: EMA of the close +/- k ATR
pub fn keltner(bars: &[Bar], window: usize, k: f64) -> Channel {
    let atr = atr(bars, window);
    let mut middle = vec![f64::NAN; bars.len()];
    if let Ok(mut ema) = ExponentialMovingAverage::new(window) {
        for (i, bar) in bars.iter().enumerate() {
            middle[i] = ema.next(bar.close);
        }
    }
    let upper = middle.iter().zip(&atr).map(|(m, a)| m + k * a).collect();
    let lower = middle.iter().zip(&atr).map(|(m, a)| m - k * a).collect();
    Channel { upper, middle, lower }
}

pub fn bollinger_width(close: &[f64], window: usize, k: f64) -> Vec<f64> {
    bollinger(close, window, k).width(close)
}

pub fn keltner_width(bars: &[Bar], window: usize, k: f64) -> Vec<f64> {
    let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
    keltner(bars, window, k).width(&close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::bars_from_closes;

    #[test]
    fn test_realized_vol_is_floored() {
        let vol = realized_vol_ewma(&[0.0; 100], 60);
        assert!(vol[10].is_nan());
        assert_eq!(vol[99], VOL_FLOOR);
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let mut bars = bars_from_closes(&[10.0, 12.0]);
        bars[1].high = 12.5;
        bars[1].low = 11.5;
        let tr = true_range(&bars);
        assert_eq!(tr[0], 0.0);
        assert!((tr[1] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_band_widths_zero_for_flat_prices() {
        let bars = bars_from_closes(&[10.0; 40]);
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let bb = bollinger_width(&close, 20, 2.0);
        let kc = keltner_width(&bars, 20, 2.0);
        assert!(bb[18].is_nan());
        assert_eq!(bb[39], 0.0);
        assert!(kc[39].abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_width_formula() {
        let close: Vec<f64> = (0..20).map(|i| 100.0 + (i % 2) as f64).collect();
        let width = bollinger_width(&close, 20, 2.0);
        let std = crate::toolkit::sample_std(&close).unwrap();
        assert!((width[19] - 4.0 * std / close[19]).abs() < 1e-12);
    }
}
