//! Normalized daily bar frames and date alignment

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::DataError;
use crate::toolkit::rolling;
use crate::types::Bar;

/// Ordered daily bars of one symbol.
///
/// Built through [`BarFrame::from_bars`], which guarantees strictly increasing
/// dates and finite, positive closes.
#[derive(Debug, Clone, Serialize)]
pub struct BarFrame {
    symbol: String,
    bars: Vec<Bar>,
}

impl BarFrame {
    /// Sort by date, drop rows with a non-finite or non-positive close, keep the
    /// last row of duplicated dates. An empty result is `NoData`.
    pub fn from_bars(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Result<Self, DataError> {
        bars.retain(|b| b.close.is_finite() && b.close > 0.0);
        bars.sort_by_key(|b| b.date);

        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }

        if deduped.is_empty() {
            return Err(DataError::NoData);
        }

        Ok(Self {
            symbol: symbol.into(),
            bars: deduped,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    /// Simple returns of the close; element 0 is NaN
    pub fn returns(&self) -> Vec<f64> {
        rolling::returns(&self.closes())
    }

    /// The last `n` bars (all of them when `n >= len`)
    pub fn tail(&self, n: usize) -> BarFrame {
        let start = self.bars.len().saturating_sub(n);
        BarFrame {
            symbol: self.symbol.clone(),
            bars: self.bars[start..].to_vec(),
        }
    }
}

/// Restrict two frames to the dates they share
pub fn align(a: &BarFrame, b: &BarFrame) -> (BarFrame, BarFrame) {
    let (mut i, mut j) = (0, 0);
    let mut left = Vec::new();
    let mut right = Vec::new();

    while i < a.bars.len() && j < b.bars.len() {
        let (da, db) = (a.bars[i].date, b.bars[j].date);
        if da == db {
            left.push(a.bars[i]);
            right.push(b.bars[j]);
            i += 1;
            j += 1;
        } else if da < db {
            i += 1;
        } else {
            j += 1;
        }
    }

    (
        BarFrame {
            symbol: a.symbol.clone(),
            bars: left,
        },
        BarFrame {
            symbol: b.symbol.clone(),
            bars: right,
        },
    )
}

/// Closes of several symbols on the dates common to all of them
#[derive(Debug, Clone)]
pub struct AlignedCloses {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    /// One column per symbol, same order as `symbols`
    pub columns: Vec<Vec<f64>>,
}

impl AlignedCloses {
    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

pub fn align_closes(frames: &[&BarFrame]) -> AlignedCloses {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for frame in frames {
        for bar in &frame.bars {
            *counts.entry(bar.date).or_default() += 1;
        }
    }
    let dates: Vec<NaiveDate> = counts
        .into_iter()
        .filter(|(_, count)| *count == frames.len())
        .map(|(date, _)| date)
        .collect();

    let columns = frames
        .iter()
        .map(|frame| {
            let by_date: HashMap<NaiveDate, f64> =
                frame.bars.iter().map(|b| (b.date, b.close)).collect();
            dates.iter().map(|d| by_date[d]).collect()
        })
        .collect();

    AlignedCloses {
        dates,
        symbols: frames.iter().map(|f| f.symbol.clone()).collect(),
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{bars_from_closes, day};

    #[test]
    fn test_from_bars_sorts_dedupes_and_drops_bad_closes() {
        let bars = vec![
            Bar::flat(day(2), 11.0, 100.0),
            Bar::flat(day(0), 10.0, 100.0),
            Bar::flat(day(1), -1.0, 100.0),
            Bar::flat(day(2), 12.0, 100.0),
            Bar::flat(day(3), f64::NAN, 100.0),
        ];
        let frame = BarFrame::from_bars("TEST.SA", bars).unwrap();

        assert_eq!(frame.len(), 2);
        assert_eq!(frame.dates(), vec![day(0), day(2)]);
        assert_eq!(frame.closes(), vec![10.0, 12.0]);
        assert!(frame.dates().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_frame_is_no_data() {
        assert_eq!(
            BarFrame::from_bars("EMPTY.SA", vec![]).unwrap_err(),
            DataError::NoData
        );
    }

    #[test]
    fn test_align_keeps_shared_dates() {
        let a = BarFrame::from_bars("A", bars_from_closes(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        let b_bars: Vec<Bar> = bars_from_closes(&[5.0, 6.0, 7.0, 8.0])
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, b)| b)
            .collect();
        let b = BarFrame::from_bars("B", b_bars).unwrap();

        let (la, lb) = align(&a, &b);
        assert_eq!(la.dates(), lb.dates());
        assert_eq!(la.closes(), vec![1.0, 3.0, 4.0]);
        assert_eq!(lb.closes(), vec![5.0, 7.0, 8.0]);
    }

    #[test]
    fn test_align_closes_intersection() {
        let a = BarFrame::from_bars("A", bars_from_closes(&[1.0, 2.0, 3.0])).unwrap();
        let b = a.tail(2);
        let aligned = align_closes(&[&a, &b]);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned.column("A").unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn test_returns_first_is_nan() {
        let a = BarFrame::from_bars("A", bars_from_closes(&[10.0, 11.0])).unwrap();
        let r = a.returns();
        assert!(r[0].is_nan());
        assert!((r[1] - 0.1).abs() < 1e-12);
    }
}
