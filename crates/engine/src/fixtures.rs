//! Deterministic synthetic market data for tests

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::frame::BarFrame;
use crate::types::{Bar, OptionContract, OptionSide};

/// The `i`-th weekday starting Monday 2022-01-03
pub fn day(i: usize) -> NaiveDate {
    let mut date = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    let mut left = i;
    while left > 0 {
        date += Duration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            left -= 1;
        }
    }
    date
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Bar::flat(day(i), *c, 1_000_000.0))
        .collect()
}

/// Bars with a +/-1% intraday range around the close
pub fn ranged_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Bar {
            date: day(i),
            open: *c,
            high: c * 1.01,
            low: c * 0.99,
            close: *c,
            volume: 1_000_000.0,
        })
        .collect()
}

pub fn frame(symbol: &str, closes: &[f64]) -> BarFrame {
    BarFrame::from_bars(symbol, ranged_bars(closes)).unwrap()
}

/// Standard normal draws via Box-Muller on a seeded generator
pub fn gaussian_noise(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let u1: f64 = 1.0 - rng.gen::<f64>();
            let u2: f64 = rng.gen::<f64>();
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        })
        .collect()
}

/// Additive random walk starting at `start`
pub fn random_walk(seed: u64, n: usize, start: f64, step: f64) -> Vec<f64> {
    let noise = gaussian_noise(seed, n);
    let mut level = start;
    noise
        .iter()
        .map(|z| {
            level += step * z;
            level
        })
        .collect()
}

/// S1: constant price 10.0
pub fn constant_closes(n: usize) -> Vec<f64> {
    vec![10.0; n]
}

/// S2: `10 + 0.05 t`
pub fn linear_closes(n: usize) -> Vec<f64> {
    (0..n).map(|t| 10.0 + 0.05 * t as f64).collect()
}

/// S3: `A = B + N(0, 1)` with B a random walk kept well above zero
pub fn cointegrated_closes(seed: u64, n: usize) -> (Vec<f64>, Vec<f64>) {
    let b = random_walk(seed, n, 100.0, 1.0);
    let noise = gaussian_noise(seed + 1000, n);
    let a = b.iter().zip(&noise).map(|(x, e)| x + e).collect();
    (a, b)
}

/// S5: returns cycling `+1%, -1%, +2%, -3%`
pub fn asymmetric_closes(n: usize) -> Vec<f64> {
    let cycle = [0.01, -0.01, 0.02, -0.03];
    let mut price = 50.0;
    let mut out = vec![price];
    for i in 1..n {
        price *= 1.0 + cycle[(i - 1) % cycle.len()];
        out.push(price);
    }
    out
}

pub fn contract(side: OptionSide, strike: Decimal, expiration: NaiveDate, volume: u64) -> OptionContract {
    let tag = match side {
        OptionSide::Call => 'C',
        OptionSide::Put => 'P',
    };
    OptionContract {
        symbol: format!("PETR{}{}", tag, strike),
        underlying: "PETR4.SA".to_string(),
        side,
        strike,
        expiration,
        last_price: Decimal::ONE,
        bid: Decimal::ONE,
        ask: Decimal::ONE,
        volume,
        open_interest: volume * 2,
    }
}

/// S4: spot 30, June expiry, call wall at 32, put wall at 28
pub fn june_chain() -> Vec<OptionContract> {
    let june = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
    let july = NaiveDate::from_ymd_opt(2024, 7, 19).unwrap();
    vec![
        contract(OptionSide::Call, Decimal::from(30), june, 400),
        contract(OptionSide::Call, Decimal::from(32), june, 5_000),
        contract(OptionSide::Call, Decimal::from(34), june, 900),
        contract(OptionSide::Put, Decimal::from(28), june, 4_000),
        contract(OptionSide::Put, Decimal::from(30), june, 300),
        contract(OptionSide::Put, Decimal::from(26), june, 600),
        contract(OptionSide::Call, Decimal::from(36), june, 3),
        contract(OptionSide::Call, Decimal::from(40), july, 9_000),
    ]
}
