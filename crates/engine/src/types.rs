//! Types shared by the market data adapter, the toolkit and the analyzers

use chrono::{Datelike, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Uppercase instrument code, normalized with the exchange suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Trim, uppercase and append `suffix` unless the code already carries it
    /// or is an index (starts with `index_marker`). Idempotent.
    pub fn normalize(code: &str, suffix: &str, index_marker: char) -> Self {
        let code = code.trim().to_uppercase();
        let suffix = suffix.to_uppercase();
        if code.is_empty() || code.starts_with(index_marker) || code.ends_with(&suffix) {
            Symbol(code)
        } else {
            Symbol(format!("{}{}", code, suffix))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// History window requested from the vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::TwoYears,
        Period::FiveYears,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
        }
    }

    /// Approximate number of trading sessions covered
    pub fn trading_days(&self) -> usize {
        match self {
            Period::OneMonth => 21,
            Period::ThreeMonths => 63,
            Period::SixMonths => 126,
            Period::OneYear => 252,
            Period::TwoYears => 504,
            Period::FiveYears => 1260,
        }
    }

    /// Smallest period holding at least `days` trading sessions
    pub fn covering(days: usize) -> Period {
        Self::ALL
            .into_iter()
            .find(|p| p.trading_days() >= days)
            .unwrap_or(Period::FiveYears)
    }
}

impl FromStr for Period {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| EngineError::Validation(format!("invalid period: {}", s)))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A daily OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Bar where open/high/low all equal the close
    pub fn flat(date: NaiveDate, close: f64, volume: f64) -> Self {
        Self {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionSide {
    Call,
    Put,
}

/// A single listed option contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    pub underlying: String,
    pub side: OptionSide,
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub last_price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: u64,
    pub open_interest: u64,
}

impl OptionContract {
    /// Expiration month letter (Jan -> A ... Dec -> L)
    pub fn month_letter(&self) -> char {
        month_letter(self.expiration)
    }
}

pub fn month_letter(date: NaiveDate) -> char {
    (b'A' + date.month0() as u8) as char
}

/// Volatility regime label, ordered by cluster volatility
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Regime {
    pub fn from_label(label: usize) -> Self {
        match label {
            0 => Regime::Low,
            1 => Regime::Medium,
            _ => Regime::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Low => "LOW",
            Regime::Medium => "MEDIUM",
            Regime::High => "HIGH",
        }
    }
}

/// Side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn sign(&self) -> f64 {
        match self {
            TradeSide::Long => 1.0,
            TradeSide::Short => -1.0,
        }
    }
}

/// A closed round trip produced by a signal backtest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub return_pct: f64,
    pub side: TradeSide,
}

/// Upstream subscription level of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entitlement {
    Free,
    Premium,
}

impl FromStr for Entitlement {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Entitlement::Free),
            "premium" => Ok(Entitlement::Premium),
            _ => Err(EngineError::Unauthenticated),
        }
    }
}

/// Identifier of a registered analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerId {
    Atsmom,
    BetaRegression,
    Pairs,
    VolRegime,
    HunterWalls,
    RiskBands,
}

impl AnalyzerId {
    pub const ALL: [AnalyzerId; 6] = [
        AnalyzerId::Atsmom,
        AnalyzerId::BetaRegression,
        AnalyzerId::Pairs,
        AnalyzerId::VolRegime,
        AnalyzerId::HunterWalls,
        AnalyzerId::RiskBands,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerId::Atsmom => "atsmom",
            AnalyzerId::BetaRegression => "beta_regression",
            AnalyzerId::Pairs => "pairs",
            AnalyzerId::VolRegime => "vol_regime",
            AnalyzerId::HunterWalls => "hunter_walls",
            AnalyzerId::RiskBands => "risk_bands",
        }
    }
}

impl FromStr for AnalyzerId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| EngineError::UnknownAnalyzer(s.to_string()))
    }
}

impl fmt::Display for AnalyzerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A headline value: number, integer, label or flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Integer(i64),
    Number(f64),
    Text(String),
    Flag(bool),
}

impl Metric {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Metric::Number(v) => Some(*v),
            Metric::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Metric::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Metric {
    fn from(v: f64) -> Self {
        Metric::Number(v)
    }
}

impl From<i64> for Metric {
    fn from(v: i64) -> Self {
        Metric::Integer(v)
    }
}

impl From<usize> for Metric {
    fn from(v: usize) -> Self {
        Metric::Integer(v as i64)
    }
}

impl From<u64> for Metric {
    fn from(v: u64) -> Self {
        Metric::Integer(v as i64)
    }
}

impl From<bool> for Metric {
    fn from(v: bool) -> Self {
        Metric::Flag(v)
    }
}

impl From<&str> for Metric {
    fn from(v: &str) -> Self {
        Metric::Text(v.to_string())
    }
}

impl From<String> for Metric {
    fn from(v: String) -> Self {
        Metric::Text(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Ok,
    Error,
}

/// Uniform output record of every analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: AnalysisStatus,
    pub analyzer: AnalyzerId,
    pub symbol: String,
    pub analysis_date: String,
    pub headline_metrics: BTreeMap<String, Metric>,
    pub time_series: BTreeMap<String, Vec<f64>>,
    pub dates: Vec<NaiveDate>,
    pub trade_events: Option<Vec<TradeEvent>>,
    pub details: Option<Value>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn ok(analyzer: AnalyzerId, symbol: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Ok,
            analyzer,
            symbol: symbol.into(),
            analysis_date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            headline_metrics: BTreeMap::new(),
            time_series: BTreeMap::new(),
            dates: Vec::new(),
            trade_events: None,
            details: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn failed(analyzer: AnalyzerId, symbol: impl Into<String>, code: impl Into<String>) -> Self {
        let mut result = Self::ok(analyzer, symbol);
        result.status = AnalysisStatus::Error;
        result.error = Some(code.into());
        result
    }

    pub fn is_ok(&self) -> bool {
        self.status == AnalysisStatus::Ok
    }

    pub fn metric(&mut self, key: &str, value: impl Into<Metric>) -> &mut Self {
        self.headline_metrics.insert(key.to_string(), value.into());
        self
    }

    pub fn series(&mut self, key: &str, values: Vec<f64>) -> &mut Self {
        self.time_series.insert(key.to_string(), values);
        self
    }

    pub fn warn(&mut self, warning: impl Into<String>) -> &mut Self {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
        self
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.headline_metrics.get(key).and_then(Metric::as_f64)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.headline_metrics.get(key).and_then(Metric::as_text)
    }

    /// Replace every non-finite number with 0 so the payload is valid JSON
    pub fn scrub(&mut self) {
        for metric in self.headline_metrics.values_mut() {
            if let Metric::Number(v) = metric {
                if !v.is_finite() {
                    *v = 0.0;
                }
            }
        }
        for values in self.time_series.values_mut() {
            crate::toolkit::scrub(values);
        }
        if let Some(trades) = self.trade_events.as_mut() {
            for t in trades.iter_mut() {
                for v in [&mut t.entry_price, &mut t.exit_price, &mut t.return_pct] {
                    if !v.is_finite() {
                        *v = 0.0;
                    }
                }
            }
        }
    }

    /// Drop the per-bar payload (series and dates)
    pub fn strip_series(&mut self) {
        self.time_series.clear();
        self.dates.clear();
    }

    /// Wire envelope: `{"success": true, "data": {...}}` or `{"success": false, "error": code}`
    pub fn to_envelope(&self) -> Value {
        if !self.is_ok() {
            return json!({
                "success": false,
                "error": self.error.clone().unwrap_or_else(|| "internal_error".to_string()),
                "symbol": self.symbol,
            });
        }

        let mut data = json!({
            "analyzer": self.analyzer,
            "symbol": self.symbol,
            "analysis_date": self.analysis_date,
            "metrics": self.headline_metrics,
            "warnings": self.warnings,
        });
        if !self.time_series.is_empty() {
            data["series"] = json!(self.time_series);
            data["dates"] = json!(self.dates);
        }
        if let Some(trades) = &self.trade_events {
            data["trades"] = json!(trades);
        }
        if let Some(details) = &self.details {
            data["details"] = details.clone();
        }
        json!({ "success": true, "data": data })
    }
}
