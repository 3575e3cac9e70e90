//! Yahoo Finance public chart and options client (no authentication required)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::VendorError;
use crate::market_data::MarketDataProvider;
use crate::types::{Bar, OptionContract, OptionSide, Period};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const MAX_EXPIRATIONS: usize = 6;

/// Yahoo Finance market data client
#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<VendorMessage>,
}

#[derive(Debug, Deserialize)]
struct VendorMessage {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsResponse {
    option_chain: OptionsBody,
}

#[derive(Debug, Deserialize)]
struct OptionsBody {
    result: Option<Vec<OptionsResult>>,
    error: Option<VendorMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsResult {
    #[serde(default)]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<OptionsBlock>,
}

#[derive(Debug, Deserialize)]
struct OptionsBlock {
    #[serde(default)]
    calls: Vec<RawContract>,
    #[serde(default)]
    puts: Vec<RawContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    contract_symbol: String,
    strike: f64,
    expiration: i64,
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    open_interest: Option<f64>,
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(20))
    }
}

impl YahooClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .user_agent("Mozilla/5.0 (geminii-quant)")
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch daily bars for a normalized symbol
    pub async fn get_daily_bars(&self, symbol: &str, period: Period) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval=1d&includePrePost=false",
            self.base_url,
            symbol,
            period.as_str()
        );

        debug!(symbol, period = period.as_str(), "Fetching daily bars from Yahoo");

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VendorError::NotFound(symbol.to_string()).into());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo API error {}: {}", status, body);
        }

        let body: ChartResponse = response.json().await?;
        if let Some(err) = body.chart.error {
            if err.code.as_deref() == Some("Not Found") {
                return Err(VendorError::NotFound(symbol.to_string()).into());
            }
            anyhow::bail!(
                "Yahoo chart error for {}: {}",
                symbol,
                err.description.unwrap_or_default()
            );
        }

        let Some(result) = body.chart.result.and_then(|r| r.into_iter().next()) else {
            return Err(VendorError::NotFound(symbol.to_string()).into());
        };

        let bars = parse_bars(result);
        debug!(symbol, count = bars.len(), "Fetched bars");
        Ok(bars)
    }

    /// Fetch the option chain of an underlying across its nearest expirations
    pub async fn get_options(&self, underlying: &str) -> Result<Vec<OptionContract>> {
        let first = self.fetch_options_page(underlying, None).await?;
        let expirations: Vec<i64> = first
            .expiration_dates
            .iter()
            .copied()
            .take(MAX_EXPIRATIONS)
            .collect();

        let mut contracts = contracts_from(underlying, &first.options);
        for expiration in expirations.iter().skip(1) {
            // Rate limiting
            tokio::time::sleep(Duration::from_millis(100)).await;
            let page = self.fetch_options_page(underlying, Some(*expiration)).await?;
            contracts.extend(contracts_from(underlying, &page.options));
        }

        info!(
            underlying,
            contracts = contracts.len(),
            expirations = expirations.len(),
            "Fetched option chain"
        );
        Ok(contracts)
    }

    async fn fetch_options_page(&self, underlying: &str, date: Option<i64>) -> Result<OptionsResult> {
        let mut url = format!("{}/v7/finance/options/{}", self.base_url, underlying);
        if let Some(date) = date {
            url.push_str(&format!("?date={}", date));
        }

        debug!(underlying, ?date, "Fetching options page from Yahoo");

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(VendorError::NotFound(underlying.to_string()).into());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo API error {}: {}", status, body);
        }

        let body: OptionsResponse = response.json().await?;
        if let Some(err) = body.option_chain.error {
            anyhow::bail!(
                "Yahoo options error for {}: {}",
                underlying,
                err.description.unwrap_or_default()
            );
        }
        body.option_chain
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| VendorError::NotFound(underlying.to_string()).into())
    }
}

/// Vendor timestamps are shifted by the exchange offset and reduced to the trading date
fn trading_date(timestamp: i64, gmtoffset: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp + gmtoffset, 0).map(|dt| dt.date_naive())
}

fn parse_bars(result: ChartResult) -> Vec<Bar> {
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let offset = result.meta.gmtoffset;
    let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = at(&quote.close, i)?;
            Some(Bar {
                date: trading_date(*ts, offset)?,
                open: at(&quote.open, i).unwrap_or(close),
                high: at(&quote.high, i).unwrap_or(close),
                low: at(&quote.low, i).unwrap_or(close),
                close,
                volume: at(&quote.volume, i).unwrap_or(0.0),
            })
        })
        .collect()
}

fn contracts_from(underlying: &str, blocks: &[OptionsBlock]) -> Vec<OptionContract> {
    let money = |v: Option<f64>| v.and_then(Decimal::from_f64).unwrap_or_default().round_dp(4);
    let count = |v: Option<f64>| v.filter(|x| x.is_finite() && *x > 0.0).map_or(0, |x| x as u64);

    let mut out = Vec::new();
    for block in blocks {
        let sides = [(OptionSide::Call, &block.calls), (OptionSide::Put, &block.puts)];
        for (side, raws) in sides {
            for raw in raws {
                let Some(strike) = Decimal::from_f64(raw.strike).filter(|s| *s > Decimal::ZERO) else {
                    continue;
                };
                let Some(expiration) = trading_date(raw.expiration, 0) else {
                    continue;
                };
                out.push(OptionContract {
                    symbol: raw.contract_symbol.clone(),
                    underlying: underlying.to_string(),
                    side,
                    strike: strike.round_dp(4),
                    expiration,
                    last_price: money(raw.last_price),
                    bid: money(raw.bid),
                    ask: money(raw.ask),
                    volume: count(raw.volume),
                    open_interest: count(raw.open_interest),
                });
            }
        }
    }
    out
}

#[async_trait]
impl MarketDataProvider for YahooClient {
    async fn fetch_bars(&self, symbol: &str, period: Period) -> Result<Vec<Bar>> {
        self.get_daily_bars(symbol, period).await
    }

    async fn fetch_option_chain(&self, underlying: &str) -> Result<Vec<OptionContract>> {
        self.get_options(underlying).await
    }
}
