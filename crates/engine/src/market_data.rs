//! Market Data Adapter: symbol normalization, vendor calls, batch fan-out.
//!
//! The adapter is the only producer of [`BarFrame`]s. Vendor failures never
//! cross this boundary as errors of the vendor's own types; they are mapped to
//! [`DataError`].

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::api::VendorError;
use crate::config::EngineConfig;
use crate::error::DataError;
use crate::frame::BarFrame;
use crate::types::{Bar, OptionContract, Period, Symbol};

/// Contract of a market data vendor. Symbols passed in are already normalized.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_bars(&self, symbol: &str, period: Period) -> Result<Vec<Bar>>;

    /// Multi-symbol download. Providers without such an endpoint return an empty map
    /// and the adapter falls back to per-symbol requests.
    async fn fetch_bars_many(
        &self,
        _symbols: &[String],
        _period: Period,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        Ok(HashMap::new())
    }

    async fn fetch_option_chain(&self, underlying: &str) -> Result<Vec<OptionContract>>;
}

/// Map a vendor error onto the adapter taxonomy
fn classify(err: &anyhow::Error) -> DataError {
    if err.downcast_ref::<VendorError>().is_some() {
        return DataError::NoData;
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() {
            return DataError::Timeout;
        }
    }
    DataError::Transport(err.to_string())
}

#[derive(Clone)]
pub struct MarketData {
    provider: Arc<dyn MarketDataProvider>,
    config: Arc<EngineConfig>,
}

impl MarketData {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: Arc<EngineConfig>) -> Self {
        Self { provider, config }
    }

    pub fn normalize(&self, code: &str) -> Symbol {
        self.config.normalize(code)
    }

    /// Daily bars of one symbol
    pub async fn get_bars(&self, code: &str, period: Period) -> Result<BarFrame, DataError> {
        let symbol = self.normalize(code);
        fetch_frame(
            Arc::clone(&self.provider),
            symbol.into_string(),
            period,
            self.config.request_timeout,
        )
        .await
    }

    /// Daily bars of many symbols, keyed by normalized symbol. Every requested
    /// symbol appears in the result.
    pub async fn get_bars_batch(
        &self,
        codes: &[String],
        period: Period,
    ) -> HashMap<String, Result<BarFrame, DataError>> {
        let mut seen = HashSet::new();
        let symbols: Vec<String> = codes
            .iter()
            .map(|c| self.normalize(c).into_string())
            .filter(|s| seen.insert(s.clone()))
            .collect();

        let deadline = Instant::now() + self.config.batch_timeout;
        let mut results: HashMap<String, Result<BarFrame, DataError>> = HashMap::new();

        match timeout(
            self.config.batch_timeout,
            self.provider.fetch_bars_many(&symbols, period),
        )
        .await
        {
            Ok(Ok(downloaded)) => {
                for (symbol, bars) in downloaded {
                    if !seen.contains(&symbol) {
                        continue;
                    }
                    if let Ok(frame) = BarFrame::from_bars(symbol.clone(), bars) {
                        results.insert(symbol, Ok(frame));
                    }
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Batch download failed, falling back to single requests"),
            Err(_) => warn!("Batch download timed out, falling back to single requests"),
        }

        let missing: Vec<String> = symbols
            .iter()
            .filter(|s| !results.contains_key(*s))
            .cloned()
            .collect();

        if !missing.is_empty() {
            debug!(count = missing.len(), "Retrying missing symbols individually");

            let semaphore = Arc::new(Semaphore::new(self.config.batch_workers.max(1)));
            let mut tasks = JoinSet::new();
            for symbol in missing {
                let provider = Arc::clone(&self.provider);
                let semaphore = Arc::clone(&semaphore);
                let per_request = self.config.request_timeout;
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = fetch_frame(provider, symbol.clone(), period, per_request).await;
                    (symbol, result)
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let collect = async {
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok((symbol, result)) => {
                            results.insert(symbol, result);
                        }
                        Err(e) => warn!(error = %e, "Batch worker failed"),
                    }
                }
            };
            let timed_out = timeout(remaining, collect).await.is_err();
            if timed_out {
                warn!("Batch fan-out hit the total timeout");
                tasks.abort_all();
            }

            for symbol in &symbols {
                let fallback = if timed_out {
                    DataError::Timeout
                } else {
                    DataError::NoData
                };
                results.entry(symbol.clone()).or_insert(Err(fallback));
            }
        }

        let ok = results.values().filter(|r| r.is_ok()).count();
        info!(requested = symbols.len(), ok, period = period.as_str(), "Batch fetch complete");
        results
    }

    pub async fn get_option_chain(&self, code: &str) -> Result<Vec<OptionContract>, DataError> {
        let symbol = self.normalize(code);
        let call = self.provider.fetch_option_chain(symbol.as_str());
        match timeout(self.config.request_timeout, call).await {
            Err(_) => Err(DataError::Timeout),
            Ok(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "Option chain fetch failed");
                Err(classify(&e))
            }
            Ok(Ok(contracts)) if contracts.is_empty() => Err(DataError::NoData),
            Ok(Ok(contracts)) => Ok(contracts),
        }
    }
}

async fn fetch_frame(
    provider: Arc<dyn MarketDataProvider>,
    symbol: String,
    period: Period,
    limit: Duration,
) -> Result<BarFrame, DataError> {
    let outcome = timeout(limit, provider.fetch_bars(&symbol, period)).await;
    match outcome {
        Err(_) => {
            warn!(symbol = %symbol, "Bar fetch timed out");
            Err(DataError::Timeout)
        }
        Ok(Err(e)) => {
            warn!(symbol = %symbol, error = %e, "Bar fetch failed");
            Err(classify(&e))
        }
        Ok(Ok(bars)) => BarFrame::from_bars(symbol, bars),
    }
}

/// In-memory provider serving fixed bars and chains
#[derive(Default, Clone)]
pub struct StaticProvider {
    bars: HashMap<String, Vec<Bar>>,
    chains: HashMap<String, Vec<OptionContract>>,
    batch_endpoint: bool,
    delay: Option<Duration>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_chain(mut self, underlying: &str, contracts: Vec<OptionContract>) -> Self {
        self.chains.insert(underlying.to_string(), contracts);
        self
    }

    /// Serve `fetch_bars_many` instead of returning an empty map
    pub fn with_batch_endpoint(mut self) -> Self {
        self.batch_endpoint = true;
        self
    }

    /// Sleep before answering single-symbol requests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn fetch_bars(&self, symbol: &str, _period: Period) -> Result<Vec<Bar>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.bars
            .get(symbol)
            .cloned()
            .ok_or_else(|| VendorError::NotFound(symbol.to_string()).into())
    }

    async fn fetch_bars_many(
        &self,
        symbols: &[String],
        _period: Period,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        if !self.batch_endpoint {
            return Ok(HashMap::new());
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.bars.get(s).map(|b| (s.clone(), b.clone())))
            .collect())
    }

    async fn fetch_option_chain(&self, underlying: &str) -> Result<Vec<OptionContract>> {
        Ok(self.chains.get(underlying).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{bars_from_closes, june_chain};

    fn adapter(provider: StaticProvider) -> MarketData {
        MarketData::new(Arc::new(provider), Arc::new(EngineConfig::new(5.0)))
    }

    #[tokio::test]
    async fn test_get_bars_normalizes_symbol() {
        let md = adapter(StaticProvider::new().with_bars("PETR4.SA", bars_from_closes(&[10.0, 11.0])));
        let frame = md.get_bars("petr4", Period::OneYear).await.unwrap();
        assert_eq!(frame.symbol(), "PETR4.SA");
        assert_eq!(frame.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_no_data() {
        let md = adapter(StaticProvider::new());
        let err = md.get_bars("XXXX", Period::OneYear).await.unwrap_err();
        assert_eq!(err, DataError::NoData);
    }

    #[tokio::test]
    async fn test_empty_vendor_frame_is_no_data() {
        let md = adapter(StaticProvider::new().with_bars("VALE3.SA", vec![]));
        assert_eq!(
            md.get_bars("VALE3", Period::OneYear).await.unwrap_err(),
            DataError::NoData
        );
    }

    #[tokio::test]
    async fn test_batch_reports_every_symbol() {
        let provider = StaticProvider::new()
            .with_bars("PETR4.SA", bars_from_closes(&[10.0, 11.0]))
            .with_bars("VALE3.SA", bars_from_closes(&[60.0, 61.0]));
        let md = adapter(provider);

        let codes = vec!["PETR4".to_string(), "VALE3.SA".to_string(), "NOPE3".to_string(), "petr4".to_string()];
        let results = md.get_bars_batch(&codes, Period::OneYear).await;

        assert_eq!(results.len(), 3);
        assert!(results["PETR4.SA"].is_ok());
        assert!(results["VALE3.SA"].is_ok());
        assert_eq!(results["NOPE3.SA"].as_ref().unwrap_err(), &DataError::NoData);
    }

    #[tokio::test]
    async fn test_batch_uses_multi_symbol_endpoint() {
        let provider = StaticProvider::new()
            .with_bars("PETR4.SA", bars_from_closes(&[10.0, 11.0]))
            .with_batch_endpoint()
            .with_delay(Duration::from_secs(30));
        let md = adapter(provider);

        // the delayed single-symbol path is never taken
        let results = md
            .get_bars_batch(&["PETR4".to_string()], Period::OneYear)
            .await;
        assert!(results["PETR4.SA"].is_ok());
    }

    #[tokio::test]
    async fn test_batch_timeout_marks_symbols() {
        let provider = StaticProvider::new()
            .with_bars("PETR4.SA", bars_from_closes(&[10.0, 11.0]))
            .with_delay(Duration::from_millis(500));
        let mut config = EngineConfig::new(5.0);
        config.batch_timeout = Duration::from_millis(50);
        let md = MarketData::new(Arc::new(provider), Arc::new(config));

        let results = md
            .get_bars_batch(&["PETR4".to_string()], Period::OneYear)
            .await;
        assert_eq!(results["PETR4.SA"].as_ref().unwrap_err(), &DataError::Timeout);
    }

    #[tokio::test]
    async fn test_option_chain() {
        let md = adapter(StaticProvider::new().with_chain("PETR4.SA", june_chain()));
        let chain = md.get_option_chain("PETR4").await.unwrap();
        assert_eq!(chain.len(), june_chain().len());
        assert_eq!(
            md.get_option_chain("VALE3").await.unwrap_err(),
            DataError::NoData
        );
    }
}
