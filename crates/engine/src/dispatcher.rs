//! Analyzer registry and request dispatch.
//!
//! Requests go through validation, entitlement, data fetch (bounded by the
//! per-request deadline) and then the analyzer itself on a blocking thread.
//! Expected data failures come back as unsuccessful [`AnalysisResult`]s;
//! only request-level problems are returned as [`EngineError`]s.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::atsmom::AtsmomAnalyzer;
use crate::beta_regression::BetaRegressionAnalyzer;
use crate::config::EngineConfig;
use crate::error::{DataError, EngineError, EngineResult};
use crate::frame::BarFrame;
use crate::hunter_walls::HunterWallsAnalyzer;
use crate::market_data::MarketData;
use crate::pairs::PairsAnalyzer;
use crate::risk_bands::RiskBandsAnalyzer;
use crate::types::{AnalysisResult, AnalyzerId, Entitlement, OptionContract, Period, Symbol};
use crate::vol_regime::VolRegimeAnalyzer;

/// Placeholder symbol meaning "the whole universe" for screeners
pub const ALL_SYMBOLS: &str = "*";

const MAX_SYMBOL_LEN: usize = 20;

/// Body of a single analysis request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisRequest {
    pub symbol: String,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub include_series: bool,
}

/// Body of a batch request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchRequest {
    pub symbols: Vec<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// A validated request as seen by an analyzer
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Trimmed, uppercased code as sent by the client
    pub code: String,
    pub symbol: Symbol,
    pub period: Period,
    pub params: Value,
}

impl RequestContext {
    pub fn is_universe(&self) -> bool {
        self.code == ALL_SYMBOLS
    }
}

/// Market data an analyzer needs before it can run. Symbols are normalized.
#[derive(Debug, Clone, Default)]
pub struct DataNeeds {
    pub bars: Vec<(String, Period)>,
    pub option_chain: Option<String>,
}

impl DataNeeds {
    pub fn bars(symbols: impl IntoIterator<Item = String>, period: Period) -> Self {
        Self {
            bars: symbols.into_iter().map(|s| (s, period)).collect(),
            option_chain: None,
        }
    }
}

/// Data fetched for a request
#[derive(Debug, Default)]
pub struct AnalysisInput {
    pub bars: HashMap<String, Result<BarFrame, DataError>>,
    pub option_chains: HashMap<String, Result<Vec<OptionContract>, DataError>>,
}

impl AnalysisInput {
    pub fn frame(&self, symbol: &str) -> EngineResult<&BarFrame> {
        match self.bars.get(symbol) {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(e.clone().into()),
            None => Err(DataError::NoData.into()),
        }
    }

    pub fn chain(&self, underlying: &str) -> EngineResult<&[OptionContract]> {
        match self.option_chains.get(underlying) {
            Some(Ok(chain)) => Ok(chain),
            Some(Err(e)) => Err(e.clone().into()),
            None => Err(DataError::NoData.into()),
        }
    }
}

/// A registered analysis. Implementations are synchronous and never perform I/O.
pub trait Analyzer: Send + Sync {
    fn id(&self) -> AnalyzerId;

    fn name(&self) -> &'static str;

    fn default_period(&self) -> Period;

    fn requires_premium(&self, config: &EngineConfig) -> bool {
        config.requires_premium(self.id())
    }

    /// Reject malformed parameters before any data is fetched
    fn validate_params(&self, params: &Value) -> EngineResult<()>;

    fn data_needs(&self, ctx: &RequestContext, config: &EngineConfig) -> EngineResult<DataNeeds>;

    fn analyze(
        &self,
        ctx: &RequestContext,
        input: &AnalysisInput,
        config: &EngineConfig,
    ) -> EngineResult<AnalysisResult>;
}

/// Deserialize analyzer parameters; `null` means all defaults
pub fn parse_params<T: DeserializeOwned + Default>(params: &Value) -> EngineResult<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| EngineError::Validation(format!("invalid params: {}", e)))
}

pub fn validate_symbol(code: &str) -> EngineResult<String> {
    let code = code.trim().to_uppercase();
    if code == ALL_SYMBOLS {
        return Ok(code);
    }
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '^' | '.' | '-' | '='));
    if code.is_empty() || code.len() > MAX_SYMBOL_LEN || !valid_chars {
        return Err(EngineError::Validation(format!("invalid symbol: {:?}", code)));
    }
    Ok(code)
}

/// Catalog entry served by `GET /api/analyzers`
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerInfo {
    pub id: AnalyzerId,
    pub name: &'static str,
    pub premium: bool,
    pub default_period: Period,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub symbol: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<AnalysisResult>,
    pub errors: Vec<BatchError>,
}

impl BatchOutcome {
    pub fn to_envelope(&self) -> Value {
        let results: Vec<Value> = self
            .results
            .iter()
            .map(|r| r.to_envelope()["data"].clone())
            .collect();
        json!({
            "success": true,
            "results": results,
            "errors": self.errors,
        })
    }
}

pub struct Dispatcher {
    config: Arc<EngineConfig>,
    market: MarketData,
    registry: HashMap<AnalyzerId, Arc<dyn Analyzer>>,
}

impl Dispatcher {
    /// Dispatcher with every built-in analyzer registered
    pub fn new(config: Arc<EngineConfig>, market: MarketData) -> Self {
        let mut dispatcher = Self {
            config,
            market,
            registry: HashMap::new(),
        };
        dispatcher.register(Arc::new(AtsmomAnalyzer));
        dispatcher.register(Arc::new(BetaRegressionAnalyzer));
        dispatcher.register(Arc::new(PairsAnalyzer));
        dispatcher.register(Arc::new(VolRegimeAnalyzer));
        dispatcher.register(Arc::new(HunterWallsAnalyzer));
        dispatcher.register(Arc::new(RiskBandsAnalyzer));
        dispatcher
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.registry.insert(analyzer.id(), analyzer);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> Vec<AnalyzerInfo> {
        let mut entries: Vec<AnalyzerInfo> = self
            .registry
            .values()
            .map(|a| AnalyzerInfo {
                id: a.id(),
                name: a.name(),
                premium: a.requires_premium(&self.config),
                default_period: a.default_period(),
            })
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    fn resolve(&self, name: &str) -> EngineResult<Arc<dyn Analyzer>> {
        let id: AnalyzerId = name.parse()?;
        self.registry
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAnalyzer(name.to_string()))
    }

    fn prepare(
        &self,
        analyzer: &dyn Analyzer,
        code: &str,
        period: Option<&str>,
        params: &Value,
    ) -> EngineResult<RequestContext> {
        let code = validate_symbol(code)?;
        let period = match period {
            Some(p) => p.parse()?,
            None => analyzer.default_period(),
        };
        analyzer.validate_params(params)?;
        Ok(RequestContext {
            symbol: self.config.normalize(&code),
            code,
            period,
            params: params.clone(),
        })
    }

    fn check_entitlement(&self, analyzer: &dyn Analyzer, entitlement: Entitlement) -> EngineResult<()> {
        if analyzer.requires_premium(&self.config) && entitlement != Entitlement::Premium {
            return Err(EngineError::NotEntitled);
        }
        Ok(())
    }

    /// Run one analyzer for one symbol
    pub async fn dispatch(
        &self,
        analyzer: &str,
        request: AnalysisRequest,
        entitlement: Entitlement,
    ) -> EngineResult<AnalysisResult> {
        let analyzer = self.resolve(analyzer)?;
        let ctx = self.prepare(
            analyzer.as_ref(),
            &request.symbol,
            request.period.as_deref(),
            &request.params,
        )?;
        self.check_entitlement(analyzer.as_ref(), entitlement)?;

        info!(
            analyzer = %analyzer.id(),
            symbol = %ctx.symbol,
            period = %ctx.period,
            "Running analysis"
        );

        let needs = analyzer.data_needs(&ctx, &self.config)?;
        let input = match timeout(self.config.request_timeout, self.fetch(&[needs])).await {
            Ok(input) => input,
            Err(_) => {
                warn!(analyzer = %analyzer.id(), symbol = %ctx.symbol, "Data fetch exceeded deadline");
                return Ok(AnalysisResult::failed(
                    analyzer.id(),
                    ctx.symbol.as_str(),
                    DataError::Timeout.code(),
                ));
            }
        };

        let mut result = self.run(analyzer, ctx, Arc::new(input)).await?;
        if !request.include_series {
            result.strip_series();
        }
        Ok(result)
    }

    /// Run one analyzer over a list of symbols, sharing a single data fetch
    pub async fn dispatch_batch(
        &self,
        analyzer: &str,
        request: BatchRequest,
        entitlement: Entitlement,
    ) -> EngineResult<BatchOutcome> {
        let analyzer = self.resolve(analyzer)?;
        if request.symbols.is_empty() {
            return Err(EngineError::Validation("symbols must not be empty".into()));
        }
        if request.symbols.len() > self.config.batch_cap {
            return Err(EngineError::Validation(format!(
                "at most {} symbols per batch",
                self.config.batch_cap
            )));
        }
        analyzer.validate_params(&request.params)?;
        self.check_entitlement(analyzer.as_ref(), entitlement)?;

        let mut errors = Vec::new();
        let mut contexts = Vec::new();
        let mut needs = Vec::new();
        for code in &request.symbols {
            let prepared = self
                .prepare(analyzer.as_ref(), code, request.period.as_deref(), &request.params)
                .and_then(|ctx| Ok((analyzer.data_needs(&ctx, &self.config)?, ctx)));
            match prepared {
                Ok((need, ctx)) => {
                    needs.push(need);
                    contexts.push(ctx);
                }
                Err(e) => errors.push(BatchError {
                    symbol: code.clone(),
                    error: e.code(),
                }),
            }
        }

        info!(
            analyzer = %analyzer.id(),
            symbols = contexts.len(),
            rejected = errors.len(),
            "Running batch analysis"
        );

        let input = match timeout(self.config.request_timeout, self.fetch(&needs)).await {
            Ok(input) => Arc::new(input),
            Err(_) => {
                warn!(analyzer = %analyzer.id(), "Batch data fetch exceeded deadline");
                errors.extend(contexts.iter().map(|ctx| BatchError {
                    symbol: ctx.symbol.to_string(),
                    error: DataError::Timeout.code().to_string(),
                }));
                return Ok(BatchOutcome {
                    results: Vec::new(),
                    errors,
                });
            }
        };

        let mut results = Vec::new();
        for ctx in contexts {
            let symbol = ctx.symbol.to_string();
            match self.run(Arc::clone(&analyzer), ctx, Arc::clone(&input)).await {
                Ok(mut result) if result.is_ok() => {
                    result.strip_series();
                    results.push(result);
                }
                Ok(result) => errors.push(BatchError {
                    symbol,
                    error: result.error.unwrap_or_else(|| "internal_error".into()),
                }),
                Err(e) => errors.push(BatchError {
                    symbol,
                    error: e.code(),
                }),
            }
        }

        Ok(BatchOutcome { results, errors })
    }

    async fn fetch(&self, needs: &[DataNeeds]) -> AnalysisInput {
        let mut input = AnalysisInput::default();

        let mut by_period: BTreeMap<Period, BTreeSet<String>> = BTreeMap::new();
        let mut chains = BTreeSet::new();
        for need in needs {
            for (symbol, period) in &need.bars {
                by_period.entry(*period).or_default().insert(symbol.clone());
            }
            if let Some(underlying) = &need.option_chain {
                chains.insert(underlying.clone());
            }
        }

        for (period, symbols) in by_period {
            let symbols: Vec<String> = symbols.into_iter().collect();
            if let [single] = symbols.as_slice() {
                let frame = self.market.get_bars(single, period).await;
                input.bars.insert(single.clone(), frame);
            } else {
                input.bars.extend(self.market.get_bars_batch(&symbols, period).await);
            }
        }
        for underlying in chains {
            let chain = self.market.get_option_chain(&underlying).await;
            input.option_chains.insert(underlying, chain);
        }
        input
    }

    async fn run(
        &self,
        analyzer: Arc<dyn Analyzer>,
        ctx: RequestContext,
        input: Arc<AnalysisInput>,
    ) -> EngineResult<AnalysisResult> {
        let id = analyzer.id();
        let symbol = ctx.symbol.to_string();
        let config = Arc::clone(&self.config);
        let started = Instant::now();

        let outcome =
            tokio::task::spawn_blocking(move || analyzer.analyze(&ctx, &input, &config)).await;

        match outcome {
            Ok(Ok(mut result)) => {
                result.scrub();
                info!(
                    analyzer = %id,
                    symbol = %symbol,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    warnings = result.warnings.len(),
                    "Analysis complete"
                );
                Ok(result)
            }
            Ok(Err(e)) if e.is_expected() => {
                info!(analyzer = %id, symbol = %symbol, code = %e.code(), "Analysis returned no result");
                Ok(AnalysisResult::failed(id, symbol, e.code()))
            }
            Ok(Err(e)) => {
                error!(analyzer = %id, symbol = %symbol, error = %e, "Analysis failed");
                Err(e)
            }
            Err(e) => {
                error!(analyzer = %id, symbol = %symbol, error = %e, "Analyzer task panicked");
                Err(EngineError::Internal(format!("{} analyzer failed", id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{constant_closes, cointegrated_closes, june_chain, linear_closes, ranged_bars};
    use crate::market_data::StaticProvider;
    use crate::types::Metric;
    use std::time::Duration;

    fn dispatcher_with(provider: StaticProvider, config: EngineConfig) -> Dispatcher {
        let config = Arc::new(config);
        let market = MarketData::new(Arc::new(provider), Arc::clone(&config));
        Dispatcher::new(config, market)
    }

    fn dispatcher(provider: StaticProvider) -> Dispatcher {
        dispatcher_with(provider, EngineConfig::new(5.0))
    }

    fn request(symbol: &str, params: Value) -> AnalysisRequest {
        AnalysisRequest {
            symbol: symbol.to_string(),
            params,
            ..Default::default()
        }
    }

    fn market() -> StaticProvider {
        let (a, b) = cointegrated_closes(7, 300);
        StaticProvider::new()
            .with_bars("^BVSP", ranged_bars(&constant_closes(300)))
            .with_bars("FLAT3.SA", ranged_bars(&constant_closes(300)))
            .with_bars("LINE3.SA", ranged_bars(&linear_closes(300)))
            .with_bars("AAAA3.SA", ranged_bars(&a))
            .with_bars("BBBB3.SA", ranged_bars(&b))
            .with_bars("EMPT3.SA", Vec::new())
            .with_bars("PETR4.SA", ranged_bars(&[29.5, 29.8, 30.0]))
            .with_chain("PETR4.SA", june_chain())
    }

    fn assert_all_finite(result: &AnalysisResult) {
        for (key, metric) in &result.headline_metrics {
            if let Metric::Number(v) = metric {
                assert!(v.is_finite(), "{} is not finite", key);
            }
        }
    }

    #[tokio::test]
    async fn test_constant_prices_across_analyzers() {
        let d = dispatcher(market());

        let atsmom = d.dispatch("atsmom", request("FLAT3", Value::Null), Entitlement::Free).await.unwrap();
        assert!(atsmom.is_ok());
        assert_eq!(atsmom.get_f64("current_signal"), Some(0.0));
        assert_eq!(atsmom.get_text("status"), Some("NEUTRAL"));

        let beta = d
            .dispatch("beta_regression", request("FLAT3", Value::Null), Entitlement::Free)
            .await
            .unwrap();
        assert_eq!(beta.headline_metrics.get("total_trades"), Some(&Metric::Integer(0)));

        let regime = d
            .dispatch("vol_regime", request("FLAT3", Value::Null), Entitlement::Premium)
            .await
            .unwrap();
        assert_eq!(regime.get_text("regime"), Some("LOW"));

        for result in [&atsmom, &beta, &regime] {
            assert_all_finite(result);
        }
    }

    #[tokio::test]
    async fn test_uptrend_against_flat_benchmark() {
        let d = dispatcher(market());

        let atsmom = d.dispatch("atsmom", request("LINE3", Value::Null), Entitlement::Free).await.unwrap();
        assert!(atsmom.get_f64("current_signal").unwrap() > 0.1);
        assert_eq!(atsmom.get_text("status"), Some("BUY"));
        assert_eq!(atsmom.get_f64("beta"), Some(0.0));
        assert!(atsmom.warnings.contains(&"beta_degenerate".to_string()));

        let beta = d
            .dispatch("beta_regression", request("LINE3", Value::Null), Entitlement::Free)
            .await
            .unwrap();
        assert!(beta.get_f64("total_trades").unwrap() >= 1.0);
        assert!(beta.get_f64("acc_return_after_fees").unwrap() > 0.0);
        assert_eq!(beta.get_f64("fee_bps"), Some(5.0));
    }

    #[tokio::test]
    async fn test_pairs_screen_finds_cointegrated_pair() {
        let d = dispatcher(market());
        let params = json!({"universe": ["AAAA3", "BBBB3"]});
        let result = d.dispatch("pairs", request("*", params), Entitlement::Premium).await.unwrap();

        assert!(result.is_ok());
        assert_eq!(result.symbol, "*");
        assert_eq!(result.headline_metrics.get("cointegrated"), Some(&Metric::Integer(1)));
        assert_eq!(result.get_text("top_pair"), Some("AAAA3.SA/BBBB3.SA"));
        assert!(result.get_f64("top_coint_pvalue").unwrap() < 0.05);
    }

    #[tokio::test]
    async fn test_hunter_walls_june_group() {
        let d = dispatcher(market());
        let params = json!({"groups": ["F"]});
        let result = d
            .dispatch("hunter_walls", request("PETR4", params), Entitlement::Premium)
            .await
            .unwrap();

        assert_eq!(result.get_f64("spot"), Some(30.0));
        assert_eq!(result.get_f64("top_call_wall"), Some(32.0));
        assert_eq!(result.get_f64("top_put_wall"), Some(28.0));
        assert_eq!(result.get_f64("spot_strike"), Some(30.0));
    }

    #[tokio::test]
    async fn test_missing_data_is_no_data_everywhere() {
        let d = dispatcher(market());
        for id in AnalyzerId::ALL {
            for symbol in ["EMPT3", "XXXX3"] {
                let result = d
                    .dispatch(id.as_str(), request(symbol, Value::Null), Entitlement::Premium)
                    .await
                    .unwrap();
                assert!(!result.is_ok(), "{} on {}", id, symbol);
                assert_eq!(result.error.as_deref(), Some("no_data"), "{} on {}", id, symbol);
                assert_eq!(result.to_envelope()["success"], json!(false));
            }
        }
    }

    #[tokio::test]
    async fn test_premium_analyzers_reject_free_callers() {
        let d = dispatcher(market());
        let err = d
            .dispatch("pairs", request("AAAA3", Value::Null), Entitlement::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotEntitled));
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn test_request_validation() {
        let d = dispatcher(market());

        let err = d.dispatch("momentum", request("FLAT3", Value::Null), Entitlement::Free).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownAnalyzer(_)));

        let mut bad_period = request("FLAT3", Value::Null);
        bad_period.period = Some("7y".into());
        let err = d.dispatch("atsmom", bad_period, Entitlement::Free).await.unwrap_err();
        assert_eq!(err.http_status(), 400);

        let err = d
            .dispatch("atsmom", request("FLAT3", json!({"target_vol": -1.0})), Entitlement::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // validation runs before the entitlement check
        let err = d
            .dispatch("pairs", request("BAD SYMBOL!", Value::Null), Entitlement::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_series_only_on_request() {
        let d = dispatcher(market());
        let plain = d.dispatch("atsmom", request("LINE3", Value::Null), Entitlement::Free).await.unwrap();
        assert!(plain.time_series.is_empty());
        assert!(plain.dates.is_empty());

        let mut charted = request("LINE3", Value::Null);
        charted.include_series = true;
        let charted = d.dispatch("atsmom", charted, Entitlement::Free).await.unwrap();
        assert_eq!(charted.dates.len(), 300);
        assert_eq!(charted.time_series["signal"].len(), 300);
        assert!(charted.time_series.values().flatten().all(|v| v.is_finite()));
    }

    #[tokio::test]
    async fn test_headline_metrics_are_deterministic() {
        let d = dispatcher(market());
        let universe = json!({"universe": ["AAAA3", "BBBB3", "LINE3"]});
        let cases = [
            ("atsmom", "LINE3", Value::Null),
            ("beta_regression", "LINE3", Value::Null),
            ("vol_regime", "AAAA3", Value::Null),
            ("risk_bands", "LINE3", Value::Null),
            ("pairs", "*", universe),
        ];
        for (id, symbol, params) in cases {
            let first = d.dispatch(id, request(symbol, params.clone()), Entitlement::Premium).await.unwrap();
            let second = d.dispatch(id, request(symbol, params), Entitlement::Premium).await.unwrap();
            assert!(first.is_ok(), "{}", id);
            assert_eq!(
                serde_json::to_string(&first.headline_metrics).unwrap(),
                serde_json::to_string(&second.headline_metrics).unwrap(),
                "{}",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_batch_collects_results_and_errors() {
        let d = dispatcher(market().with_batch_endpoint());
        let batch = BatchRequest {
            symbols: vec!["FLAT3".into(), "LINE3".into(), "XXXX3".into(), "BAD SYMBOL!".into()],
            ..Default::default()
        };
        let outcome = d.dispatch_batch("atsmom", batch, Entitlement::Free).await.unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.time_series.is_empty()));
        let mut errors: Vec<(String, String)> = outcome
            .errors
            .iter()
            .map(|e| (e.symbol.clone(), e.error.clone()))
            .collect();
        errors.sort();
        assert_eq!(errors[0].0, "BAD SYMBOL!");
        assert!(errors[0].1.starts_with("validation_error"));
        assert_eq!(errors[1], ("XXXX3.SA".to_string(), "no_data".to_string()));

        let envelope = outcome.to_envelope();
        let keys: Vec<&String> = envelope.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["errors", "results", "success"]);
        assert_eq!(envelope["success"], json!(true));
        assert_eq!(envelope["results"].as_array().unwrap().len(), 2);
        assert_eq!(envelope["results"][0]["analyzer"], json!("atsmom"));
        assert_eq!(envelope["errors"][1], json!({"symbol": "XXXX3.SA", "error": "no_data"}));
    }

    #[tokio::test]
    async fn test_batch_cap() {
        let d = dispatcher(market());
        let symbols: Vec<String> = (0..51).map(|i| format!("SYM{}", i)).collect();
        let batch = BatchRequest {
            symbols,
            ..Default::default()
        };
        let err = d.dispatch_batch("atsmom", batch, Entitlement::Free).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let empty = d.dispatch_batch("atsmom", BatchRequest::default(), Entitlement::Free).await.unwrap_err();
        assert!(matches!(empty, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_slow_vendor_times_out() {
        let mut config = EngineConfig::new(5.0);
        config.request_timeout = Duration::from_millis(50);
        let d = dispatcher_with(market().with_delay(Duration::from_millis(500)), config);

        let result = d
            .dispatch("vol_regime", request("FLAT3", Value::Null), Entitlement::Premium)
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_catalog_lists_every_analyzer() {
        let d = dispatcher(StaticProvider::new());
        let catalog = d.catalog();
        assert_eq!(catalog.len(), AnalyzerId::ALL.len());
        let free: Vec<AnalyzerId> = catalog.iter().filter(|e| !e.premium).map(|e| e.id).collect();
        assert_eq!(free, vec![AnalyzerId::Atsmom, AnalyzerId::BetaRegression]);
    }

    #[test]
    fn test_symbol_validation() {
        assert_eq!(validate_symbol(" petr4 ").unwrap(), "PETR4");
        assert_eq!(validate_symbol("^BVSP").unwrap(), "^BVSP");
        assert_eq!(validate_symbol("*").unwrap(), "*");
        assert!(validate_symbol("").is_err());
        assert!(validate_symbol("PETR4; DROP").is_err());
    }
}
