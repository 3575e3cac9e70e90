//! Frozen engine configuration, loaded once at startup

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{AnalyzerId, Symbol};

pub const FEE_BPS_ENV: &str = "GEMINII_FEE_BPS";
pub const BENCHMARK_ENV: &str = "GEMINII_BENCHMARK";
pub const VENDOR_URL_ENV: &str = "GEMINII_VENDOR_URL";
pub const REQUEST_TIMEOUT_ENV: &str = "GEMINII_REQUEST_TIMEOUT_SECS";
pub const BATCH_WORKERS_ENV: &str = "GEMINII_BATCH_WORKERS";
pub const PREMIUM_ANALYZERS_ENV: &str = "GEMINII_PREMIUM_ANALYZERS";
pub const KMEANS_SEED_ENV: &str = "GEMINII_KMEANS_SEED";

const DEFAULT_VENDOR_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub exchange_suffix: String,
    pub index_marker: char,
    pub benchmark: String,
    pub vendor_base_url: String,
    /// Deadline for the data fetch of one request
    pub request_timeout: Duration,
    pub batch_workers: usize,
    pub batch_timeout: Duration,
    /// Maximum symbols accepted by a batch request
    pub batch_cap: usize,
    /// Round-trip trading fee in basis points
    pub fee_bps: f64,
    pub premium_analyzers: Vec<AnalyzerId>,
    pub kmeans_seed: u64,
}

impl EngineConfig {
    /// Defaults for everything except the fee, which has no sensible default
    pub fn new(fee_bps: f64) -> Self {
        Self {
            exchange_suffix: ".SA".to_string(),
            index_marker: '^',
            benchmark: "^BVSP".to_string(),
            vendor_base_url: DEFAULT_VENDOR_URL.to_string(),
            request_timeout: Duration::from_secs(20),
            batch_workers: 6,
            batch_timeout: Duration::from_secs(10),
            batch_cap: 50,
            fee_bps,
            premium_analyzers: vec![
                AnalyzerId::Pairs,
                AnalyzerId::VolRegime,
                AnalyzerId::HunterWalls,
                AnalyzerId::RiskBands,
            ],
            kmeans_seed: 42,
        }
    }

    /// Load from the process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fee_bps = parse::<f64, _>(&lookup, FEE_BPS_ENV)?.ok_or(ConfigError::Missing(FEE_BPS_ENV))?;
        if !fee_bps.is_finite() || fee_bps < 0.0 {
            return Err(ConfigError::Invalid {
                key: FEE_BPS_ENV,
                value: fee_bps.to_string(),
            });
        }

        let mut config = Self::new(fee_bps);

        if let Some(benchmark) = lookup(BENCHMARK_ENV).filter(|s| !s.trim().is_empty()) {
            config.benchmark = benchmark.trim().to_uppercase();
        }
        if let Some(url) = lookup(VENDOR_URL_ENV).filter(|s| !s.trim().is_empty()) {
            config.vendor_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse::<u64, _>(&lookup, REQUEST_TIMEOUT_ENV)? {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(workers) = parse::<usize, _>(&lookup, BATCH_WORKERS_ENV)? {
            config.batch_workers = workers.clamp(1, 32);
        }
        if let Some(seed) = parse::<u64, _>(&lookup, KMEANS_SEED_ENV)? {
            config.kmeans_seed = seed;
        }
        if let Some(list) = lookup(PREMIUM_ANALYZERS_ENV) {
            config.premium_analyzers = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    AnalyzerId::from_str(s).map_err(|_| ConfigError::Invalid {
                        key: PREMIUM_ANALYZERS_ENV,
                        value: s.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        Ok(config)
    }

    pub fn normalize(&self, code: &str) -> Symbol {
        Symbol::normalize(code, &self.exchange_suffix, self.index_marker)
    }

    pub fn requires_premium(&self, id: AnalyzerId) -> bool {
        self.premium_analyzers.contains(&id)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_fee_is_required() {
        let err = EngineConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(FEE_BPS_ENV)));
    }

    #[test]
    fn test_invalid_fee_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[(FEE_BPS_ENV, "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = EngineConfig::from_lookup(lookup(&[(FEE_BPS_ENV, "-3")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            (FEE_BPS_ENV, "7.5"),
            (BENCHMARK_ENV, "^ibx"),
            (BATCH_WORKERS_ENV, "4"),
            (PREMIUM_ANALYZERS_ENV, "pairs, risk_bands"),
        ]))
        .unwrap();

        assert_eq!(config.fee_bps, 7.5);
        assert_eq!(config.benchmark, "^IBX");
        assert_eq!(config.batch_workers, 4);
        assert!(config.requires_premium(AnalyzerId::Pairs));
        assert!(!config.requires_premium(AnalyzerId::VolRegime));
        assert_eq!(config.normalize("vale3").as_str(), "VALE3.SA");
    }

    #[test]
    fn test_unknown_premium_analyzer_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[
            (FEE_BPS_ENV, "5"),
            (PREMIUM_ANALYZERS_ENV, "pairs,tarot"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: PREMIUM_ANALYZERS_ENV, .. }));
    }
}
