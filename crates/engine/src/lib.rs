//! Geminii Quant Engine: quantitative analytics over daily market data
//!
//! Provides:
//! - Market data adapter (Yahoo chart/options API) with batch fan-out
//! - Numerical toolkit: rolling statistics, OLS, ADF/Engle-Granger, K-means, GARCH, boosting
//! - Six analyzers: ATSMOM, Beta Regression, Pairs, Volatility Regime, Hunter Walls, Risk Bands
//! - Dispatcher with validation, entitlement checks and a uniform result envelope

pub mod api;
pub mod atsmom;
pub mod beta_regression;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod hunter_walls;
pub mod market_data;
pub mod pairs;
pub mod risk_bands;
pub mod toolkit;
pub mod types;
pub mod vol_regime;

#[cfg(test)]
mod fixtures;

// Re-exports for convenience
pub use api::yahoo::YahooClient;
pub use config::EngineConfig;
pub use dispatcher::{
    AnalysisRequest, Analyzer, AnalyzerInfo, BatchOutcome, BatchRequest, Dispatcher,
};
pub use error::{ConfigError, DataError, EngineError, EngineResult};
pub use frame::BarFrame;
pub use market_data::{MarketData, MarketDataProvider, StaticProvider};
pub use types::*;
