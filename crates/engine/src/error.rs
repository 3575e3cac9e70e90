//! Error taxonomy of the engine

use thiserror::Error;

/// Failures of the market data adapter. Never raised across its boundary as a panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("no data returned for symbol")]
    NoData,

    #[error("market data request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

impl DataError {
    pub fn code(&self) -> &'static str {
        match self {
            DataError::NoData => "no_data",
            DataError::Timeout => "timeout",
            DataError::Transport(_) => "transport_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("analyzer requires a premium entitlement")]
    NotEntitled,

    #[error("missing or invalid entitlement")]
    Unauthenticated,

    #[error("unknown analyzer: {0}")]
    UnknownAnalyzer(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short machine-readable code used in error envelopes
    pub fn code(&self) -> String {
        match self {
            EngineError::Validation(msg) => format!("validation_error: {}", msg),
            EngineError::NotEntitled => "not_entitled".to_string(),
            EngineError::Unauthenticated => "unauthenticated".to_string(),
            EngineError::UnknownAnalyzer(_) => "unknown_analyzer".to_string(),
            EngineError::Data(e) => e.code().to_string(),
            EngineError::InsufficientData(_) => "insufficient_data".to_string(),
            EngineError::Internal(_) => "internal_error".to_string(),
        }
    }

    /// Expected data failures are reported as an unsuccessful result, not as a request error
    pub fn is_expected(&self) -> bool {
        matches!(self, EngineError::Data(_) | EngineError::InsufficientData(_))
    }

    /// HTTP status the transport layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::Unauthenticated => 401,
            EngineError::NotEntitled => 403,
            EngineError::UnknownAnalyzer(_) => 404,
            EngineError::Data(_) | EngineError::InsufficientData(_) => 200,
            EngineError::Internal(_) => 500,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
