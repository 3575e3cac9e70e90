//! Geminii Quant: HTTP front-end and CLI for the analytics engine
//!
//! Usage:
//!   geminii-quant serve --port 3001              Launch the JSON API
//!   geminii-quant run atsmom --symbol PETR4      Run one analysis from CLI
//!   geminii-quant list                           Show the analyzer catalog

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::config::FEE_BPS_ENV;
use engine::{
    AnalysisRequest, BatchRequest, Dispatcher, EngineConfig, EngineError, Entitlement, MarketData,
    YahooClient,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const ENTITLEMENT_HEADER: &str = "x-entitlement";

#[derive(Parser)]
#[command(name = "geminii-quant")]
#[command(about = "Quantitative analytics engine for B3 equities and options", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Round-trip fee in basis points (overrides GEMINII_FEE_BPS)
    #[arg(long, global = true)]
    fee_bps: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the analytics web server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Run a single analysis from CLI (no web server)
    Run {
        /// Analyzer id, e.g. atsmom, beta_regression, pairs
        analyzer: String,
        /// Instrument code, e.g. PETR4 (or * for the pairs universe)
        #[arg(long)]
        symbol: String,
        /// History window: 1mo, 3mo, 6mo, 1y, 2y, 5y
        #[arg(long)]
        period: Option<String>,
        /// Analyzer parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Run with premium entitlement
        #[arg(long)]
        premium: bool,
        /// Include per-bar series in the output
        #[arg(long)]
        series: bool,
    },
    /// List registered analyzers
    List,
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,geminii_quant=debug")
    } else {
        EnvFilter::new("info,engine=info,geminii_quant=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

/// Frozen engine configuration from the environment, with the CLI fee taking precedence
fn load_config(fee_bps: Option<f64>) -> anyhow::Result<EngineConfig> {
    let config = EngineConfig::from_lookup(|key| {
        if key == FEE_BPS_ENV {
            if let Some(fee) = fee_bps {
                return Some(fee.to_string());
            }
        }
        std::env::var(key).ok()
    })?;
    Ok(config)
}

fn build_dispatcher(fee_bps: Option<f64>) -> anyhow::Result<Dispatcher> {
    let config = Arc::new(load_config(fee_bps)?);
    let yahoo = YahooClient::new(&config.vendor_base_url, config.request_timeout);
    let market = MarketData::new(Arc::new(yahoo), Arc::clone(&config));
    Ok(Dispatcher::new(config, market))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port, cli.fee_bps).await?;
        }
        Commands::Run {
            analyzer,
            symbol,
            period,
            params,
            premium,
            series,
        } => {
            cmd_run(cli.fee_bps, analyzer, symbol, period, params, premium, series).await?;
        }
        Commands::List => {
            cmd_list(cli.fee_bps)?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16, fee_bps: Option<f64>) -> anyhow::Result<()> {
    info!("Geminii Quant v{} starting...", APP_VERSION);

    let dispatcher = build_dispatcher(fee_bps)?;
    info!(
        fee_bps = dispatcher.config().fee_bps,
        vendor = %dispatcher.config().vendor_base_url,
        "Engine configured"
    );

    let state = AppState {
        dispatcher: Arc::new(dispatcher),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/analyzers", get(api_analyzers))
        .route("/analyze/:analyzer", post(api_analyze))
        .route("/analyze/:analyzer/batch", post(api_analyze_batch))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Geminii Quant v{} ===", APP_VERSION);
    println!("Quantitative Analytics Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                   - Health check");
    println!("  GET  /api/analyzers                - Analyzer catalog");
    println!("  POST /api/analyze/:analyzer        - Run one analysis");
    println!("  POST /api/analyze/:analyzer/batch  - Run an analyzer over up to 50 symbols");
    println!("\n  Entitlement header: {}: free|premium", ENTITLEMENT_HEADER);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Run / List commands: CLI mode (no web server)
// ============================================================================

async fn cmd_run(
    fee_bps: Option<f64>,
    analyzer: String,
    symbol: String,
    period: Option<String>,
    params: Option<String>,
    premium: bool,
    series: bool,
) -> anyhow::Result<()> {
    println!("\n=== Geminii Quant v{} ===", APP_VERSION);
    println!(
        "Analyzer: {} | Symbol: {} | Period: {}",
        analyzer,
        symbol,
        period.as_deref().unwrap_or("default")
    );
    println!();

    let params: Value = match params {
        Some(raw) => serde_json::from_str(&raw).context("--params must be a JSON object")?,
        None => Value::Null,
    };
    let entitlement = if premium {
        Entitlement::Premium
    } else {
        Entitlement::Free
    };

    let dispatcher = build_dispatcher(fee_bps)?;
    let request = AnalysisRequest {
        symbol,
        period,
        params,
        include_series: series,
    };
    let result = dispatcher
        .dispatch(&analyzer, request, entitlement)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.code()))?;

    println!("{}", serde_json::to_string_pretty(&result.to_envelope())?);
    Ok(())
}

fn cmd_list(fee_bps: Option<f64>) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(fee_bps)?;
    println!("\n{:<18} {:<32} {:<8} {}", "ID", "NAME", "PERIOD", "PLAN");
    for entry in dispatcher.catalog() {
        println!(
            "{:<18} {:<32} {:<8} {}",
            entry.id.as_str(),
            entry.name,
            entry.default_period.as_str(),
            if entry.premium { "premium" } else { "free" }
        );
    }
    Ok(())
}

// ============================================================================
// API handlers
// ============================================================================

type ApiResponse = (StatusCode, Json<Value>);

fn error_response(err: &EngineError) -> ApiResponse {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "Request failed");
    }
    (
        status,
        Json(json!({
            "success": false,
            "error": err.code(),
        })),
    )
}

fn entitlement(headers: &HeaderMap) -> Result<Entitlement, EngineError> {
    headers
        .get(ENTITLEMENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(EngineError::Unauthenticated)?
        .parse()
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, EngineError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| EngineError::Validation(e.body_text()))
}

/// GET /api/health
async fn api_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "geminii-quant",
        "version": APP_VERSION,
    }))
}

/// GET /api/analyzers: catalog with entitlement requirements
async fn api_analyzers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": state.dispatcher.catalog(),
    }))
}

/// POST /api/analyze/:analyzer: run one analyzer for one symbol
async fn api_analyze(
    State(state): State<AppState>,
    Path(analyzer): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> ApiResponse {
    let outcome = async {
        let entitlement = entitlement(&headers)?;
        let request = body(payload)?;
        state.dispatcher.dispatch(&analyzer, request, entitlement).await
    }
    .await;

    match outcome {
        Ok(result) => {
            if !result.is_ok() {
                warn!(
                    analyzer = %analyzer,
                    symbol = %result.symbol,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Analysis unavailable"
                );
            }
            (StatusCode::OK, Json(result.to_envelope()))
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/analyze/:analyzer/batch: run one analyzer over a symbol list
async fn api_analyze_batch(
    State(state): State<AppState>,
    Path(analyzer): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResponse {
    let outcome = async {
        let entitlement = entitlement(&headers)?;
        let request = body(payload)?;
        state
            .dispatcher
            .dispatch_batch(&analyzer, request, entitlement)
            .await
    }
    .await;

    match outcome {
        Ok(batch) => {
            info!(
                analyzer = %analyzer,
                results = batch.results.len(),
                errors = batch.errors.len(),
                "Batch complete"
            );
            (StatusCode::OK, Json(batch.to_envelope()))
        }
        Err(e) => error_response(&e),
    }
}
