use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use quotefeed_core::{normalize_symbol, QuoteError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_INTERVAL: &str = "1min";
const DEFAULT_CANDLE_LIMIT: usize = 100;
const MAX_CANDLE_LIMIT: usize = 1000;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/quote", get(get_quote))
        .route("/intraday", get(get_intraday))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Normalized symbol from the query, or a 400.
fn required_symbol(symbol: Option<&str>) -> Result<String, Response> {
    match symbol.map(normalize_symbol) {
        Some(symbol) if !symbol.is_empty() => Ok(symbol),
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            "Missing required query parameter: symbol",
        )),
    }
}

fn upstream_failure(symbol: &str, error: QuoteError) -> Response {
    warn!(symbol = %symbol, error = %error, "Quote request failed");
    error_response(StatusCode::BAD_GATEWAY, error.to_string())
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "source": state.source.name(),
            "clients": stats.clients,
            "activeSymbols": stats.active_symbols,
            "evicted": stats.evicted,
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct QuoteQuery {
    symbol: Option<String>,
}

async fn get_quote(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuoteQuery>,
) -> Response {
    let symbol = match required_symbol(query.symbol.as_deref()) {
        Ok(symbol) => symbol,
        Err(response) => return response,
    };
    match state.source.fetch_quote(&symbol).await {
        Ok(quote) => Json(quote).into_response(),
        Err(e) => upstream_failure(&symbol, e),
    }
}

#[derive(Deserialize)]
struct IntradayQuery {
    symbol: Option<String>,
    interval: Option<String>,
    limit: Option<usize>,
}

async fn get_intraday(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IntradayQuery>,
) -> Response {
    let symbol = match required_symbol(query.symbol.as_deref()) {
        Ok(symbol) => symbol,
        Err(response) => return response,
    };
    let interval = query
        .interval
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .unwrap_or(DEFAULT_INTERVAL);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CANDLE_LIMIT)
        .min(MAX_CANDLE_LIMIT);

    match state.source.fetch_intraday(&symbol, interval, limit).await {
        Ok(candles) => Json(candles).into_response(),
        Err(e) => upstream_failure(&symbol, e),
    }
}
