use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Normalize a ticker symbol the way every caller of a quote source must:
/// surrounding whitespace stripped, ASCII uppercased.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A normalized price quote for one symbol.
///
/// Prices travel as JSON numbers so browser clients can use them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub previous_close: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent: Decimal,
    /// Vendor-supplied trading day or time, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Quote {
    /// Rebuild a quote from a persisted price. Only symbol, price and
    /// timestamp survive storage; the remaining fields are zero.
    pub fn from_stored(stored: &StoredPrice) -> Self {
        Self {
            symbol: stored.symbol.clone(),
            price: stored.price,
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            previous_close: Decimal::ZERO,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            timestamp: Some(stored.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }

    /// The instant this quote should be stored under: the vendor timestamp
    /// when it is RFC 3339, otherwise `now`.
    pub fn observed_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(now)
    }
}

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
    pub volume: i64,
}

/// Sort candles ascending by time and keep only the most recent `limit`.
/// A `limit` of zero keeps everything.
pub fn latest_candles(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    candles.sort_by_key(|c| c.time);
    if limit > 0 && candles.len() > limit {
        let excess = candles.len() - limit;
        candles.drain(..excess);
    }
    candles
}

// ---------------------------------------------------------------------------
// Storage records
// ---------------------------------------------------------------------------

/// A persisted price observation (the cache entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrice {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StoredPrice {
    /// Fresh while `now - timestamp < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX);
        now.signed_duration_since(self.timestamp) < ttl
    }
}

/// Descriptive metadata for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub currency: String,
}

impl SymbolMetadata {
    /// Metadata for a symbol we only know by its ticker.
    pub fn placeholder(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            asset_type: "Unknown".to_string(),
            currency: String::new(),
        }
    }
}
