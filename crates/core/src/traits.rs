use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Quote Source Trait
// ---------------------------------------------------------------------------

/// Errors a quote source can produce.
///
/// Composing layers decide what to do with a failure; sources never retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuoteError {
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("No data for symbol: {0}")]
    NotFound(String),
    #[error("Upstream timed out after {0:?}")]
    Timeout(Duration),
}

/// A single upstream market-data vendor (or a composition of them).
///
/// Callers pass symbols already normalized with [`normalize_symbol`].
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetch the current quote for a symbol.
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError>;

    /// Fetch intraday candles, ascending by time, at most `limit` of the most
    /// recent ones (0 = no limit).
    async fn fetch_intraday(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, QuoteError>;
}

// ---------------------------------------------------------------------------
// Price Store Trait
// ---------------------------------------------------------------------------

/// Errors from the storage collaborator. Never fatal to a quote request.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

/// The narrow storage contract the cache layer consumes.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Most recent stored price for a symbol, by observation time.
    async fn get_latest_price(&self, symbol: &str) -> Result<Option<StoredPrice>, StorageError>;

    /// Record one price observation.
    async fn insert_price(
        &self,
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Insert or replace a symbol's metadata.
    async fn upsert_symbol(&self, metadata: &SymbolMetadata) -> Result<(), StorageError>;
}
