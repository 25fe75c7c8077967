pub mod db;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotefeed_core::{PriceStore, StorageError, StoredPrice, SymbolMetadata};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// A PostgreSQL-backed price store.
pub struct PostgresPriceStore {
    pub pool: sqlx::PgPool,
}

impl PostgresPriceStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceStore for PostgresPriceStore {
    async fn get_latest_price(&self, symbol: &str) -> Result<Option<StoredPrice>, StorageError> {
        db::latest_price(&self.pool, symbol)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn insert_price(
        &self,
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        db::insert_price(&self.pool, symbol, price, timestamp)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn upsert_symbol(&self, metadata: &SymbolMetadata) -> Result<(), StorageError> {
        db::upsert_symbol(&self.pool, metadata)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

#[derive(Default)]
struct Tables {
    /// Latest observation per symbol.
    prices: HashMap<String, StoredPrice>,
    symbols: HashMap<String, SymbolMetadata>,
}

/// A process-local price store. Used when no database is configured, and in
/// tests.
#[derive(Default)]
pub struct InMemoryPriceStore {
    tables: Mutex<Tables>,
    failing: AtomicBool,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Store an observation directly, bypassing the failure switch.
    pub fn seed(&self, price: StoredPrice) {
        self.lock().prices.insert(price.symbol.clone(), price);
    }

    pub fn latest(&self, symbol: &str) -> Option<StoredPrice> {
        self.lock().prices.get(symbol).cloned()
    }

    pub fn symbol(&self, symbol: &str) -> Option<SymbolMetadata> {
        self.lock().symbols.get(symbol).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Database("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn get_latest_price(&self, symbol: &str) -> Result<Option<StoredPrice>, StorageError> {
        self.check()?;
        Ok(self.latest(symbol))
    }

    async fn insert_price(
        &self,
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check()?;
        let mut tables = self.lock();
        let newer = tables
            .prices
            .get(symbol)
            .map_or(true, |existing| timestamp >= existing.timestamp);
        if newer {
            tables.prices.insert(
                symbol.to_string(),
                StoredPrice {
                    symbol: symbol.to_string(),
                    price,
                    timestamp,
                    created_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn upsert_symbol(&self, metadata: &SymbolMetadata) -> Result<(), StorageError> {
        self.check()?;
        self.lock()
            .symbols
            .insert(metadata.symbol.clone(), metadata.clone());
        Ok(())
    }
}
