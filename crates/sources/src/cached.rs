use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use quotefeed_core::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::persist::{PersistJob, PersistenceWriter};

type InFlight = Shared<BoxFuture<'static, Result<Quote, QuoteError>>>;
type InFlightMap = Mutex<HashMap<String, InFlight>>;

/// Read-through price cache in front of an upstream source.
///
/// - A stored price younger than the TTL is served without an upstream call.
/// - Otherwise the upstream is asked; concurrent misses for one symbol share
///   a single call. Successful results are queued for persistence and
///   returned without waiting for the write.
/// - If the upstream fails, any stored price (even a stale one) is served
///   instead; with nothing stored the upstream error is returned.
///
/// Intraday candles are passed straight through; they are not cached.
pub struct CachedSource {
    upstream: Arc<dyn QuoteSource>,
    store: Arc<dyn PriceStore>,
    writer: PersistenceWriter,
    ttl: Duration,
    in_flight: InFlightMap,
}

/// Releases a single-flight slot when the caller that opened it finishes,
/// including when it is cancelled mid-call.
struct FlightSlot<'a> {
    map: &'a InFlightMap,
    symbol: &'a str,
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.symbol);
    }
}

impl CachedSource {
    pub fn new(
        upstream: Arc<dyn QuoteSource>,
        store: Arc<dyn PriceStore>,
        writer: PersistenceWriter,
        ttl: Duration,
    ) -> Self {
        Self {
            upstream,
            store,
            writer,
            ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    async fn read_cache(&self, symbol: &str) -> Option<StoredPrice> {
        match self.store.get_latest_price(symbol).await {
            Ok(entry) => entry,
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Call upstream, joining an existing call for the same symbol if one is
    /// running. Returns the result and whether this caller made the call.
    async fn fetch_upstream(&self, symbol: &str) -> (Result<Quote, QuoteError>, bool) {
        let (flight, leader) = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(symbol) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let upstream = Arc::clone(&self.upstream);
                    let owned = symbol.to_string();
                    let flight = async move { upstream.fetch_quote(&owned).await }
                        .boxed()
                        .shared();
                    in_flight.insert(symbol.to_string(), flight.clone());
                    (flight, true)
                }
            }
        };

        if leader {
            let _slot = FlightSlot {
                map: &self.in_flight,
                symbol,
            };
            (flight.await, true)
        } else {
            debug!(symbol = %symbol, "Joining in-flight upstream fetch");
            (flight.await, false)
        }
    }
}

#[async_trait]
impl QuoteSource for CachedSource {
    fn name(&self) -> &str {
        "cached"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let cached = self.read_cache(symbol).await;

        if let Some(entry) = &cached {
            if entry.is_fresh(Utc::now(), self.ttl) {
                debug!(symbol = %symbol, "Cache hit");
                return Ok(Quote::from_stored(entry));
            }
        }

        let (result, leader) = self.fetch_upstream(symbol).await;
        match result {
            Ok(quote) => {
                if leader {
                    self.writer
                        .enqueue(PersistJob::for_quote(symbol, &quote, Utc::now()));
                }
                Ok(quote)
            }
            Err(err) => match cached {
                Some(entry) => {
                    warn!(
                        symbol = %symbol,
                        error = %err,
                        stored_at = %entry.timestamp,
                        "Upstream failed, serving stale price"
                    );
                    Ok(Quote::from_stored(&entry))
                }
                None => Err(err),
            },
        }
    }

    async fn fetch_intraday(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, QuoteError> {
        self.upstream.fetch_intraday(symbol, interval, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotefeed_data::InMemoryPriceStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Upstream returning 100 + call count, optionally slow or failing.
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Option<Duration>,
    }

    impl Counting {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteSource for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(QuoteError::Upstream("connection reset".into()));
            }
            Ok(Quote {
                symbol: symbol.to_string(),
                price: Decimal::from(100 + n as i64),
                open: Decimal::ZERO,
                high: Decimal::ZERO,
                low: Decimal::ZERO,
                previous_close: Decimal::ZERO,
                change: Decimal::ZERO,
                change_percent: Decimal::ZERO,
                timestamp: Some(Utc::now().to_rfc3339()),
            })
        }

        async fn fetch_intraday(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: usize,
        ) -> Result<Vec<Candle>, QuoteError> {
            Ok(Vec::new())
        }
    }

    fn cached(upstream: Arc<Counting>, store: Arc<InMemoryPriceStore>, ttl: Duration) -> CachedSource {
        let writer = PersistenceWriter::new(16);
        writer.spawn(store.clone(), Duration::from_secs(5));
        CachedSource::new(upstream, store, writer, ttl)
    }

    async fn wait_for_price(store: &InMemoryPriceStore, symbol: &str, price: Decimal) {
        for _ in 0..100 {
            if store.latest(symbol).map(|p| p.price) == Some(price) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("price {} for {} was never persisted", price, symbol);
    }

    fn stale_entry(symbol: &str, price: Decimal) -> StoredPrice {
        let then = Utc::now() - chrono::Duration::hours(1);
        StoredPrice {
            symbol: symbol.to_string(),
            price,
            timestamp: then,
            created_at: then,
        }
    }

    #[tokio::test]
    async fn test_hit_then_expiry() {
        let upstream = Arc::new(Counting::default());
        let store = Arc::new(InMemoryPriceStore::new());
        let source = cached(upstream.clone(), store.clone(), Duration::from_secs(1));

        let q1 = source.fetch_quote("TEST").await.unwrap();
        assert_eq!(upstream.calls(), 1);
        assert_eq!(q1.price, dec!(101));
        wait_for_price(&store, "TEST", dec!(101)).await;

        let q2 = source.fetch_quote("TEST").await.unwrap();
        assert_eq!(upstream.calls(), 1);
        assert_eq!(q2.price, dec!(101));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let q3 = source.fetch_quote("TEST").await.unwrap();
        assert_eq!(upstream.calls(), 2);
        assert_eq!(q3.price, dec!(102));
    }

    #[tokio::test]
    async fn test_stale_entry_served_when_upstream_fails() {
        let upstream = Arc::new(Counting::default());
        upstream.failing.store(true, Ordering::SeqCst);
        let store = Arc::new(InMemoryPriceStore::new());
        store.seed(stale_entry("IBM", dec!(180.25)));
        let source = cached(upstream.clone(), store, Duration::from_secs(300));

        let quote = source.fetch_quote("IBM").await.unwrap();
        assert_eq!(quote.price, dec!(180.25));
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_error_propagates_without_entry() {
        let upstream = Arc::new(Counting::default());
        upstream.failing.store(true, Ordering::SeqCst);
        let source = cached(upstream, Arc::new(InMemoryPriceStore::new()), Duration::from_secs(300));

        assert!(matches!(
            source.fetch_quote("IBM").await,
            Err(QuoteError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_entry_refreshed_from_upstream() {
        let upstream = Arc::new(Counting::default());
        let store = Arc::new(InMemoryPriceStore::new());
        store.seed(stale_entry("IBM", dec!(180.25)));
        let source = cached(upstream.clone(), store.clone(), Duration::from_secs(300));

        let quote = source.fetch_quote("IBM").await.unwrap();
        assert_eq!(quote.price, dec!(101));
        wait_for_price(&store, "IBM", dec!(101)).await;
    }

    #[tokio::test]
    async fn test_read_failure_is_a_miss() {
        let upstream = Arc::new(Counting::default());
        let store = Arc::new(InMemoryPriceStore::new());
        store.seed(stale_entry("IBM", dec!(180.25)));
        store.set_failing(true);
        let source = cached(upstream.clone(), store, Duration::from_secs(300));

        let quote = source.fetch_quote("IBM").await.unwrap();
        assert_eq!(quote.price, dec!(101));
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_call() {
        let upstream = Arc::new(Counting::slow(Duration::from_millis(100)));
        let store = Arc::new(InMemoryPriceStore::new());
        let source = cached(upstream.clone(), store, Duration::from_secs(300));

        let results = futures_util::future::join_all((0..5).map(|_| source.fetch_quote("NVDA"))).await;

        assert_eq!(upstream.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().price, dec!(101));
        }
        assert!(source.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_slot_and_follower_completes() {
        let upstream = Arc::new(Counting::slow(Duration::from_millis(200)));
        let store = Arc::new(InMemoryPriceStore::new());
        let source = Arc::new(cached(upstream.clone(), store, Duration::from_secs(300)));

        let leader = tokio::spawn({
            let source = source.clone();
            async move { source.fetch_quote("AMD").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let follower = tokio::spawn({
            let source = source.clone();
            async move { source.fetch_quote("AMD").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert!(source.in_flight.lock().unwrap().is_empty());

        let quote = follower.await.unwrap().unwrap();
        assert_eq!(quote.price, dec!(101));
        assert_eq!(upstream.calls(), 1);
        assert!(source.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_intraday_passthrough() {
        let upstream = Arc::new(Counting::default());
        let source = cached(upstream.clone(), Arc::new(InMemoryPriceStore::new()), Duration::from_secs(300));
        assert!(source.fetch_intraday("AAPL", "5min", 10).await.unwrap().is_empty());
        assert_eq!(upstream.calls(), 0);
    }
}
