use async_trait::async_trait;
use quotefeed_core::*;
use std::sync::Arc;
use tracing::warn;

/// Tries `primary`, and on any error logs it and answers from `secondary`.
///
/// There is no memory between calls: every call starts at the primary again.
pub struct FallbackSource {
    primary: Arc<dyn QuoteSource>,
    secondary: Arc<dyn QuoteSource>,
}

impl FallbackSource {
    pub fn new(primary: Arc<dyn QuoteSource>, secondary: Arc<dyn QuoteSource>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl QuoteSource for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        match self.primary.fetch_quote(symbol).await {
            Ok(quote) => Ok(quote),
            Err(err) => {
                warn!(
                    symbol = %symbol,
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %err,
                    "Primary quote source failed, switching to secondary"
                );
                self.secondary.fetch_quote(symbol).await
            }
        }
    }

    async fn fetch_intraday(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, QuoteError> {
        match self.primary.fetch_intraday(symbol, interval, limit).await {
            Ok(candles) => Ok(candles),
            Err(err) => {
                warn!(
                    symbol = %symbol,
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %err,
                    "Primary intraday source failed, switching to secondary"
                );
                self.secondary.fetch_intraday(symbol, interval, limit).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockSource;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always fails, counting attempts.
    #[derive(Default)]
    struct Broken {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuoteSource for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch_quote(&self, _symbol: &str) -> Result<Quote, QuoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(QuoteError::Upstream("status 503".into()))
        }

        async fn fetch_intraday(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: usize,
        ) -> Result<Vec<Candle>, QuoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(QuoteError::Upstream("status 503".into()))
        }
    }

    #[tokio::test]
    async fn test_secondary_answers_when_primary_fails() {
        let primary = Arc::new(Broken::default());
        let chain = FallbackSource::new(primary.clone(), Arc::new(MockSource::new()));

        let quote = chain.fetch_quote("AAPL").await.unwrap();
        assert_eq!(quote.price, dec!(123.45));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        // No memory of the failure: the next call tries the primary again.
        chain.fetch_quote("AAPL").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let secondary = Arc::new(Broken::default());
        let chain = FallbackSource::new(Arc::new(MockSource::new()), secondary.clone());

        chain.fetch_quote("AAPL").await.unwrap();
        chain.fetch_intraday("AAPL", "1min", 5).await.unwrap();
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_secondary_error_returned_verbatim() {
        let chain = FallbackSource::new(Arc::new(Broken::default()), Arc::new(Broken::default()));
        match chain.fetch_quote("AAPL").await {
            Err(QuoteError::Upstream(msg)) => assert_eq!(msg, "status 503"),
            other => panic!("Expected upstream error, got {:?}", other),
        }
        assert!(chain.fetch_intraday("AAPL", "1min", 5).await.is_err());
    }
}
