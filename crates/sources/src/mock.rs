use async_trait::async_trait;
use chrono::{DurationRound, Utc};
use quotefeed_core::*;
use rust_decimal::Decimal;

/// Longest synthetic series the mock will build.
const MAX_CANDLES: usize = 1000;

/// Deterministic quote source for running without vendor keys.
#[derive(Debug, Clone, Default)]
pub struct MockSource;

impl MockSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QuoteSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        Ok(Quote {
            symbol: symbol.to_string(),
            price: Decimal::new(12345, 2),
            open: Decimal::new(12000, 2),
            high: Decimal::new(12500, 2),
            low: Decimal::new(11950, 2),
            previous_close: Decimal::new(12100, 2),
            change: Decimal::new(245, 2),
            change_percent: Decimal::new(202, 2),
            timestamp: Some(Utc::now().format("%Y-%m-%d").to_string()),
        })
    }

    /// One candle per minute ending at the current minute; 60 when `limit` is
    /// 0, never more than 1000.
    async fn fetch_intraday(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, QuoteError> {
        let limit = if limit == 0 { 60 } else { limit.min(MAX_CANDLES) };
        let minute = chrono::Duration::minutes(1);
        let now = Utc::now().duration_trunc(minute).unwrap_or_else(|_| Utc::now());
        let base = Decimal::new(120, 0);

        let candles = (0..limit)
            .rev()
            .map(|i| {
                let open = base + Decimal::from(i % 5);
                let close = open + Decimal::new(5, 1);
                Candle {
                    time: now - minute * i as i32,
                    open,
                    high: close + Decimal::new(25, 2),
                    low: open - Decimal::new(25, 2),
                    close,
                    volume: 1000 + i as i64 * 3,
                }
            })
            .collect();
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_quote_is_deterministic() {
        let quote = MockSource::new().fetch_quote("TEST").await.unwrap();
        assert_eq!(quote.symbol, "TEST");
        assert_eq!(quote.price, dec!(123.45));
        assert_eq!(quote.change_percent, dec!(2.02));
    }

    #[tokio::test]
    async fn test_mock_intraday_ascending() {
        let candles = MockSource::new().fetch_intraday("TEST", "1min", 10).await.unwrap();
        assert_eq!(candles.len(), 10);
        assert!(candles.windows(2).all(|w| w[0].time < w[1].time));

        let default = MockSource::new().fetch_intraday("TEST", "1min", 0).await.unwrap();
        assert_eq!(default.len(), 60);
    }

    #[tokio::test]
    async fn test_mock_intraday_length_is_capped() {
        let candles = MockSource::new()
            .fetch_intraday("TEST", "1min", usize::MAX)
            .await
            .unwrap();
        assert_eq!(candles.len(), MAX_CANDLES);
    }
}
