//! Quote sources and the layers that compose them.
//!
//! Vendors (Alpha Vantage, Finnhub, a deterministic mock) implement
//! [`QuoteSource`]; [`FallbackSource`] chains two of them and
//! [`CachedSource`] puts a stored-price cache in front of any of them.

pub mod alpha_vantage;
pub mod cached;
pub mod fallback;
pub mod finnhub;
mod http;
pub mod mock;
pub mod persist;

pub use alpha_vantage::AlphaVantageSource;
pub use cached::CachedSource;
pub use fallback::FallbackSource;
pub use finnhub::FinnhubSource;
pub use mock::MockSource;
pub use persist::{PersistJob, PersistenceWriter};

use quotefeed_core::QuoteSource;
use std::sync::Arc;
use std::time::Duration;

/// API keys for the real vendors. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct VendorKeys {
    pub alpha_vantage: Option<String>,
    pub finnhub: Option<String>,
}

/// Pick the upstream chain from the configured keys: both keys give a
/// fallback chain with Alpha Vantage first, one key gives that vendor alone,
/// no keys give the mock.
pub fn resolve_upstream(
    keys: &VendorKeys,
    timeout: Duration,
) -> Result<Arc<dyn QuoteSource>, quotefeed_core::QuoteError> {
    let alpha = keys
        .alpha_vantage
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(|k| AlphaVantageSource::new(k, timeout))
        .transpose()?;
    let finnhub = keys
        .finnhub
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(|k| FinnhubSource::new(k, timeout))
        .transpose()?;

    let source: Arc<dyn QuoteSource> = match (alpha, finnhub) {
        (Some(alpha), Some(finnhub)) => {
            tracing::info!("Using fallback chain (primary: Alpha Vantage, secondary: Finnhub)");
            Arc::new(FallbackSource::new(Arc::new(alpha), Arc::new(finnhub)))
        }
        (Some(alpha), None) => {
            tracing::info!("Using Alpha Vantage");
            Arc::new(alpha)
        }
        (None, Some(finnhub)) => {
            tracing::info!("Using Finnhub");
            Arc::new(finnhub)
        }
        (None, None) => {
            tracing::info!("Using mock quotes (set ALPHAVANTAGE_API_KEY and/or FINNHUB_API_KEY for real data)");
            Arc::new(MockSource::new())
        }
    };
    Ok(source)
}
