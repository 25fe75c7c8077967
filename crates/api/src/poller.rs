use crate::registry::{RegistryError, RegistryHandle};
use quotefeed_core::{QuoteSource, StreamMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically fetches a quote for every subscribed symbol and broadcasts it.
pub struct Poller {
    registry: RegistryHandle,
    source: Arc<dyn QuoteSource>,
    interval: Duration,
    fetch_timeout: Duration,
}

impl Poller {
    pub fn new(
        registry: RegistryHandle,
        source: Arc<dyn QuoteSource>,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            interval,
            fetch_timeout,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Tick until the registry goes away. The first tick fires one full
    /// period after start.
    pub async fn run(self) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = period.as_millis() as u64, source = self.source.name(), "Poller started");

        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(sent) => debug!(sent, "Poll tick complete"),
                Err(RegistryError::Closed) => {
                    info!("Registry closed, poller stopping");
                    break;
                }
            }
        }
    }

    /// One tick: snapshot active symbols, fetch each, broadcast the ones that
    /// succeed. Returns how many updates were broadcast.
    pub async fn poll_once(&self) -> Result<usize, RegistryError> {
        let symbols = self.registry.active_symbols().await?;
        let mut sent = 0;

        for symbol in symbols {
            let fetched =
                tokio::time::timeout(self.fetch_timeout, self.source.fetch_quote(&symbol)).await;
            match fetched {
                Ok(Ok(quote)) => {
                    self.registry
                        .broadcast(StreamMessage::update(&symbol, quote))
                        .await?;
                    sent += 1;
                }
                Ok(Err(e)) => debug!(symbol = %symbol, error = %e, "Skipping update"),
                Err(_) => debug!(
                    symbol = %symbol,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "Skipping update, fetch timed out"
                ),
            }
        }

        Ok(sent)
    }
}
