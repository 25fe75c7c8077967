use chrono::{DateTime, Utc};
use quotefeed_core::*;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One price observation to write back to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistJob {
    pub metadata: SymbolMetadata,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PersistJob {
    /// Build the job for a quote fetched for `symbol` at `now`.
    pub fn for_quote(symbol: &str, quote: &Quote, now: DateTime<Utc>) -> Self {
        Self {
            metadata: SymbolMetadata::placeholder(symbol),
            price: quote.price,
            timestamp: quote.observed_at(now),
        }
    }
}

struct Queue {
    jobs: Mutex<VecDeque<PersistJob>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    /// Queued plus currently being written.
    outstanding: AtomicUsize,
}

/// Single background writer fed by a bounded queue.
///
/// `enqueue` never waits. When the queue is full the oldest job is dropped,
/// so a burst of misses cannot grow memory without bound.
#[derive(Clone)]
pub struct PersistenceWriter {
    queue: Arc<Queue>,
}

impl PersistenceWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Queue {
                jobs: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
                notify: Notify::new(),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Start draining the queue into `store`, each job bounded by `budget`.
    pub fn spawn(&self, store: Arc<dyn PriceStore>, budget: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            loop {
                let next = queue
                    .jobs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                match next {
                    Some(job) => {
                        write_job(store.as_ref(), &job, budget).await;
                        queue.outstanding.fetch_sub(1, Ordering::AcqRel);
                    }
                    None => queue.notify.notified().await,
                }
            }
        })
    }

    pub fn enqueue(&self, job: PersistJob) {
        {
            let mut jobs = self
                .queue
                .jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if jobs.len() >= self.queue.capacity {
                if let Some(evicted) = jobs.pop_front() {
                    self.queue.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        symbol = %evicted.metadata.symbol,
                        capacity = self.queue.capacity,
                        "Persistence queue full, dropping oldest write"
                    );
                }
            } else {
                self.queue.outstanding.fetch_add(1, Ordering::AcqRel);
            }
            jobs.push_back(job);
        }
        self.queue.notify.notify_one();
    }

    /// Jobs waiting to be written.
    pub fn pending(&self) -> usize {
        self.queue
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait until every accepted job has been written or dropped, up to
    /// `within`. Returns false if writes were still outstanding.
    pub async fn drain(&self, within: Duration) -> bool {
        let idle = async {
            while self.queue.outstanding.load(Ordering::Acquire) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(within, idle).await.is_ok()
    }

    /// Jobs discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

async fn write_job(store: &dyn PriceStore, job: &PersistJob, budget: Duration) {
    let symbol = job.metadata.symbol.as_str();
    let write = async {
        if let Err(e) = store.upsert_symbol(&job.metadata).await {
            warn!(symbol = %symbol, error = %e, "Failed to upsert symbol metadata");
        }
        store.insert_price(symbol, job.price, job.timestamp).await
    };

    match tokio::time::timeout(budget, write).await {
        Ok(Ok(())) => debug!(symbol = %symbol, price = %job.price, "Cached price"),
        Ok(Err(e)) => warn!(symbol = %symbol, error = %e, "Failed to cache price"),
        Err(_) => warn!(
            symbol = %symbol,
            error = %StorageError::Timeout(budget),
            "Failed to cache price"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotefeed_data::InMemoryPriceStore;
    use rust_decimal_macros::dec;

    fn job(symbol: &str, price: Decimal) -> PersistJob {
        PersistJob {
            metadata: SymbolMetadata::placeholder(symbol),
            price,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let writer = PersistenceWriter::new(2);
        writer.enqueue(job("A", dec!(1)));
        writer.enqueue(job("B", dec!(2)));
        writer.enqueue(job("C", dec!(3)));

        assert_eq!(writer.pending(), 2);
        assert_eq!(writer.dropped(), 1);
        let front = writer.queue.jobs.lock().unwrap().front().cloned().unwrap();
        assert_eq!(front.metadata.symbol, "B");
    }

    #[test]
    fn test_job_uses_rfc3339_quote_time() {
        let now = Utc::now();
        let quote = Quote {
            symbol: "ibm".into(),
            price: dec!(10),
            open: dec!(0),
            high: dec!(0),
            low: dec!(0),
            previous_close: dec!(0),
            change: dec!(0),
            change_percent: dec!(0),
            timestamp: Some("2024-03-01T20:00:00Z".into()),
        };
        let job = PersistJob::for_quote("IBM", &quote, now);
        assert_eq!(job.metadata.symbol, "IBM");
        assert_eq!(job.metadata.asset_type, "Unknown");
        assert_eq!(job.timestamp.to_rfc3339(), "2024-03-01T20:00:00+00:00");
    }

    #[tokio::test]
    async fn test_writer_drains_into_store() {
        let store = Arc::new(InMemoryPriceStore::new());
        let writer = PersistenceWriter::new(8);
        writer.spawn(store.clone(), Duration::from_secs(1));

        writer.enqueue(job("MSFT", dec!(410.5)));

        assert!(writer.drain(Duration::from_secs(1)).await);
        let stored = store.latest("MSFT").expect("price was not persisted");
        assert_eq!(stored.price, dec!(410.5));
        assert!(store.symbol("MSFT").is_some());
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_reports_outstanding_writes() {
        let writer = PersistenceWriter::new(8);
        writer.enqueue(job("IBM", dec!(1)));
        // No writer task running, so the job never completes.
        assert!(!writer.drain(Duration::from_millis(50)).await);
    }
}
