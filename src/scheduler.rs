use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::importer::FeedImporter;
use crate::types::{Feed, ImporterConfig, Result};

const LEASE_KEY_PREFIX: &str = "feedspool.import_lock.";

pub fn lease_key(feed_url: &str) -> String {
    format!("{}{}", LEASE_KEY_PREFIX, feed_url)
}

/// Time-bounded mutual exclusion keyed by feed identity. The bounded TTL
/// means a crashed worker cannot strand the lease.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease if no live grant exists. Returns false while another
    /// holder's grant is current.
    async fn acquire(&self, key: &str, ttl: Duration) -> bool;

    async fn release(&self, key: &str);
}

/// Process-local lease store with expiring entries.
#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: RwLock<HashMap<String, Instant>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut leases = self.leases.write().await;
        let now = Instant::now();
        if let Some(expiry) = leases.get(key) {
            if *expiry > now {
                return false;
            }
        }
        leases.insert(key.to_string(), now + ttl);
        true
    }

    async fn release(&self, key: &str) {
        let mut leases = self.leases.write().await;
        leases.remove(key);
    }
}

/// Dispatches feed refreshes to a bounded worker pool.
///
/// `enqueue` is fire-and-forget: one unit of work per feed URL. Each unit
/// takes the per-feed lease before touching the feed and releases it on
/// every exit path, so at most one import per feed runs at a time even with
/// many workers. The periodic sweep enumerates feeds whose last refresh is
/// older than their cadence and enqueues them, optionally spread over a
/// window so a large corpus does not land on the pool at once.
#[derive(Clone)]
pub struct RefreshScheduler {
    importer: Arc<FeedImporter>,
    leases: Arc<dyn LeaseStore>,
    config: ImporterConfig,
    tx: mpsc::UnboundedSender<String>,
    is_running: Arc<RwLock<bool>>,
}

impl RefreshScheduler {
    pub fn new(
        importer: Arc<FeedImporter>,
        leases: Arc<dyn LeaseStore>,
        config: ImporterConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            importer,
            leases,
            config,
            tx,
            is_running: Arc::new(RwLock::new(false)),
        };
        scheduler.start_worker(rx);
        scheduler
    }

    fn start_worker(&self, mut rx: mpsc::UnboundedReceiver<String>) {
        let importer = Arc::clone(&self.importer);
        let leases = Arc::clone(&self.leases);
        let ttl = self.config.lease_ttl;
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));

        tokio::spawn(async move {
            while let Some(feed_url) = rx.recv().await {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let importer = Arc::clone(&importer);
                let leases = Arc::clone(&leases);
                tokio::spawn(async move {
                    let _permit = permit;
                    refresh_one(importer, leases, ttl, feed_url).await;
                });
            }
        });
    }

    /// Queue one refresh for `feed_url`. Fire-and-forget.
    pub fn enqueue(&self, feed_url: &str) {
        if self.tx.send(feed_url.to_string()).is_err() {
            warn!("refresh worker gone, dropping {}", feed_url);
        }
    }

    /// Enumerate feeds due for refresh and enqueue them. Returns how many
    /// were dispatched.
    pub async fn run_pending(&self) -> Result<usize> {
        let now = Utc::now();
        let feeds = self.importer.storage().all_feeds().await?;
        let due: Vec<Feed> = feeds.into_iter().filter(|f| self.is_due(f, now)).collect();
        let total = due.len();
        if total > 0 {
            info!("{} feeds due for refresh", total);
        }

        for (index, feed) in due.into_iter().enumerate() {
            match self.config.dispatch_window {
                Some(window) if total > 1 => {
                    let delay = window.mul_f64(index as f64 / total as f64);
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(feed.feed_url);
                    });
                }
                _ => self.enqueue(&feed.feed_url),
            }
        }
        Ok(total)
    }

    fn is_due(&self, feed: &Feed, now: DateTime<Utc>) -> bool {
        if !feed.is_active {
            return false;
        }
        // Feeds nobody has requested for too long stop being refreshed.
        if let Some(limit) = self.config.last_requested_limit {
            let requested = feed.date_last_requested.unwrap_or(feed.date_created);
            if now - requested > limit {
                return false;
            }
        }
        let every = feed
            .update_frequency_hours
            .map(|hours| chrono::Duration::hours(hours as i64))
            .unwrap_or(self.config.refresh_every);
        match feed.date_last_refresh {
            None => true,
            Some(last) => now - last >= every,
        }
    }

    /// Run the periodic sweep until `stop` is called.
    pub async fn start(&self) {
        {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                warn!("scheduler already running");
                return;
            }
            *is_running = true;
        }

        let scheduler = self.clone();
        let period = self
            .config
            .refresh_every
            .to_std()
            .unwrap_or(Duration::from_secs(3 * 60 * 60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if !*scheduler.is_running.read().await {
                    break;
                }
                if let Err(err) = scheduler.run_pending().await {
                    warn!("refresh sweep failed: {}", err);
                }
            }
        });
        info!("scheduler started, sweeping every {:?}", period);
    }

    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        *is_running = false;
        info!("scheduler stopped");
    }
}

async fn refresh_one(
    importer: Arc<FeedImporter>,
    leases: Arc<dyn LeaseStore>,
    ttl: Duration,
    feed_url: String,
) {
    let key = lease_key(&feed_url);
    if !leases.acquire(&key, ttl).await {
        debug!("{} is already being imported, skipping", feed_url);
        return;
    }

    let result = importer.import_feed(&feed_url, false, false).await;
    // The lease is released before the result is inspected so no exit path
    // can hold it.
    leases.release(&key).await;

    match result {
        Ok(feed) => debug!("refreshed {}", feed.feed_url),
        // Refreshes of known feeds record failures on the feed; anything
        // surfacing here is a first import or an infrastructure error.
        Err(err) => warn!("refresh task for {} failed: {}", feed_url, err),
    }
}
