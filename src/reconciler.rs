//! Watchlist reconciliation.
//!
//! Turns a user's persisted token ids into priced watchlist entries. Each id
//! runs its own resolve → price → convert pipeline; pipelines run
//! concurrently and land in the per-metaverse list in completion order. An
//! id is fetched at most once per session: the resolved and in-flight sets
//! are claimed before any request goes out.

use futures_util::{stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::{reconcile_concurrency, watchlist_capacity, MAX_WATCHLIST_CAPACITY};
use crate::error::ValuationResult;
use crate::land_api::LandSource;
use crate::marketplace::MarketplaceRegistry;
use crate::metrics::Metrics;
use crate::session::SessionGuard;
use crate::store::UserInfo;
use crate::types::{CoinPriceTable, LandQuery, Metaverse, WatchlistEntry};
use crate::valuation::convert;

type EntryKey = (Metaverse, String);

/// Notifications emitted as pipelines finish
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileEvent {
    EntryAdded { metaverse: Metaverse, token_id: String },
    EntryFailed { metaverse: Metaverse, token_id: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileFailure {
    pub metaverse: Metaverse,
    pub token_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    pub added: usize,
    pub failed: Vec<ReconcileFailure>,
    /// Results dropped because the session moved on mid-flight
    pub discarded: usize,
    /// Ids beyond the per-metaverse capacity, never fetched
    pub over_capacity: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Book {
    lists: HashMap<Metaverse, Vec<WatchlistEntry>>,
    resolved: HashSet<EntryKey>,
    in_flight: HashSet<EntryKey>,
    /// In-flight ids removed before their pipeline finished
    cancelled: HashSet<EntryKey>,
}

impl Book {
    fn list_len(&self, metaverse: Metaverse) -> usize {
        self.lists.get(&metaverse).map_or(0, Vec::len)
    }

    fn total(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }
}

pub struct Reconciler {
    land: Arc<dyn LandSource>,
    markets: MarketplaceRegistry,
    book: RwLock<Book>,
    capacity: usize,
    concurrency: usize,
    metrics: Arc<Metrics>,
    events: Option<mpsc::UnboundedSender<ReconcileEvent>>,
}

impl Reconciler {
    pub fn new(land: Arc<dyn LandSource>, markets: MarketplaceRegistry) -> Self {
        Self {
            land,
            markets,
            book: RwLock::new(Book::default()),
            capacity: watchlist_capacity(),
            concurrency: reconcile_concurrency(),
            metrics: Arc::new(Metrics::new()),
            events: None,
        }
    }

    /// Clamped to 1..=MAX_WATCHLIST_CAPACITY
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.clamp(1, MAX_WATCHLIST_CAPACITY);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Stream of per-entry events
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReconcileEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run every unresolved id in `user` through the pipeline
    pub async fn reconcile(&self, user: &UserInfo, coins: &CoinPriceTable, guard: &SessionGuard) -> ReconcileSummary {
        let start = Instant::now();
        self.metrics.reconcile_runs.inc();
        let mut summary = ReconcileSummary::default();

        let jobs = {
            let mut book = self.book.write().await;
            let mut jobs: Vec<EntryKey> = Vec::new();
            for metaverse in Metaverse::ALL {
                let mut slots = self.capacity.saturating_sub(book.list_len(metaverse));
                for token_id in user.list(metaverse) {
                    let key = (metaverse, token_id.clone());
                    if book.in_flight.contains(&key) {
                        // Listed again after a removal: let the running pipeline land it
                        book.cancelled.remove(&key);
                        continue;
                    }
                    if book.resolved.contains(&key) {
                        continue;
                    }
                    if slots == 0 {
                        summary.over_capacity += 1;
                        continue;
                    }
                    slots -= 1;
                    book.in_flight.insert(key.clone());
                    jobs.push(key);
                }
            }
            jobs
        };

        if jobs.is_empty() {
            debug!("Watchlist already reconciled");
            summary.elapsed_ms = start.elapsed().as_millis() as u64;
            return summary;
        }
        debug!("Reconciling {} watchlist lands", jobs.len());

        let mut results = stream::iter(jobs)
            .map(move |(metaverse, token_id)| async move {
                let result = self.build_entry(metaverse, &token_id, coins).await;
                (metaverse, token_id, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((metaverse, token_id, result)) = results.next().await {
            let key = (metaverse, token_id);
            let mut book = self.book.write().await;
            book.in_flight.remove(&key);
            let cancelled = book.cancelled.remove(&key);

            if cancelled {
                debug!(metaverse = %key.0, token_id = %key.1, "dropping result for removed land");
                summary.discarded += 1;
                self.metrics.entries_discarded.inc();
                continue;
            }
            if !guard.is_current() {
                summary.discarded += 1;
                self.metrics.entries_discarded.inc();
                continue;
            }

            let (metaverse, token_id) = key;
            match result {
                Ok(entry) => {
                    if book.list_len(metaverse) >= self.capacity {
                        summary.over_capacity += 1;
                        continue;
                    }
                    book.lists.entry(metaverse).or_default().push(entry);
                    book.resolved.insert((metaverse, token_id.clone()));
                    summary.added += 1;
                    self.metrics.entries_resolved.inc();
                    self.emit(ReconcileEvent::EntryAdded { metaverse, token_id });
                }
                Err(e) => {
                    warn!(%metaverse, %token_id, error = %e, "watchlist land failed");
                    self.metrics.entries_failed.inc();
                    summary.failed.push(ReconcileFailure {
                        metaverse,
                        token_id: token_id.clone(),
                        error: e.to_string(),
                    });
                    self.emit(ReconcileEvent::EntryFailed {
                        metaverse,
                        token_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.metrics
            .watched_lands
            .set(self.book.read().await.total() as i64);
        summary.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            added = summary.added,
            failed = summary.failed.len(),
            discarded = summary.discarded,
            over_capacity = summary.over_capacity,
            elapsed_ms = summary.elapsed_ms,
            "watchlist reconciled"
        );
        summary
    }

    /// resolve → price → convert for one id
    pub async fn build_entry(
        &self,
        metaverse: Metaverse,
        token_id: &str,
        coins: &CoinPriceTable,
    ) -> ValuationResult<WatchlistEntry> {
        let record = self
            .land
            .resolve(metaverse, &LandQuery::TokenId(token_id.to_string()))
            .await?;
        let current_price = self.markets.current_price(&record, coins).await?;
        let predictions = convert(coins, record.raw_predicted_price_eth, metaverse)?;
        Ok(WatchlistEntry {
            api_data: record,
            predictions,
            current_price,
        })
    }

    /// Drop an id from the list and the resolved set. A pipeline still
    /// running for it has its result dropped. Returns whether it was listed.
    pub async fn forget(&self, metaverse: Metaverse, token_id: &str) -> bool {
        let mut book = self.book.write().await;
        let key = (metaverse, token_id.to_string());
        book.resolved.remove(&key);
        if book.in_flight.contains(&key) {
            book.cancelled.insert(key);
        }
        let removed = match book.lists.get_mut(&metaverse) {
            Some(list) => {
                let before = list.len();
                list.retain(|e| e.token_id() != token_id);
                list.len() != before
            }
            None => false,
        };
        self.metrics.watched_lands.set(book.total() as i64);
        removed
    }

    /// Empty every list and the resolved set
    pub async fn clear(&self) {
        let mut book = self.book.write().await;
        book.lists.clear();
        book.resolved.clear();
        self.metrics.watched_lands.set(0);
    }

    pub async fn entries(&self, metaverse: Metaverse) -> Vec<WatchlistEntry> {
        self.book
            .read()
            .await
            .lists
            .get(&metaverse)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<Metaverse, Vec<WatchlistEntry>> {
        self.book.read().await.lists.clone()
    }

    pub async fn len(&self, metaverse: Metaverse) -> usize {
        self.book.read().await.list_len(metaverse)
    }

    pub async fn contains(&self, metaverse: Metaverse, token_id: &str) -> bool {
        let book = self.book.read().await;
        let key = (metaverse, token_id.to_string());
        book.resolved.contains(&key) || (book.in_flight.contains(&key) && !book.cancelled.contains(&key))
    }

    fn emit(&self, event: ReconcileEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone is fine
            let _ = tx.send(event);
        }
    }
}
