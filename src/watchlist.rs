//! User-facing watchlist operations.
//!
//! [`WatchlistService`] ties the wallet session, the persisted watchlist and
//! the reconciler together and drives the [`StateMachine`] the dashboard
//! renders. Cloning is cheap; clones share one service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::WatchlistTimings;
use crate::error::{ValuationError, ValuationResult};
use crate::land_api::LandSource;
use crate::marketplace::MarketplaceRegistry;
use crate::metrics::Metrics;
use crate::reconciler::{ReconcileSummary, Reconciler};
use crate::session::{SessionGuard, WalletSession};
use crate::state::{StateEvent, StateMachine, WatchlistState};
use crate::store::WatchlistStore;
use crate::types::{CoinPriceTable, LandQuery, LandRecord, Metaverse, WatchlistEntry};

/// Collaborators a service is built from
pub struct WatchlistDeps {
    pub session: WalletSession,
    pub store: Arc<dyn WatchlistStore>,
    pub land: Arc<dyn LandSource>,
    pub markets: MarketplaceRegistry,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchlistConfig {
    pub timings: WatchlistTimings,
    pub capacity: usize,
    pub concurrency: usize,
}

impl WatchlistConfig {
    pub fn from_env() -> Self {
        Self {
            timings: WatchlistTimings::from_env(),
            capacity: crate::config::watchlist_capacity(),
            concurrency: crate::config::reconcile_concurrency(),
        }
    }
}

/// Outcome of a successful add
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added(LandRecord),
    /// Already in the watchlist; the store was asked again and is idempotent
    AlreadyWatched(LandRecord),
}

impl AddOutcome {
    pub fn record(&self) -> &LandRecord {
        match self {
            AddOutcome::Added(r) | AddOutcome::AlreadyWatched(r) => r,
        }
    }
}

/// Status of the add-to-watchlist button on a land card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchButtonState {
    NoWallet,
    AlreadyInWatchlist,
    MetaverseLimit,
    CanAddToWatchlist,
    LandAdded,
}

struct ServiceInner {
    session: WalletSession,
    store: Arc<dyn WatchlistStore>,
    land: Arc<dyn LandSource>,
    reconciler: Reconciler,
    coins: RwLock<CoinPriceTable>,
    state: StateMachine,
    timings: WatchlistTimings,
    loaded_for: Mutex<Option<String>>,
    pending_refetch: Mutex<Option<AbortHandle>>,
    loads_running: AtomicUsize,
}

#[derive(Clone)]
pub struct WatchlistService {
    inner: Arc<ServiceInner>,
}

impl WatchlistService {
    pub fn new(deps: WatchlistDeps, coins: CoinPriceTable, config: WatchlistConfig) -> Self {
        let reconciler = Reconciler::new(deps.land.clone(), deps.markets)
            .with_capacity(config.capacity)
            .with_concurrency(config.concurrency)
            .with_metrics(deps.metrics);
        let state = StateMachine::new(deps.session.address().is_some());
        Self {
            inner: Arc::new(ServiceInner {
                session: deps.session,
                store: deps.store,
                land: deps.land,
                reconciler,
                coins: RwLock::new(coins),
                state,
                timings: config.timings,
                loaded_for: Mutex::new(None),
                pending_refetch: Mutex::new(None),
                loads_running: AtomicUsize::new(0),
            }),
        }
    }

    pub fn state(&self) -> WatchlistState {
        self.inner.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchlistState> {
        self.inner.state.subscribe()
    }

    pub fn session(&self) -> &WalletSession {
        &self.inner.session
    }

    pub async fn entries(&self, metaverse: Metaverse) -> Vec<WatchlistEntry> {
        self.inner.reconciler.entries(metaverse).await
    }

    pub async fn set_coin_prices(&self, coins: CoinPriceTable) {
        *self.inner.coins.write().await = coins;
    }

    /// Load the connected wallet's watchlist and reconcile it.
    ///
    /// Without a wallet the lists are cleared and the state becomes
    /// `noWallet`. A wallet with no stored document gets an empty one.
    pub async fn load(&self) -> ValuationResult<ReconcileSummary> {
        let inner = &self.inner;
        if !inner.session.is_active() {
            return Err(ValuationError::SessionClosed);
        }

        let Some(address) = inner.session.address() else {
            inner.reconciler.clear().await;
            self.set_loaded_for(None);
            inner.state.apply(StateEvent::WalletMissing);
            return Ok(ReconcileSummary::default());
        };

        if self.set_loaded_for(Some(address.clone())) {
            debug!(%address, "wallet changed, dropping previous watchlist");
            inner.reconciler.clear().await;
        }

        let guard = inner.session.guard();
        inner.loads_running.fetch_add(1, Ordering::SeqCst);
        inner.state.apply(StateEvent::LoadStarted);

        let result = self.load_for(&address, &guard).await;

        // A stale load still settles the state when no other load is running
        let last = inner.loads_running.fetch_sub(1, Ordering::SeqCst) == 1;
        if inner.session.is_active() && (guard.is_current() || last) {
            inner.state.apply(StateEvent::LoadFinished);
        }
        result
    }

    async fn load_for(&self, address: &str, guard: &SessionGuard) -> ValuationResult<ReconcileSummary> {
        let inner = &self.inner;
        let Some(user) = inner.store.get_user_info(address).await? else {
            info!(%address, "creating watchlist document");
            inner.store.create_user(address).await?;
            return Ok(ReconcileSummary::default());
        };

        let coins = inner.coins.read().await.clone();
        Ok(inner.reconciler.reconcile(&user, &coins, guard).await)
    }

    /// Resolve a land and add it to the watchlist.
    ///
    /// A full watchlist is rejected before anything else, without touching
    /// the store. Unknown lands leave the store untouched too.
    pub async fn add(&self, metaverse: Metaverse, query: LandQuery) -> ValuationResult<AddOutcome> {
        let inner = &self.inner;
        let kind = query.kind();
        let revert_after = inner.timings.revert_after;

        let capacity = inner.reconciler.capacity();
        if inner.reconciler.len(metaverse).await >= capacity {
            inner
                .state
                .apply_with_revert(StateEvent::LimitReached { kind, metaverse }, revert_after);
            return Err(ValuationError::CapacityExceeded { metaverse, capacity });
        }

        let address = inner.session.address().ok_or(ValuationError::NoWallet)?;
        inner.state.apply(StateEvent::QueryStarted(kind));

        let record = match inner.land.resolve(metaverse, &query).await {
            Ok(record) => record,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(%metaverse, %query, error = %e, "land lookup failed");
                }
                inner
                    .state
                    .apply_with_revert(StateEvent::QueryRejected(kind), revert_after);
                return Err(e);
            }
        };

        let already = inner.reconciler.contains(metaverse, &record.token_id).await;
        if let Err(e) = inner
            .store
            .add_land_to_watchlist(&record.token_id, &address, metaverse)
            .await
        {
            warn!(%metaverse, token_id = %record.token_id, error = %e, "watchlist add failed");
            inner
                .state
                .apply_with_revert(StateEvent::QueryRejected(kind), revert_after);
            return Err(e);
        }

        // Normally cleared by the refetch; the timer covers a refetch that never settles
        inner.state.apply_with_revert(
            StateEvent::QueryResolved(kind),
            inner.timings.refetch_after + revert_after,
        );
        self.schedule_refetch();
        info!(%metaverse, token_id = %record.token_id, "land added to watchlist");

        Ok(if already {
            AddOutcome::AlreadyWatched(record)
        } else {
            AddOutcome::Added(record)
        })
    }

    /// Remove a land. The store is updated first; memory follows only once
    /// it confirms. Returns whether the land was in memory.
    pub async fn remove(&self, token_id: &str, metaverse: Metaverse) -> ValuationResult<bool> {
        let address = self.inner.session.address().ok_or(ValuationError::NoWallet)?;
        self.inner
            .store
            .remove_land_from_watchlist(token_id, &address, metaverse)
            .await?;
        let removed = self.inner.reconciler.forget(metaverse, token_id).await;
        debug!(%metaverse, token_id, removed, "land removed from watchlist");
        Ok(removed)
    }

    /// Button status for a land card, read from the store
    pub async fn watch_status(&self, metaverse: Metaverse, token_id: &str) -> ValuationResult<WatchButtonState> {
        let Some(address) = self.inner.session.address() else {
            return Ok(WatchButtonState::NoWallet);
        };
        let user = self.inner.store.get_user_info(&address).await?.unwrap_or_default();
        Ok(if user.contains(metaverse, token_id) {
            WatchButtonState::AlreadyInWatchlist
        } else if user.list(metaverse).len() >= self.inner.reconciler.capacity() {
            WatchButtonState::MetaverseLimit
        } else {
            WatchButtonState::CanAddToWatchlist
        })
    }

    /// Add straight from a land card whose token id is already known
    pub async fn quick_add(&self, metaverse: Metaverse, token_id: &str) -> ValuationResult<WatchButtonState> {
        let status = self.watch_status(metaverse, token_id).await?;
        if status != WatchButtonState::CanAddToWatchlist {
            return Ok(status);
        }
        let address = self.inner.session.address().ok_or(ValuationError::NoWallet)?;
        self.inner
            .store
            .add_land_to_watchlist(token_id, &address, metaverse)
            .await?;
        self.schedule_refetch();
        Ok(WatchButtonState::LandAdded)
    }

    /// Stop timers and invalidate the session; in-flight results are dropped
    pub fn dispose(&self) {
        self.inner.session.dispose();
        self.inner.state.cancel_pending();
        if let Ok(mut pending) = self.inner.pending_refetch.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
    }

    /// Debounced reload: a newer schedule replaces an older one
    fn schedule_refetch(&self) {
        let service = self.clone();
        let after = self.inner.timings.refetch_after;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Err(e) = service.load().await {
                warn!(error = %e, "watchlist refetch failed");
            }
        });
        if let Ok(mut pending) = self.inner.pending_refetch.lock() {
            if let Some(previous) = pending.replace(handle.abort_handle()) {
                previous.abort();
            }
        }
    }

    /// Record which address the lists belong to; true when it changed
    fn set_loaded_for(&self, address: Option<String>) -> bool {
        match self.inner.loaded_for.lock() {
            Ok(mut loaded) => {
                let changed = loaded.is_some() && *loaded != address;
                *loaded = address;
                changed
            }
            Err(_) => false,
        }
    }
}
