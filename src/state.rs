//! UI-facing watchlist status.
//!
//! `transition` is a pure function over [`WatchlistState`] and
//! [`StateEvent`]. [`StateMachine`] wraps it with a generation counter: every
//! applied event bumps the generation, and a scheduled revert only fires if
//! the generation it was scheduled under is still current.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::types::{Metaverse, QueryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchlistState {
    LoadingFirst,
    Loading,
    Loaded,
    NoWallet,
    LoadingQuery(QueryKind),
    Success(QueryKind),
    BadQuery(QueryKind),
    Limit { kind: QueryKind, metaverse: Metaverse },
}

impl WatchlistState {
    /// States that clear themselves, by timer or by the follow-up reconcile
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WatchlistState::Success(_) | WatchlistState::BadQuery(_) | WatchlistState::Limit { .. }
        )
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            WatchlistState::LoadingFirst | WatchlistState::Loading | WatchlistState::LoadingQuery(_)
        )
    }

    /// Camel-case tag as rendered by the dashboard, e.g. `limitIdSandbox`
    pub fn tag(&self) -> String {
        fn kind(k: &QueryKind) -> &'static str {
            match k {
                QueryKind::Id => "Id",
                QueryKind::Coordinates => "Coordinates",
            }
        }
        match self {
            WatchlistState::LoadingFirst => "loadingFirst".into(),
            WatchlistState::Loading => "loading".into(),
            WatchlistState::Loaded => "loaded".into(),
            WatchlistState::NoWallet => "noWallet".into(),
            WatchlistState::LoadingQuery(k) => format!("loadingQuery{}", kind(k)),
            WatchlistState::Success(k) => format!("success{}", kind(k)),
            WatchlistState::BadQuery(k) => format!("badQuery{}", kind(k)),
            WatchlistState::Limit { kind: k, metaverse } => {
                let name = match metaverse {
                    Metaverse::Sandbox => "Sandbox",
                    Metaverse::Decentraland => "Decentraland",
                    Metaverse::AxieInfinity => "AxieInfinity",
                };
                format!("limit{}{}", kind(k), name)
            }
        }
    }
}

impl fmt::Display for WatchlistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    WalletMissing,
    LoadStarted,
    LoadFinished,
    QueryStarted(QueryKind),
    QueryResolved(QueryKind),
    QueryRejected(QueryKind),
    LimitReached { kind: QueryKind, metaverse: Metaverse },
    /// Timer expiry for a transient state
    Revert,
}

pub fn transition(state: WatchlistState, event: StateEvent) -> WatchlistState {
    use StateEvent as E;
    use WatchlistState as S;

    match (state, event) {
        (_, E::WalletMissing) => S::NoWallet,
        (S::NoWallet | S::LoadingFirst, E::LoadStarted) => S::LoadingFirst,
        (_, E::LoadStarted) => S::Loading,
        // Without a wallet nothing else applies
        (S::NoWallet, _) => S::NoWallet,
        (S::Loading | S::LoadingFirst, E::LoadFinished) => S::Loaded,
        (s, E::LoadFinished) => s,
        (_, E::QueryStarted(kind)) => S::LoadingQuery(kind),
        (_, E::QueryResolved(kind)) => S::Success(kind),
        (_, E::QueryRejected(kind)) => S::BadQuery(kind),
        (_, E::LimitReached { kind, metaverse }) => S::Limit { kind, metaverse },
        (s, E::Revert) if s.is_transient() => S::Loaded,
        (s, E::Revert) => s,
    }
}

struct MachineInner {
    state: WatchlistState,
    generation: u64,
    pending_revert: Option<AbortHandle>,
}

/// Shared, observable watchlist state
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Mutex<MachineInner>>,
    tx: Arc<watch::Sender<WatchlistState>>,
}

impl StateMachine {
    pub fn new(has_wallet: bool) -> Self {
        let initial = if has_wallet {
            WatchlistState::LoadingFirst
        } else {
            WatchlistState::NoWallet
        };
        let (tx, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Mutex::new(MachineInner {
                state: initial,
                generation: 0,
                pending_revert: None,
            })),
            tx: Arc::new(tx),
        }
    }

    pub fn current(&self) -> WatchlistState {
        *self.tx.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().map(|m| m.generation).unwrap_or_default()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchlistState> {
        self.tx.subscribe()
    }

    /// Apply an event; cancels any pending revert
    pub fn apply(&self, event: StateEvent) -> WatchlistState {
        let Ok(mut inner) = self.inner.lock() else {
            return self.current();
        };
        self.apply_locked(&mut inner, event)
    }

    /// Apply an event and schedule a revert to `loaded` after `after`,
    /// effective only if no other event arrives first. Needs a tokio runtime.
    pub fn apply_with_revert(&self, event: StateEvent, after: Duration) -> WatchlistState {
        let Ok(mut inner) = self.inner.lock() else {
            return self.current();
        };
        let next = self.apply_locked(&mut inner, event);
        let generation = inner.generation;
        let machine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            machine.revert_if_current(generation);
        });
        inner.pending_revert = Some(handle.abort_handle());
        next
    }

    /// Drop any pending revert without changing state
    pub fn cancel_pending(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(handle) = inner.pending_revert.take() {
                handle.abort();
            }
        }
    }

    fn revert_if_current(&self, generation: u64) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.generation != generation {
            debug!(generation, current = inner.generation, "stale revert skipped");
            return;
        }
        inner.pending_revert = None;
        self.apply_locked(&mut inner, StateEvent::Revert);
    }

    fn apply_locked(&self, inner: &mut MachineInner, event: StateEvent) -> WatchlistState {
        if let Some(handle) = inner.pending_revert.take() {
            handle.abort();
        }
        let next = transition(inner.state, event);
        inner.generation += 1;
        if next != inner.state {
            debug!(from = %inner.state, to = %next, ?event, "watchlist state");
        }
        inner.state = next;
        self.tx.send_replace(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use QueryKind::{Coordinates, Id};

    #[test]
    fn test_tags() {
        assert_eq!(
            WatchlistState::Limit {
                kind: Id,
                metaverse: Metaverse::Sandbox
            }
            .tag(),
            "limitIdSandbox"
        );
        assert_eq!(
            WatchlistState::Limit {
                kind: Coordinates,
                metaverse: Metaverse::Decentraland
            }
            .tag(),
            "limitCoordinatesDecentraland"
        );
        assert_eq!(WatchlistState::LoadingQuery(Coordinates).tag(), "loadingQueryCoordinates");
        assert_eq!(WatchlistState::BadQuery(Id).to_string(), "badQueryId");
    }

    #[test]
    fn test_load_cycle() {
        let s = transition(WatchlistState::NoWallet, StateEvent::LoadStarted);
        assert_eq!(s, WatchlistState::LoadingFirst);
        let s = transition(s, StateEvent::LoadFinished);
        assert_eq!(s, WatchlistState::Loaded);
        let s = transition(s, StateEvent::LoadStarted);
        assert_eq!(s, WatchlistState::Loading);
        assert_eq!(transition(s, StateEvent::WalletMissing), WatchlistState::NoWallet);
    }

    #[test]
    fn test_no_wallet_absorbs_queries() {
        for event in [
            StateEvent::QueryStarted(Id),
            StateEvent::LoadFinished,
            StateEvent::Revert,
            StateEvent::LimitReached {
                kind: Id,
                metaverse: Metaverse::Sandbox,
            },
        ] {
            assert_eq!(transition(WatchlistState::NoWallet, event), WatchlistState::NoWallet);
        }
    }

    #[test]
    fn test_revert_only_clears_transient() {
        assert_eq!(
            transition(WatchlistState::BadQuery(Id), StateEvent::Revert),
            WatchlistState::Loaded
        );
        assert_eq!(
            transition(WatchlistState::Loading, StateEvent::Revert),
            WatchlistState::Loading
        );
        assert_eq!(
            transition(WatchlistState::Success(Id), StateEvent::LoadFinished),
            WatchlistState::Success(Id)
        );
    }

    #[tokio::test]
    async fn test_revert_fires() {
        let machine = StateMachine::new(true);
        machine.apply(StateEvent::LoadFinished);
        machine.apply_with_revert(StateEvent::QueryRejected(Id), Duration::from_millis(20));
        assert_eq!(machine.current(), WatchlistState::BadQuery(Id));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(machine.current(), WatchlistState::Loaded);
    }

    #[tokio::test]
    async fn test_stale_revert_does_not_clobber() {
        let machine = StateMachine::new(true);
        machine.apply(StateEvent::LoadFinished);
        machine.apply_with_revert(StateEvent::QueryRejected(Id), Duration::from_millis(30));
        machine.apply(StateEvent::QueryStarted(Coordinates));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(machine.current(), WatchlistState::LoadingQuery(Coordinates));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let machine = StateMachine::new(false);
        let mut rx = machine.subscribe();
        assert_eq!(*rx.borrow(), WatchlistState::NoWallet);
        machine.apply(StateEvent::LoadStarted);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), WatchlistState::LoadingFirst);
    }
}
