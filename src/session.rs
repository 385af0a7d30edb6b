//! Wallet session: the connected address and its lifecycle.
//!
//! A session is created per dashboard view and passed to whatever needs the
//! address. Work started under one address hands out a [`SessionGuard`];
//! when the address changes or the session is disposed, outstanding guards
//! go stale and their results are dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Connection {
    address: Option<String>,
    chain_id: Option<u64>,
}

#[derive(Debug)]
struct SessionInner {
    connection: Mutex<Connection>,
    active: AtomicBool,
    epoch: AtomicU64,
    address_tx: watch::Sender<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct WalletSession {
    inner: Arc<SessionInner>,
}

impl Default for WalletSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletSession {
    /// A session with no wallet connected
    pub fn new() -> Self {
        let (address_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                connection: Mutex::new(Connection::default()),
                active: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                address_tx,
            }),
        }
    }

    pub fn with_address(address: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_address(Some(address.into()));
        session
    }

    pub fn connect(&self, address: impl Into<String>, chain_id: u64) {
        let address = address.into();
        info!(%address, chain_id, "wallet connected");
        if let Ok(mut conn) = self.inner.connection.lock() {
            conn.chain_id = Some(chain_id);
        }
        self.set_address(Some(address));
    }

    /// Replace the address. Any change invalidates outstanding guards.
    pub fn set_address(&self, address: Option<String>) {
        let address = address.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
        let changed = match self.inner.connection.lock() {
            Ok(mut conn) => {
                let changed = conn.address != address;
                conn.address = address.clone();
                changed
            }
            Err(_) => false,
        };
        if changed {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.address_tx.send_replace(address);
        }
    }

    pub fn disconnect(&self) {
        if let Ok(mut conn) = self.inner.connection.lock() {
            conn.chain_id = None;
        }
        self.set_address(None);
    }

    pub fn address(&self) -> Option<String> {
        self.inner
            .connection
            .lock()
            .ok()
            .and_then(|conn| conn.address.clone())
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.inner.connection.lock().ok().and_then(|conn| conn.chain_id)
    }

    /// Address changes, starting from the current one
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.address_tx.subscribe()
    }

    /// Guard bound to the current address
    pub fn guard(&self) -> SessionGuard {
        SessionGuard {
            inner: self.inner.clone(),
            epoch: self.inner.epoch.load(Ordering::SeqCst),
        }
    }

    /// End the session; every guard goes stale
    pub fn dispose(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

/// Liveness token for in-flight work
#[derive(Debug, Clone)]
pub struct SessionGuard {
    inner: Arc<SessionInner>,
    epoch: u64,
}

impl SessionGuard {
    pub fn is_current(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst) && self.inner.epoch.load(Ordering::SeqCst) == self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_goes_stale_on_address_change() {
        let session = WalletSession::with_address("0xaaa");
        let guard = session.guard();
        assert!(guard.is_current());

        session.set_address(Some("0xaaa".into()));
        assert!(guard.is_current());

        session.set_address(Some("0xbbb".into()));
        assert!(!guard.is_current());
        assert!(session.guard().is_current());
    }

    #[test]
    fn test_dispose() {
        let session = WalletSession::new();
        session.connect("0xabc", 1);
        assert_eq!(session.chain_id(), Some(1));
        let guard = session.guard();
        session.dispose();
        assert!(!session.is_active());
        assert!(!guard.is_current());
        assert!(!session.guard().is_current());
    }

    #[test]
    fn test_subscribe_sees_latest_address() {
        let session = WalletSession::new();
        let rx = session.subscribe();
        assert_eq!(*rx.borrow(), None);
        session.set_address(Some("  ".into()));
        assert_eq!(session.address(), None);
        session.connect("0xabc", 137);
        assert_eq!(rx.borrow().as_deref(), Some("0xabc"));
        session.disconnect();
        assert_eq!(session.address(), None);
    }
}
