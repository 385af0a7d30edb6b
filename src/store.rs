//! Persistence for user watchlists.
//!
//! Each user document holds one token-id list per metaverse. The store does
//! not enforce the watchlist cap; callers check it before adding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ValuationError, ValuationResult};
use crate::types::Metaverse;

/// A user's persisted watchlists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "sandbox-watchlist", default)]
    pub sandbox: Vec<String>,
    #[serde(rename = "decentraland-watchlist", default)]
    pub decentraland: Vec<String>,
    #[serde(rename = "axie-infinity-watchlist", default)]
    pub axie_infinity: Vec<String>,
}

impl UserInfo {
    pub fn list(&self, metaverse: Metaverse) -> &[String] {
        match metaverse {
            Metaverse::Sandbox => &self.sandbox,
            Metaverse::Decentraland => &self.decentraland,
            Metaverse::AxieInfinity => &self.axie_infinity,
        }
    }

    pub fn list_mut(&mut self, metaverse: Metaverse) -> &mut Vec<String> {
        match metaverse {
            Metaverse::Sandbox => &mut self.sandbox,
            Metaverse::Decentraland => &mut self.decentraland,
            Metaverse::AxieInfinity => &mut self.axie_infinity,
        }
    }

    pub fn contains(&self, metaverse: Metaverse, token_id: &str) -> bool {
        self.list(metaverse).iter().any(|id| id == token_id)
    }

    fn add(&mut self, metaverse: Metaverse, token_id: &str) {
        if !self.contains(metaverse, token_id) {
            self.list_mut(metaverse).push(token_id.to_string());
        }
    }

    fn remove(&mut self, metaverse: Metaverse, token_id: &str) {
        self.list_mut(metaverse).retain(|id| id != token_id);
    }
}

#[async_trait]
pub trait WatchlistStore: Send + Sync {
    async fn get_user_info(&self, address: &str) -> ValuationResult<Option<UserInfo>>;

    async fn create_user(&self, address: &str) -> ValuationResult<()>;

    async fn add_land_to_watchlist(&self, token_id: &str, address: &str, metaverse: Metaverse) -> ValuationResult<()>;

    async fn remove_land_from_watchlist(
        &self,
        token_id: &str,
        address: &str,
        metaverse: Metaverse,
    ) -> ValuationResult<()>;
}

#[async_trait]
impl<T: WatchlistStore + ?Sized> WatchlistStore for Arc<T> {
    async fn get_user_info(&self, address: &str) -> ValuationResult<Option<UserInfo>> {
        (**self).get_user_info(address).await
    }

    async fn create_user(&self, address: &str) -> ValuationResult<()> {
        (**self).create_user(address).await
    }

    async fn add_land_to_watchlist(&self, token_id: &str, address: &str, metaverse: Metaverse) -> ValuationResult<()> {
        (**self).add_land_to_watchlist(token_id, address, metaverse).await
    }

    async fn remove_land_from_watchlist(
        &self,
        token_id: &str,
        address: &str,
        metaverse: Metaverse,
    ) -> ValuationResult<()> {
        (**self).remove_land_from_watchlist(token_id, address, metaverse).await
    }
}

/// Wallet addresses are case-insensitive hex
fn user_key(address: &str) -> String {
    address.trim().to_lowercase()
}

type UserTable = HashMap<String, UserInfo>;

/// Apply an update to a user's document, creating it if absent
fn update_user(users: &mut UserTable, address: &str, f: impl FnOnce(&mut UserInfo)) {
    f(users.entry(user_key(address)).or_default());
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<UserTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_user(self, address: &str, info: UserInfo) -> Self {
        self.users.lock().await.insert(user_key(address), info);
        self
    }
}

#[async_trait]
impl WatchlistStore for MemoryStore {
    async fn get_user_info(&self, address: &str) -> ValuationResult<Option<UserInfo>> {
        Ok(self.users.lock().await.get(&user_key(address)).cloned())
    }

    async fn create_user(&self, address: &str) -> ValuationResult<()> {
        self.users.lock().await.entry(user_key(address)).or_default();
        Ok(())
    }

    async fn add_land_to_watchlist(&self, token_id: &str, address: &str, metaverse: Metaverse) -> ValuationResult<()> {
        update_user(&mut *self.users.lock().await, address, |u| u.add(metaverse, token_id));
        Ok(())
    }

    async fn remove_land_from_watchlist(
        &self,
        token_id: &str,
        address: &str,
        metaverse: Metaverse,
    ) -> ValuationResult<()> {
        update_user(&mut *self.users.lock().await, address, |u| u.remove(metaverse, token_id));
        Ok(())
    }
}

/// JSON-file store: `{ "<address>": { "sandbox-watchlist": [...], ... } }`.
/// Every mutation rewrites the file atomically.
pub struct FileStore {
    path: PathBuf,
    users: Mutex<UserTable>,
}

impl FileStore {
    /// Open (or start) the store at `path`
    pub async fn open(path: impl AsRef<Path>) -> ValuationResult<Self> {
        let path = path.as_ref().to_path_buf();
        let users = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str::<UserTable>(&contents)
                .map_err(|e| ValuationError::Store(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No watchlist store at {:?}, starting empty", path);
                UserTable::new()
            }
            Err(e) => return Err(ValuationError::Store(format!("{}: {}", path.display(), e))),
        };
        debug!("Opened watchlist store with {} users", users.len());
        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, users: &UserTable) -> ValuationResult<()> {
        let json = serde_json::to_string_pretty(users).map_err(|e| ValuationError::Store(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| ValuationError::Store(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ValuationError::Store(format!("rename to {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    async fn mutate(&self, address: &str, f: impl FnOnce(&mut UserInfo) + Send) -> ValuationResult<()> {
        let mut users = self.users.lock().await;
        let mut next = users.clone();
        update_user(&mut next, address, f);
        // Memory only follows a successful write
        self.persist(&next).await?;
        *users = next;
        Ok(())
    }
}

#[async_trait]
impl WatchlistStore for FileStore {
    async fn get_user_info(&self, address: &str) -> ValuationResult<Option<UserInfo>> {
        Ok(self.users.lock().await.get(&user_key(address)).cloned())
    }

    async fn create_user(&self, address: &str) -> ValuationResult<()> {
        self.mutate(address, |_| {}).await
    }

    async fn add_land_to_watchlist(&self, token_id: &str, address: &str, metaverse: Metaverse) -> ValuationResult<()> {
        self.mutate(address, |u| u.add(metaverse, token_id)).await
    }

    async fn remove_land_from_watchlist(
        &self,
        token_id: &str,
        address: &str,
        metaverse: Metaverse,
    ) -> ValuationResult<()> {
        self.mutate(address, |u| u.remove(metaverse, token_id)).await
    }
}
