//! Session cache for resolved land records.
//!
//! Records are keyed by `(metaverse, token id)`; a secondary coordinate index
//! lets a coordinate query hit the cache once the parcel has been seen under
//! either key. Snapshots round-trip through a JSON file for warm starts.

use anyhow::Result;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ValuationResult;
use crate::land_api::LandSource;
use crate::metrics::Metrics;
use crate::types::{Coordinates, LandQuery, LandRecord, Metaverse};

/// On-disk snapshot format
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheSnapshot {
    #[serde(default)]
    records: Vec<LandRecord>,
}

/// In-memory land record cache
#[derive(Debug, Default)]
pub struct LandCache {
    by_token: FxHashMap<(Metaverse, Box<str>), LandRecord>,
    by_coords: FxHashMap<(Metaverse, Coordinates), Box<str>>,
}

impl LandCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metaverse: Metaverse, query: &LandQuery) -> Option<&LandRecord> {
        match query {
            LandQuery::TokenId(id) => self.by_token.get(&(metaverse, id.as_str().into())),
            LandQuery::Coordinates(c) => {
                let token = self.by_coords.get(&(metaverse, *c))?;
                self.by_token.get(&(metaverse, token.clone()))
            }
        }
    }

    pub fn insert(&mut self, record: LandRecord) {
        let token: Box<str> = record.token_id.as_str().into();
        self.by_coords
            .insert((record.metaverse, record.coordinates), token.clone());
        self.by_token.insert((record.metaverse, token), record);
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Load a snapshot; a missing or corrupt file yields an empty cache
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let mut cache = Self::default();
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => match serde_json::from_str::<CacheSnapshot>(&contents) {
                Ok(snapshot) => {
                    for record in snapshot.records {
                        cache.insert(record);
                    }
                    debug!("Loaded {} cached land records", cache.len());
                }
                Err(e) => warn!("Failed to parse land cache: {}", e),
            },
            Err(_) => info!("No land cache found at {:?}, starting empty", path.as_ref()),
        }
        cache
    }

    /// Write a snapshot atomically (tmp file + rename)
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = CacheSnapshot {
            records: self.by_token.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = path.as_ref().with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path.as_ref())?;
        Ok(())
    }
}

/// A `LandSource` that consults the session cache before the inner source.
/// NotFound answers are not cached.
pub struct CachedLandSource<S> {
    inner: S,
    cache: Arc<RwLock<LandCache>>,
    metrics: Option<Arc<Metrics>>,
}

impl<S: LandSource> CachedLandSource<S> {
    pub fn new(inner: S) -> Self {
        Self::with_cache(inner, Arc::new(RwLock::new(LandCache::new())))
    }

    pub fn with_cache(inner: S, cache: Arc<RwLock<LandCache>>) -> Self {
        Self {
            inner,
            cache,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> Arc<RwLock<LandCache>> {
        self.cache.clone()
    }
}

#[async_trait]
impl<S: LandSource> LandSource for CachedLandSource<S> {
    async fn resolve(&self, metaverse: Metaverse, query: &LandQuery) -> ValuationResult<LandRecord> {
        if let Some(hit) = self.cache.read().await.get(metaverse, query).cloned() {
            debug!(%metaverse, %query, "land cache hit");
            if let Some(m) = &self.metrics {
                m.land_cache_hits.inc();
            }
            return Ok(hit);
        }

        let record = self.inner.resolve(metaverse, query).await?;
        self.cache.write().await.insert(record.clone());
        Ok(record)
    }
}
