//! Heatmap atlas: every valued parcel of a metaverse, loaded page by page.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{ValuationError, ValuationResult};
use crate::land_api::{string_or_number, LandApiClient};
use crate::types::{Coordinates, Metaverse};

pub const DEFAULT_PAGE_SIZE: usize = 2000;

/// One parcel on the heatmap
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasTile {
    pub token_id: String,
    pub coordinates: Coordinates,
    pub eth_predicted_price: f64,
    /// Listing price in ETH when listed
    pub current_price_eth: Option<f64>,
}

#[async_trait]
pub trait AtlasPageSource: Send + Sync {
    async fn fetch_page(&self, metaverse: Metaverse, from: usize, size: usize) -> ValuationResult<Vec<AtlasTile>>;
}

#[derive(Debug, Deserialize)]
struct WireTile {
    #[serde(rename = "tokenId", default, deserialize_with = "string_or_number")]
    token_id: Option<String>,
    coords: Option<WireCoords>,
    prices: Option<WirePrices>,
    current_price_eth: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireCoords {
    x: i32,
    y: i32,
}

#[derive(Debug, Deserialize)]
struct WirePrices {
    eth_predicted_price: Option<f64>,
    predicted_price: Option<f64>,
}

impl WireTile {
    fn into_tile(self) -> Option<AtlasTile> {
        let coords = self.coords?;
        let prices = self.prices?;
        Some(AtlasTile {
            token_id: self.token_id?,
            coordinates: Coordinates::new(coords.x, coords.y),
            eth_predicted_price: prices.eth_predicted_price.or(prices.predicted_price)?,
            current_price_eth: self.current_price_eth.filter(|p| p.is_finite() && *p > 0.0),
        })
    }
}

/// A page is either an array of lands or an object keyed by token id.
/// Tiles missing coordinates or a prediction are skipped.
pub(crate) fn parse_atlas_page(body: &str) -> ValuationResult<Vec<AtlasTile>> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ValuationError::Parse(format!("atlas page: {}", e)))?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        serde_json::Value::Null => Vec::new(),
        other => return Err(ValuationError::Parse(format!("atlas page: unexpected {}", other))),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<WireTile>(item).ok())
        .filter_map(WireTile::into_tile)
        .collect())
}

#[async_trait]
impl AtlasPageSource for LandApiClient {
    async fn fetch_page(&self, metaverse: Metaverse, from: usize, size: usize) -> ValuationResult<Vec<AtlasTile>> {
        let resp = self
            .http
            .get(self.map_url(metaverse))
            .query(&[("from", from), ("size", size)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ValuationError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        parse_atlas_page(&resp.text().await?)
    }
}

/// Parcels keyed by "x,y"
#[derive(Debug, Clone, Default)]
pub struct Atlas {
    tiles: HashMap<String, AtlasTile>,
}

impl Atlas {
    pub fn insert(&mut self, tile: AtlasTile) {
        self.tiles.insert(tile.coordinates.grid_key(), tile);
    }

    pub fn get(&self, x: i32, y: i32) -> Option<&AtlasTile> {
        self.tiles.get(&Coordinates::new(x, y).grid_key())
    }

    pub fn contains(&self, coordinates: Coordinates) -> bool {
        self.tiles.contains_key(&coordinates.grid_key())
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &AtlasTile> {
        self.tiles.values()
    }

    pub fn heatmap_size(&self) -> Option<HeatmapSize> {
        HeatmapSize::from_tiles(self.tiles())
    }
}

/// Grid bounds and the initial view centre
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeatmapSize {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub init_x: i32,
    pub init_y: i32,
}

impl HeatmapSize {
    pub fn from_tiles<'a>(tiles: impl IntoIterator<Item = &'a AtlasTile>) -> Option<Self> {
        let mut iter = tiles.into_iter().map(|t| t.coordinates);
        let first = iter.next()?;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for c in iter {
            min_x = min_x.min(c.x);
            max_x = max_x.max(c.x);
            min_y = min_y.min(c.y);
            max_y = max_y.max(c.y);
        }
        Some(Self {
            min_x,
            max_x,
            min_y,
            max_y,
            init_x: min_x + (max_x - min_x) / 2,
            init_y: min_y + (max_y - min_y) / 2,
        })
    }

    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x) as u32 + 1
    }

    pub fn height(&self) -> u32 {
        (self.max_y - self.min_y) as u32 + 1
    }
}

pub struct AtlasLoader<S> {
    source: S,
    page_size: usize,
}

impl<S: AtlasPageSource> AtlasLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch every page, publishing the running tile count on `progress`.
    /// Stops on a short page or once the metaverse's land total is reached.
    pub async fn load(&self, metaverse: Metaverse, progress: &watch::Sender<usize>) -> ValuationResult<Atlas> {
        let total = metaverse.total_lands();
        let mut atlas = Atlas::default();
        let mut from = 0;
        progress.send_replace(0);

        loop {
            let page = self.source.fetch_page(metaverse, from, self.page_size).await?;
            let fetched = page.len();
            for tile in page {
                atlas.insert(tile);
            }
            progress.send_replace(atlas.len());
            debug!(%metaverse, from, fetched, loaded = atlas.len(), "atlas page");

            from += self.page_size;
            if fetched < self.page_size || atlas.len() >= total || from >= total {
                break;
            }
        }

        info!(%metaverse, lands = atlas.len(), of = total, "atlas loaded");
        Ok(atlas)
    }
}
