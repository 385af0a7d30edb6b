//! Marketplace price resolution.
//!
//! Each metaverse trades on one marketplace. Generic order-book marketplaces
//! report sell orders in ETH; the Axie marketplace reports a running auction
//! price already in USD. Both normalize to [`BoundaryPrices`], and the
//! [`MarketplaceRegistry`] picks the adapter for a metaverse once.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{
    clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState, state::NotKeyed,
    Quota, RateLimiter,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{build_http_client, land_contract, marketplace_rps};
use crate::error::{ValuationError, ValuationResult};
use crate::land_api::string_or_number;
use crate::metrics::Metrics;
use crate::retry::{retry_async, RetryPolicy};
use crate::types::{CoinPriceTable, LandRecord, Metaverse};
use crate::valuation::round_cents;

const WEI_PER_ETH: f64 = 1e18;

type MarketRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Unit a marketplace quotes prices in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denomination {
    Eth,
    Usd,
}

/// Normalized listing state of one land
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryPrices {
    /// `None` when the land is not listed
    pub current_price: Option<f64>,
    pub denomination: Denomination,
}

impl BoundaryPrices {
    pub fn not_listed(denomination: Denomination) -> Self {
        Self {
            current_price: None,
            denomination,
        }
    }

    pub fn current_price_or_nan(&self) -> f64 {
        self.current_price.unwrap_or(f64::NAN)
    }

    /// Listing price in USD rounded to cents, NaN when not listed
    pub fn to_usd(&self, coins: &CoinPriceTable) -> ValuationResult<f64> {
        let Some(price) = self.current_price else {
            return Ok(f64::NAN);
        };
        match self.denomination {
            Denomination::Usd => Ok(round_cents(price)),
            Denomination::Eth => {
                let eth_usd = coins
                    .usd("ethereum")
                    .ok_or_else(|| ValuationError::MissingCoinPrice("ethereum".into()))?;
                Ok(round_cents(price * eth_usd))
            }
        }
    }
}

/// A sell order, price in ETH
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub price_eth: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub finalized: bool,
}

impl Order {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.cancelled
            && !self.finalized
            && self.price_eth.is_finite()
            && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Lowest active sell order
pub fn boundary_prices(orders: &[Order], now: DateTime<Utc>) -> BoundaryPrices {
    let current_price = orders
        .iter()
        .filter(|o| o.is_active(now))
        .map(|o| o.price_eth)
        .fold(None, |min: Option<f64>, p| Some(min.map_or(p, |m| m.min(p))));
    BoundaryPrices {
        current_price,
        denomination: Denomination::Eth,
    }
}

/// Lowest active sell price in ETH, NaN when nothing is listed
pub fn current_price(orders: &[Order], now: DateTime<Utc>) -> f64 {
    boundary_prices(orders, now).current_price_or_nan()
}

/// Per-marketplace price lookup
#[async_trait]
pub trait MarketplaceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn boundary_prices(&self, record: &LandRecord) -> ValuationResult<BoundaryPrices>;
}

// === Order-book marketplaces (Sandbox, Decentraland) ===

#[derive(Debug, Deserialize)]
struct AssetOrdersResponse {
    #[serde(default)]
    orders: Option<Vec<RawOrder>>,
    #[serde(default)]
    listings: Option<Vec<RawOrder>>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(default, deserialize_with = "string_or_number")]
    current_price: Option<String>,
    #[serde(default)]
    expiration_time: Option<i64>,
    #[serde(default)]
    cancelled: bool,
    #[serde(default)]
    finalized: bool,
}

impl RawOrder {
    fn into_order(self) -> Option<Order> {
        let wei: f64 = self.current_price?.trim().parse().ok()?;
        let expires_at = match self.expiration_time {
            Some(secs) if secs > 0 => Utc.timestamp_opt(secs, 0).single(),
            _ => None,
        };
        Some(Order {
            price_eth: wei / WEI_PER_ETH,
            expires_at,
            cancelled: self.cancelled,
            finalized: self.finalized,
        })
    }
}

/// Parse a `fetchSingleAsset` body into orders; unparseable orders are skipped
pub(crate) fn parse_orders(body: &str) -> ValuationResult<Vec<Order>> {
    let resp: AssetOrdersResponse = serde_json::from_str(body)
        .map_err(|e| ValuationError::Parse(format!("asset orders: {}", e)))?;
    let raw = resp.orders.or(resp.listings).unwrap_or_default();
    let total = raw.len();
    let orders: Vec<Order> = raw.into_iter().filter_map(RawOrder::into_order).collect();
    if orders.len() < total {
        debug!("Skipped {} malformed orders", total - orders.len());
    }
    Ok(orders)
}

/// OpenSea-style order book behind the marketplace proxy
pub struct OrderBookAdapter {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<MarketRateLimiter>,
    retry: RetryPolicy,
}

impl OrderBookAdapter {
    pub fn new(base_url: impl Into<String>) -> ValuationResult<Self> {
        let rps = NonZeroU32::new(marketplace_rps()).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http: build_http_client()?,
            base_url: base_url.into(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            retry: RetryPolicy::from_env(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_orders(&self, contract: &str, token_id: &str) -> ValuationResult<Vec<Order>> {
        self.limiter.until_ready().await;
        let url = format!("{}/api/fetchSingleAsset/{}/{}", self.base_url, contract, token_id);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Asset unknown to the marketplace: nothing listed
            return Ok(Vec::new());
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(ValuationError::RateLimited(retry_after));
        }
        if !status.is_success() {
            return Err(ValuationError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        parse_orders(&resp.text().await?)
    }
}

#[async_trait]
impl MarketplaceAdapter for OrderBookAdapter {
    fn name(&self) -> &'static str {
        "order-book"
    }

    async fn boundary_prices(&self, record: &LandRecord) -> ValuationResult<BoundaryPrices> {
        let contract = land_contract(record.metaverse);
        let orders = retry_async(&self.retry, "marketplace_orders", || {
            self.fetch_orders(contract, &record.token_id)
        })
        .await?;
        Ok(boundary_prices(&orders, Utc::now()))
    }
}

// === Axie marketplace ===

const GET_LAND_DETAIL: &str = "query GetLandDetail($col: Int!, $row: Int!) { land(col: $col, row: $row) { tokenId col row auction { currentPrice currentPriceUSD } } }";

#[derive(Debug, Deserialize)]
struct AxieResponse {
    data: Option<AxieData>,
}

#[derive(Debug, Deserialize)]
struct AxieData {
    land: Option<AxieLand>,
}

#[derive(Debug, Deserialize)]
struct AxieLand {
    auction: Option<AxieAuction>,
}

#[derive(Debug, Deserialize)]
struct AxieAuction {
    #[serde(rename = "currentPriceUSD", default, deserialize_with = "string_or_number")]
    current_price_usd: Option<String>,
}

/// Parse a GetLandDetail body. No auction means not listed.
pub(crate) fn parse_axie_auction(body: &str) -> ValuationResult<BoundaryPrices> {
    let resp: AxieResponse = serde_json::from_str(body)
        .map_err(|e| ValuationError::Parse(format!("axie land detail: {}", e)))?;
    let price = resp
        .data
        .and_then(|d| d.land)
        .and_then(|l| l.auction)
        .and_then(|a| a.current_price_usd)
        .and_then(|p| p.trim().parse::<f64>().ok())
        .filter(|p| p.is_finite());
    Ok(BoundaryPrices {
        current_price: price,
        denomination: Denomination::Usd,
    })
}

/// Axie Infinity GraphQL marketplace
pub struct AxieAdapter {
    http: reqwest::Client,
    graphql_url: String,
    retry: RetryPolicy,
}

impl AxieAdapter {
    pub fn new(graphql_url: impl Into<String>) -> ValuationResult<Self> {
        Ok(Self {
            http: build_http_client()?,
            graphql_url: graphql_url.into(),
            retry: RetryPolicy::from_env(),
        })
    }

    async fn fetch_auction(&self, col: i32, row: i32) -> ValuationResult<BoundaryPrices> {
        let body = serde_json::json!({
            "operationName": "GetLandDetail",
            "variables": { "col": col, "row": row },
            "query": GET_LAND_DETAIL,
        });
        let resp = self.http.post(&self.graphql_url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ValuationError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        parse_axie_auction(&resp.text().await?)
    }
}

#[async_trait]
impl MarketplaceAdapter for AxieAdapter {
    fn name(&self) -> &'static str {
        "axie-marketplace"
    }

    async fn boundary_prices(&self, record: &LandRecord) -> ValuationResult<BoundaryPrices> {
        let c = record.coordinates;
        retry_async(&self.retry, "axie_land_detail", || self.fetch_auction(c.x, c.y)).await
    }
}

// === Registry ===

/// Adapter per metaverse, chosen once
#[derive(Clone, Default)]
pub struct MarketplaceRegistry {
    adapters: HashMap<Metaverse, Arc<dyn MarketplaceAdapter>>,
    metrics: Option<Arc<Metrics>>,
}

impl MarketplaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sandbox and Decentraland on the order book, Axie on its own marketplace
    pub fn standard(marketplace_base: &str, axie_graphql_url: &str) -> ValuationResult<Self> {
        let order_book: Arc<dyn MarketplaceAdapter> = Arc::new(OrderBookAdapter::new(marketplace_base)?);
        Ok(Self::new()
            .with_adapter(Metaverse::Sandbox, order_book.clone())
            .with_adapter(Metaverse::Decentraland, order_book)
            .with_adapter(Metaverse::AxieInfinity, Arc::new(AxieAdapter::new(axie_graphql_url)?)))
    }

    pub fn with_adapter(mut self, metaverse: Metaverse, adapter: Arc<dyn MarketplaceAdapter>) -> Self {
        self.adapters.insert(metaverse, adapter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn for_metaverse(&self, metaverse: Metaverse) -> ValuationResult<&Arc<dyn MarketplaceAdapter>> {
        self.adapters
            .get(&metaverse)
            .ok_or(ValuationError::UnsupportedMarketplace(metaverse))
    }

    pub async fn boundary_prices(&self, record: &LandRecord) -> ValuationResult<BoundaryPrices> {
        let adapter = self.for_metaverse(record.metaverse)?;
        if let Some(m) = &self.metrics {
            m.marketplace_calls.inc();
        }
        let result = adapter.boundary_prices(record).await;
        if let Err(e) = &result {
            warn!(
                marketplace = adapter.name(),
                token_id = %record.token_id,
                error = %e,
                "price lookup failed"
            );
            if let Some(m) = &self.metrics {
                m.marketplace_errors.inc();
            }
        }
        result
    }

    /// Current listing price in USD (cents), NaN when not listed
    pub async fn current_price(&self, record: &LandRecord, coins: &CoinPriceTable) -> ValuationResult<f64> {
        self.boundary_prices(record).await?.to_usd(coins)
    }
}
