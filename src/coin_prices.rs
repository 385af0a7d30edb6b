//! USD quotes for ETH and the metaverse tokens, from CoinGecko.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{build_http_client, QUOTED_COINS};
use crate::error::{ValuationError, ValuationResult};
use crate::retry::{retry_async, RetryPolicy};
use crate::types::CoinPriceTable;

/// Anything that can produce a fresh coin price table
#[async_trait]
pub trait CoinPriceSource: Send + Sync {
    async fn fetch(&self) -> ValuationResult<CoinPriceTable>;
}

#[async_trait]
impl<T: CoinPriceSource + ?Sized> CoinPriceSource for Arc<T> {
    async fn fetch(&self) -> ValuationResult<CoinPriceTable> {
        (**self).fetch().await
    }
}

pub struct CoinPriceClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl CoinPriceClient {
    pub fn new(base_url: impl Into<String>) -> ValuationResult<Self> {
        Ok(Self {
            http: build_http_client()?,
            base_url: base_url.into(),
            retry: RetryPolicy::from_env(),
        })
    }

    fn price_url(&self) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url,
            QUOTED_COINS.join(",")
        )
    }

    async fn fetch_once(&self) -> ValuationResult<CoinPriceTable> {
        let resp = self.http.get(self.price_url()).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ValuationError::RateLimited(60));
        }
        if !status.is_success() {
            return Err(ValuationError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let body = resp.text().await?;
        parse_price_table(&body)
    }
}

#[async_trait]
impl CoinPriceSource for CoinPriceClient {
    async fn fetch(&self) -> ValuationResult<CoinPriceTable> {
        let table = retry_async(&self.retry, "coingecko_prices", || self.fetch_once()).await?;
        info!("Fetched USD prices for {} coins", table.len());
        Ok(table)
    }
}

pub(crate) fn parse_price_table(body: &str) -> ValuationResult<CoinPriceTable> {
    let table: CoinPriceTable = serde_json::from_str(body)
        .map_err(|e| ValuationError::Parse(format!("coin prices: {}", e)))?;
    for coin in QUOTED_COINS {
        if table.usd(coin).is_none() {
            debug!(coin, "coin missing from price table");
        }
    }
    Ok(table)
}
