//! Land metadata lookups against the valuation API.
//!
//! A lookup is keyed by a metaverse plus either a token id or a coordinate
//! pair. An empty or error payload means the parcel does not exist, which
//! is a terminal answer for that query.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::debug;

use crate::config::build_http_client;
use crate::error::{ValuationError, ValuationResult};
use crate::metrics::Metrics;
use crate::retry::{retry_async, RetryPolicy};
use crate::types::{Coordinates, LandQuery, LandRecord, Metaverse};

/// Anything that can resolve a land query to its canonical record
#[async_trait]
pub trait LandSource: Send + Sync {
    async fn resolve(&self, metaverse: Metaverse, query: &LandQuery) -> ValuationResult<LandRecord>;
}

#[async_trait]
impl<T: LandSource + ?Sized> LandSource for Arc<T> {
    async fn resolve(&self, metaverse: Metaverse, query: &LandQuery) -> ValuationResult<LandRecord> {
        (**self).resolve(metaverse, query).await
    }
}

/// HTTP client for the land valuation API
#[derive(Clone)]
pub struct LandApiClient {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    retry: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl LandApiClient {
    pub fn new(base_url: impl Into<String>) -> ValuationResult<Self> {
        Ok(Self {
            http: build_http_client()?,
            base_url: base_url.into(),
            retry: RetryPolicy::from_env(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn map_url(&self, metaverse: Metaverse) -> String {
        format!("{}/{}/map", self.base_url, metaverse.as_str())
    }

    async fn fetch_once(&self, metaverse: Metaverse, query: &LandQuery) -> ValuationResult<LandRecord> {
        let params: Vec<(&str, String)> = match query {
            LandQuery::TokenId(id) => vec![("tokenId", id.clone())],
            LandQuery::Coordinates(c) => vec![("x", c.x.to_string()), ("y", c.y.to_string())],
        };

        let resp = self
            .http
            .get(self.map_url(metaverse))
            .query(&params)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ValuationError::not_found(metaverse, query));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ValuationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        parse_land_response(&body, metaverse, query)
    }
}

#[async_trait]
impl LandSource for LandApiClient {
    async fn resolve(&self, metaverse: Metaverse, query: &LandQuery) -> ValuationResult<LandRecord> {
        debug!(%metaverse, %query, "resolving land");
        if let Some(m) = &self.metrics {
            m.land_api_calls.inc();
        }

        let result = retry_async(&self.retry, "land_lookup", || self.fetch_once(metaverse, query)).await;

        if let (Err(e), Some(m)) = (&result, &self.metrics) {
            if !e.is_not_found() {
                m.land_api_errors.inc();
            }
        }
        result
    }
}

/// Raw land API payload
#[derive(Debug, Deserialize)]
struct LandApiResponse {
    name: Option<String>,
    #[serde(rename = "tokenId", default, deserialize_with = "string_or_number")]
    token_id: Option<String>,
    coords: Option<WireCoords>,
    images: Option<WireImages>,
    prices: Option<WirePrices>,
    opensea_link: Option<String>,
    external_link: Option<String>,
    err: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireCoords {
    x: i32,
    y: i32,
}

#[derive(Debug, Deserialize)]
struct WireImages {
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePrices {
    predicted_price: Option<f64>,
    eth_predicted_price: Option<f64>,
}

/// Token ids arrive as strings from some endpoints and numbers from others
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Turn a land API body into a record. Error payloads and unnamed records
/// are NotFound; structurally broken records are Parse errors.
pub(crate) fn parse_land_response(
    body: &str,
    metaverse: Metaverse,
    query: &LandQuery,
) -> ValuationResult<LandRecord> {
    if body.trim().is_empty() || body.trim() == "null" {
        return Err(ValuationError::not_found(metaverse, query));
    }

    let raw: LandApiResponse = serde_json::from_str(body)
        .map_err(|e| ValuationError::Parse(format!("land response: {}", e)))?;

    if raw.err.is_some() || raw.name.as_deref().map_or(true, str::is_empty) {
        return Err(ValuationError::not_found(metaverse, query));
    }

    let token_id = raw
        .token_id
        .ok_or_else(|| ValuationError::Parse("land response without tokenId".into()))?;
    let coords = raw
        .coords
        .ok_or_else(|| ValuationError::Parse(format!("land {} without coords", token_id)))?;
    let prices = raw
        .prices
        .ok_or_else(|| ValuationError::Parse(format!("land {} without prices", token_id)))?;

    let predicted_price = prices.predicted_price.unwrap_or(f64::NAN);
    // Older records only carry the legacy prediction, which is ETH-denominated
    let raw_predicted_price_eth = prices.eth_predicted_price.unwrap_or(predicted_price);

    Ok(LandRecord {
        name: raw.name.unwrap_or_default(),
        token_id,
        coordinates: Coordinates::new(coords.x, coords.y),
        metaverse,
        image_url: raw.images.and_then(|i| i.image_url).unwrap_or_default(),
        external_link: raw.external_link.unwrap_or_default(),
        opensea_link: raw.opensea_link.filter(|l| !l.is_empty()),
        predicted_price,
        raw_predicted_price_eth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SANDBOX_LAND: &str = r#"{
        "name": "LAND (-12, 34)",
        "tokenId": 64012,
        "coords": {"x": -12, "y": 34},
        "images": {"image_url": "https://img.example/64012.png"},
        "prices": {"predicted_price": 1.25, "eth_predicted_price": 1.1},
        "opensea_link": "https://opensea.io/assets/0x5cc5/64012",
        "external_link": "https://www.sandbox.game/en/map/?x=-12&y=34"
    }"#;

    fn token(id: &str) -> LandQuery {
        LandQuery::TokenId(id.to_string())
    }

    #[test]
    fn test_parse_full_record() {
        let record = parse_land_response(SANDBOX_LAND, Metaverse::Sandbox, &token("64012")).unwrap();
        assert_eq!(record.token_id, "64012");
        assert_eq!(record.coordinates, Coordinates::new(-12, 34));
        assert_eq!(record.raw_predicted_price_eth, 1.1);
        assert_eq!(record.predicted_price, 1.25);
        assert_eq!(record.image_url, "https://img.example/64012.png");
        assert!(record.opensea_link.is_some());
    }

    #[test]
    fn test_error_payload_is_not_found() {
        let err = parse_land_response(
            r#"{"err": "No land with that id"}"#,
            Metaverse::Decentraland,
            &token("1"),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unnamed_or_empty_is_not_found() {
        let q = LandQuery::Coordinates(Coordinates::new(500, 500));
        assert!(parse_land_response("{}", Metaverse::Sandbox, &q)
            .unwrap_err()
            .is_not_found());
        assert!(parse_land_response("", Metaverse::Sandbox, &q)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_missing_eth_prediction_falls_back() {
        let body = r#"{
            "name": "Parcel", "tokenId": "77",
            "coords": {"x": 1, "y": 2},
            "prices": {"predicted_price": 0.9}
        }"#;
        let record = parse_land_response(body, Metaverse::Decentraland, &token("77")).unwrap();
        assert_eq!(record.raw_predicted_price_eth, 0.9);
        assert_eq!(record.opensea_link, None);
    }

    #[test]
    fn test_broken_record_is_parse_error() {
        let body = r#"{"name": "Parcel", "tokenId": "77"}"#;
        let err = parse_land_response(body, Metaverse::Sandbox, &token("77")).unwrap_err();
        assert!(matches!(err, ValuationError::Parse(_)));
    }
}
