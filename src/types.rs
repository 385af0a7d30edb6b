//! Core domain types shared by the fetcher, resolver, converter and watchlist.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Supported virtual-world platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metaverse {
    #[serde(rename = "sandbox")]
    Sandbox,
    #[serde(rename = "decentraland")]
    Decentraland,
    #[serde(rename = "axie-infinity")]
    AxieInfinity,
}

impl Metaverse {
    pub const ALL: [Metaverse; 3] = [
        Metaverse::Sandbox,
        Metaverse::Decentraland,
        Metaverse::AxieInfinity,
    ];

    /// Identifier used in API paths and persisted documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Metaverse::Sandbox => "sandbox",
            Metaverse::Decentraland => "decentraland",
            Metaverse::AxieInfinity => "axie-infinity",
        }
    }

    /// CoinGecko id of the metaverse's native token
    pub fn coin_id(&self) -> &'static str {
        match self {
            Metaverse::Sandbox => "the-sandbox",
            Metaverse::Decentraland => "decentraland",
            Metaverse::AxieInfinity => "axie-infinity",
        }
    }

    /// Ticker shown next to native-token predictions
    pub fn token_symbol(&self) -> &'static str {
        match self {
            Metaverse::Sandbox => "SAND",
            Metaverse::Decentraland => "MANA",
            Metaverse::AxieInfinity => "AXS",
        }
    }

    /// Number of land parcels on the metaverse's map
    pub fn total_lands(&self) -> usize {
        match self {
            Metaverse::Sandbox => 166_464,
            Metaverse::Decentraland => 90_601,
            Metaverse::AxieInfinity => 90_601,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" | "the-sandbox" => Some(Metaverse::Sandbox),
            "decentraland" => Some(Metaverse::Decentraland),
            "axie-infinity" | "axie" => Some(Metaverse::AxieInfinity),
            _ => None,
        }
    }
}

impl fmt::Display for Metaverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid position of a parcel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
}

impl Coordinates {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Key used by atlas grids: "x,y"
    pub fn grid_key(&self) -> String {
        format!("{},{}", self.x, self.y)
    }

    /// Parse "x,y" (whitespace tolerated)
    pub fn parse(s: &str) -> Option<Self> {
        let (x, y) = s.split_once(',')?;
        Some(Self {
            x: x.trim().parse().ok()?,
            y: y.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Which key a land query was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Id,
    Coordinates,
}

/// The query key for a land lookup. Exactly one of token id or coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LandQuery {
    TokenId(String),
    Coordinates(Coordinates),
}

impl LandQuery {
    pub fn kind(&self) -> QueryKind {
        match self {
            LandQuery::TokenId(_) => QueryKind::Id,
            LandQuery::Coordinates(_) => QueryKind::Coordinates,
        }
    }
}

impl fmt::Display for LandQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LandQuery::TokenId(id) => write!(f, "token {}", id),
            LandQuery::Coordinates(c) => write!(f, "coordinates {}", c),
        }
    }
}

/// A land query bound to its metaverse
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LandIdentifier {
    pub metaverse: Metaverse,
    pub query: LandQuery,
}

impl LandIdentifier {
    pub fn by_token(metaverse: Metaverse, token_id: impl Into<String>) -> Self {
        Self {
            metaverse,
            query: LandQuery::TokenId(token_id.into()),
        }
    }

    pub fn by_coordinates(metaverse: Metaverse, x: i32, y: i32) -> Self {
        Self {
            metaverse,
            query: LandQuery::Coordinates(Coordinates::new(x, y)),
        }
    }
}

/// Resolved land metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandRecord {
    pub name: String,
    pub token_id: String,
    pub coordinates: Coordinates,
    pub metaverse: Metaverse,
    pub image_url: String,
    pub external_link: String,
    pub opensea_link: Option<String>,
    /// Prediction in the metaverse's legacy unit
    pub predicted_price: f64,
    /// Prediction in ETH, the input to valuation conversion
    pub raw_predicted_price_eth: f64,
}

impl LandRecord {
    /// Name for display: the API name, or the parcel position when unnamed
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            format!("LAND {}", self.coordinates)
        } else {
            self.name.clone()
        }
    }

    /// Token ids on some contracts are 70+ digits; shorten for display
    pub fn short_token_id(&self) -> String {
        let chars: Vec<char> = self.token_id.chars().collect();
        if chars.len() > 12 {
            let head: String = chars[..6].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        } else {
            self.token_id.clone()
        }
    }
}

/// Valuation of a parcel in three denominations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    pub eth_prediction: f64,
    pub usd_prediction: f64,
    pub metaverse_token_prediction: f64,
}

/// USD price of a single coin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoinPrice {
    pub usd: f64,
}

/// CoinGecko `simple/price` payload: coin id -> { usd }
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoinPriceTable {
    prices: HashMap<String, CoinPrice>,
}

impl CoinPriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, coin_id: &str, usd: f64) -> Self {
        self.insert(coin_id, usd);
        self
    }

    pub fn insert(&mut self, coin_id: &str, usd: f64) {
        self.prices.insert(coin_id.to_string(), CoinPrice { usd });
    }

    pub fn usd(&self, coin_id: &str) -> Option<f64> {
        self.prices.get(coin_id).map(|p| p.usd)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// One resolved row of a user's watchlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub api_data: LandRecord,
    pub predictions: PredictionSet,
    /// Current listing price in USD; NaN when the land is not listed
    pub current_price: f64,
}

impl WatchlistEntry {
    pub fn token_id(&self) -> &str {
        &self.api_data.token_id
    }

    pub fn is_listed(&self) -> bool {
        !self.current_price.is_nan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_ids() {
        assert_eq!(Metaverse::Sandbox.coin_id(), "the-sandbox");
        assert_eq!(Metaverse::Decentraland.coin_id(), "decentraland");
        assert_eq!(Metaverse::AxieInfinity.coin_id(), "axie-infinity");
    }

    #[test]
    fn test_metaverse_serde_names() {
        let json = serde_json::to_string(&Metaverse::AxieInfinity).unwrap();
        assert_eq!(json, "\"axie-infinity\"");
        let parsed: Metaverse = serde_json::from_str("\"sandbox\"").unwrap();
        assert_eq!(parsed, Metaverse::Sandbox);
        assert_eq!(Metaverse::parse("Axie"), Some(Metaverse::AxieInfinity));
        assert_eq!(Metaverse::parse("otherside"), None);
    }

    #[test]
    fn test_coordinates_parse() {
        assert_eq!(Coordinates::parse("12, -40"), Some(Coordinates::new(12, -40)));
        assert_eq!(Coordinates::parse("12"), None);
        assert_eq!(Coordinates::new(3, 4).grid_key(), "3,4");
    }

    #[test]
    fn test_query_kind() {
        let by_id = LandIdentifier::by_token(Metaverse::Sandbox, "42");
        let by_xy = LandIdentifier::by_coordinates(Metaverse::Sandbox, 1, 2);
        assert_eq!(by_id.query.kind(), QueryKind::Id);
        assert_eq!(by_xy.query.kind(), QueryKind::Coordinates);
    }

    #[test]
    fn test_coin_table_deserializes_coingecko_shape() {
        let table: CoinPriceTable =
            serde_json::from_str(r#"{"ethereum":{"usd":2000.5},"the-sandbox":{"usd":0.8}}"#)
                .unwrap();
        assert_eq!(table.usd("ethereum"), Some(2000.5));
        assert_eq!(table.usd("the-sandbox"), Some(0.8));
        assert_eq!(table.usd("decentraland"), None);
    }

    #[test]
    fn test_display_name_falls_back_to_coordinates() {
        let record = LandRecord {
            name: String::new(),
            token_id: "115792089237316195423570985008687907853269984665640564039457584007913129639935"
                .into(),
            coordinates: Coordinates::new(-10, 25),
            metaverse: Metaverse::Decentraland,
            image_url: String::new(),
            external_link: String::new(),
            opensea_link: None,
            predicted_price: 0.0,
            raw_predicted_price_eth: 0.0,
        };
        assert_eq!(record.display_name(), "LAND (-10, 25)");
        assert_eq!(record.short_token_id(), "115792...9935");
    }

    #[test]
    fn test_short_token_id_handles_multibyte() {
        let record = LandRecord {
            name: String::new(),
            token_id: "ézézézézézézéz".into(),
            coordinates: Coordinates::new(0, 0),
            metaverse: Metaverse::Sandbox,
            image_url: String::new(),
            external_link: String::new(),
            opensea_link: None,
            predicted_price: 0.0,
            raw_predicted_price_eth: 0.0,
        };
        assert_eq!(record.short_token_id(), "ézézéz...ézéz");

        let short = LandRecord {
            token_id: "ééé".into(),
            ..record
        };
        assert_eq!(short.short_token_id(), "ééé");
    }
}
