//! Single-land appraisal for map cards.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::ValuationResult;
use crate::land_api::LandSource;
use crate::marketplace::MarketplaceRegistry;
use crate::types::{CoinPriceTable, Coordinates, LandQuery, LandRecord, Metaverse, PredictionSet};
use crate::valuation::convert;

#[derive(Debug, Clone, PartialEq)]
pub struct LandAppraisal {
    pub record: LandRecord,
    pub predictions: PredictionSet,
    /// USD, NaN when not listed
    pub current_price_usd: f64,
}

impl LandAppraisal {
    pub fn is_listed(&self) -> bool {
        !self.current_price_usd.is_nan()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CardState {
    Loading,
    Loaded(Box<LandAppraisal>),
    Error(String),
}

pub struct Appraiser {
    land: Arc<dyn LandSource>,
    markets: MarketplaceRegistry,
}

impl Appraiser {
    pub fn new(land: Arc<dyn LandSource>, markets: MarketplaceRegistry) -> Self {
        Self { land, markets }
    }

    pub async fn appraise(
        &self,
        metaverse: Metaverse,
        query: &LandQuery,
        coins: &CoinPriceTable,
    ) -> ValuationResult<LandAppraisal> {
        let record = self.land.resolve(metaverse, query).await?;
        let current_price_usd = self.markets.current_price(&record, coins).await?;
        let predictions = convert(coins, record.raw_predicted_price_eth, metaverse)?;
        debug!(%metaverse, token_id = %record.token_id, listed = !current_price_usd.is_nan(), "appraised");
        Ok(LandAppraisal {
            record,
            predictions,
            current_price_usd,
        })
    }

    /// Appraise the parcel under the cursor, publishing card states as it goes.
    /// A click outside the grid (no coordinates) is an error card.
    pub async fn load_card(
        &self,
        metaverse: Metaverse,
        at: Option<Coordinates>,
        coins: &CoinPriceTable,
        card: &watch::Sender<CardState>,
    ) -> CardState {
        let state = match at {
            None => CardState::Error("no parcel selected".into()),
            Some(coords) => {
                card.send_replace(CardState::Loading);
                match self.appraise(metaverse, &LandQuery::Coordinates(coords), coins).await {
                    Ok(appraisal) => CardState::Loaded(Box::new(appraisal)),
                    Err(e) => CardState::Error(e.to_string()),
                }
            }
        };
        card.send_replace(state.clone());
        state
    }
}
