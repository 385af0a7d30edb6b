//! ETH → USD → metaverse-token conversion of land predictions.

use crate::error::{ValuationError, ValuationResult};
use crate::types::{CoinPriceTable, Metaverse, PredictionSet};

/// Round to whole cents
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn usable_price(coins: &CoinPriceTable, coin_id: &str) -> ValuationResult<f64> {
    let price = coins
        .usd(coin_id)
        .ok_or_else(|| ValuationError::MissingCoinPrice(coin_id.to_string()))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(ValuationError::InvalidCoinPrice {
            coin: coin_id.to_string(),
            price,
        });
    }
    Ok(price)
}

/// USD value of an ETH amount
pub fn usd_from_eth(coins: &CoinPriceTable, eth: f64) -> ValuationResult<f64> {
    Ok(eth * usable_price(coins, "ethereum")?)
}

/// Express an ETH prediction in ETH, USD and the metaverse's own token.
///
/// Fails instead of producing Infinity/NaN when a needed coin price is
/// absent or not strictly positive.
pub fn convert(coins: &CoinPriceTable, raw_eth: f64, metaverse: Metaverse) -> ValuationResult<PredictionSet> {
    let usd = usd_from_eth(coins, raw_eth)?;
    let token_usd = usable_price(coins, metaverse.coin_id())?;
    Ok(PredictionSet {
        eth_prediction: raw_eth,
        usd_prediction: usd,
        metaverse_token_prediction: usd / token_usd,
    })
}
