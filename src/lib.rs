//! Metaverse land valuation engine
//!
//! Resolves land parcels, prices them against their marketplaces, converts
//! valuations between ETH, USD and metaverse tokens, and keeps per-user
//! watchlists with a UI-facing state machine.

pub mod appraisal;
pub mod atlas;
pub mod cache;
pub mod coin_prices;
pub mod config;
pub mod error;
pub mod land_api;
pub mod logging;
pub mod marketplace;
pub mod metrics;
pub mod reconciler;
pub mod retry;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
pub mod valuation;
pub mod watchlist;

pub use error::{ValuationError, ValuationResult};
pub use types::{CoinPriceTable, Coordinates, LandQuery, LandRecord, Metaverse, PredictionSet, WatchlistEntry};
