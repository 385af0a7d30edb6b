//! Error taxonomy for land resolution, pricing and watchlist operations.

use thiserror::Error;

use crate::types::Metaverse;

#[derive(Debug, Error)]
pub enum ValuationError {
    /// The land API has no record for the query. Terminal, never retried.
    #[error("no {metaverse} land matches {query}")]
    NotFound { metaverse: Metaverse, query: String },

    #[error("{metaverse} watchlist is full ({capacity} lands)")]
    CapacityExceeded { metaverse: Metaverse, capacity: usize },

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after: {0}s")]
    RateLimited(u64),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("no USD price for coin '{0}'")]
    MissingCoinPrice(String),

    #[error("unusable USD price {price} for coin '{coin}'")]
    InvalidCoinPrice { coin: String, price: f64 },

    #[error("no marketplace adapter for {0}")]
    UnsupportedMarketplace(Metaverse),

    #[error("watchlist store error: {0}")]
    Store(String),

    #[error("no wallet connected")]
    NoWallet,

    #[error("wallet session was disposed")]
    SessionClosed,
}

impl ValuationError {
    pub fn not_found(metaverse: Metaverse, query: impl ToString) -> Self {
        ValuationError::NotFound {
            metaverse,
            query: query.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ValuationError::NotFound { .. })
    }

    /// Transient failures: network errors, 408/425/429 and 5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            ValuationError::Network(e) => match e.status() {
                Some(status) => matches!(status.as_u16(), 408 | 425 | 429 | 500..=599),
                None => true,
            },
            ValuationError::Api { status, .. } => matches!(status, 408 | 425 | 429 | 500..=599),
            ValuationError::RateLimited(_) => true,
            _ => false,
        }
    }
}

pub type ValuationResult<T> = Result<T, ValuationError>;
