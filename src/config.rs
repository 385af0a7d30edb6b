//! Service configuration: API endpoints, contract addresses, watchlist limits
//! and timing, all overridable through environment variables.

use std::time::Duration;

use crate::types::Metaverse;

/// Land metadata / prediction API base URL
pub const DEFAULT_LAND_API_BASE: &str = "https://services.itrmachines.com";

/// Base URL of the app server exposing `/api/fetchSingleAsset`
pub const DEFAULT_MARKETPLACE_API_BASE: &str = "http://localhost:3000";

/// Axie marketplace GraphQL gateway
pub const DEFAULT_AXIE_GRAPHQL_URL: &str = "https://graphql-gateway.axieinfinity.com/graphql";

/// CoinGecko REST base URL
pub const DEFAULT_COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

/// Sandbox LAND contract (post-migration address)
pub const SANDBOX_LAND_CONTRACT: &str = "0x5CC5B05a8A13E3fBDB0BB9FcCd98D38e50F90c38";

/// Decentraland PARCEL contract
pub const DECENTRALAND_PARCEL_CONTRACT: &str = "0xF87E31492Faf9A91B02Ee0dEAAd50d51d56D5d4d";

/// Axie land contract on Ronin
pub const AXIE_LAND_CONTRACT: &str = "0x8c811e3c958e190f5ec15fb376533a3398620500";

/// Coins quoted on every valuation screen
pub const QUOTED_COINS: &[&str] = &["ethereum", "the-sandbox", "decentraland", "axie-infinity"];

/// Hard cap on lands per metaverse watchlist
pub const MAX_WATCHLIST_CAPACITY: usize = 10;

/// Delay before a limit / bad-query banner reverts to `loaded`
const DEFAULT_REVERT_MS: u64 = 2000;

/// Delay between a successful add and the watchlist refetch
const DEFAULT_REFETCH_MS: u64 = 1100;

/// Concurrent per-land pipelines during a reconcile pass
const DEFAULT_RECONCILE_CONCURRENCY: usize = 8;

/// Marketplace requests per second (OpenSea throttles aggressively)
const DEFAULT_MARKETPLACE_RPS: u32 = 4;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default on-disk watchlist store
const DEFAULT_STORE_PATH: &str = "watchlists.json";

/// Default land record snapshot for warm starts
const DEFAULT_LAND_CACHE_PATH: &str = ".land_cache.json";

/// Contract holding a metaverse's land NFTs
pub fn land_contract(metaverse: Metaverse) -> &'static str {
    match metaverse {
        Metaverse::Sandbox => SANDBOX_LAND_CONTRACT,
        Metaverse::Decentraland => DECENTRALAND_PARCEL_CONTRACT,
        Metaverse::AxieInfinity => AXIE_LAND_CONTRACT,
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// External API endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub land_api_base: String,
    pub marketplace_api_base: String,
    pub axie_graphql_url: String,
    pub coingecko_api_base: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            land_api_base: DEFAULT_LAND_API_BASE.to_string(),
            marketplace_api_base: DEFAULT_MARKETPLACE_API_BASE.to_string(),
            axie_graphql_url: DEFAULT_AXIE_GRAPHQL_URL.to_string(),
            coingecko_api_base: DEFAULT_COINGECKO_API_BASE.to_string(),
        }
    }
}

impl ApiEndpoints {
    /// Load from LAND_API_BASE, MARKETPLACE_API_BASE, AXIE_GRAPHQL_URL, COINGECKO_API_BASE
    pub fn from_env() -> Self {
        Self {
            land_api_base: env_or("LAND_API_BASE", DEFAULT_LAND_API_BASE),
            marketplace_api_base: env_or("MARKETPLACE_API_BASE", DEFAULT_MARKETPLACE_API_BASE),
            axie_graphql_url: env_or("AXIE_GRAPHQL_URL", DEFAULT_AXIE_GRAPHQL_URL),
            coingecko_api_base: env_or("COINGECKO_API_BASE", DEFAULT_COINGECKO_API_BASE),
        }
    }
}

/// Timers driving the watchlist state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchlistTimings {
    /// How long limit / bad-query states stay visible
    pub revert_after: Duration,
    /// Debounce before re-running reconcile after a successful add
    pub refetch_after: Duration,
}

impl Default for WatchlistTimings {
    fn default() -> Self {
        Self {
            revert_after: Duration::from_millis(DEFAULT_REVERT_MS),
            refetch_after: Duration::from_millis(DEFAULT_REFETCH_MS),
        }
    }
}

impl WatchlistTimings {
    /// Load from WATCHLIST_REVERT_MS and WATCHLIST_REFETCH_MS
    pub fn from_env() -> Self {
        Self {
            revert_after: Duration::from_millis(
                env_parse("WATCHLIST_REVERT_MS").unwrap_or(DEFAULT_REVERT_MS),
            ),
            refetch_after: Duration::from_millis(
                env_parse("WATCHLIST_REFETCH_MS").unwrap_or(DEFAULT_REFETCH_MS),
            ),
        }
    }
}

/// Lands allowed per metaverse watchlist.
///
/// Reads WATCHLIST_CAPACITY; values outside 1..=10 fall back to 10.
/// The value is cached after first call.
pub fn watchlist_capacity() -> usize {
    use std::sync::OnceLock;
    use tracing::warn;

    static CACHED: OnceLock<usize> = OnceLock::new();
    *CACHED.get_or_init(|| {
        if let Ok(val_str) = std::env::var("WATCHLIST_CAPACITY") {
            match val_str.parse::<usize>() {
                Ok(n) if (1..=MAX_WATCHLIST_CAPACITY).contains(&n) => return n,
                _ => warn!(
                    "Invalid WATCHLIST_CAPACITY='{}' (must be 1-{}), using default {}",
                    val_str, MAX_WATCHLIST_CAPACITY, MAX_WATCHLIST_CAPACITY
                ),
            }
        }
        MAX_WATCHLIST_CAPACITY
    })
}

/// Concurrent per-land pipelines during reconcile (RECONCILE_CONCURRENCY, default 8)
pub fn reconcile_concurrency() -> usize {
    env_parse("RECONCILE_CONCURRENCY")
        .filter(|&n: &usize| n > 0)
        .unwrap_or(DEFAULT_RECONCILE_CONCURRENCY)
}

/// Marketplace request rate (MARKETPLACE_RPS, default 4)
pub fn marketplace_rps() -> u32 {
    env_parse("MARKETPLACE_RPS")
        .filter(|&n: &u32| n > 0)
        .unwrap_or(DEFAULT_MARKETPLACE_RPS)
}

/// HTTP timeout applied to every outbound client (HTTP_TIMEOUT_SECS, default 30)
pub fn http_timeout() -> Duration {
    Duration::from_secs(
        env_parse("HTTP_TIMEOUT_SECS")
            .filter(|&n: &u64| n > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
    )
}

/// Path of the JSON watchlist store (WATCHLIST_STORE_PATH)
pub fn store_path() -> String {
    env_or("WATCHLIST_STORE_PATH", DEFAULT_STORE_PATH)
}

/// Path of the land record snapshot (LAND_CACHE_PATH)
pub fn land_cache_path() -> String {
    env_or("LAND_CACHE_PATH", DEFAULT_LAND_CACHE_PATH)
}

/// Wallet address to load at startup (WALLET_ADDRESS), if any
pub fn wallet_address_from_env() -> Option<String> {
    std::env::var("WALLET_ADDRESS")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Shared builder for outbound HTTP clients
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(http_timeout()).build()
}
