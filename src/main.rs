//! Land valuation runner.
//!
//! Modes, picked from the environment:
//! - default: reconcile the watchlist of WALLET_ADDRESS from the file store
//! - APPRAISE=<metaverse>:<x>,<y>: appraise a single parcel
//! - ATLAS=<metaverse>: load the heatmap atlas and report its bounds

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, info_span, warn};

use land_valuation::appraisal::Appraiser;
use land_valuation::atlas::AtlasLoader;
use land_valuation::cache::{CachedLandSource, LandCache};
use land_valuation::coin_prices::{CoinPriceClient, CoinPriceSource};
use land_valuation::config::{land_cache_path, store_path, wallet_address_from_env, ApiEndpoints};
use land_valuation::land_api::{LandApiClient, LandSource};
use land_valuation::logging;
use land_valuation::marketplace::MarketplaceRegistry;
use land_valuation::metrics::Metrics;
use land_valuation::session::WalletSession;
use land_valuation::store::FileStore;
use land_valuation::types::{Coordinates, LandQuery, Metaverse};
use land_valuation::watchlist::{WatchlistConfig, WatchlistDeps, WatchlistService};

fn parse_appraise_target(value: &str) -> Result<(Metaverse, Coordinates)> {
    let (metaverse, coords) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("APPRAISE must look like sandbox:10,-4"))?;
    let metaverse = Metaverse::parse(metaverse).ok_or_else(|| anyhow!("unknown metaverse '{}'", metaverse))?;
    let coords = Coordinates::parse(coords).ok_or_else(|| anyhow!("bad coordinates '{}'", coords))?;
    Ok((metaverse, coords))
}

async fn save_land_cache(cache: &RwLock<LandCache>) {
    let cache = cache.read().await;
    match cache.save_to(land_cache_path()) {
        Ok(()) => info!("💾 Saved {} land records to cache", cache.len()),
        Err(e) => warn!("Failed to save land cache: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before any OnceLock-cached config is read
    dotenvy::dotenv().ok();

    let _log_guard = logging::init_logging();
    let run_id = logging::get_run_id();
    let endpoints = ApiEndpoints::from_env();

    let root_span = info_span!("land_valuation", run_id = %run_id, land_api = %endpoints.land_api_base);
    let _enter = root_span.enter();

    let metrics = Arc::new(Metrics::new());
    let land_client = LandApiClient::new(endpoints.land_api_base.clone())
        .context("building land API client")?
        .with_metrics(metrics.clone());

    if let Ok(target) = std::env::var("ATLAS") {
        let metaverse = Metaverse::parse(&target).ok_or_else(|| anyhow!("unknown metaverse '{}'", target))?;
        let (progress_tx, mut progress_rx) = watch::channel(0usize);
        let reporter = tokio::spawn(async move {
            while progress_rx.changed().await.is_ok() {
                let loaded = *progress_rx.borrow();
                info!(loaded, of = metaverse.total_lands(), "atlas progress");
            }
        });
        let atlas = AtlasLoader::new(land_client)
            .load(metaverse, &progress_tx)
            .await
            .context("loading atlas")?;
        drop(progress_tx);
        let _ = reporter.await;
        match atlas.heatmap_size() {
            Some(size) => info!(?size, lands = atlas.len(), "heatmap ready"),
            None => warn!(%metaverse, "atlas is empty"),
        }
        return Ok(());
    }

    let coins = CoinPriceClient::new(endpoints.coingecko_api_base.clone())?
        .fetch()
        .await
        .context("fetching coin prices")?;
    let markets = MarketplaceRegistry::standard(&endpoints.marketplace_api_base, &endpoints.axie_graphql_url)?
        .with_metrics(metrics.clone());
    let land_cache = Arc::new(RwLock::new(LandCache::load_from(land_cache_path())));
    let land: Arc<dyn LandSource> =
        Arc::new(CachedLandSource::with_cache(land_client, land_cache.clone()).with_metrics(metrics.clone()));

    if let Ok(target) = std::env::var("APPRAISE") {
        let (metaverse, coords) = parse_appraise_target(&target)?;
        let appraisal = Appraiser::new(land, markets)
            .appraise(metaverse, &LandQuery::Coordinates(coords), &coins)
            .await
            .with_context(|| format!("appraising {} {}", metaverse, coords))?;
        info!(
            land = %appraisal.record.display_name(),
            token_id = %appraisal.record.short_token_id(),
            eth = appraisal.predictions.eth_prediction,
            usd = appraisal.predictions.usd_prediction,
            token = appraisal.predictions.metaverse_token_prediction,
            symbol = metaverse.token_symbol(),
            listed_usd = appraisal.current_price_usd,
            "appraisal"
        );
        save_land_cache(&land_cache).await;
        metrics.log_summary();
        return Ok(());
    }

    let session = WalletSession::new();
    match wallet_address_from_env() {
        Some(address) => session.set_address(Some(address)),
        None => warn!("WALLET_ADDRESS not set, watchlist will be empty"),
    }
    let store = FileStore::open(store_path()).await.context("opening watchlist store")?;

    let service = WatchlistService::new(
        WatchlistDeps {
            session,
            store: Arc::new(store),
            land,
            markets,
            metrics: metrics.clone(),
        },
        coins,
        WatchlistConfig::from_env(),
    );

    let summary = service.load().await.context("loading watchlist")?;
    for failure in &summary.failed {
        warn!(metaverse = %failure.metaverse, token_id = %failure.token_id, error = %failure.error, "not shown");
    }
    for metaverse in Metaverse::ALL {
        for entry in service.entries(metaverse).await {
            info!(
                %metaverse,
                land = %entry.api_data.display_name(),
                usd_prediction = entry.predictions.usd_prediction,
                current_price = entry.current_price,
                listed = entry.is_listed(),
                "watchlist"
            );
        }
    }
    info!(state = %service.state(), "watchlist loaded");

    save_land_cache(&land_cache).await;
    service.dispose();
    metrics.log_summary();
    Ok(())
}
