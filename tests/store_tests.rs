//! File-backed watchlist store tests.
//!
//! Each test works in its own temp directory; documents use the same
//! per-metaverse field names as the hosted store.

use land_valuation::error::ValuationError;
use land_valuation::store::{FileStore, UserInfo, WatchlistStore};
use land_valuation::types::Metaverse;

const WALLET: &str = "0xA11CE";

#[tokio::test]
async fn test_mutations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watchlists.json");

    let store = FileStore::open(&path).await.unwrap();
    assert!(store.get_user_info(WALLET).await.unwrap().is_none());
    store.create_user(WALLET).await.unwrap();
    store
        .add_land_to_watchlist("115792", WALLET, Metaverse::Decentraland)
        .await
        .unwrap();
    store
        .add_land_to_watchlist("42", WALLET, Metaverse::Sandbox)
        .await
        .unwrap();
    store
        .add_land_to_watchlist("43", WALLET, Metaverse::Sandbox)
        .await
        .unwrap();
    store
        .remove_land_from_watchlist("42", WALLET, Metaverse::Sandbox)
        .await
        .unwrap();
    drop(store);

    let reopened = FileStore::open(&path).await.unwrap();
    let info = reopened.get_user_info("0xa11ce").await.unwrap().unwrap();
    assert_eq!(info.list(Metaverse::Sandbox), ["43"]);
    assert_eq!(info.list(Metaverse::Decentraland), ["115792"]);
    assert!(info.list(Metaverse::AxieInfinity).is_empty());
    assert!(!path.with_extension("tmp").exists());
}

#[tokio::test]
async fn test_document_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watchlists.json");
    let store = FileStore::open(&path).await.unwrap();
    store
        .add_land_to_watchlist("9", WALLET, Metaverse::AxieInfinity)
        .await
        .unwrap();

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let doc = &raw["0xa11ce"];
    assert_eq!(doc["axie-infinity-watchlist"], serde_json::json!(["9"]));
    assert_eq!(doc["sandbox-watchlist"], serde_json::json!([]));
}

#[tokio::test]
async fn test_reads_existing_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watchlists.json");
    std::fs::write(
        &path,
        r#"{"0xa11ce": {"sandbox-watchlist": ["1", "2"], "decentraland-watchlist": []}}"#,
    )
    .unwrap();

    let store = FileStore::open(&path).await.unwrap();
    let info = store.get_user_info(WALLET).await.unwrap().unwrap();
    assert_eq!(
        info,
        UserInfo {
            sandbox: vec!["1".into(), "2".into()],
            ..UserInfo::default()
        }
    );

    // Adding an id already present does not duplicate it
    store
        .add_land_to_watchlist("2", WALLET, Metaverse::Sandbox)
        .await
        .unwrap();
    assert_eq!(
        store.get_user_info(WALLET).await.unwrap().unwrap().sandbox.len(),
        2
    );
}

#[tokio::test]
async fn test_corrupt_document_is_a_store_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watchlists.json");
    std::fs::write(&path, "{ not json").unwrap();

    match FileStore::open(&path).await {
        Err(ValuationError::Store(msg)) => assert!(msg.contains("watchlists.json")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("corrupt store opened"),
    }
}

#[tokio::test]
async fn test_failed_write_leaves_memory_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    // Parent directory never exists, so every write fails
    let path = dir.path().join("missing_dir").join("watchlists.json");
    let store = FileStore::open(&path).await.unwrap();

    let result = store
        .add_land_to_watchlist("42", WALLET, Metaverse::Sandbox)
        .await;
    assert!(matches!(result, Err(ValuationError::Store(_))));
    assert!(store.get_user_info(WALLET).await.unwrap().is_none());

    assert!(store.create_user(WALLET).await.is_err());
    assert!(store.get_user_info(WALLET).await.unwrap().is_none());
}
