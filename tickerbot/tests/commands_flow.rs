//! Chat commands handled against a real `AppState`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tickerbot::alerts::DedupeStore;
use tickerbot::commands::{handle, Command, HELP_TEXT};
use tickerbot::data::{HybridConfig, HybridProvider, Symbol, YahooAdapter};
use tickerbot::notification::LogNotifier;
use tickerbot::watchlist::WatchlistStore;
use tickerbot::AppState;
use tickerbot_common::config::Config;

async fn setup() -> (TempDir, MockServer, AppState) {
    let yahoo = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/USDSGD%3DX"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chart": {
                "result": [{
                    "meta": {
                        "regularMarketPrice": 1.3456,
                        "chartPreviousClose": 1.3401,
                        "shortName": "USD/SGD"
                    }
                }],
                "error": null
            }
        })))
        .mount(&yahoo)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&yahoo)
        .await;

    let provider = Arc::new(HybridProvider::new(HybridConfig::default()).with_fallback(
        Arc::new(YahooAdapter::new(yahoo.uri(), Duration::from_secs(5))),
        Duration::ZERO,
    ));
    let dir = TempDir::new().unwrap();
    let watchlist = Arc::new(
        WatchlistStore::load(
            dir.path().join("watchlist.txt"),
            &[Symbol::parse("AAPL").unwrap()],
        )
        .unwrap(),
    );
    let state = AppState::assemble(
        Config::default(),
        provider,
        watchlist,
        Arc::new(DedupeStore::in_memory()),
        Arc::new(LogNotifier),
    );
    (dir, yahoo, state)
}

async fn run(state: &AppState, text: &str) -> String {
    let command = Command::parse(text).unwrap();
    handle(state, command).await
}

#[tokio::test]
async fn test_add_then_remove_missing() {
    let (_dir, _yahoo, state) = setup().await;

    let reply = run(&state, "/add tsla").await;
    assert!(reply.contains("Added TSLA"), "{reply}");

    let reply = run(&state, "/add TSLA").await;
    assert!(reply.contains("already"), "{reply}");

    let reply = run(&state, "/remove MSFT").await;
    assert!(reply.contains("MSFT is not in the watchlist"), "{reply}");

    let listing = run(&state, "/stocks").await;
    assert!(listing.contains("AAPL"));
    assert!(listing.contains("TSLA"));
    assert!(listing.contains("(2)"));
}

#[tokio::test]
async fn test_validation_messages() {
    let (_dir, _yahoo, state) = setup().await;

    assert_eq!(run(&state, "/add").await, "Usage: /add SYMBOL");
    assert!(run(&state, "/quote $$$").await.contains("Invalid symbol"));
}

#[tokio::test]
async fn test_fx_quote() {
    let (_dir, _yahoo, state) = setup().await;

    let reply = run(&state, "/quote usdsgd=x").await;
    assert!(reply.contains("USDSGD=X (USD/SGD)"), "{reply}");
    assert!(reply.contains("1.3456"), "{reply}");
    assert!(reply.contains("yahoo (fallback)"), "{reply}");
}

#[tokio::test]
async fn test_quote_unavailable() {
    let (_dir, _yahoo, state) = setup().await;
    let reply = run(&state, "/quote AMD").await;
    assert!(reply.starts_with("⚠️"), "{reply}");
    assert!(reply.contains("try again later"), "{reply}");
}

#[tokio::test]
async fn test_help_and_unknown() {
    let (_dir, _yahoo, state) = setup().await;
    assert_eq!(run(&state, "/help").await, HELP_TEXT);
    assert_eq!(run(&state, "/whatever").await, HELP_TEXT);
}

#[tokio::test]
async fn test_status_lists_jobs() {
    let (_dir, _yahoo, state) = setup().await;
    let reply = run(&state, "/status").await;
    assert!(reply.contains("Watchlist: 1 symbols"));
    for job in ["price_monitor", "year_high", "buy_dip", "ma_crossover", "earnings", "dividends"] {
        assert!(reply.contains(job), "missing {job}: {reply}");
    }
}

#[tokio::test]
async fn test_market_without_data_is_neutral() {
    let (_dir, _yahoo, state) = setup().await;
    let reply = run(&state, "/market").await;
    assert!(reply.contains("Neutral"), "{reply}");
    assert!(reply.contains("Inputs available: 0/4"), "{reply}");
}
