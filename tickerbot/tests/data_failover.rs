//! Integration tests for primary/fallback failover over HTTP.
//!
//! FMP and Yahoo are both served by wiremock so the adapters' real request
//! and parsing paths are exercised.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tickerbot::data::{
    FmpAdapter, HybridConfig, HybridProvider, QuoteSource, Symbol, YahooAdapter,
};

// ============================================================================
// Fixtures
// ============================================================================

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

fn fmp_quote(symbol: &str, price: f64) -> serde_json::Value {
    json!([{
        "symbol": symbol,
        "name": "NVIDIA Corporation",
        "price": price,
        "change": 5.0,
        "changesPercentage": 1.2,
        "volume": 1000000,
        "yearHigh": 500.0,
        "yearLow": 300.0
    }])
}

fn yahoo_chart(price: f64, previous: f64) -> serde_json::Value {
    json!({
        "chart": {
            "result": [{
                "meta": {
                    "regularMarketPrice": price,
                    "chartPreviousClose": previous,
                    "regularMarketVolume": 2000000,
                    "fiftyTwoWeekHigh": 480.0,
                    "fiftyTwoWeekLow": 280.0,
                    "longName": "NVIDIA Corporation"
                },
                "timestamp": [],
                "indicators": { "quote": [{}] }
            }],
            "error": null
        }
    })
}

fn provider(fmp: &MockServer, yahoo: &MockServer, config: HybridConfig) -> HybridProvider {
    let timeout = Duration::from_secs(5);
    HybridProvider::new(config)
        .with_primary(
            Arc::new(FmpAdapter::new("test-key", fmp.uri(), timeout)),
            Duration::ZERO,
        )
        .with_fallback(
            Arc::new(YahooAdapter::new(yahoo.uri(), timeout)),
            Duration::ZERO,
        )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_rate_limited_primary_uses_fallback_fields() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/quote/NVDA"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(&fmp)
        .await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/NVDA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(yahoo_chart(450.0, 440.0)))
        .expect(1)
        .mount(&yahoo)
        .await;

    let provider = provider(&fmp, &yahoo, HybridConfig::default());
    let quote = provider.fetch(&sym("NVDA")).await.unwrap();

    assert_eq!(quote.price, 450.0);
    assert_eq!(quote.source, QuoteSource::Fallback);
    assert_eq!(quote.provider, "yahoo");
    assert!(!quote.stale);
    // Every field comes from the fallback response
    assert_eq!(quote.year_high, Some(480.0));
    assert_eq!(quote.change, 10.0);
    assert_eq!(quote.volume, Some(2_000_000));
}

#[tokio::test]
async fn test_fresh_cache_makes_one_request() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/quote/NVDA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fmp_quote("NVDA", 455.0)))
        .expect(1)
        .mount(&fmp)
        .await;

    let provider = provider(&fmp, &yahoo, HybridConfig::default());
    let first = provider.fetch(&sym("nvda")).await.unwrap();
    let second = provider.fetch(&sym("NVDA")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.source, QuoteSource::Primary);
    assert_eq!(first.provider, "fmp");
    assert_eq!(provider.stats().cache_hits, 1);
}

#[tokio::test]
async fn test_stale_quote_when_both_sources_fail() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/quote/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fmp_quote("AAPL", 190.0)))
        .up_to_n_times(1)
        .mount(&fmp)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/quote/AAPL"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&fmp)
        .await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&yahoo)
        .await;

    let config = HybridConfig {
        quote_ttl: Duration::ZERO,
        ..HybridConfig::default()
    };
    let provider = provider(&fmp, &yahoo, config);

    let fresh = provider.fetch(&sym("AAPL")).await.unwrap();
    assert!(!fresh.stale);

    let stale = provider.fetch(&sym("AAPL")).await.unwrap();
    assert!(stale.stale);
    assert_eq!(stale.price, 190.0);
    assert_eq!(stale.source, QuoteSource::Primary);
    assert_eq!(provider.stats().stale, 1);
}

#[tokio::test]
async fn test_unavailable_when_nothing_cached() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fmp)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&yahoo)
        .await;

    let provider = provider(&fmp, &yahoo, HybridConfig::default());
    let err = provider.fetch(&sym("MSFT")).await.unwrap_err();

    assert_eq!(err.symbol(), &sym("MSFT"));
    let status = tickerbot_common::Error::from(err).status_code();
    assert_eq!(status, 503);
    assert_eq!(provider.stats().failures, 1);
}

#[tokio::test]
async fn test_batch_keeps_going_after_one_failure() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/quote/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fmp_quote("AAPL", 190.0)))
        .mount(&fmp)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/quote/ZZZZ"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&fmp)
        .await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/ZZZZ"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&yahoo)
        .await;

    let provider = provider(&fmp, &yahoo, HybridConfig::default());
    let batch = provider.fetch_many(&[sym("ZZZZ"), sym("AAPL")]).await;

    assert_eq!(batch.quotes.len(), 1);
    assert_eq!(batch.quotes[0].symbol, sym("AAPL"));
    assert_eq!(batch.failures.len(), 1);
}

// ============================================================================
// Market-wide calendars
// ============================================================================

fn in_days(days: i64) -> String {
    (chrono::Utc::now().date_naive() + chrono::Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

#[tokio::test]
async fn test_earnings_calendar_downloaded_once_for_all_symbols() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/earning_calendar"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"symbol": "AAPL", "date": in_days(3), "epsEstimated": 1.35, "time": "amc"},
            {"symbol": "MSFT", "date": in_days(8), "epsEstimated": 2.93, "time": "amc"},
            {"symbol": "ORCL", "date": in_days(1), "epsEstimated": 1.1, "time": "bmo"}
        ])))
        .expect(1)
        .mount(&fmp)
        .await;

    let provider = provider(&fmp, &yahoo, HybridConfig::default());
    let apple = provider.fetch_earnings(&sym("AAPL"), 14).await.unwrap();
    let microsoft = provider.fetch_earnings(&sym("MSFT"), 14).await.unwrap();
    let nvidia = provider.fetch_earnings(&sym("NVDA"), 14).await.unwrap();

    assert_eq!(apple.events.len(), 1);
    assert_eq!(apple.events[0].time.as_deref(), Some("amc"));
    assert_eq!(apple.provider, "fmp");
    assert_eq!(microsoft.events.len(), 1);
    assert!(nvidia.events.is_empty());
    assert!(!nvidia.stale);
}

#[tokio::test]
async fn test_dividend_calendar_from_primary() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/stock_dividend_calendar"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"symbol": "AAPL", "date": in_days(5), "dividend": 0.25, "adjDividend": 0.25,
             "recordDate": in_days(5), "paymentDate": in_days(9), "declarationDate": ""},
            {"symbol": "KO", "date": in_days(12), "dividend": 0.485, "paymentDate": ""}
        ])))
        .expect(1)
        .mount(&fmp)
        .await;

    let provider = provider(&fmp, &yahoo, HybridConfig::default());
    let apple = provider.fetch_dividends(&sym("AAPL"), 30).await.unwrap();
    let coke = provider.fetch_dividends(&sym("KO"), 30).await.unwrap();

    assert_eq!(apple.events.len(), 1);
    assert_eq!(apple.events[0].amount, 0.25);
    assert!(apple.events[0].payment_date.is_some());
    assert_eq!(apple.events[0].declaration_date, None);
    assert_eq!(coke.events[0].amount, 0.485);
    assert_eq!(coke.events[0].payment_date, None);
}

#[tokio::test]
async fn test_dividends_unavailable_when_primary_fails() {
    let fmp = MockServer::start().await;
    let yahoo = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/stock_dividend_calendar"))
        .respond_with(ResponseTemplate::new(403).set_body_string("plan does not cover endpoint"))
        .mount(&fmp)
        .await;

    let provider = provider(&fmp, &yahoo, HybridConfig::default());
    let err = provider.fetch_dividends(&sym("AAPL"), 30).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Forbidden"), "{message}");
    assert!(message.contains("no dividend calendar"), "{message}");
}
