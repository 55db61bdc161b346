//! Financial Modeling Prep adapter (primary source).
//!
//! # Endpoints
//! - `/api/v3/quote/{SYMBOL}`: real-time quote
//! - `/api/v3/historical-price-full/{SYMBOL}?timeseries=N`: daily bars, newest first
//! - `/api/v3/earning_calendar?from=&to=`: earnings calendar for all symbols
//! - `/api/v3/stock_dividend_calendar?from=&to=`: dividend calendar for all symbols
//!
//! The two calendars cover the whole market, so each is downloaded once per
//! date window and filtered per symbol from the adapter's own copy.
//!
//! FMP reports some failures as HTTP 200 with an `{"Error Message": ...}` body;
//! those map to [`ProviderError::Api`].

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::provider::{encode_symbol, http_client, read_body, MarketDataSource, ProviderError};
use super::{Bar, DividendEvent, EarningsEvent, SourceQuote, Symbol};

/// How long a downloaded calendar is reused for the same window.
const CALENDAR_MAX_AGE: Duration = Duration::from_secs(3600);

const EARNINGS_CALENDAR: &str = "/api/v3/earning_calendar";
const DIVIDEND_CALENDAR: &str = "/api/v3/stock_dividend_calendar";
use tickerbot_common::config::Config;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpQuote {
    symbol: Option<String>,
    name: Option<String>,
    price: Option<f64>,
    change: Option<f64>,
    changes_percentage: Option<f64>,
    previous_close: Option<f64>,
    volume: Option<f64>,
    market_cap: Option<f64>,
    year_high: Option<f64>,
    year_low: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FmpHistory {
    #[serde(default)]
    historical: Vec<FmpBar>,
}

#[derive(Debug, Deserialize)]
struct FmpBar {
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpEarning {
    symbol: String,
    date: String,
    eps_estimated: Option<f64>,
    revenue_estimated: Option<f64>,
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpDividend {
    symbol: String,
    /// Ex-dividend date
    date: String,
    dividend: Option<f64>,
    adj_dividend: Option<f64>,
    record_date: Option<String>,
    payment_date: Option<String>,
    declaration_date: Option<String>,
}

// ============================================================================
// Calendar Cache
// ============================================================================

type Window = (NaiveDate, NaiveDate);

struct CachedCalendar<T> {
    window: Window,
    fetched: Instant,
    rows: Arc<Vec<T>>,
}

/// Last downloaded copy of one market-wide calendar.
///
/// The async lock is held across the download so concurrent callers for the
/// same window wait for one request instead of issuing their own.
struct CalendarCache<T> {
    slot: tokio::sync::Mutex<Option<CachedCalendar<T>>>,
}

impl<T> CalendarCache<T> {
    fn new() -> Self {
        Self {
            slot: tokio::sync::Mutex::new(None),
        }
    }
}

fn window(days_ahead: u32) -> Window {
    let today = Utc::now().date_naive();
    (today, today + ChronoDuration::days(i64::from(days_ahead)))
}

// ============================================================================
// FMP Adapter
// ============================================================================

/// Financial Modeling Prep REST adapter.
pub struct FmpAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    earnings: CalendarCache<FmpEarning>,
    dividends: CalendarCache<FmpDividend>,
}

impl FmpAdapter {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(timeout),
            earnings: CalendarCache::new(),
            dividends: CalendarCache::new(),
        }
    }

    /// Create from config; `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config
            .providers
            .fmp
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())?;

        Some(Self::new(
            api_key,
            &config.providers.fmp.base_url,
            Duration::from_secs(config.providers.request_timeout_secs),
        ))
    }

    /// GET a path and return the body, rejecting FMP's in-band error payloads.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching from FMP");

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;
        let body = read_body(response).await?;

        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(msg) = map.get("Error Message").and_then(|v| v.as_str()) {
                let lowered = msg.to_lowercase();
                if lowered.contains("limit reach") {
                    return Err(ProviderError::RateLimited { retry_after_secs: None });
                }
                return Err(ProviderError::Api(msg.to_string()));
            }
        }

        Ok(body)
    }

    /// Rows of a market-wide calendar for `window`, downloading at most once per window.
    async fn calendar<T: DeserializeOwned>(
        &self,
        cache: &CalendarCache<T>,
        path: &str,
        window: Window,
    ) -> Result<Arc<Vec<T>>, ProviderError> {
        let mut slot = cache.slot.lock().await;
        if let Some(cached) = slot
            .as_ref()
            .filter(|c| c.window == window && c.fetched.elapsed() < CALENDAR_MAX_AGE)
        {
            debug!(path, rows = cached.rows.len(), "Reusing FMP calendar");
            return Ok(cached.rows.clone());
        }

        let (from, to) = window;
        let body = self
            .get(
                path,
                &[
                    ("from", from.format("%Y-%m-%d").to_string()),
                    ("to", to.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;
        let rows = Arc::new(parse_calendar::<T>(&body)?);
        debug!(path, rows = rows.len(), "FMP calendar downloaded");

        *slot = Some(CachedCalendar {
            window,
            fetched: Instant::now(),
            rows: rows.clone(),
        });
        Ok(rows)
    }
}

fn parse_quote(symbol: &Symbol, body: &str) -> Result<SourceQuote, ProviderError> {
    let quotes: Vec<FmpQuote> =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let quote = quotes
        .into_iter()
        .find(|q| {
            q.symbol
                .as_deref()
                .map_or(true, |s| s.eq_ignore_ascii_case(symbol.as_str()))
        })
        .ok_or_else(|| ProviderError::NotFound(symbol.to_string()))?;

    let price = quote
        .price
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| ProviderError::FieldMissing("price".into()))?;

    let change = quote
        .change
        .or_else(|| quote.previous_close.map(|prev| price - prev))
        .ok_or_else(|| ProviderError::FieldMissing("change".into()))?;

    let change_percent = quote
        .changes_percentage
        .or_else(|| {
            let prev = price - change;
            (prev != 0.0).then(|| change / prev * 100.0)
        })
        .unwrap_or(0.0);

    Ok(SourceQuote {
        name: quote.name,
        price,
        change,
        change_percent,
        volume: quote.volume.map(|v| v.max(0.0) as u64),
        year_high: quote.year_high,
        year_low: quote.year_low,
        market_cap: quote.market_cap,
    })
}

fn parse_history(symbol: &Symbol, body: &str, days: u32) -> Result<Vec<Bar>, ProviderError> {
    let history: FmpHistory =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if history.historical.is_empty() {
        return Err(ProviderError::NotFound(format!("no history for {}", symbol)));
    }

    let mut bars: Vec<Bar> = history
        .historical
        .into_iter()
        .filter_map(|b| {
            let date = NaiveDate::parse_from_str(&b.date, "%Y-%m-%d").ok()?;
            let close = b.close?;
            Some(Bar {
                date,
                open: b.open.unwrap_or(close),
                high: b.high.unwrap_or(close),
                low: b.low.unwrap_or(close),
                close,
                volume: b.volume.map_or(0, |v| v.max(0.0) as u64),
            })
        })
        .collect();

    // FMP returns newest first
    bars.sort_by_key(|b| b.date);
    let excess = bars.len().saturating_sub(days as usize);
    bars.drain(..excess);
    Ok(bars)
}

fn parse_calendar<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw?, "%Y-%m-%d").ok()
}

fn earnings_for(symbol: &Symbol, calendar: &[FmpEarning]) -> Vec<EarningsEvent> {
    let mut events: Vec<EarningsEvent> = calendar
        .iter()
        .filter(|e| e.symbol.eq_ignore_ascii_case(symbol.as_str()))
        .filter_map(|e| {
            Some(EarningsEvent {
                symbol: symbol.clone(),
                date: parse_date(Some(&e.date))?,
                eps_estimate: e.eps_estimated,
                revenue_estimate: e.revenue_estimated,
                time: e.time.clone().filter(|t| !t.is_empty() && t != "--"),
            })
        })
        .collect();
    events.sort_by_key(|e| e.date);
    events
}

fn dividends_for(symbol: &Symbol, calendar: &[FmpDividend]) -> Vec<DividendEvent> {
    let mut events: Vec<DividendEvent> = calendar
        .iter()
        .filter(|d| d.symbol.eq_ignore_ascii_case(symbol.as_str()))
        .filter_map(|d| {
            Some(DividendEvent {
                symbol: symbol.clone(),
                ex_date: parse_date(Some(&d.date))?,
                amount: d.dividend.or(d.adj_dividend).filter(|a| *a > 0.0)?,
                record_date: parse_date(d.record_date.as_deref()),
                payment_date: parse_date(d.payment_date.as_deref()),
                declaration_date: parse_date(d.declaration_date.as_deref()),
            })
        })
        .collect();
    events.sort_by_key(|d| d.ex_date);
    events
}

// ============================================================================
// MarketDataSource Implementation
// ============================================================================

#[async_trait]
impl MarketDataSource for FmpAdapter {
    fn name(&self) -> &'static str {
        "fmp"
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<SourceQuote, ProviderError> {
        let path = format!("/api/v3/quote/{}", encode_symbol(symbol));
        let body = self.get(&path, &[]).await?;
        parse_quote(symbol, &body)
    }

    async fn fetch_history(&self, symbol: &Symbol, days: u32) -> Result<Vec<Bar>, ProviderError> {
        let path = format!("/api/v3/historical-price-full/{}", encode_symbol(symbol));
        let body = self
            .get(&path, &[("timeseries", days.to_string())])
            .await?;
        parse_history(symbol, &body, days)
    }

    async fn fetch_earnings(
        &self,
        symbol: &Symbol,
        days_ahead: u32,
    ) -> Result<Vec<EarningsEvent>, ProviderError> {
        let calendar = self
            .calendar(&self.earnings, EARNINGS_CALENDAR, window(days_ahead))
            .await?;
        Ok(earnings_for(symbol, &calendar))
    }

    async fn fetch_dividends(
        &self,
        symbol: &Symbol,
        days_ahead: u32,
    ) -> Result<Vec<DividendEvent>, ProviderError> {
        let calendar = self
            .calendar(&self.dividends, DIVIDEND_CALENDAR, window(days_ahead))
            .await?;
        Ok(dividends_for(symbol, &calendar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn test_parse_quote() {
        let body = r#"[{
            "symbol": "AAPL", "name": "Apple Inc.", "price": 190.5,
            "changesPercentage": 1.25, "change": 2.35, "volume": 51234567,
            "marketCap": 2950000000000, "yearHigh": 199.62, "yearLow": 164.08
        }]"#;
        let quote = parse_quote(&sym("AAPL"), body).unwrap();
        assert_eq!(quote.price, 190.5);
        assert_eq!(quote.change, 2.35);
        assert_eq!(quote.change_percent, 1.25);
        assert_eq!(quote.volume, Some(51_234_567));
        assert_eq!(quote.year_high, Some(199.62));
        assert_eq!(quote.name.as_deref(), Some("Apple Inc."));
    }

    #[test]
    fn test_parse_quote_missing_price() {
        let body = r#"[{"symbol": "AAPL", "change": 1.0}]"#;
        assert_eq!(
            parse_quote(&sym("AAPL"), body).unwrap_err(),
            ProviderError::FieldMissing("price".into())
        );
    }

    #[test]
    fn test_parse_quote_derives_change_from_previous_close() {
        let body = r#"[{"symbol": "MSFT", "price": 410.0, "previousClose": 400.0}]"#;
        let quote = parse_quote(&sym("MSFT"), body).unwrap();
        assert_eq!(quote.change, 10.0);
        assert!((quote.change_percent - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_quote_empty_array_is_not_found() {
        assert!(matches!(
            parse_quote(&sym("ZZZZ"), "[]"),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_history_sorts_and_trims() {
        let body = r#"{"symbol": "AAPL", "historical": [
            {"date": "2024-01-04", "open": 3, "high": 3, "low": 3, "close": 3, "volume": 30},
            {"date": "2024-01-03", "open": 2, "high": 2, "low": 2, "close": 2, "volume": 20},
            {"date": "2024-01-02", "open": 1, "high": 1, "low": 1, "close": 1, "volume": 10}
        ]}"#;
        let bars = parse_history(&sym("AAPL"), body, 2).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 2.0);
        assert_eq!(bars[1].close, 3.0);
        assert!(bars[0].date < bars[1].date);
    }

    #[test]
    fn test_parse_history_empty_object() {
        assert!(matches!(
            parse_history(&sym("AAPL"), "{}", 10),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_earnings_filters_symbol() {
        let body = r#"[
            {"symbol": "AAPL", "date": "2024-05-02", "epsEstimated": 1.5, "time": "amc", "revenueEstimated": 90000000000},
            {"symbol": "MSFT", "date": "2024-04-25", "epsEstimated": 2.8, "time": "amc"},
            {"symbol": "AAPL", "date": "bad-date"}
        ]"#;
        let calendar: Vec<FmpEarning> = parse_calendar(body).unwrap();
        let events = earnings_for(&sym("AAPL"), &calendar);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(events[0].time.as_deref(), Some("amc"));

        assert_eq!(earnings_for(&sym("MSFT"), &calendar).len(), 1);
        assert!(earnings_for(&sym("NVDA"), &calendar).is_empty());
    }

    #[test]
    fn test_parse_dividends() {
        let body = r#"[
            {"symbol": "AAPL", "date": "2024-08-12", "label": "August 12, 24", "adjDividend": 0.25,
             "dividend": 0.25, "recordDate": "2024-08-12", "paymentDate": "2024-08-15",
             "declarationDate": "2024-08-01"},
            {"symbol": "KO", "date": "2024-09-13", "dividend": 0.485, "recordDate": "", "paymentDate": ""},
            {"symbol": "AAPL", "date": "2024-05-10", "adjDividend": 0.24, "paymentDate": ""},
            {"symbol": "AAPL", "date": "2024-06-01", "dividend": 0.0}
        ]"#;
        let calendar: Vec<FmpDividend> = parse_calendar(body).unwrap();

        let apple = dividends_for(&sym("aapl"), &calendar);
        assert_eq!(apple.len(), 2);
        assert_eq!(apple[0].ex_date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert_eq!(apple[0].amount, 0.24);
        assert_eq!(apple[0].payment_date, None);
        assert_eq!(apple[1].payment_date, NaiveDate::from_ymd_opt(2024, 8, 15));
        assert_eq!(apple[1].declaration_date, NaiveDate::from_ymd_opt(2024, 8, 1));

        let coke = dividends_for(&sym("KO"), &calendar);
        assert_eq!(coke[0].amount, 0.485);
        assert_eq!(coke[0].record_date, None);
    }

    #[test]
    fn test_calendar_window_spans_days_ahead() {
        let (from, to) = window(30);
        assert_eq!((to - from).num_days(), 30);
    }
}
