//! Yahoo Finance adapter (fallback source).
//!
//! # Endpoints
//! - `/v8/finance/chart/{SYMBOL}`: quote metadata plus daily bars
//! - `/v10/finance/quoteSummary/{SYMBOL}?modules=calendarEvents`: next earnings dates
//!
//! Yahoo has no day-change field on the chart endpoint; it is derived from the
//! previous close.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::provider::{encode_symbol, http_client, read_body, MarketDataSource, ProviderError};
use super::{Bar, EarningsEvent, SourceQuote, Symbol};
use tickerbot_common::config::Config;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Option<ChartIndicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
    regular_market_volume: Option<f64>,
    fifty_two_week_high: Option<f64>,
    fifty_two_week_low: Option<f64>,
    long_name: Option<String>,
    short_name: Option<String>,
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryEnvelope {
    quote_summary: SummaryBody,
}

#[derive(Debug, Deserialize)]
struct SummaryBody {
    result: Option<Vec<SummaryResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    calendar_events: Option<CalendarEvents>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvents {
    earnings: Option<EarningsBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarningsBlock {
    #[serde(default)]
    earnings_date: Vec<RawValue>,
    earnings_average: Option<RawValue>,
    revenue_average: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

// ============================================================================
// Yahoo Adapter
// ============================================================================

/// Yahoo Finance public API adapter.
pub struct YahooAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl YahooAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(timeout),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.providers.yahoo.base_url,
            Duration::from_secs(config.providers.request_timeout_secs),
        )
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching from Yahoo");

        let response = self.client.get(&url).query(query).send().await?;
        read_body(response).await
    }

    async fn chart(&self, symbol: &Symbol, range: &str) -> Result<ChartResult, ProviderError> {
        let path = format!("/v8/finance/chart/{}", encode_symbol(symbol));
        let body = self
            .get(&path, &[("range", range), ("interval", "1d")])
            .await?;
        parse_chart(symbol, &body)
    }
}

fn yahoo_error(symbol: &Symbol, err: YahooError) -> ProviderError {
    let description = err.description.unwrap_or_default();
    match err.code.as_deref() {
        Some("Not Found") => ProviderError::NotFound(format!("{}: {}", symbol, description)),
        Some(code) => ProviderError::Api(format!("{}: {}", code, description)),
        None => ProviderError::Api(description),
    }
}

fn parse_chart(symbol: &Symbol, body: &str) -> Result<ChartResult, ProviderError> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if let Some(err) = envelope.chart.error {
        return Err(yahoo_error(symbol, err));
    }

    envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| ProviderError::NotFound(symbol.to_string()))
}

fn quote_from_meta(meta: ChartMeta) -> Result<SourceQuote, ProviderError> {
    let price = meta
        .regular_market_price
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| ProviderError::FieldMissing("regularMarketPrice".into()))?;

    let previous = meta
        .chart_previous_close
        .or(meta.previous_close)
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ProviderError::FieldMissing("previousClose".into()))?;

    let change = price - previous;

    Ok(SourceQuote {
        name: meta.long_name.or(meta.short_name),
        price,
        change,
        change_percent: change / previous * 100.0,
        volume: meta.regular_market_volume.map(|v| v.max(0.0) as u64),
        year_high: meta.fifty_two_week_high,
        year_low: meta.fifty_two_week_low,
        market_cap: meta.market_cap,
    })
}

fn bars_from_chart(result: ChartResult) -> Vec<Bar> {
    let series = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();

    let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

    let mut bars: Vec<Bar> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = at(&series.close, i)?;
            let date = Utc.timestamp_opt(*ts, 0).single()?.date_naive();
            Some(Bar {
                date,
                open: at(&series.open, i).unwrap_or(close),
                high: at(&series.high, i).unwrap_or(close),
                low: at(&series.low, i).unwrap_or(close),
                close,
                volume: at(&series.volume, i).map_or(0, |v| v.max(0.0) as u64),
            })
        })
        .collect();

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}

/// Smallest chart range covering `days` calendar days.
fn range_for_days(days: u32) -> &'static str {
    match days {
        0..=5 => "5d",
        6..=30 => "1mo",
        31..=90 => "3mo",
        91..=180 => "6mo",
        181..=365 => "1y",
        366..=730 => "2y",
        731..=1825 => "5y",
        _ => "10y",
    }
}

fn parse_earnings(
    symbol: &Symbol,
    body: &str,
    from: NaiveDate,
    until: NaiveDate,
) -> Result<Vec<EarningsEvent>, ProviderError> {
    let envelope: SummaryEnvelope =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if let Some(err) = envelope.quote_summary.error {
        return Err(yahoo_error(symbol, err));
    }

    let Some(block) = envelope
        .quote_summary
        .result
        .and_then(|r| r.into_iter().next())
        .and_then(|r| r.calendar_events)
        .and_then(|c| c.earnings)
    else {
        return Ok(Vec::new());
    };

    let eps_estimate = block.earnings_average.and_then(|v| v.raw);
    let revenue_estimate = block.revenue_average.and_then(|v| v.raw);

    let mut events: Vec<EarningsEvent> = block
        .earnings_date
        .iter()
        .filter_map(|d| d.raw)
        .filter_map(|secs| Utc.timestamp_opt(secs as i64, 0).single())
        .map(|ts| ts.date_naive())
        .filter(|date| *date >= from && *date <= until)
        .map(|date| EarningsEvent {
            symbol: symbol.clone(),
            date,
            eps_estimate,
            revenue_estimate,
            time: None,
        })
        .collect();
    events.sort_by_key(|e| e.date);
    events.dedup_by_key(|e| e.date);
    Ok(events)
}

// ============================================================================
// MarketDataSource Implementation
// ============================================================================

#[async_trait]
impl MarketDataSource for YahooAdapter {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<SourceQuote, ProviderError> {
        let result = self.chart(symbol, "1d").await?;
        quote_from_meta(result.meta)
    }

    async fn fetch_history(&self, symbol: &Symbol, days: u32) -> Result<Vec<Bar>, ProviderError> {
        // Trading days are ~70% of calendar days; widen the range to cover `days` bars
        let calendar_days = days.saturating_mul(3) / 2 + 5;
        let result = self.chart(symbol, range_for_days(calendar_days)).await?;

        let mut bars = bars_from_chart(result);
        if bars.is_empty() {
            return Err(ProviderError::NotFound(format!("no history for {}", symbol)));
        }
        let excess = bars.len().saturating_sub(days as usize);
        bars.drain(..excess);
        Ok(bars)
    }

    async fn fetch_earnings(
        &self,
        symbol: &Symbol,
        days_ahead: u32,
    ) -> Result<Vec<EarningsEvent>, ProviderError> {
        let path = format!("/v10/finance/quoteSummary/{}", encode_symbol(symbol));
        let body = self.get(&path, &[("modules", "calendarEvents")]).await?;

        let today = Utc::now().date_naive();
        parse_earnings(
            symbol,
            &body,
            today,
            today + ChronoDuration::days(i64::from(days_ahead)),
        )
    }
}
