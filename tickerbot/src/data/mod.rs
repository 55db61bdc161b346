//! Market data module.
//!
//! Fetches quotes, daily history, earnings and dividend dates from two sources with
//! caching, per-source cooldowns and automatic fallback.
//!
//! # Data Sources
//! - **FMP** (Primary): Financial Modeling Prep REST API, requires an API key
//! - **Yahoo** (Fallback): public chart API, no key, looser field coverage

mod cache;
mod fmp;
mod hybrid;
mod provider;
mod rate_limiter;
mod yahoo;

pub use cache::{CacheEntry, CacheStats, DataCache};
pub use fmp::FmpAdapter;
pub use hybrid::{BatchQuotes, DataError, HybridConfig, HybridProvider, ProviderStats, SourceFailure};
pub use provider::{MarketDataSource, ProviderError};
pub use rate_limiter::RateLimiter;
pub use yahoo::YahooAdapter;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Symbol
// ============================================================================

/// Maximum accepted symbol length, including any `^` prefix or `=X` suffix.
const MAX_SYMBOL_LEN: usize = 15;

/// Errors from symbol validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,
    #[error("symbol is longer than {MAX_SYMBOL_LEN} characters")]
    TooLong,
    #[error("symbol contains invalid character '{0}'")]
    InvalidChar(char),
}

impl From<SymbolError> for tickerbot_common::Error {
    fn from(e: SymbolError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

/// A validated ticker: equity (`AAPL`, `BRK.B`), index (`^GSPC`) or FX pair (`USDSGD=X`).
///
/// Always stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trim, uppercase and validate a user-supplied ticker.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }
        if normalized.chars().count() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong);
        }

        let body = normalized.strip_prefix('^').unwrap_or(&normalized);
        let body = body.strip_suffix("=X").unwrap_or(body);
        let mut chars = body.chars();
        match chars.next() {
            None => return Err(SymbolError::Empty),
            Some(c) if !c.is_ascii_alphanumeric() => return Err(SymbolError::InvalidChar(c)),
            Some(_) => {}
        }
        if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-')) {
            return Err(SymbolError::InvalidChar(bad));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// FX pairs carry the `=X` suffix.
    pub fn is_fx(&self) -> bool {
        self.0.ends_with("=X")
    }

    /// Market indices carry the `^` prefix.
    pub fn is_index(&self) -> bool {
        self.0.starts_with('^')
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Quotes
// ============================================================================

/// Which configured source produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    Primary,
    Fallback,
}

impl QuoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized quote fields as returned by one source adapter.
///
/// Adapters know nothing about primary/fallback roles; the hybrid provider
/// stamps those when it turns this into a [`Quote`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceQuote {
    pub name: Option<String>,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: Option<u64>,
    pub year_high: Option<f64>,
    pub year_low: Option<f64>,
    pub market_cap: Option<f64>,
}

/// Point-in-time snapshot for one symbol.
///
/// Every field comes from the single source named in `source`/`provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub name: Option<String>,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: Option<u64>,
    pub year_high: Option<f64>,
    pub year_low: Option<f64>,
    pub market_cap: Option<f64>,
    pub source: QuoteSource,
    /// Adapter name, e.g. "fmp" or "yahoo"
    pub provider: String,
    pub fetched_at: DateTime<Utc>,
    /// Set when served from an expired cache entry after both sources failed
    #[serde(default)]
    pub stale: bool,
}

impl Quote {
    /// Stamp adapter output with the role and name of the source that produced it.
    pub fn from_source(
        symbol: Symbol,
        fields: SourceQuote,
        source: QuoteSource,
        provider: &str,
    ) -> Self {
        Self {
            symbol,
            name: fields.name,
            price: fields.price,
            change: fields.change,
            change_percent: fields.change_percent,
            volume: fields.volume,
            year_high: fields.year_high,
            year_low: fields.year_low,
            market_cap: fields.market_cap,
            source,
            provider: provider.to_string(),
            fetched_at: Utc::now(),
            stale: false,
        }
    }

    /// A copy of this quote flagged as stale.
    pub fn into_stale(self) -> Self {
        Self {
            stale: true,
            ..self
        }
    }

    /// Position of the price inside the 52-week range, if known.
    pub fn year_position(&self) -> Option<f64> {
        crate::metrics::year_position(self.price, self.year_low, self.year_high)
    }

    /// "AAPL (Apple Inc.)" when a company name is known.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() && name != self.symbol.as_str() => {
                format!("{} ({})", self.symbol, name)
            }
            _ => self.symbol.to_string(),
        }
    }
}

// ============================================================================
// History & events
// ============================================================================

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Daily bars for one symbol, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub symbol: Symbol,
    pub bars: Vec<Bar>,
    pub source: QuoteSource,
    pub provider: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,
}

impl PriceHistory {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// A scheduled earnings report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub eps_estimate: Option<f64>,
    pub revenue_estimate: Option<f64>,
    /// "bmo" (before market open) / "amc" (after market close) when known
    pub time: Option<String>,
}

/// A declared dividend. Shareholders of record before `ex_date` receive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendEvent {
    pub symbol: Symbol,
    pub ex_date: NaiveDate,
    /// Cash amount per share
    pub amount: f64,
    pub record_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub declaration_date: Option<NaiveDate>,
}

/// Upcoming calendar events for one symbol, as served by the hybrid provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventCalendar<T> {
    pub symbol: Symbol,
    /// Sorted by date
    pub events: Vec<T>,
    pub provider: String,
    pub fetched_at: DateTime<Utc>,
    /// Set when served from an expired cache entry after both sources failed
    pub stale: bool,
}
