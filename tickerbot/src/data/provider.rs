//! Data source abstraction for market data.
//!
//! Defines the `MarketDataSource` trait each upstream API implements, so the
//! hybrid provider never touches source-specific field names.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use super::{Bar, DividendEvent, EarningsEvent, SourceQuote, Symbol};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to a single data source call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Network error (connection failed, reset)
    Network(String),
    /// Request exceeded the client timeout
    Timeout,
    /// HTTP 429 or an equivalent quota response
    RateLimited { retry_after_secs: Option<u64> },
    /// HTTP 401, bad or missing key
    Auth(String),
    /// HTTP 403, plan does not cover the endpoint
    Forbidden(String),
    /// The source has no data for this symbol
    NotFound(String),
    /// Response parsed but a required field was absent or unusable
    FieldMissing(String),
    /// Other non-success HTTP status
    Http { status: u16, body: String },
    /// Error payload inside a 200 response
    Api(String),
    /// Body could not be decoded
    Parse(String),
    /// Source switched off after repeated 403s
    Disabled,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Timeout => write!(f, "Request timed out"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Self::NotFound(msg) => write!(f, "Data not available: {}", msg),
            Self::FieldMissing(field) => write!(f, "Missing required field: {}", field),
            Self::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            Self::Api(msg) => write!(f, "API error: {}", msg),
            Self::Parse(msg) => write!(f, "Failed to parse response: {}", msg),
            Self::Disabled => write!(f, "Source disabled"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    /// Check if the error is transient (worth trying again later)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::RateLimited { .. }
        ) || matches!(self, Self::Http { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Network("Connection failed".into())
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

// ============================================================================
// HTTP helpers shared by adapters
// ============================================================================

/// Browser-like agent; Yahoo rejects requests without one.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Build the HTTP client used by source adapters.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map non-success statuses to provider errors and return the body text.
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    let body = response.text().await?;

    match status {
        s if s.is_success() => Ok(body),
        reqwest::StatusCode::UNAUTHORIZED => Err(ProviderError::Auth(snippet(&body))),
        reqwest::StatusCode::FORBIDDEN => Err(ProviderError::Forbidden(snippet(&body))),
        reqwest::StatusCode::NOT_FOUND => Err(ProviderError::NotFound(snippet(&body))),
        s => Err(ProviderError::Http {
            status: s.as_u16(),
            body: snippet(&body),
        }),
    }
}

fn snippet(body: &str) -> String {
    tickerbot_common::util::truncate_with_ellipsis(body.trim(), 200)
}

/// Percent-encode the characters tickers use that are not path-safe.
pub(crate) fn encode_symbol(symbol: &Symbol) -> String {
    symbol
        .as_str()
        .replace('^', "%5E")
        .replace('=', "%3D")
}

// ============================================================================
// Market Data Source Trait
// ============================================================================

/// One upstream market-data API.
///
/// Implementations normalize their own response shapes into the common
/// types and report every failure as a [`ProviderError`].
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Short adapter name (e.g., "fmp", "yahoo")
    fn name(&self) -> &'static str;

    /// Fetch a current quote.
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<SourceQuote, ProviderError>;

    /// Fetch up to `days` daily bars, oldest first.
    async fn fetch_history(&self, symbol: &Symbol, days: u32) -> Result<Vec<Bar>, ProviderError>;

    /// Fetch earnings reports scheduled within the next `days_ahead` days.
    async fn fetch_earnings(
        &self,
        symbol: &Symbol,
        days_ahead: u32,
    ) -> Result<Vec<EarningsEvent>, ProviderError> {
        let _ = days_ahead;
        Err(ProviderError::NotFound(format!(
            "{} has no earnings calendar for {}",
            self.name(),
            symbol
        )))
    }

    /// Fetch dividends going ex within the next `days_ahead` days.
    async fn fetch_dividends(
        &self,
        symbol: &Symbol,
        days_ahead: u32,
    ) -> Result<Vec<DividendEvent>, ProviderError> {
        let _ = days_ahead;
        Err(ProviderError::NotFound(format!(
            "{} has no dividend calendar for {}",
            self.name(),
            symbol
        )))
    }
}
