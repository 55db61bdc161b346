//! Hybrid data provider with fallback, caching and per-source cooldowns.
//!
//! # Fetch order
//!
//! 1. Fresh cache entry
//! 2. Primary source (after its cooldown)
//! 3. Fallback source (after its own cooldown)
//! 4. Expired cache entry, flagged stale
//!
//! Concurrent requests for the same key are single-flighted, so each source
//! sees at most one call per key per TTL window.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::{CacheStats, DataCache};
use super::provider::{MarketDataSource, ProviderError};
use super::rate_limiter::RateLimiter;
use super::{DividendEvent, EarningsEvent, EventCalendar, PriceHistory, Quote, QuoteSource, Symbol};
use tickerbot_common::config::ProvidersConfig;

// ============================================================================
// Errors
// ============================================================================

/// One source's failure while serving a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: &'static str,
    pub error: ProviderError,
}

/// Errors surfaced by the hybrid provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataError {
    /// Every source failed and nothing was cached
    #[error("data unavailable for {symbol}: {}", describe(.attempts))]
    Unavailable {
        symbol: Symbol,
        attempts: Vec<SourceFailure>,
    },
}

impl DataError {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Unavailable { symbol, .. } => symbol,
        }
    }
}

fn describe(attempts: &[SourceFailure]) -> String {
    if attempts.is_empty() {
        return "no sources configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.source, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<DataError> for tickerbot_common::Error {
    fn from(e: DataError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Hybrid provider settings.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub quote_ttl: Duration,
    pub history_ttl: Duration,
    pub earnings_ttl: Duration,
    pub dividends_ttl: Duration,
    /// Consecutive 403s before the primary source is switched off
    pub forbidden_threshold: u32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            quote_ttl: Duration::from_secs(60),
            history_ttl: Duration::from_secs(300),
            earnings_ttl: Duration::from_secs(6 * 3600),
            dividends_ttl: Duration::from_secs(6 * 3600),
            forbidden_threshold: 10,
        }
    }
}

impl HybridConfig {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            quote_ttl: Duration::from_secs(config.quote_ttl_secs),
            history_ttl: Duration::from_secs(config.history_ttl_secs),
            earnings_ttl: Duration::from_secs(config.earnings_ttl_secs),
            dividends_ttl: Duration::from_secs(config.dividends_ttl_secs),
            forbidden_threshold: config.fmp.forbidden_threshold,
        }
    }
}

// ============================================================================
// Source slots
// ============================================================================

/// A source in its primary or fallback role, with its own cooldown.
struct SourceSlot {
    source: Arc<dyn MarketDataSource>,
    role: QuoteSource,
    limiter: RateLimiter,
    consecutive_forbidden: AtomicU32,
    disabled: AtomicBool,
}

impl SourceSlot {
    fn new(source: Arc<dyn MarketDataSource>, role: QuoteSource, min_delay: Duration) -> Self {
        let limiter = RateLimiter::new(source.name(), min_delay);
        Self {
            source,
            role,
            limiter,
            consecutive_forbidden: AtomicU32::new(0),
            disabled: AtomicBool::new(false),
        }
    }

    fn name(&self) -> &'static str {
        self.source.name()
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    fn record_success(&self) {
        self.consecutive_forbidden.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self, error: &ProviderError, forbidden_threshold: u32) {
        if !error.is_forbidden() {
            self.consecutive_forbidden.store(0, Ordering::Relaxed);
            return;
        }

        let count = self.consecutive_forbidden.fetch_add(1, Ordering::Relaxed) + 1;
        // Only the primary gets switched off; the fallback is the last resort
        if self.role == QuoteSource::Primary
            && forbidden_threshold > 0
            && count >= forbidden_threshold
            && !self.disabled.swap(true, Ordering::Relaxed)
        {
            warn!(
                source = self.name(),
                consecutive_forbidden = count,
                "Primary source disabled after repeated 403 responses"
            );
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    primary: AtomicU64,
    fallback: AtomicU64,
    stale: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of where requests were served from.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub cache_hits: u64,
    pub primary: u64,
    pub fallback: u64,
    pub stale: u64,
    pub failures: u64,
    pub primary_source: Option<&'static str>,
    pub fallback_source: Option<&'static str>,
    pub primary_disabled: bool,
    pub quote_cache: CacheStats,
}

/// Quotes for a batch of symbols, with per-symbol failures kept apart.
#[derive(Debug, Default)]
pub struct BatchQuotes {
    pub quotes: Vec<Quote>,
    pub failures: Vec<DataError>,
}

// ============================================================================
// Hybrid Provider
// ============================================================================

type HistoryKey = (Symbol, u32);
type CalendarCache<T> = DataCache<HistoryKey, Arc<EventCalendar<T>>>;

/// Primary/fallback market data provider.
pub struct HybridProvider {
    primary: Option<SourceSlot>,
    fallback: Option<SourceSlot>,
    config: HybridConfig,
    quotes: DataCache<Symbol, Quote>,
    history: DataCache<HistoryKey, Arc<PriceHistory>>,
    earnings: CalendarCache<EarningsEvent>,
    dividends: CalendarCache<DividendEvent>,
    /// Per-key locks for single-flight fetches; bounded by watchlist size
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    counters: Counters,
}

impl HybridProvider {
    /// Create a provider with no sources; add them with `with_primary` / `with_fallback`.
    pub fn new(config: HybridConfig) -> Self {
        Self {
            primary: None,
            fallback: None,
            config,
            quotes: DataCache::new(),
            history: DataCache::new(),
            earnings: DataCache::new(),
            dividends: DataCache::new(),
            inflight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_primary(mut self, source: Arc<dyn MarketDataSource>, min_delay: Duration) -> Self {
        info!(source = source.name(), delay_ms = min_delay.as_millis() as u64, "Primary source registered");
        self.primary = Some(SourceSlot::new(source, QuoteSource::Primary, min_delay));
        self
    }

    pub fn with_fallback(mut self, source: Arc<dyn MarketDataSource>, min_delay: Duration) -> Self {
        info!(source = source.name(), delay_ms = min_delay.as_millis() as u64, "Fallback source registered");
        self.fallback = Some(SourceSlot::new(source, QuoteSource::Fallback, min_delay));
        self
    }

    // ------------------------------------------------------------------------
    // Quotes
    // ------------------------------------------------------------------------

    /// Fetch a quote for one symbol.
    pub async fn fetch(&self, symbol: &Symbol) -> Result<Quote, DataError> {
        if let Some(entry) = self.quotes.get(symbol) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value.clone());
        }

        let lock = self.flight_lock(format!("quote:{symbol}"));
        let _guard = lock.lock().await;

        // Another caller may have filled the cache while we waited
        if let Some(entry) = self.quotes.get(symbol) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value.clone());
        }

        let result = self
            .fetch_through(symbol, "quote", |source| {
                let symbol = symbol.clone();
                async move { source.fetch_quote(&symbol).await }
            })
            .await;

        match result {
            Ok((fields, role, provider)) => {
                let quote = Quote::from_source(symbol.clone(), fields, role, provider);
                self.quotes
                    .put(symbol.clone(), quote.clone(), self.config.quote_ttl);
                Ok(quote)
            }
            Err(attempts) => match self.quotes.get_stale(symbol) {
                Some(cached) => {
                    self.counters.stale.fetch_add(1, Ordering::Relaxed);
                    warn!(symbol = %symbol, fetched_at = %cached.fetched_at, "Serving stale quote");
                    Ok(cached.into_stale())
                }
                None => Err(self.unavailable(symbol, attempts)),
            },
        }
    }

    /// Fetch quotes for many symbols; one symbol's failure never affects the others.
    pub async fn fetch_many(&self, symbols: &[Symbol]) -> BatchQuotes {
        let mut batch = BatchQuotes::default();
        for symbol in symbols {
            match self.fetch(symbol).await {
                Ok(quote) => batch.quotes.push(quote),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Skipping symbol in batch");
                    batch.failures.push(e);
                }
            }
        }
        batch
    }

    /// Any cached quote (fresh or stale) without touching the network.
    pub fn cached_quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.quotes.get_stale(symbol)
    }

    // ------------------------------------------------------------------------
    // History & calendars
    // ------------------------------------------------------------------------

    /// Fetch `days` daily bars (oldest first).
    pub async fn fetch_history(&self, symbol: &Symbol, days: u32) -> Result<Arc<PriceHistory>, DataError> {
        let key = (symbol.clone(), days);
        if let Some(entry) = self.history.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value.clone());
        }

        let lock = self.flight_lock(format!("history:{symbol}:{days}"));
        let _guard = lock.lock().await;

        if let Some(entry) = self.history.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value.clone());
        }

        let result = self
            .fetch_through(symbol, "history", |source| {
                let symbol = symbol.clone();
                async move { source.fetch_history(&symbol, days).await }
            })
            .await;

        match result {
            Ok((bars, role, provider)) => {
                let history = Arc::new(PriceHistory {
                    symbol: symbol.clone(),
                    bars,
                    source: role,
                    provider: provider.to_string(),
                    fetched_at: chrono::Utc::now(),
                    stale: false,
                });
                self.history
                    .put(key, history.clone(), self.config.history_ttl);
                Ok(history)
            }
            Err(attempts) => match self.history.get_stale(&key) {
                Some(cached) => {
                    self.counters.stale.fetch_add(1, Ordering::Relaxed);
                    warn!(symbol = %symbol, days, "Serving stale history");
                    Ok(Arc::new(PriceHistory {
                        stale: true,
                        ..(*cached).clone()
                    }))
                }
                None => Err(self.unavailable(symbol, attempts)),
            },
        }
    }

    /// Fetch earnings reports due within `days_ahead` days.
    pub async fn fetch_earnings(
        &self,
        symbol: &Symbol,
        days_ahead: u32,
    ) -> Result<Arc<EventCalendar<EarningsEvent>>, DataError> {
        self.fetch_calendar(&self.earnings, "earnings", symbol, days_ahead, self.config.earnings_ttl, |source| {
            let symbol = symbol.clone();
            async move { source.fetch_earnings(&symbol, days_ahead).await }
        })
        .await
    }

    /// Fetch dividends going ex within `days_ahead` days.
    pub async fn fetch_dividends(
        &self,
        symbol: &Symbol,
        days_ahead: u32,
    ) -> Result<Arc<EventCalendar<DividendEvent>>, DataError> {
        self.fetch_calendar(&self.dividends, "dividends", symbol, days_ahead, self.config.dividends_ttl, |source| {
            let symbol = symbol.clone();
            async move { source.fetch_dividends(&symbol, days_ahead).await }
        })
        .await
    }

    /// Cached, single-flighted calendar fetch shared by earnings and dividends.
    async fn fetch_calendar<T, F, Fut>(
        &self,
        cache: &CalendarCache<T>,
        what: &'static str,
        symbol: &Symbol,
        days_ahead: u32,
        ttl: Duration,
        call: F,
    ) -> Result<Arc<EventCalendar<T>>, DataError>
    where
        T: Clone,
        F: Fn(Arc<dyn MarketDataSource>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ProviderError>>,
    {
        let key = (symbol.clone(), days_ahead);
        if let Some(entry) = cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value.clone());
        }

        let lock = self.flight_lock(format!("{what}:{symbol}:{days_ahead}"));
        let _guard = lock.lock().await;

        if let Some(entry) = cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value.clone());
        }

        match self.fetch_through(symbol, what, call).await {
            Ok((events, _, provider)) => {
                let calendar = Arc::new(EventCalendar {
                    symbol: symbol.clone(),
                    events,
                    provider: provider.to_string(),
                    fetched_at: chrono::Utc::now(),
                    stale: false,
                });
                cache.put(key, calendar.clone(), ttl);
                Ok(calendar)
            }
            Err(attempts) => match cache.get_stale(&key) {
                Some(cached) => {
                    self.counters.stale.fetch_add(1, Ordering::Relaxed);
                    warn!(symbol = %symbol, what, fetched_at = %cached.fetched_at, "Serving stale calendar");
                    Ok(Arc::new(EventCalendar {
                        stale: true,
                        ..(*cached).clone()
                    }))
                }
                None => Err(self.unavailable(symbol, attempts)),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Maintenance & introspection
    // ------------------------------------------------------------------------

    /// Drop expired cache entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.quotes.clear_expired()
            + self.history.clear_expired()
            + self.earnings.clear_expired()
            + self.dividends.clear_expired()
    }

    pub fn primary_disabled(&self) -> bool {
        self.primary.as_ref().is_some_and(SourceSlot::is_disabled)
    }

    pub fn stats(&self) -> ProviderStats {
        let c = &self.counters;
        ProviderStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            primary: c.primary.load(Ordering::Relaxed),
            fallback: c.fallback.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            primary_source: self.primary.as_ref().map(SourceSlot::name),
            fallback_source: self.fallback.as_ref().map(SourceSlot::name),
            primary_disabled: self.primary_disabled(),
            quote_cache: self.quotes.stats(),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Try each source in order. On success returns the value with the role and
    /// name of the source that produced it; otherwise every failure.
    async fn fetch_through<T, F, Fut>(
        &self,
        symbol: &Symbol,
        what: &'static str,
        call: F,
    ) -> Result<(T, QuoteSource, &'static str), Vec<SourceFailure>>
    where
        F: Fn(Arc<dyn MarketDataSource>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = Vec::new();

        for slot in [self.primary.as_ref(), self.fallback.as_ref()]
            .into_iter()
            .flatten()
        {
            if slot.is_disabled() {
                attempts.push(SourceFailure {
                    source: slot.name(),
                    error: ProviderError::Disabled,
                });
                continue;
            }

            slot.limiter.acquire().await;

            match call(slot.source.clone()).await {
                Ok(value) => {
                    slot.record_success();
                    let counter = match slot.role {
                        QuoteSource::Primary => &self.counters.primary,
                        QuoteSource::Fallback => &self.counters.fallback,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    debug!(symbol = %symbol, what, source = slot.name(), role = %slot.role, "Fetched");
                    return Ok((value, slot.role, slot.name()));
                }
                Err(error) => {
                    warn!(
                        symbol = %symbol,
                        what,
                        source = slot.name(),
                        role = %slot.role,
                        error = %error,
                        "Source fetch failed"
                    );
                    slot.record_failure(&error, self.config.forbidden_threshold);
                    attempts.push(SourceFailure {
                        source: slot.name(),
                        error,
                    });
                }
            }
        }

        Err(attempts)
    }

    fn unavailable(&self, symbol: &Symbol, attempts: Vec<SourceFailure>) -> DataError {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        DataError::Unavailable {
            symbol: symbol.clone(),
            attempts,
        }
    }

    fn flight_lock(&self, key: String) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = match self.inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(key).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Bar, EarningsEvent, SourceQuote};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Scripted source: pops one response per call, repeats the last one when drained.
    struct Scripted {
        name: &'static str,
        responses: Mutex<VecDeque<Result<SourceQuote, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, responses: Vec<Result<SourceQuote, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataSource for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_quote(&self, _symbol: &Symbol) -> Result<SourceQuote, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            }
        }

        async fn fetch_history(&self, _symbol: &Symbol, days: u32) -> Result<Vec<Bar>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            Ok((0..days)
                .map(|i| Bar {
                    date: start + chrono::Duration::days(i64::from(i)),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: f64::from(i),
                    volume: 0,
                })
                .collect())
        }
    }

    fn quote_fields(price: f64) -> SourceQuote {
        SourceQuote {
            price,
            change: 1.0,
            change_percent: 0.5,
            ..Default::default()
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn provider(primary: Arc<Scripted>, fallback: Arc<Scripted>) -> HybridProvider {
        HybridProvider::new(HybridConfig::default())
            .with_primary(primary, Duration::ZERO)
            .with_fallback(fallback, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_primary_success_is_tagged_primary() {
        let primary = Scripted::new("fmp", vec![Ok(quote_fields(190.0))]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(1.0))]);
        let hybrid = provider(primary.clone(), fallback.clone());

        let quote = hybrid.fetch(&sym("AAPL")).await.unwrap();
        assert_eq!(quote.price, 190.0);
        assert_eq!(quote.source, QuoteSource::Primary);
        assert_eq!(quote.provider, "fmp");
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let primary = Scripted::new("fmp", vec![Ok(quote_fields(190.0))]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(1.0))]);
        let hybrid = provider(primary.clone(), fallback.clone());

        for _ in 0..5 {
            hybrid.fetch(&sym("AAPL")).await.unwrap();
        }
        assert_eq!(primary.calls(), 1);
        assert_eq!(hybrid.stats().cache_hits, 4);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_single_flight() {
        let primary = Scripted::new("fmp", vec![Ok(quote_fields(190.0))]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(1.0))]);
        let hybrid = Arc::new(provider(primary.clone(), fallback));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hybrid = hybrid.clone();
                tokio::spawn(async move { hybrid.fetch(&sym("AAPL")).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_primary_falls_back() {
        let primary = Scripted::new("fmp", vec![Err(ProviderError::RateLimited { retry_after_secs: None })]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(450.0))]);
        let hybrid = provider(primary, fallback);

        let quote = hybrid.fetch(&sym("NVDA")).await.unwrap();
        assert_eq!(quote.price, 450.0);
        assert_eq!(quote.source, QuoteSource::Fallback);
        assert_eq!(quote.provider, "yahoo");
        assert_eq!(hybrid.stats().fallback, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_quote_when_both_fail() {
        let primary = Scripted::new(
            "fmp",
            vec![Ok(quote_fields(190.0)), Err(ProviderError::Timeout)],
        );
        let fallback = Scripted::new("yahoo", vec![Err(ProviderError::Network("down".into()))]);
        let hybrid = provider(primary, fallback);

        let fresh = hybrid.fetch(&sym("AAPL")).await.unwrap();
        assert!(!fresh.stale);

        tokio::time::advance(Duration::from_secs(61)).await;

        let stale = hybrid.fetch(&sym("AAPL")).await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.price, 190.0);
        assert_eq!(stale.source, QuoteSource::Primary);
        assert_eq!(hybrid.stats().stale, 1);
    }

    #[tokio::test]
    async fn test_unavailable_without_cache() {
        let primary = Scripted::new("fmp", vec![Err(ProviderError::FieldMissing("price".into()))]);
        let fallback = Scripted::new("yahoo", vec![Err(ProviderError::NotFound("ZZZZ".into()))]);
        let hybrid = provider(primary, fallback);

        let err = hybrid.fetch(&sym("ZZZZ")).await.unwrap_err();
        let DataError::Unavailable { symbol, attempts } = &err;
        assert_eq!(symbol.as_str(), "ZZZZ");
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].source, "fmp");
        assert!(err.to_string().contains("Missing required field: price"));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let primary = Scripted::new(
            "fmp",
            vec![
                Ok(quote_fields(1.0)),
                Err(ProviderError::NotFound("BAD".into())),
                Ok(quote_fields(3.0)),
            ],
        );
        let fallback = Scripted::new("yahoo", vec![Err(ProviderError::NotFound("BAD".into()))]);
        let hybrid = provider(primary, fallback);

        let batch = hybrid
            .fetch_many(&[sym("AAA"), sym("BAD"), sym("CCC")])
            .await;
        assert_eq!(batch.quotes.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].symbol().as_str(), "BAD");
    }

    #[tokio::test]
    async fn test_primary_disabled_after_repeated_forbidden() {
        let primary = Scripted::new("fmp", vec![Err(ProviderError::Forbidden("plan".into()))]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(10.0))]);
        let config = HybridConfig {
            quote_ttl: Duration::ZERO,
            forbidden_threshold: 3,
            ..Default::default()
        };
        let hybrid = HybridProvider::new(config)
            .with_primary(primary.clone(), Duration::ZERO)
            .with_fallback(fallback, Duration::ZERO);

        for _ in 0..5 {
            hybrid.fetch(&sym("AAPL")).await.unwrap();
        }
        assert_eq!(primary.calls(), 3);
        assert!(hybrid.primary_disabled());
    }

    #[tokio::test]
    async fn test_fallback_only_provider() {
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(10.0))]);
        let hybrid = HybridProvider::new(HybridConfig::default())
            .with_fallback(fallback, Duration::ZERO);

        let quote = hybrid.fetch(&sym("AAPL")).await.unwrap();
        assert_eq!(quote.source, QuoteSource::Fallback);
        assert_eq!(hybrid.stats().primary_source, None);
    }

    #[tokio::test]
    async fn test_history_cached_per_window() {
        let primary = Scripted::new("fmp", vec![Ok(quote_fields(1.0))]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(1.0))]);
        let hybrid = provider(primary.clone(), fallback);

        let history = hybrid.fetch_history(&sym("AAPL"), 30).await.unwrap();
        assert_eq!(history.bars.len(), 30);
        assert_eq!(history.source, QuoteSource::Primary);

        hybrid.fetch_history(&sym("AAPL"), 30).await.unwrap();
        assert_eq!(primary.calls(), 1);

        hybrid.fetch_history(&sym("AAPL"), 60).await.unwrap();
        assert_eq!(primary.calls(), 2);
    }

    /// Serves one earnings calendar, then times out.
    struct FlakyCalendar {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for FlakyCalendar {
        fn name(&self) -> &'static str {
            "fmp"
        }

        async fn fetch_quote(&self, _symbol: &Symbol) -> Result<SourceQuote, ProviderError> {
            Err(ProviderError::Timeout)
        }

        async fn fetch_history(&self, _symbol: &Symbol, _days: u32) -> Result<Vec<Bar>, ProviderError> {
            Err(ProviderError::Timeout)
        }

        async fn fetch_earnings(
            &self,
            symbol: &Symbol,
            _days_ahead: u32,
        ) -> Result<Vec<EarningsEvent>, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(ProviderError::Timeout);
            }
            Ok(vec![EarningsEvent {
                symbol: symbol.clone(),
                date: NaiveDate::from_ymd_opt(2024, 7, 30).unwrap(),
                eps_estimate: Some(2.9),
                revenue_estimate: None,
                time: None,
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_earnings_served_stale() {
        let source = Arc::new(FlakyCalendar {
            calls: AtomicUsize::new(0),
        });
        let hybrid = HybridProvider::new(HybridConfig::default()).with_primary(source.clone(), Duration::ZERO);

        let fresh = hybrid.fetch_earnings(&sym("MSFT"), 14).await.unwrap();
        assert!(!fresh.stale);
        assert_eq!(fresh.provider, "fmp");

        // Within the TTL the cached calendar is reused
        hybrid.fetch_earnings(&sym("MSFT"), 14).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6 * 3600 + 1)).await;

        let stale = hybrid.fetch_earnings(&sym("MSFT"), 14).await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.events, fresh.events);
        assert_eq!(hybrid.stats().stale, 1);
    }

    #[tokio::test]
    async fn test_dividends_default_impl_reports_unavailable() {
        let primary = Scripted::new("fmp", vec![Ok(quote_fields(1.0))]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(1.0))]);
        let hybrid = provider(primary, fallback);

        let err = hybrid.fetch_dividends(&sym("AAPL"), 30).await.unwrap_err();
        assert!(err.to_string().contains("no dividend calendar"));
    }

    #[tokio::test]
    async fn test_earnings_default_impl_reports_unavailable() {
        let primary = Scripted::new("fmp", vec![Ok(quote_fields(1.0))]);
        let fallback = Scripted::new("yahoo", vec![Ok(quote_fields(1.0))]);
        let hybrid = provider(primary, fallback);

        assert!(hybrid.fetch_earnings(&sym("AAPL"), 14).await.is_err());
    }
}
