//! tickerbot - Stock and FX alerts over Telegram, with a JSON dashboard.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          tickerbot                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ Alert        │──▶│ Hybrid Data  │──▶│ FMP (primary)        │  │
//! │  │ Scheduler    │   │ Provider     │──▶│ Yahoo (fallback)     │  │
//! │  └──────┬───────┘   └──────┬───────┘   └──────────────────────┘  │
//! │         │                  │ cache                                │
//! │  ┌──────▼───────┐   ┌──────▼───────┐   ┌──────────────────────┐  │
//! │  │ Alert jobs   │   │ Metrics      │   │ Telegram poller      │  │
//! │  │ + dedupe     │   │ (SMA/RSI/..) │   │ Dashboard (axum)     │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is owned by [`AppState`] and shared through `Arc`; there are
//! no globals.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod alerts;
pub mod bot;
pub mod commands;
pub mod data;
pub mod llm;
pub mod metrics;
pub mod notification;
pub mod routes;
pub mod scheduler;
pub mod sentiment;
pub mod watchlist;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tickerbot_common::config::Config;
use tokio::sync::watch;

use crate::alerts::{AlertContext, DedupeStore};
use crate::bot::TelegramPoller;
use crate::data::{FmpAdapter, HybridConfig, HybridProvider, Quote, Symbol, YahooAdapter};
use crate::llm::LlmClient;
use crate::metrics::IndicatorReport;
use crate::notification::{LogNotifier, Notifier, TelegramClient};
use crate::scheduler::{AlertScheduler, JobStatus};
use crate::sentiment::SentimentService;
use crate::watchlist::WatchlistStore;

/// Daily bars fetched for the indicator report; enough for SMA200.
pub const INDICATOR_HISTORY_DAYS: u32 = 260;

/// How often expired cache entries are purged.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// FMP (when keyed) as primary, Yahoo as fallback.
pub fn build_provider(config: &Config) -> HybridProvider {
    let providers = &config.providers;
    let mut provider = HybridProvider::new(HybridConfig::from_config(providers));

    match FmpAdapter::from_config(config) {
        Some(fmp) => {
            provider = provider.with_primary(
                Arc::new(fmp),
                Duration::from_millis(providers.fmp.min_delay_ms),
            );
        }
        None => tracing::warn!("FMP_API_KEY not set, running on the fallback source only"),
    }

    provider.with_fallback(
        Arc::new(YahooAdapter::from_config(config)),
        Duration::from_millis(providers.yahoo.min_delay_ms),
    )
}

// ============================================================================
// Shared state
// ============================================================================

/// Indicators for one symbol plus the quote they were framed with.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolIndicators {
    pub symbol: Symbol,
    pub quote: Option<Quote>,
    pub indicators: IndicatorReport,
    pub history_provider: String,
    pub stale: bool,
}

/// Research answer for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct Research {
    pub symbol: Symbol,
    pub model: String,
    pub summary: String,
    pub data: SymbolIndicators,
}

/// Everything the command handlers, dashboard and alert jobs share.
pub struct AppState {
    pub config: Config,
    pub provider: Arc<HybridProvider>,
    pub watchlist: Arc<WatchlistStore>,
    pub scheduler: Arc<AlertScheduler>,
    pub sentiment: SentimentService,
    pub llm: Option<LlmClient>,
    pub notifier: Arc<dyn Notifier>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire the state from already-built parts and register the enabled alert jobs.
    pub fn assemble(
        config: Config,
        provider: Arc<HybridProvider>,
        watchlist: Arc<WatchlistStore>,
        dedupe: Arc<DedupeStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let alerts = &config.alerts;
        let mut scheduler = AlertScheduler::new(
            Duration::from_secs(alerts.startup_window_secs),
            Duration::from_secs(alerts.shutdown_grace_secs),
        );
        let ctx = Arc::new(AlertContext {
            provider: provider.clone(),
            watchlist: watchlist.clone(),
            notifier: notifier.clone(),
            dedupe,
            thresholds: alerts.clone(),
        });
        alerts::register_jobs(&mut scheduler, ctx);

        Self {
            sentiment: SentimentService::new(provider.clone(), &config.sentiment),
            llm: LlmClient::from_config(&config.llm),
            scheduler: Arc::new(scheduler),
            provider,
            watchlist,
            notifier,
            config,
            started_at: Utc::now(),
        }
    }

    /// Fetch a quote for user-supplied input.
    pub async fn quote(&self, raw: &str) -> tickerbot_common::Result<Quote> {
        let symbol = Symbol::parse(raw)?;
        Ok(self.provider.fetch(&symbol).await?)
    }

    /// Indicator report from daily history; the quote supplies the 52-week range when available.
    pub async fn indicators(&self, symbol: &Symbol) -> tickerbot_common::Result<SymbolIndicators> {
        let history = self
            .provider
            .fetch_history(symbol, INDICATOR_HISTORY_DAYS)
            .await?;
        let quote = match self.provider.fetch(symbol).await {
            Ok(quote) => Some(quote),
            Err(e) => {
                tracing::debug!(symbol = %symbol, error = %e, "Quote unavailable for indicators");
                None
            }
        };

        let (year_low, year_high) = match &quote {
            Some(q) if q.year_low.is_some() && q.year_high.is_some() => (q.year_low, q.year_high),
            _ => history_year_range(&history.bars),
        };

        let closes = history.closes();
        let indicators = IndicatorReport::compute(&closes, year_low, year_high).ok_or_else(|| {
            tickerbot_common::Error::Unavailable(format!("no price history for {symbol}"))
        })?;

        Ok(SymbolIndicators {
            symbol: symbol.clone(),
            quote,
            indicators,
            history_provider: history.provider.clone(),
            stale: history.stale,
        })
    }

    /// Indicators plus an LLM summary.
    pub async fn research(&self, symbol: &Symbol, question: Option<&str>) -> tickerbot_common::Result<Research> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            tickerbot_common::Error::Unavailable("LLM is not configured (set GROQ_API_KEY)".into())
        })?;
        let data = self.indicators(symbol).await?;
        let summary = llm
            .research(data.quote.as_ref(), &data.indicators, question)
            .await?;

        Ok(Research {
            symbol: symbol.clone(),
            model: llm.model().to_string(),
            summary,
            data,
        })
    }

    pub fn job_status(&self) -> Vec<JobStatus> {
        self.scheduler.status()
    }
}

/// 52-week low/high from the trailing year of bars.
fn history_year_range(bars: &[data::Bar]) -> (Option<f64>, Option<f64>) {
    let year = &bars[bars.len().saturating_sub(metrics::TRADING_DAYS as usize)..];
    let low = year.iter().map(|b| b.low).filter(|v| v.is_finite()).reduce(f64::min);
    let high = year.iter().map(|b| b.high).filter(|v| v.is_finite()).reduce(f64::max);
    (low, high)
}

// ============================================================================
// Service
// ============================================================================

/// The running bot: scheduler, Telegram poller and dashboard.
pub struct TickerBot {
    state: Arc<AppState>,
    telegram: Option<Arc<TelegramClient>>,
}

impl TickerBot {
    /// Build every component from config.
    pub fn new(config: Config) -> Result<Self> {
        let provider = Arc::new(build_provider(&config));

        let defaults: Vec<Symbol> = config
            .watchlist
            .defaults
            .iter()
            .filter_map(|s| Symbol::parse(s).ok())
            .collect();
        let watchlist = Arc::new(
            WatchlistStore::load(config.watchlist_path(), &defaults)
                .context("Failed to load watchlist")?,
        );
        let dedupe = Arc::new(DedupeStore::load(&config.state_dir()));

        let telegram = TelegramClient::from_config(&config.telegram).map(Arc::new);
        let notifier: Arc<dyn Notifier> = match &telegram {
            Some(client) => client.clone(),
            None => {
                tracing::warn!("Telegram not configured, alerts will only be logged");
                Arc::new(LogNotifier)
            }
        };

        let state = Arc::new(AppState::assemble(config, provider, watchlist, dedupe, notifier));
        Ok(Self { state, telegram })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Run every alert job once and return their status.
    pub async fn run_once(&self) -> Vec<JobStatus> {
        self.state.scheduler.run_all_once().await
    }

    /// Run until `shutdown` resolves, then stop every component.
    pub async fn start(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = self.state;

        let scheduler = {
            let scheduler = state.scheduler.clone();
            let rx = stop_rx.clone();
            tokio::spawn(async move { scheduler.run(rx).await })
        };

        let poller = self.telegram.map(|client| {
            let poller = TelegramPoller::new(client, state.clone());
            let rx = stop_rx.clone();
            tokio::spawn(async move { poller.run(rx).await })
        });

        let purger = {
            let provider = state.provider.clone();
            let mut rx = stop_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = rx.changed() => break,
                        _ = ticker.tick() => {
                            let removed = provider.purge_expired();
                            if removed > 0 {
                                tracing::debug!(removed, "Purged expired cache entries");
                            }
                        }
                    }
                }
            })
        };

        let server = if state.config.dashboard.enabled {
            let dashboard = &state.config.dashboard;
            let addr: SocketAddr = format!("{}:{}", dashboard.host, dashboard.port)
                .parse()
                .with_context(|| format!("Invalid dashboard address {}:{}", dashboard.host, dashboard.port))?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind dashboard on {addr}"))?;
            tracing::info!(address = %addr, "Starting dashboard");

            let app = routes::router(state.clone());
            let mut rx = stop_rx.clone();
            Some(tokio::spawn(async move {
                let stopped = async move {
                    let _ = rx.changed().await;
                };
                if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stopped).await {
                    tracing::error!(error = %e, "Dashboard server failed");
                }
            }))
        } else {
            None
        };

        shutdown.await;
        tracing::info!("Shutdown requested");
        let _ = stop_tx.send(true);

        if let Err(e) = scheduler.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }
        for handle in [poller, Some(purger), server].into_iter().flatten() {
            let _ = handle.await;
        }

        tracing::info!("tickerbot stopped");
        Ok(())
    }
}
