//! Alert jobs.
//!
//! Every job follows the same shape: read the watchlist, fetch through the
//! hybrid provider, evaluate each symbol against its thresholds and the last
//! dedupe record, then deliver. The dedupe record is only updated after a
//! successful delivery, so a failed send is retried on the next tick.
//!
//! Evaluation is kept in pure `evaluate` functions per job; the
//! [`AlertCheck`](crate::scheduler::AlertCheck) impls only do I/O.

mod crossover;
mod dedupe;
mod dip;
mod dividends;
mod earnings;
mod price;
mod year_high;

pub use crossover::MaCrossoverJob;
pub use dedupe::{DedupeRecord, DedupeStore};
pub use dip::BuyDipJob;
pub use dividends::DividendJob;
pub use earnings::EarningsJob;
pub use price::PriceMonitorJob;
pub use year_high::YearHighJob;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tickerbot_common::config::{AlertJobConfig, AlertsConfig};
use tracing::{info, warn};

use crate::data::{HybridProvider, Quote, Symbol};
use crate::notification::Notifier;
use crate::scheduler::{AlertCheck, AlertScheduler, CheckReport};
use crate::watchlist::WatchlistStore;

/// Alert categories; also the prefix of dedupe keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PriceMove,
    YearHigh,
    BuyDip,
    MaCrossover,
    Earnings,
    Dividend,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceMove => "price_move",
            Self::YearHigh => "year_high",
            Self::BuyDip => "buy_dip",
            Self::MaCrossover => "ma_crossover",
            Self::Earnings => "earnings",
            Self::Dividend => "dividend",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification ready for delivery, with the dedupe state it establishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub symbol: Symbol,
    /// Dedupe condition key; an unchanged condition is not re-sent
    pub condition: String,
    /// Numeric level some dedupe rules compare against
    pub level: Option<f64>,
    pub text: String,
}

/// Shared dependencies of every alert job.
pub struct AlertContext {
    pub provider: Arc<HybridProvider>,
    pub watchlist: Arc<WatchlistStore>,
    pub notifier: Arc<dyn Notifier>,
    pub dedupe: Arc<DedupeStore>,
    pub thresholds: AlertsConfig,
}

impl AlertContext {
    /// Send the alert and record it for dedupe. Returns whether it was delivered.
    pub async fn deliver(&self, alert: Alert) -> bool {
        if !self.notifier.send(&alert.text).await {
            warn!(kind = %alert.kind, symbol = %alert.symbol, "Alert delivery failed, will retry next tick");
            return false;
        }

        info!(kind = %alert.kind, symbol = %alert.symbol, condition = %alert.condition, "Alert sent");
        if let Err(e) = self
            .dedupe
            .record(alert.kind, &alert.symbol, alert.condition, alert.level)
        {
            warn!(error = %e, "Failed to persist alert state");
        }
        true
    }

    /// Fresh quotes for the whole watchlist; unavailable and stale symbols are counted as skipped.
    pub(crate) async fn watchlist_quotes(&self, report: &mut CheckReport) -> Vec<Quote> {
        let symbols = self.watchlist.list();
        report.checked = symbols.len();

        let batch = self.provider.fetch_many(&symbols).await;
        report.skipped += batch.failures.len();

        let mut quotes = Vec::with_capacity(batch.quotes.len());
        for quote in batch.quotes {
            if quote.stale {
                info!(symbol = %quote.symbol, "Stale quote, not alerting");
                report.skipped += 1;
            } else {
                quotes.push(quote);
            }
        }
        quotes
    }
}

/// Register every enabled alert job from config.
pub fn register_jobs(scheduler: &mut AlertScheduler, ctx: Arc<AlertContext>) {
    let alerts = ctx.thresholds.clone();
    let jobs: [(&str, &AlertJobConfig, Arc<dyn AlertCheck>); 6] = [
        (
            "price_monitor",
            &alerts.price_monitor,
            Arc::new(PriceMonitorJob::new(ctx.clone())),
        ),
        (
            "year_high",
            &alerts.year_high,
            Arc::new(YearHighJob::new(ctx.clone())),
        ),
        (
            "buy_dip",
            &alerts.buy_dip,
            Arc::new(BuyDipJob::new(ctx.clone())),
        ),
        (
            "ma_crossover",
            &alerts.ma_crossover,
            Arc::new(MaCrossoverJob::new(ctx.clone())),
        ),
        (
            "earnings",
            &alerts.earnings,
            Arc::new(EarningsJob::new(ctx.clone())),
        ),
        ("dividends", &alerts.dividends, Arc::new(DividendJob::new(ctx))),
    ];

    for (name, job, check) in jobs {
        if !job.enabled {
            info!(job = name, "Alert job disabled");
            continue;
        }
        scheduler.register(
            name,
            Duration::from_secs(job.interval_secs),
            job.offset_secs.map(Duration::from_secs),
            check,
        );
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Price with FX pairs at four decimals and everything else at two.
pub fn format_price(symbol: &Symbol, price: f64) -> String {
    if symbol.is_fx() {
        format!("{price:.4}")
    } else {
        format!("${price:.2}")
    }
}

pub(crate) fn format_signed(value: f64, decimals: usize) -> String {
    if value >= 0.0 {
        format!("+{value:.decimals$}")
    } else {
        format!("{value:.decimals$}")
    }
}

pub(crate) fn format_position(position: Option<f64>) -> String {
    position.map_or_else(|| "n/a".to_string(), |p| format!("{:.0}%", p * 100.0))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::data::{QuoteSource, SourceQuote};

    pub fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    pub fn quote(symbol: &str, price: f64, change_percent: f64, year_high: Option<f64>) -> Quote {
        Quote::from_source(
            sym(symbol),
            SourceQuote {
                name: Some(format!("{symbol} Inc.")),
                price,
                change: price * change_percent / 100.0,
                change_percent,
                year_high,
                year_low: year_high.map(|h| h / 2.0),
                ..Default::default()
            },
            QuoteSource::Primary,
            "fmp",
        )
    }

    pub fn record(condition: &str, level: Option<f64>) -> DedupeRecord {
        DedupeRecord {
            condition: condition.to_string(),
            level,
            alerted_at: chrono::Utc::now(),
        }
    }
}
