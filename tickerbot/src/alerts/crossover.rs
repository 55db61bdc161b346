//! Moving-average crossovers (golden / death cross).

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tickerbot_common::config::AlertsConfig;
use tracing::{debug, warn};

use super::{format_price, Alert, AlertContext, AlertKind, DedupeRecord};
use crate::data::PriceHistory;
use crate::metrics::{latest_crossover, CrossoverKind};
use crate::scheduler::{AlertCheck, CheckReport};

pub struct MaCrossoverJob {
    ctx: Arc<AlertContext>,
}

impl MaCrossoverJob {
    pub fn new(ctx: Arc<AlertContext>) -> Self {
        Self { ctx }
    }
}

/// Daily bars needed to see a crossover anywhere in the lookback window.
pub fn history_days(thresholds: &AlertsConfig) -> u32 {
    (thresholds.ma_long + thresholds.ma_lookback_days + 10) as u32
}

/// One alert per (kind, crossover date).
pub fn evaluate(history: &PriceHistory, thresholds: &AlertsConfig, previous: Option<&DedupeRecord>) -> Option<Alert> {
    let closes = history.closes();
    let cross = latest_crossover(
        &closes,
        thresholds.ma_short,
        thresholds.ma_long,
        thresholds.ma_lookback_days,
    )?;
    let date = history.bars.get(cross.index)?.date;

    let kind = match cross.kind {
        CrossoverKind::Golden => "golden",
        CrossoverKind::Death => "death",
    };
    let condition = format!("{kind}:{date}");
    if previous.is_some_and(|p| p.condition == condition) {
        return None;
    }

    let (icon, verb) = match cross.kind {
        CrossoverKind::Golden => ("✨", "above"),
        CrossoverKind::Death => ("☠️", "below"),
    };
    let symbol = &history.symbol;
    let text = format!(
        "{icon} *{}* on {symbol}: SMA{} crossed {verb} SMA{} on {date}\nSMA{}: {}, SMA{}: {}",
        cross.kind.label(),
        thresholds.ma_short,
        thresholds.ma_long,
        thresholds.ma_short,
        format_price(symbol, cross.short_ma),
        thresholds.ma_long,
        format_price(symbol, cross.long_ma),
    );

    Some(Alert {
        kind: AlertKind::MaCrossover,
        symbol: symbol.clone(),
        condition,
        level: None,
        text,
    })
}

#[async_trait]
impl AlertCheck for MaCrossoverJob {
    async fn run(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        let symbols = self.ctx.watchlist.list();
        report.checked = symbols.len();
        let days = history_days(&self.ctx.thresholds);

        for symbol in symbols {
            let history = match self.ctx.provider.fetch_history(&symbol, days).await {
                Ok(history) if !history.stale => history,
                Ok(_) => {
                    debug!(symbol = %symbol, "Stale history, not alerting");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "History unavailable");
                    report.skipped += 1;
                    continue;
                }
            };

            let previous = self.ctx.dedupe.get(AlertKind::MaCrossover, &symbol);
            if let Some(alert) = evaluate(&history, &self.ctx.thresholds, previous.as_ref()) {
                if self.ctx.deliver(alert).await {
                    report.alerts_sent += 1;
                }
            }
        }
        Ok(report)
    }
}
