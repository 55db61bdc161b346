//! Large intraday moves.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tickerbot_common::config::AlertsConfig;

use super::{format_position, format_price, format_signed, Alert, AlertContext, AlertKind, DedupeRecord};
use crate::data::Quote;
use crate::scheduler::{AlertCheck, CheckReport};

/// Alerts when a symbol's day change crosses the move threshold.
pub struct PriceMonitorJob {
    ctx: Arc<AlertContext>,
}

impl PriceMonitorJob {
    pub fn new(ctx: Arc<AlertContext>) -> Self {
        Self { ctx }
    }
}

/// Re-alerts only when the direction or the cent-rounded price differs from last time.
pub fn evaluate(quote: &Quote, thresholds: &AlertsConfig, previous: Option<&DedupeRecord>) -> Option<Alert> {
    let threshold = if quote.symbol.is_fx() {
        thresholds.fx_move_pct
    } else {
        thresholds.price_move_pct
    };
    if !quote.change_percent.is_finite() || quote.change_percent.abs() < threshold {
        return None;
    }

    let direction = if quote.change_percent >= 0.0 { "up" } else { "down" };
    let condition = format!("{direction}:{:.2}", quote.price);
    if previous.is_some_and(|p| p.condition == condition) {
        return None;
    }

    let icon = if direction == "up" { "📈" } else { "📉" };
    let change_decimals = if quote.symbol.is_fx() { 4 } else { 2 };
    let text = format!(
        "{icon} *{}* {direction} {}%\nPrice: {} ({})\n52-week position: {}",
        quote.display_name(),
        format_signed(quote.change_percent, 2),
        format_price(&quote.symbol, quote.price),
        format_signed(quote.change, change_decimals),
        format_position(quote.year_position()),
    );

    Some(Alert {
        kind: AlertKind::PriceMove,
        symbol: quote.symbol.clone(),
        condition,
        level: Some((quote.price * 100.0).round() / 100.0),
        text,
    })
}

#[async_trait]
impl AlertCheck for PriceMonitorJob {
    async fn run(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        for quote in self.ctx.watchlist_quotes(&mut report).await {
            let previous = self.ctx.dedupe.get(AlertKind::PriceMove, &quote.symbol);
            if let Some(alert) = evaluate(&quote, &self.ctx.thresholds, previous.as_ref()) {
                if self.ctx.deliver(alert).await {
                    report.alerts_sent += 1;
                }
            }
        }
        Ok(report)
    }
}
