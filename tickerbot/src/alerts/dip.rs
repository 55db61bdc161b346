//! Buy-the-dip alerts: price well below the 52-week high.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tickerbot_common::config::AlertsConfig;

use super::{format_position, format_price, Alert, AlertContext, AlertKind, DedupeRecord};
use crate::data::Quote;
use crate::scheduler::{AlertCheck, CheckReport};

pub struct BuyDipJob {
    ctx: Arc<AlertContext>,
}

impl BuyDipJob {
    pub fn new(ctx: Arc<AlertContext>) -> Self {
        Self { ctx }
    }
}

/// Drop from the 52-week high, in percent.
pub fn drop_pct(price: f64, year_high: f64) -> Option<f64> {
    if year_high <= 0.0 || !year_high.is_finite() || !price.is_finite() {
        return None;
    }
    Some((year_high - price) / year_high * 100.0)
}

/// Re-alerts when the high reference changes or the drop deepens by `dip_step_pct`.
pub fn evaluate(quote: &Quote, thresholds: &AlertsConfig, previous: Option<&DedupeRecord>) -> Option<Alert> {
    let year_high = quote.year_high?;
    let drop = drop_pct(quote.price, year_high)?;
    if drop < thresholds.dip_threshold_pct {
        return None;
    }

    let condition = format!("dip:{year_high:.2}");
    if let Some(prev) = previous {
        let same_reference = prev.condition == condition;
        let deepened = prev
            .level
            .map_or(true, |last| drop >= last + thresholds.dip_step_pct);
        if same_reference && !deepened {
            return None;
        }
    }

    let text = format!(
        "💰 *{}* is {drop:.1}% below its 52-week high\nPrice: {} (high {})\n52-week position: {}",
        quote.display_name(),
        format_price(&quote.symbol, quote.price),
        format_price(&quote.symbol, year_high),
        format_position(quote.year_position()),
    );

    Some(Alert {
        kind: AlertKind::BuyDip,
        symbol: quote.symbol.clone(),
        condition,
        level: Some(drop),
        text,
    })
}

#[async_trait]
impl AlertCheck for BuyDipJob {
    async fn run(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        for quote in self.ctx.watchlist_quotes(&mut report).await {
            let previous = self.ctx.dedupe.get(AlertKind::BuyDip, &quote.symbol);
            if let Some(alert) = evaluate(&quote, &self.ctx.thresholds, previous.as_ref()) {
                if self.ctx.deliver(alert).await {
                    report.alerts_sent += 1;
                }
            }
        }
        Ok(report)
    }
}
