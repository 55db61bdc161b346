//! Upcoming ex-dividend dates.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Alert, AlertContext, AlertKind, DedupeRecord};
use crate::data::DividendEvent;
use crate::scheduler::{AlertCheck, CheckReport};

pub struct DividendJob {
    ctx: Arc<AlertContext>,
}

impl DividendJob {
    pub fn new(ctx: Arc<AlertContext>) -> Self {
        Self { ctx }
    }
}

/// Alert for the nearest ex-dividend date within `days_ahead`; once per ex-date.
///
/// `display` is the name shown in the message, e.g. "AAPL (Apple Inc.)".
pub fn evaluate(
    events: &[DividendEvent],
    display: &str,
    today: NaiveDate,
    days_ahead: u32,
    previous: Option<&DedupeRecord>,
) -> Option<Alert> {
    let event = events
        .iter()
        .filter(|d| {
            let days = (d.ex_date - today).num_days();
            days >= 0 && days <= i64::from(days_ahead)
        })
        .min_by_key(|d| d.ex_date)?;

    let condition = event.ex_date.to_string();
    if previous.is_some_and(|p| p.condition == condition) {
        return None;
    }

    let days = (event.ex_date - today).num_days();
    let mut text = if days == 0 {
        format!(
            "💰 *{display}* goes ex-dividend today\nAmount: ${:.2} per share\nBuying today no longer qualifies for this payment",
            event.amount
        )
    } else {
        let when = if days == 1 { "tomorrow".to_string() } else { format!("in {days} days") };
        format!(
            "💰 *{display}* dividend ${:.2} per share\nEx-dividend: {} ({when})\nOwn the stock before the ex-dividend date to receive it",
            event.amount, event.ex_date
        )
    };
    if let Some(paid) = event.payment_date {
        text.push_str(&format!("\nPayment date: {paid}"));
    }

    Some(Alert {
        kind: AlertKind::Dividend,
        symbol: event.symbol.clone(),
        condition,
        level: Some(event.amount),
        text,
    })
}

#[async_trait]
impl AlertCheck for DividendJob {
    async fn run(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        let days_ahead = self.ctx.thresholds.dividend_days_ahead;
        let today = Utc::now().date_naive();

        // FX pairs and indices pay no dividends
        let symbols: Vec<_> = self
            .ctx
            .watchlist
            .list()
            .into_iter()
            .filter(|s| !s.is_fx() && !s.is_index())
            .collect();
        report.checked = symbols.len();

        for symbol in symbols {
            let calendar = match self.ctx.provider.fetch_dividends(&symbol, days_ahead).await {
                Ok(calendar) => calendar,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Dividends unavailable");
                    report.skipped += 1;
                    continue;
                }
            };
            if calendar.stale {
                info!(symbol = %symbol, "Stale dividend calendar, not alerting");
                report.skipped += 1;
                continue;
            }

            // Company name from an already cached quote; never worth a request
            let display = self
                .ctx
                .provider
                .cached_quote(&symbol)
                .map_or_else(|| symbol.to_string(), |q| q.display_name());

            let previous = self.ctx.dedupe.get(AlertKind::Dividend, &symbol);
            if let Some(alert) = evaluate(&calendar.events, &display, today, days_ahead, previous.as_ref()) {
                if self.ctx.deliver(alert).await {
                    report.alerts_sent += 1;
                }
            }
        }
        Ok(report)
    }
}
