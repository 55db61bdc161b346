//! Upcoming earnings reports.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Alert, AlertContext, AlertKind, DedupeRecord};
use crate::data::EarningsEvent;
use crate::scheduler::{AlertCheck, CheckReport};

pub struct EarningsJob {
    ctx: Arc<AlertContext>,
}

impl EarningsJob {
    pub fn new(ctx: Arc<AlertContext>) -> Self {
        Self { ctx }
    }
}

fn report_time(time: Option<&str>) -> Option<&'static str> {
    match time?.to_ascii_lowercase().as_str() {
        "bmo" => Some("before market open"),
        "amc" => Some("after market close"),
        _ => None,
    }
}

/// Alert for the nearest report within `days_ahead`; once per report date.
pub fn evaluate(
    events: &[EarningsEvent],
    today: NaiveDate,
    days_ahead: u32,
    previous: Option<&DedupeRecord>,
) -> Option<Alert> {
    let event = events
        .iter()
        .filter(|e| {
            let days = (e.date - today).num_days();
            days >= 0 && days <= i64::from(days_ahead)
        })
        .min_by_key(|e| e.date)?;

    let condition = event.date.to_string();
    if previous.is_some_and(|p| p.condition == condition) {
        return None;
    }

    let days = (event.date - today).num_days();
    let when = match days {
        0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        n => format!("in {n} days"),
    };

    let mut text = format!("📅 *{}* reports earnings {when} ({}", event.symbol, event.date);
    if let Some(time) = report_time(event.time.as_deref()) {
        text.push_str(", ");
        text.push_str(time);
    }
    text.push(')');
    if let Some(eps) = event.eps_estimate {
        text.push_str(&format!("\nEPS estimate: {eps:.2}"));
    }
    if let Some(revenue) = event.revenue_estimate {
        text.push_str(&format!("\nRevenue estimate: ${:.2}B", revenue / 1e9));
    }

    Some(Alert {
        kind: AlertKind::Earnings,
        symbol: event.symbol.clone(),
        condition,
        level: None,
        text,
    })
}

#[async_trait]
impl AlertCheck for EarningsJob {
    async fn run(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        let days_ahead = self.ctx.thresholds.earnings_days_ahead;
        let today = Utc::now().date_naive();

        // FX pairs and indices have no earnings
        let symbols: Vec<_> = self
            .ctx
            .watchlist
            .list()
            .into_iter()
            .filter(|s| !s.is_fx() && !s.is_index())
            .collect();
        report.checked = symbols.len();

        for symbol in symbols {
            let calendar = match self.ctx.provider.fetch_earnings(&symbol, days_ahead).await {
                Ok(calendar) => calendar,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Earnings unavailable");
                    report.skipped += 1;
                    continue;
                }
            };
            if calendar.stale {
                info!(symbol = %symbol, "Stale earnings calendar, not alerting");
                report.skipped += 1;
                continue;
            }

            let previous = self.ctx.dedupe.get(AlertKind::Earnings, &symbol);
            if let Some(alert) = evaluate(&calendar.events, today, days_ahead, previous.as_ref()) {
                if self.ctx.deliver(alert).await {
                    report.alerts_sent += 1;
                }
            }
        }
        Ok(report)
    }
}
