//! 52-week high proximity.
//!
//! Three bands, measured as distance from the 52-week high in percent:
//!
//! - `>= 0`: new high
//! - `[-threshold, 0)`: approaching the high
//! - `[-watch_max, -watch_min]`: watch zone

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tickerbot_common::config::AlertsConfig;

use super::{format_price, format_signed, Alert, AlertContext, AlertKind, DedupeRecord};
use crate::data::Quote;
use crate::scheduler::{AlertCheck, CheckReport};

const NEW_HIGH: &str = "new_high";
const APPROACHING: &str = "approaching";
const WATCH_ZONE: &str = "watch_zone";

pub struct YearHighJob {
    ctx: Arc<AlertContext>,
}

impl YearHighJob {
    pub fn new(ctx: Arc<AlertContext>) -> Self {
        Self { ctx }
    }
}

/// Percent distance of `price` from `year_high`; negative below the high.
pub fn distance_pct(price: f64, year_high: f64) -> Option<f64> {
    if year_high <= 0.0 || !year_high.is_finite() || !price.is_finite() {
        return None;
    }
    Some((price - year_high) / year_high * 100.0)
}

/// High alerts re-fire only above the last alerted level; watch-zone alerts
/// re-fire when the whole-percent distance bucket changes.
pub fn evaluate(quote: &Quote, thresholds: &AlertsConfig, previous: Option<&DedupeRecord>) -> Option<Alert> {
    let year_high = quote.year_high?;
    let distance = distance_pct(quote.price, year_high)?;
    let name = quote.display_name();
    let price = format_price(&quote.symbol, quote.price);

    let (condition, level, text) = if distance >= 0.0 {
        let level = quote.price.max(year_high);
        (
            NEW_HIGH.to_string(),
            level,
            format!("🚀 *{name}* hit a new 52-week high\nPrice: {price}"),
        )
    } else if distance >= -thresholds.year_high_threshold_pct {
        (
            APPROACHING.to_string(),
            year_high,
            format!(
                "⬆️ *{name}* is approaching its 52-week high\nPrice: {price} ({}% from {})",
                format_signed(distance, 2),
                format_price(&quote.symbol, year_high),
            ),
        )
    } else if distance >= -thresholds.watch_zone_max_pct && distance <= -thresholds.watch_zone_min_pct {
        let bucket = (-distance).floor() as i64;
        (
            format!("{WATCH_ZONE}:{bucket}"),
            year_high,
            format!(
                "👀 *{name}* is in the watch zone, {:.1}% below its 52-week high\nPrice: {price} (high {})",
                -distance,
                format_price(&quote.symbol, year_high),
            ),
        )
    } else {
        return None;
    };

    if let Some(prev) = previous {
        let was_high_alert = prev.condition == NEW_HIGH || prev.condition == APPROACHING;
        let is_high_alert = condition == NEW_HIGH || condition == APPROACHING;
        let suppressed = if is_high_alert && was_high_alert {
            prev.level.is_some_and(|last| level <= last)
        } else {
            prev.condition == condition
        };
        if suppressed {
            return None;
        }
    }

    Some(Alert {
        kind: AlertKind::YearHigh,
        symbol: quote.symbol.clone(),
        condition,
        level: Some(level),
        text,
    })
}

#[async_trait]
impl AlertCheck for YearHighJob {
    async fn run(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        for quote in self.ctx.watchlist_quotes(&mut report).await {
            let previous = self.ctx.dedupe.get(AlertKind::YearHigh, &quote.symbol);
            if let Some(alert) = evaluate(&quote, &self.ctx.thresholds, previous.as_ref()) {
                if self.ctx.deliver(alert).await {
                    report.alerts_sent += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::test_support::{quote, record};

    #[test]
    fn test_bands() {
        let t = AlertsConfig::default();

        let new_high = evaluate(&quote("NVDA", 205.0, 1.0, Some(200.0)), &t, None).unwrap();
        assert_eq!(new_high.condition, NEW_HIGH);
        assert_eq!(new_high.level, Some(205.0));

        let approaching = evaluate(&quote("NVDA", 199.5, 0.1, Some(200.0)), &t, None).unwrap();
        assert_eq!(approaching.condition, APPROACHING);

        let watch = evaluate(&quote("NVDA", 181.0, 0.1, Some(200.0)), &t, None).unwrap();
        assert_eq!(watch.condition, "watch_zone:9");

        // Between the approach band and the watch zone
        assert!(evaluate(&quote("NVDA", 196.0, 0.1, Some(200.0)), &t, None).is_none());
        // Far below
        assert!(evaluate(&quote("NVDA", 150.0, 0.1, Some(200.0)), &t, None).is_none());
        // Unknown high
        assert!(evaluate(&quote("NVDA", 150.0, 0.1, None), &t, None).is_none());
    }

    #[test]
    fn test_new_high_refires_only_above_last_level() {
        let t = AlertsConfig::default();
        let prev = record(NEW_HIGH, Some(205.0));

        assert!(evaluate(&quote("NVDA", 204.0, 0.1, Some(205.0)), &t, Some(&prev)).is_none());
        assert!(evaluate(&quote("NVDA", 205.0, 0.1, Some(205.0)), &t, Some(&prev)).is_none());
        let higher = evaluate(&quote("NVDA", 207.0, 0.1, Some(205.0)), &t, Some(&prev)).unwrap();
        assert_eq!(higher.level, Some(207.0));
    }

    #[test]
    fn test_watch_zone_refires_on_bucket_change() {
        let t = AlertsConfig::default();
        let prev = record("watch_zone:9", Some(200.0));

        // 9.25% below: same bucket
        assert!(evaluate(&quote("NVDA", 181.5, 0.1, Some(200.0)), &t, Some(&prev)).is_none());
        // 12.5% below: new bucket
        let deeper = evaluate(&quote("NVDA", 175.0, 0.1, Some(200.0)), &t, Some(&prev)).unwrap();
        assert_eq!(deeper.condition, "watch_zone:12");
    }
}
