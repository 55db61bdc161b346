//! Technical indicators over daily close series.
//!
//! All functions are pure; inputs are ordered oldest first.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Trading days per year used to annualize volatility.
pub const TRADING_DAYS: f64 = 252.0;

/// Default RSI lookback.
pub const RSI_PERIOD: usize = 14;

/// Default volatility window in trading days.
pub const VOLATILITY_WINDOW: usize = 30;

// ============================================================================
// Moving averages
// ============================================================================

/// Simple moving average series.
///
/// Element `i` is `None` until `window` values are available.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push((i + 1 >= window).then(|| sum / window as f64));
    }
    out
}

/// Most recent SMA value, if enough data exists.
pub fn latest_sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    Some(values[values.len() - window..].iter().sum::<f64>() / window as f64)
}

/// Direction of a moving-average crossover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverKind {
    /// Short average rose above the long average
    Golden,
    /// Short average fell below the long average
    Death,
}

impl CrossoverKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Golden => "Golden Cross",
            Self::Death => "Death Cross",
        }
    }
}

/// A crossover at bar `index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossover {
    pub index: usize,
    pub kind: CrossoverKind,
    pub short_ma: f64,
    pub long_ma: f64,
}

/// Every bar where the sign of (short − long) flips versus the previous bar.
///
/// "Above" means strictly greater; touching counts as below, so a flat
/// touch followed by a rise still registers one golden cross.
pub fn crossovers(closes: &[f64], short: usize, long: usize) -> Vec<Crossover> {
    let short_ma = sma(closes, short);
    let long_ma = sma(closes, long);

    let mut events = Vec::new();
    let mut prev_above: Option<bool> = None;

    for i in 0..closes.len() {
        let (Some(s), Some(l)) = (short_ma[i], long_ma[i]) else {
            continue;
        };
        let above = s > l;
        if let Some(prev) = prev_above {
            if prev != above {
                events.push(Crossover {
                    index: i,
                    kind: if above { CrossoverKind::Golden } else { CrossoverKind::Death },
                    short_ma: s,
                    long_ma: l,
                });
            }
        }
        prev_above = Some(above);
    }
    events
}

/// The most recent crossover within the last `lookback` bars.
pub fn latest_crossover(closes: &[f64], short: usize, long: usize, lookback: usize) -> Option<Crossover> {
    let cutoff = closes.len().saturating_sub(lookback);
    crossovers(closes, short, long)
        .into_iter()
        .rev()
        .find(|c| c.index >= cutoff)
}

// ============================================================================
// RSI
// ============================================================================

/// Relative strength index from simple average gains/losses.
///
/// Uses the last `period` price changes; when exactly `period` closes are
/// available the `period - 1` changes present are used. Returns `None` with
/// fewer than `period` closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period.max(2) {
        return None;
    }

    let changes = closes.len() - 1;
    let start = closes.len() - 1 - changes.min(period);
    let window = &closes[start..];

    let (mut gains, mut losses) = (0.0, 0.0);
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }

    let n = (window.len() - 1) as f64;
    let (avg_gain, avg_loss) = (gains / n, losses / n);

    Some(match (avg_gain > 0.0, avg_loss > 0.0) {
        (false, false) => 50.0,
        (_, false) => 100.0,
        (false, true) => 0.0,
        (true, true) => 100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
    })
}

/// RSI, reported as neutral 50 when there is not enough data.
pub fn rsi_or_neutral(closes: &[f64], period: usize) -> f64 {
    rsi(closes, period).unwrap_or(50.0)
}

// ============================================================================
// Volatility & range position
// ============================================================================

/// Annualized volatility: sample std-dev of daily log returns over the last
/// `window` returns, scaled by √252. Returned as a fraction (0.25 = 25%).
pub fn annualized_volatility(closes: &[f64], window: usize) -> Option<f64> {
    let start = closes.len().saturating_sub(window + 1);
    let returns: Vec<f64> = closes[start..]
        .windows(2)
        .filter(|p| p[0] > 0.0 && p[1] > 0.0)
        .map(|p| (p[1] / p[0]).ln())
        .collect();

    if returns.len() < 2 {
        return None;
    }

    let sd = returns.iter().std_dev();
    sd.is_finite().then(|| sd * TRADING_DAYS.sqrt())
}

/// Where `price` sits in the 52-week range, clamped to [0, 1].
///
/// `None` ("unknown") when either bound is missing or non-finite, or the range is empty.
pub fn year_position(price: f64, year_low: Option<f64>, year_high: Option<f64>) -> Option<f64> {
    let (low, high) = (year_low?, year_high?);
    if !(price.is_finite() && low.is_finite() && high.is_finite()) || high <= low {
        return None;
    }
    Some(((price - low) / (high - low)).clamp(0.0, 1.0))
}

/// Percent change between the close `bars_back` bars ago and the last close.
pub fn momentum_pct(closes: &[f64], bars_back: usize) -> Option<f64> {
    if bars_back == 0 || closes.len() <= bars_back {
        return None;
    }
    let last = *closes.last()?;
    let base = closes[closes.len() - 1 - bars_back];
    (base != 0.0).then(|| (last - base) / base * 100.0)
}

// ============================================================================
// Trend signal
// ============================================================================

/// Coarse trend label from price vs SMA20 and RSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendSignal {
    Bullish,
    Overbought,
    Oversold,
    Bearish,
    Neutral,
}

impl TrendSignal {
    pub fn classify(price: f64, sma20: f64, rsi: f64) -> Self {
        let above = price > sma20;
        match (above, rsi) {
            (true, r) if r > 30.0 && r < 70.0 => Self::Bullish,
            (true, r) if r > 70.0 => Self::Overbought,
            (false, r) if r < 30.0 => Self::Oversold,
            (false, _) => Self::Bearish,
            _ => Self::Neutral,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Bullish => "🟢",
            Self::Bearish => "🔴",
            _ => "🟡",
        }
    }
}
