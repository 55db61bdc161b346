//! Derived metrics: technical indicators and market sentiment.

mod indicators;
mod sentiment;

pub use indicators::{
    annualized_volatility, crossovers, latest_crossover, latest_sma, momentum_pct, rsi,
    rsi_or_neutral, sma, year_position, Crossover, CrossoverKind, TrendSignal, RSI_PERIOD,
    TRADING_DAYS, VOLATILITY_WINDOW,
};
pub use sentiment::{
    breadth_component, composite_sentiment, momentum_component, volatility_component,
    yield_component, SentimentComponents, SentimentInputs, SentimentLabel, SentimentSnapshot,
    COMPONENT_WEIGHT,
};

use serde::Serialize;

/// Indicator bundle for one symbol, as shown by `/research` and the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorReport {
    pub price: f64,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub rsi: f64,
    /// Annualized, as a fraction
    pub volatility: Option<f64>,
    pub year_position: Option<f64>,
    pub trend: TrendSignal,
    pub data_points: usize,
}

impl IndicatorReport {
    /// Compute every indicator from a close series plus the 52-week range.
    ///
    /// `None` when there are no closes.
    pub fn compute(closes: &[f64], year_low: Option<f64>, year_high: Option<f64>) -> Option<Self> {
        let price = *closes.last()?;
        let sma20 = latest_sma(closes, 20);
        let rsi = rsi_or_neutral(closes, RSI_PERIOD);

        Some(Self {
            price,
            sma20,
            sma50: latest_sma(closes, 50),
            sma200: latest_sma(closes, 200),
            rsi,
            volatility: annualized_volatility(closes, VOLATILITY_WINDOW),
            year_position: year_position(price, year_low, year_high),
            trend: sma20.map_or(TrendSignal::Neutral, |s| TrendSignal::classify(price, s, rsi)),
            data_points: closes.len(),
        })
    }
}
