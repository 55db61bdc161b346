//! Composite market sentiment score.
//!
//! Four components, each mapped to [-1, +1] and weighted 25%:
//!
//! | Component  | Input                         | Mapping                                   |
//! |------------|-------------------------------|-------------------------------------------|
//! | Volatility | VIX level                     | 0 inside 17–24; +1 at ≤12; −1 at ≥35       |
//! | Momentum   | Index 5-day % change          | change / 4%, clamped                       |
//! | Yield      | 10-year yield day % change    | change / 2%, clamped                       |
//! | Breadth    | Advancers vs decliners        | (adv − dec) / (adv + dec)                  |
//!
//! Score = 100 × Σ weight × component, in [-100, +100]. A missing input
//! contributes 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weight of each component in the composite.
pub const COMPONENT_WEIGHT: f64 = 0.25;

const VIX_CALM: f64 = 17.0;
const VIX_STRESSED: f64 = 24.0;
const VIX_CALM_SPAN: f64 = 5.0;
const VIX_STRESSED_SPAN: f64 = 11.0;
const MOMENTUM_FULL_SCALE_PCT: f64 = 4.0;
const YIELD_FULL_SCALE_PCT: f64 = 2.0;

/// Raw inputs; any of them may be unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentInputs {
    pub vix_level: Option<f64>,
    pub index_momentum_pct: Option<f64>,
    pub yield_change_pct: Option<f64>,
    pub advancers: Option<u32>,
    pub decliners: Option<u32>,
}

/// Per-component contributions in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentComponents {
    pub volatility: f64,
    pub momentum: f64,
    pub yield_signal: f64,
    pub breadth: f64,
}

/// Label for the 0–100 fear/greed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl SentimentLabel {
    pub fn from_index(index: f64) -> Self {
        match index {
            i if i >= 75.0 => Self::ExtremeGreed,
            i if i >= 60.0 => Self::Greed,
            i if i >= 40.0 => Self::Neutral,
            i if i >= 25.0 => Self::Fear,
            _ => Self::ExtremeFear,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtremeFear => "Extreme Fear",
            Self::Fear => "Fear",
            Self::Neutral => "Neutral",
            Self::Greed => "Greed",
            Self::ExtremeGreed => "Extreme Greed",
        }
    }
}

/// Composite score with the inputs it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    /// Composite in [-100, 100]
    pub score: f64,
    /// Same score rescaled to 0–100
    pub index: f64,
    pub label: SentimentLabel,
    pub inputs: SentimentInputs,
    pub components: SentimentComponents,
    /// How many of the four inputs were present
    pub available_inputs: u8,
    pub computed_at: DateTime<Utc>,
}

pub fn volatility_component(vix: f64) -> f64 {
    if !vix.is_finite() {
        0.0
    } else if vix < VIX_CALM {
        ((VIX_CALM - vix) / VIX_CALM_SPAN).min(1.0)
    } else if vix > VIX_STRESSED {
        -((vix - VIX_STRESSED) / VIX_STRESSED_SPAN).min(1.0)
    } else {
        0.0
    }
}

pub fn momentum_component(momentum_pct: f64) -> f64 {
    clamp_unit(momentum_pct / MOMENTUM_FULL_SCALE_PCT)
}

pub fn yield_component(change_pct: f64) -> f64 {
    clamp_unit(change_pct / YIELD_FULL_SCALE_PCT)
}

pub fn breadth_component(advancers: u32, decliners: u32) -> f64 {
    let total = advancers + decliners;
    if total == 0 {
        return 0.0;
    }
    (f64::from(advancers) - f64::from(decliners)) / f64::from(total)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Combine inputs into a snapshot. Never fails; missing inputs are neutral.
pub fn composite_sentiment(inputs: SentimentInputs) -> SentimentSnapshot {
    let breadth = match (inputs.advancers, inputs.decliners) {
        (None, None) => None,
        (adv, dec) => Some(breadth_component(adv.unwrap_or(0), dec.unwrap_or(0))),
    };

    let parts = [
        inputs.vix_level.map(volatility_component),
        inputs.index_momentum_pct.map(momentum_component),
        inputs.yield_change_pct.map(yield_component),
        breadth,
    ];

    let components = SentimentComponents {
        volatility: parts[0].unwrap_or(0.0),
        momentum: parts[1].unwrap_or(0.0),
        yield_signal: parts[2].unwrap_or(0.0),
        breadth: parts[3].unwrap_or(0.0),
    };

    let weighted = COMPONENT_WEIGHT
        * (components.volatility + components.momentum + components.yield_signal + components.breadth);
    let score = (100.0 * weighted).clamp(-100.0, 100.0);
    let index = (score + 100.0) / 2.0;

    SentimentSnapshot {
        score,
        index,
        label: SentimentLabel::from_index(index),
        inputs,
        components,
        available_inputs: parts.iter().filter(|p| p.is_some()).count() as u8,
        computed_at: Utc::now(),
    }
}
