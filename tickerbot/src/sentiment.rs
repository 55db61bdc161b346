//! Market sentiment gathered through the hybrid provider.

use std::sync::Arc;
use tickerbot_common::config::SentimentConfig;
use tracing::{debug, warn};

use crate::data::{HybridProvider, Symbol};
use crate::metrics::{composite_sentiment, momentum_pct, SentimentInputs, SentimentSnapshot};

/// Trading days the index momentum looks back over.
pub const MOMENTUM_DAYS: usize = 5;

/// Builds [`SentimentSnapshot`]s on demand. Nothing is cached here; the
/// provider's cache already covers repeated requests.
pub struct SentimentService {
    provider: Arc<HybridProvider>,
    volatility: Option<Symbol>,
    index: Option<Symbol>,
    yield_index: Option<Symbol>,
    breadth: Vec<Symbol>,
}

impl SentimentService {
    pub fn new(provider: Arc<HybridProvider>, config: &SentimentConfig) -> Self {
        Self {
            provider,
            volatility: parse_symbol(&config.volatility_symbol),
            index: parse_symbol(&config.index_symbol),
            yield_index: parse_symbol(&config.yield_symbol),
            breadth: config
                .breadth_symbols
                .iter()
                .filter_map(|s| parse_symbol(s))
                .collect(),
        }
    }

    /// Fetch every input and combine them. Failed inputs count as neutral.
    pub async fn snapshot(&self) -> SentimentSnapshot {
        let inputs = self.gather().await;
        debug!(?inputs, "Sentiment inputs gathered");
        composite_sentiment(inputs)
    }

    async fn gather(&self) -> SentimentInputs {
        let mut inputs = SentimentInputs::default();

        if let Some(symbol) = &self.volatility {
            inputs.vix_level = self.quote_field(symbol, |q| q.price).await;
        }

        if let Some(symbol) = &self.yield_index {
            inputs.yield_change_pct = self.quote_field(symbol, |q| q.change_percent).await;
        }

        if let Some(symbol) = &self.index {
            // A few spare bars for holidays
            let days = (MOMENTUM_DAYS + 5) as u32;
            match self.provider.fetch_history(symbol, days).await {
                Ok(history) => inputs.index_momentum_pct = momentum_pct(&history.closes(), MOMENTUM_DAYS),
                Err(e) => warn!(symbol = %symbol, error = %e, "Index history unavailable"),
            }
        }

        if !self.breadth.is_empty() {
            let batch = self.provider.fetch_many(&self.breadth).await;
            if !batch.quotes.is_empty() {
                let advancers = batch.quotes.iter().filter(|q| q.change_percent > 0.0).count();
                let decliners = batch.quotes.iter().filter(|q| q.change_percent < 0.0).count();
                inputs.advancers = Some(advancers as u32);
                inputs.decliners = Some(decliners as u32);
            }
        }

        inputs
    }

    async fn quote_field(&self, symbol: &Symbol, field: impl Fn(&crate::data::Quote) -> f64) -> Option<f64> {
        match self.provider.fetch(symbol).await {
            Ok(quote) => Some(field(&quote)).filter(|v| v.is_finite()),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Sentiment input unavailable");
                None
            }
        }
    }
}

fn parse_symbol(raw: &str) -> Option<Symbol> {
    match Symbol::parse(raw) {
        Ok(symbol) => Some(symbol),
        Err(e) => {
            warn!(symbol = raw, error = %e, "Ignoring invalid sentiment symbol");
            None
        }
    }
}
