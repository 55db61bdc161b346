//! Research summaries through an OpenAI-compatible chat completions API.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tickerbot_common::config::LlmConfig;

use crate::data::Quote;
use crate::metrics::IndicatorReport;

const SYSTEM_PROMPT: &str = "You are a concise financial analyst. Using only the market data \
provided, summarize the technical picture for the stock in a few short paragraphs: trend, \
momentum, volatility and where the price sits in its 52-week range. Mention notable risks. \
Do not give personalized investment advice.";

/// LLM request failures.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("LLM returned no choices")]
    Empty,
}

impl From<LlmError> for tickerbot_common::Error {
    fn from(e: LlmError) -> Self {
        Self::External(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// Chat completions client (Groq by default).
pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: 1000,
            temperature: 0.3,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        let key = config.api_key.as_deref().filter(|k| !k.is_empty())?;
        let mut client = Self::new(&config.base_url, key, &config.model);
        client.max_tokens = config.max_tokens;
        client.temperature = config.temperature;
        Some(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One-shot completion with the analyst system prompt.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: tickerbot_common::util::truncate_with_ellipsis(&body, 200),
            });
        }

        let result: ChatResponse = response.json().await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::Empty)?;

        tracing::debug!(model = %self.model, chars = content.len(), "LLM completion received");
        Ok(content)
    }

    /// Research summary for one symbol, optionally steered by a user question.
    pub async fn research(
        &self,
        quote: Option<&Quote>,
        report: &IndicatorReport,
        question: Option<&str>,
    ) -> Result<String, LlmError> {
        let mut prompt = research_context(quote, report);
        match question {
            Some(q) if !q.trim().is_empty() => {
                let _ = write!(prompt, "\nQuestion: {}", q.trim());
            }
            _ => prompt.push_str("\nGive a brief technical summary."),
        }
        self.complete(&prompt).await
    }
}

/// Market data block handed to the model.
pub fn research_context(quote: Option<&Quote>, report: &IndicatorReport) -> String {
    let mut out = String::new();
    if let Some(q) = quote {
        let _ = writeln!(out, "Stock: {}", q.display_name());
        let _ = writeln!(out, "Price: {:.2} ({:+.2}%)", q.price, q.change_percent);
        if let (Some(low), Some(high)) = (q.year_low, q.year_high) {
            let _ = writeln!(out, "52-week range: {low:.2} - {high:.2}");
        }
        if let Some(cap) = q.market_cap {
            let _ = writeln!(out, "Market cap: {:.1}B", cap / 1e9);
        }
    } else {
        let _ = writeln!(out, "Last close: {:.2}", report.price);
    }

    let fmt_opt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"));
    let _ = writeln!(out, "SMA20: {}", fmt_opt(report.sma20));
    let _ = writeln!(out, "SMA50: {}", fmt_opt(report.sma50));
    let _ = writeln!(out, "SMA200: {}", fmt_opt(report.sma200));
    let _ = writeln!(out, "RSI(14): {:.1}", report.rsi);
    let _ = writeln!(
        out,
        "Annualized volatility: {}",
        report
            .volatility
            .map_or_else(|| "n/a".to_string(), |v| format!("{:.1}%", v * 100.0))
    );
    let _ = writeln!(
        out,
        "52-week position: {}",
        report
            .year_position
            .map_or_else(|| "n/a".to_string(), |p| format!("{:.0}%", p * 100.0))
    );
    let _ = writeln!(out, "Trend signal: {:?}", report.trend);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_needs_key() {
        assert!(LlmClient::from_config(&LlmConfig::default()).is_none());

        let config = LlmConfig {
            api_key: Some("gsk_test".into()),
            base_url: "https://api.groq.com/openai/v1/".into(),
            ..LlmConfig::default()
        };
        let client = LlmClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(client.model(), "llama-3.1-8b-instant");
    }

    #[test]
    fn test_request_serializes() {
        let req = ChatRequest {
            model: "llama-3.1-8b-instant",
            messages: vec![ChatMessage {
                role: "user",
                content: "Hello",
            }],
            temperature: 0.3,
            max_tokens: 1000,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "llama-3.1-8b-instant");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1000);
    }

    #[test]
    fn test_research_context() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        let report = IndicatorReport::compute(&closes, Some(0.0), Some(60.0)).unwrap();
        let context = research_context(None, &report);
        assert!(context.contains("Last close: 30.00"));
        assert!(context.contains("SMA20: 20.50"));
        assert!(context.contains("SMA200: n/a"));
        assert!(context.contains("52-week position: 50%"));
    }
}
