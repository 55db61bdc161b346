//! Outbound messaging.
//!
//! [`Notifier`] is the seam alert jobs deliver through. [`TelegramClient`]
//! implements it on top of the Bot API; [`LogNotifier`] stands in when no
//! bot is configured so alerts still show up in the logs.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tickerbot_common::config::TelegramConfig;
use tickerbot_common::util::sanitize_for_log;

/// Telegram rejects messages longer than this.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Delivery target for alert and command output.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver `text`. Returns whether delivery succeeded; never errors.
    async fn send(&self, text: &str) -> bool;
}

// ============================================================================
// Telegram Bot API
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// One entry from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Bot API client bound to a single chat.
pub struct TelegramClient {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        api_base: impl Into<String>,
        poll_timeout: Duration,
    ) -> Self {
        // Long polls hold the request open for `poll_timeout`
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Build a client from config; `None` when the token or chat id is missing.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let token = config.bot_token.as_deref().filter(|t| !t.is_empty())?;
        let chat_id = config.chat_id.as_deref().filter(|c| !c.is_empty())?;
        Some(Self::new(
            token,
            chat_id,
            config.api_base.clone(),
            Duration::from_secs(config.poll_timeout_secs),
        ))
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Send `message` to the configured chat, split into as many chunks as needed.
    pub async fn send_message(&self, message: &str) -> Result<()> {
        for chunk in split_message(message, MAX_MESSAGE_LEN) {
            self.send_single_chunk(&chunk).await?;
        }
        Ok(())
    }

    /// Send one chunk as Markdown, retrying as plain text on entity errors.
    async fn send_single_chunk(&self, message: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown"
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }

        let status = resp.status();
        let error_text = resp.text().await.unwrap_or_default();

        // Telegram returns "Bad Request: can't parse entities" for Markdown errors
        if status.as_u16() == 400 && error_text.contains("parse entities") {
            tracing::warn!(
                "Telegram Markdown parsing failed, retrying without parse_mode: {}",
                error_text
            );

            let body_plain = serde_json::json!({
                "chat_id": self.chat_id,
                "text": message
            });

            let resp_plain = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&body_plain)
                .send()
                .await?;

            if resp_plain.status().is_success() {
                return Ok(());
            }

            let plain_error = resp_plain.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed: {plain_error}");
        }

        anyhow::bail!("Telegram sendMessage failed ({status}): {error_text}")
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"]
        });

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await?;

        let data: ApiResponse<Vec<Update>> = resp.json().await?;
        if !data.ok {
            anyhow::bail!(
                "Telegram getUpdates failed: {}",
                data.description.unwrap_or_default()
            );
        }
        Ok(data.result.unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> bool {
        match self.send_message(text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %sanitize_for_log(&e.to_string()), "Telegram delivery failed");
                false
            }
        }
    }
}

/// Split a message into chunks that fit within Telegram's limit.
///
/// Prefers paragraph, line, sentence and word boundaries, in that order.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let limit = match floor_char_boundary(remaining, max_len) {
            0 => remaining.chars().next().map_or(remaining.len(), char::len_utf8),
            n => n,
        };
        let chunk = &remaining[..limit];
        let split_pos = chunk
            .rfind("\n\n")
            .or_else(|| chunk.rfind('\n'))
            .or_else(|| chunk.rfind(". "))
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        let actual_split = if split_pos == 0 { limit } else { split_pos };

        chunks.push(remaining[..actual_split].to_string());
        remaining = remaining[actual_split..].trim_start();
    }

    chunks
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

// ============================================================================
// Log-only fallback
// ============================================================================

/// Writes alerts to the log when Telegram is not configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, text: &str) -> bool {
        tracing::info!(target: "tickerbot::alerts", "{text}");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_short() {
        let result = split_message("Hello, World!", 4096);
        assert_eq!(result, vec!["Hello, World!".to_string()]);
    }

    #[test]
    fn test_split_message_long() {
        let msg = "x".repeat(5000);
        let result = split_message(&msg, 4096);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].len(), 4096);
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let msg = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let result = split_message(&msg, 40);
        assert_eq!(result, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let msg = "é".repeat(10);
        let result = split_message(&msg, 5);
        assert!(result.iter().all(|c| c.len() <= 5));
        assert_eq!(result.concat(), msg);
    }

    #[test]
    fn test_from_config_requires_token_and_chat() {
        let mut config = TelegramConfig::default();
        assert!(TelegramClient::from_config(&config).is_none());

        config.bot_token = Some("123:abc".into());
        assert!(TelegramClient::from_config(&config).is_none());

        config.chat_id = Some("42".into());
        let client = TelegramClient::from_config(&config).unwrap();
        assert_eq!(client.chat_id(), "42");
        assert!(client.api_url("sendMessage").ends_with("/bot123:abc/sendMessage"));
    }

    #[test]
    fn test_updates_deserialize() {
        let json = r#"{"ok":true,"result":[
            {"update_id":7,"message":{"message_id":1,"chat":{"id":42},"from":{"id":9,"username":"sam"},"text":"/quote aapl"}},
            {"update_id":8}
        ]}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        let updates = resp.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 42);
        assert!(updates[1].message.is_none());
    }
}
