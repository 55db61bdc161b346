//! Telegram long-polling loop.
//!
//! Pulls updates with `getUpdates`, parses commands from the configured chat
//! and replies with the handler output. Messages from other chats are
//! dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::commands::{self, Command};
use crate::notification::{TelegramClient, Update};
use crate::AppState;

/// Pause after a failed poll before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct TelegramPoller {
    client: Arc<TelegramClient>,
    state: Arc<AppState>,
    poll_timeout: Duration,
}

impl TelegramPoller {
    pub fn new(client: Arc<TelegramClient>, state: Arc<AppState>) -> Self {
        let poll_timeout = Duration::from_secs(state.config.telegram.poll_timeout_secs);
        Self {
            client,
            state,
            poll_timeout,
        }
    }

    /// Poll until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(chat_id = self.client.chat_id(), "Telegram polling started");
        let mut offset: i64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let updates = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.client.get_updates(offset, self.poll_timeout) => result,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.dispatch(update).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Telegram polling error");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("Telegram polling stopped");
    }

    async fn dispatch(&self, update: Update) {
        let Some(command) = extract_command(&update, self.client.chat_id()) else {
            return;
        };

        let trace_id = tickerbot_common::logging::generate_trace_id();
        debug!(trace_id = %trace_id, update_id = update.update_id, ?command, "Handling command");
        let reply = commands::handle(&self.state, command).await;
        if let Err(e) = self.client.send_message(&reply).await {
            warn!(trace_id = %trace_id, error = %e, "Failed to send command reply");
        }
    }
}

/// The command carried by `update`, if it comes from `allowed_chat`.
pub fn extract_command(update: &Update, allowed_chat: &str) -> Option<Command> {
    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?;

    if message.chat.id.to_string() != allowed_chat.trim() {
        warn!(
            chat_id = message.chat.id,
            user = message.from.as_ref().and_then(|u| u.username.as_deref()).unwrap_or("unknown"),
            "Ignoring message from unauthorized chat"
        );
        return None;
    }

    Command::parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(chat_id: i64, text: Option<&str>) -> Update {
        let mut message = serde_json::json!({
            "message_id": 7,
            "chat": {"id": chat_id},
            "from": {"id": 1, "username": "alice"},
        });
        if let Some(text) = text {
            message["text"] = serde_json::Value::String(text.to_string());
        }
        serde_json::from_value(serde_json::json!({"update_id": 100, "message": message})).unwrap()
    }

    #[test]
    fn test_extract_command_from_allowed_chat() {
        let cmd = extract_command(&update(42, Some("/quote aapl")), "42");
        assert_eq!(cmd, Some(Command::Quote(Some("aapl".into()))));
    }

    #[test]
    fn test_other_chats_ignored() {
        assert_eq!(extract_command(&update(99, Some("/stocks")), "42"), None);
    }

    #[test]
    fn test_non_commands_ignored() {
        assert_eq!(extract_command(&update(42, Some("hi there")), "42"), None);
        assert_eq!(extract_command(&update(42, None), "42"), None);

        let empty: Update = serde_json::from_str(r#"{"update_id": 5}"#).unwrap();
        assert_eq!(extract_command(&empty, "42"), None);
    }

    #[test]
    fn test_negative_group_chat_id() {
        let cmd = extract_command(&update(-100123, Some("/status")), "-100123");
        assert_eq!(cmd, Some(Command::Status));
    }
}
