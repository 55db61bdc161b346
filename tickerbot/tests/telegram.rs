//! Telegram Bot API client against a mocked server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tickerbot::notification::{Notifier, TelegramClient};

fn client(server: &MockServer) -> TelegramClient {
    TelegramClient::new("TOKEN", "42", server.uri(), Duration::from_secs(1))
}

#[tokio::test]
async fn test_markdown_error_retries_as_plain_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .and(body_partial_json(json!({"parse_mode": "Markdown"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: can't parse entities: Can't find end of the entity"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .and(body_partial_json(json!({"chat_id": "42", "text": "price *up"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client(&server).send("price *up").await);
}

#[tokio::test]
async fn test_send_failure_reports_false() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "ok": false,
            "description": "Unauthorized"
        })))
        .mount(&server)
        .await;

    assert!(!client(&server).send("hello").await);
}

#[tokio::test]
async fn test_long_message_sent_in_chunks() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .expect(3)
        .mount(&server)
        .await;

    let message = "x".repeat(4096 * 2 + 10);
    client(&server).send_message(&message).await.unwrap();
}

#[tokio::test]
async fn test_get_updates() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/botTOKEN/getUpdates"))
        .and(body_partial_json(json!({"offset": 101})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [
                {
                    "update_id": 101,
                    "message": {
                        "message_id": 1,
                        "chat": {"id": 42, "type": "private"},
                        "from": {"id": 7, "is_bot": false, "username": "alice"},
                        "text": "/quote AAPL"
                    }
                },
                {"update_id": 102}
            ]
        })))
        .mount(&server)
        .await;

    let updates = client(&server)
        .get_updates(101, Duration::from_secs(0))
        .await
        .unwrap();

    assert_eq!(updates.len(), 2);
    let message = updates[0].message.as_ref().unwrap();
    assert_eq!(message.chat.id, 42);
    assert_eq!(message.text.as_deref(), Some("/quote AAPL"));
    assert!(updates[1].message.is_none());
}

#[tokio::test]
async fn test_get_updates_not_ok() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/botTOKEN/getUpdates"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "ok": false,
            "description": "Conflict: terminated by other getUpdates request"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_updates(0, Duration::from_secs(0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Conflict"));
}
