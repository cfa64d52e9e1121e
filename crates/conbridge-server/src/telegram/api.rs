//! Raw HTTP calls to the Telegram Bot API.
//!
//! Wraps reqwest for `getUpdates`, `sendMessage` and `sendDocument`.

use std::path::Path;
use std::time::Duration;

use conbridge_core::BridgeError;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{ApiResponse, ReplyKeyboardMarkup, SentMessage, Update};

/// Extra slack on top of the long-poll timeout before reqwest gives up.
const POLL_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    Api(String),

    #[error("cannot read {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl From<TelegramError> for BridgeError {
    fn from(e: TelegramError) -> Self {
        BridgeError::Transport(e.to_string())
    }
}

/// Low-level Telegram Bot API client.
pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl TelegramApi {
    /// Create a new API client for the given bot token.
    pub fn new(bot_token: &str) -> Self {
        Self::with_base_url(bot_token, "https://api.telegram.org")
    }

    /// Create a new API client with a custom base URL (for testing).
    pub fn with_base_url(bot_token: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), bot_token),
        }
    }

    /// Send a text message to a chat, optionally replacing its reply keyboard.
    ///
    /// Returns the sent message's ID on success.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&ReplyKeyboardMarkup>,
    ) -> Result<i64, TelegramError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| TelegramError::Other(format!("serialize markup: {e}")))?;
        }

        debug!(chat_id, "sendMessage");
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .await?;

        let api_resp: ApiResponse<SentMessage> = resp.json().await?;
        check("sendMessage", &api_resp)?;
        Ok(api_resp.result.map(|m| m.message_id).unwrap_or(0))
    }

    /// Long-poll for new updates.
    ///
    /// `offset` should be set to `last_update_id + 1` to acknowledge
    /// previously received updates.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut body = json!({
            "timeout": timeout,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }

        let resp = self
            .client
            .post(format!("{}/getUpdates", self.base_url))
            .timeout(Duration::from_secs(timeout) + POLL_SLACK)
            .json(&body)
            .send()
            .await?;

        let api_resp: ApiResponse<Vec<Update>> = resp.json().await?;
        check("getUpdates", &api_resp)?;
        Ok(api_resp.result.unwrap_or_default())
    }

    /// Upload a file from disk as a document.
    pub async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<i64, TelegramError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| TelegramError::File {
                path: path.display().to_string(),
                source,
            })?;
        debug!(chat_id, file = %file_name, bytes = data.len(), "sendDocument");

        let part = reqwest::multipart::Part::bytes(data).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let resp = self
            .client
            .post(format!("{}/sendDocument", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let api_resp: ApiResponse<SentMessage> = resp.json().await?;
        check("sendDocument", &api_resp)?;
        Ok(api_resp.result.map(|m| m.message_id).unwrap_or(0))
    }
}

fn check<T>(method: &str, resp: &ApiResponse<T>) -> Result<(), TelegramError> {
    if resp.ok {
        return Ok(());
    }
    let desc = resp.description.clone().unwrap_or_default();
    warn!("{method} failed: {desc}");
    Err(TelegramError::Api(desc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::KeyboardButton;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_message_with_keyboard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottok/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": 42,
                "text": "hello",
                "reply_markup": {"keyboard": [[{"text": "🔙 Back"}]], "resize_keyboard": true}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": {"message_id": 9}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("tok", &server.uri());
        let kb = ReplyKeyboardMarkup {
            keyboard: vec![vec![KeyboardButton {
                text: "🔙 Back".into(),
            }]],
            resize_keyboard: true,
        };
        assert_eq!(api.send_message(42, "hello", Some(&kb)).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottok/sendMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "description": "chat not found"})),
            )
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("tok", &server.uri());
        match api.send_message(1, "x", None).await {
            Err(TelegramError::Api(desc)) => assert_eq!(desc, "chat not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_updates_sends_offset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottok/getUpdates"))
            .and(body_partial_json(json!({"offset": 11, "timeout": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [{
                    "update_id": 11,
                    "message": {"message_id": 1, "chat": {"id": 5}, "date": 0, "text": "1"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("tok", &server.uri());
        let updates = api.get_updates(Some(11), 0).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 11);
    }

    #[tokio::test]
    async fn send_document_uploads_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("capture.cap");
        std::fs::write(&file, b"pcap-bytes").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottok/sendDocument"))
            .and(body_string_contains("pcap-bytes"))
            .and(body_string_contains("filename=\"capture.cap\""))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": {"message_id": 3}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("tok", &server.uri());
        api.send_document(42, &file, "capture.cap", "📁 capture.cap")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_document_missing_file() {
        let api = TelegramApi::with_base_url("tok", "http://127.0.0.1:9");
        let err = api
            .send_document(42, Path::new("/no/such/file.cap"), "file.cap", "")
            .await
            .unwrap_err();
        assert!(matches!(err, TelegramError::File { .. }));
    }
}
