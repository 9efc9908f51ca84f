use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Identity-check timeout. The Bot API answers `getMe` quickly; anything
/// slower means the network is down.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total budget for one `getUpdates` round trip. Must stay above the
/// server-side long-poll budget below.
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long Telegram holds the long poll open before returning empty.
const LONG_POLL_SECS: u64 = 5;

/// Classified failures from the message source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid bot token")]
    Unauthorized,
    #[error("bot not found")]
    NotFound,
    #[error("bot access forbidden")]
    Forbidden,
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Transient(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl BotIdentity {
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(u) => format!("@{}", u),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    DirectMessage,
    ChannelPost,
}

/// One new message pulled from the source, consumed within a single poll
/// cycle.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Long-poll cursor value; ephemeral, distinct from the message id.
    pub update_id: i64,
    pub chat_id: String,
    pub message_id: i64,
    pub text: String,
    pub kind: MessageKind,
}

/// The poll worker's view of the message source.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn verify_identity(&self) -> Result<BotIdentity, SourceError>;

    /// Fetches updates strictly after `after_id` (`after_id == 0` means from
    /// the beginning). Callers must still filter against their own watermark.
    async fn fetch_updates(&self, after_id: i64) -> Result<Vec<InboundMessage>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<MessagePayload>,
    #[serde(default)]
    channel_post: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Telegram Bot API client over plain HTTP long polling.
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{}", bot_token),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    async fn read_result<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SourceError> {
        let status = response.status();
        match status.as_u16() {
            401 => return Err(SourceError::Unauthorized),
            403 => return Err(SourceError::Forbidden),
            404 => return Err(SourceError::NotFound),
            _ => {}
        }

        let envelope: ApiEnvelope<T> = response.json().await.map_err(request_error)?;
        if !envelope.ok {
            return Err(match envelope.error_code.unwrap_or_default() {
                401 => SourceError::Unauthorized,
                403 => SourceError::Forbidden,
                404 => SourceError::NotFound,
                _ => SourceError::Transient(
                    envelope
                        .description
                        .unwrap_or_else(|| format!("Telegram API error ({})", status)),
                ),
            });
        }

        envelope
            .result
            .ok_or_else(|| SourceError::Transient("Telegram response missing result".to_string()))
    }
}

fn request_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Transient(e.to_string())
    }
}

#[async_trait]
impl MessageSource for TelegramClient {
    async fn verify_identity(&self) -> Result<BotIdentity, SourceError> {
        let url = format!("{}/getMe", self.base_url);
        debug!("Verifying bot identity: {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;

        Self::read_result(response).await
    }

    async fn fetch_updates(&self, after_id: i64) -> Result<Vec<InboundMessage>, SourceError> {
        let url = format!("{}/getUpdates", self.base_url);
        let request = GetUpdatesRequest {
            timeout: LONG_POLL_SECS,
            offset: (after_id > 0).then(|| after_id + 1),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(POLL_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;

        let updates: Vec<Update> = Self::read_result(response).await?;

        let mut messages = Vec::with_capacity(updates.len());
        for update in updates {
            let (payload, kind) = match (update.message, update.channel_post) {
                (Some(m), _) => (m, MessageKind::DirectMessage),
                (None, Some(p)) => (p, MessageKind::ChannelPost),
                (None, None) => {
                    debug!("Skipping update {} with no message payload", update.update_id);
                    continue;
                }
            };
            messages.push(InboundMessage {
                update_id: update.update_id,
                chat_id: payload.chat.id.to_string(),
                message_id: payload.message_id,
                text: payload.text.unwrap_or_default(),
                kind,
            });
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> TelegramClient {
        TelegramClient::new("123456789:TEST").with_base_url(server.uri())
    }

    #[tokio::test]
    async fn verify_identity_returns_bot_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 42, "is_bot": true, "first_name": "Wled", "username": "wled_bot"}
            })))
            .mount(&server)
            .await;

        let identity = test_client(&server).verify_identity().await.unwrap();
        assert_eq!(identity.id, 42);
        assert_eq!(identity.display_name(), "@wled_bot");
    }

    #[tokio::test]
    async fn verify_identity_classifies_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getMe"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "ok": false, "error_code": 401, "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let err = test_client(&server).verify_identity().await.unwrap_err();
        assert!(matches!(err, SourceError::Unauthorized));
    }

    #[tokio::test]
    async fn api_level_error_code_is_classified() {
        // Telegram sometimes answers 200 with ok=false; the error_code
        // inside the envelope still drives classification.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false, "error_code": 404, "description": "Not Found"
            })))
            .mount(&server)
            .await;

        let err = test_client(&server).fetch_updates(0).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound));
    }

    #[tokio::test]
    async fn fetch_requests_strictly_after_offset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getUpdates"))
            .and(body_json(json!({"timeout": 5, "offset": 6})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let messages = test_client(&server).fetch_updates(5).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn fetch_from_beginning_omits_offset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getUpdates"))
            .and(body_json(json!({"timeout": 5})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        test_client(&server).fetch_updates(0).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_maps_both_message_kinds_and_skips_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 100, "message":
                        {"message_id": 7, "chat": {"id": -1001234567890i64}, "text": "hi"}},
                    {"update_id": 101, "channel_post":
                        {"message_id": 8, "chat": {"id": -1001234567890i64}}},
                    {"update_id": 102, "edited_message":
                        {"message_id": 7, "chat": {"id": -1001234567890i64}, "text": "hi!"}}
                ]
            })))
            .mount(&server)
            .await;

        let messages = test_client(&server).fetch_updates(0).await.unwrap();
        assert_eq!(messages.len(), 2);

        assert_eq!(messages[0].update_id, 100);
        assert_eq!(messages[0].chat_id, "-1001234567890");
        assert_eq!(messages[0].message_id, 7);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[0].kind, MessageKind::DirectMessage);

        assert_eq!(messages[1].kind, MessageKind::ChannelPost);
        assert_eq!(messages[1].text, "");
    }
}
