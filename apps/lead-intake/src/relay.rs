use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::types::ChannelAddress;

pub const DEFAULT_TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    TransientFailure(String),
    PermanentFailure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid relay base url: {0}")]
    InvalidBaseUrl(String),
    #[error("relay http client init failed: {0}")]
    ClientInit(String),
}

/// Outbound message channel. Implementations classify every failure so the
/// dispatcher can decide whether to retry.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    fn driver_name(&self) -> &'static str;

    async fn send(&self, address: &ChannelAddress, text: &str) -> RelayOutcome;
}

/// Development relay: writes the notice to the log and reports success.
#[derive(Clone, Debug, Default)]
pub struct LogRelay;

#[async_trait]
impl MessageRelay for LogRelay {
    fn driver_name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, _address: &ChannelAddress, text: &str) -> RelayOutcome {
        tracing::info!(chars = text.chars().count(), text, "lead notice (log relay)");
        RelayOutcome::Delivered
    }
}

/// Telegram Bot API relay. An address is either `chat_id`, sent with the default
/// bot token, or `bot_token/chat_id` for contractors running their own bot.
pub struct TelegramRelay {
    client: reqwest::Client,
    api_base_url: String,
    default_bot_token: Option<String>,
}

impl TelegramRelay {
    pub fn new(
        api_base_url: &str,
        default_bot_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let api_base_url = normalize_http_base_url(api_base_url)?;
        let default_bot_token = default_bot_token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|error| RelayError::ClientInit(error.to_string()))?,
            api_base_url,
            default_bot_token,
        })
    }

    fn split_address<'a>(&'a self, address: &'a ChannelAddress) -> Result<(&'a str, &'a str), String> {
        let raw = address.as_str().trim();
        let (token, chat_id) = match raw.split_once('/') {
            Some((token, chat_id)) => (Some(token.trim()), chat_id.trim()),
            None => (self.default_bot_token.as_deref(), raw),
        };
        let token = token
            .filter(|value| !value.is_empty())
            .ok_or_else(|| "no bot token for address".to_string())?;
        if chat_id.is_empty() {
            return Err("address has no chat id".to_string());
        }
        Ok((token, chat_id))
    }
}

#[async_trait]
impl MessageRelay for TelegramRelay {
    fn driver_name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, address: &ChannelAddress, text: &str) -> RelayOutcome {
        let (token, chat_id) = match self.split_address(address) {
            Ok(parts) => parts,
            Err(reason) => return RelayOutcome::PermanentFailure(reason),
        };

        let endpoint = format!("{}/bot{token}/sendMessage", self.api_base_url);
        let response = self
            .client
            .post(endpoint)
            .header("accept", "application/json")
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            // The request url carries the bot token.
            Err(error) => {
                return RelayOutcome::TransientFailure(format!(
                    "telegram send failed: {}",
                    error.without_url()
                ));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let description = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|payload| {
                if payload.get("ok").and_then(Value::as_bool) == Some(false) {
                    Some(
                        payload
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or("telegram rejected message")
                            .to_string(),
                    )
                } else {
                    None
                }
            });

        if status.is_success() {
            return match description {
                Some(description) => RelayOutcome::PermanentFailure(description),
                None => RelayOutcome::Delivered,
            };
        }

        let message = format!(
            "telegram send failed status={} {}",
            status.as_u16(),
            description.unwrap_or_default()
        )
        .trim_end()
        .to_string();
        match classify_status(status) {
            FailureClass::Transient => RelayOutcome::TransientFailure(message),
            FailureClass::Permanent => RelayOutcome::PermanentFailure(message),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

#[must_use]
pub fn classify_status(status: StatusCode) -> FailureClass {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => FailureClass::Transient,
        s if s.is_server_error() => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

fn normalize_http_base_url(value: &str) -> Result<String, RelayError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(RelayError::InvalidBaseUrl(
            "base url must not be empty".to_string(),
        ));
    }
    let parsed = reqwest::Url::parse(normalized)
        .map_err(|error| RelayError::InvalidBaseUrl(error.to_string()))?;
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(RelayError::InvalidBaseUrl(format!(
            "unsupported scheme: {scheme}"
        )));
    }
    Ok(normalized.trim_end_matches('/').to_string())
}
