//! Outbound delivery clients.
//!
//! Thin wrappers over the WhatsApp HTTP gateway and the Telegram Bot API.
//! Delivery failures are logged and never surfaced to the inbound webhook:
//! the transports must always see 200.

use std::time::Duration;

use anyhow::Context;
use serde_json::json;

/// Delay before a secondary message so the client renders them in order.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Client for the WhatsApp HTTP gateway's send API.
pub struct WahaClient {
    http: reqwest::Client,
    base_url: String,
    session: String,
    api_key: Option<String>,
}

impl WahaClient {
    /// Create a client for the gateway at `base_url`.
    pub fn new(base_url: String, session: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            api_key,
        }
    }

    /// Send one text message to a chat.
    ///
    /// # Errors
    ///
    /// Returns an error when the gateway call fails or responds non-2xx.
    pub async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let mut request = self
            .http
            .post(format!("{}/api/sendText", self.base_url))
            .json(&json!({
                "session": self.session,
                "chatId": chat_id,
                "text": text,
            }));
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await.context("gateway send failed")?;
        response
            .error_for_status()
            .context("gateway rejected send")?;
        Ok(())
    }

    /// Send a reply and an optional secondary message, the secondary after
    /// a short settle delay to preserve ordering at the client.
    pub async fn deliver(&self, chat_id: &str, reply: &str, secondary: Option<&str>) {
        if let Err(e) = self.send_text(chat_id, reply).await {
            tracing::error!("reply delivery failed for {}: {:#}", chat_id, e);
            return;
        }
        if let Some(secondary) = secondary {
            tokio::time::sleep(SETTLE_DELAY).await;
            if let Err(e) = self.send_text(chat_id, secondary).await {
                tracing::error!("secondary delivery failed for {}: {:#}", chat_id, e);
            }
        }
    }
}

/// Client for the Telegram Bot API's send endpoint.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    /// Create a client for the bot identified by `token`.
    ///
    /// The token is embedded in the request URL and never logged.
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    /// Send one text message to a chat.
    ///
    /// # Errors
    ///
    /// Returns an error when the API call fails or responds non-2xx.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("telegram send failed")?;
        response
            .error_for_status()
            .context("telegram rejected send")?;
        Ok(())
    }

    /// Send a reply and an optional secondary message with the settle delay.
    pub async fn deliver(&self, chat_id: &str, reply: &str, secondary: Option<&str>) {
        if let Err(e) = self.send_message(chat_id, reply).await {
            tracing::error!("reply delivery failed for chat {}: {:#}", chat_id, e);
            return;
        }
        if let Some(secondary) = secondary {
            tokio::time::sleep(SETTLE_DELAY).await;
            if let Err(e) = self.send_message(chat_id, secondary).await {
                tracing::error!("secondary delivery failed for chat {}: {:#}", chat_id, e);
            }
        }
    }
}
