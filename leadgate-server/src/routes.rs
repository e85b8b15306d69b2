//! Webhook endpoints.
//!
//! Both transports are acknowledged with HTTP 200 on every path, including
//! internal failures; surfacing an error status would only trigger webhook
//! retry storms. Failures are logged and reported in the body instead.

use axum::Json;
use axum::extract::State;
use leadgate_core::inbound::{self, InboundMessage, Rejection, TelegramUpdate, WahaWebhook};
use serde::Serialize;

use crate::state::AppState;

/// Body returned to every webhook call.
#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookResponse {
    /// Whether the message was fully processed.
    pub success: bool,
    /// Outcome tag (e.g. `ignored`, `group_ignored`, `lock_failed`).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl WebhookResponse {
    fn ok() -> Self {
        Self {
            success: true,
            kind: None,
        }
    }

    fn ignored(kind: &'static str) -> Self {
        Self {
            success: true,
            kind: Some(kind),
        }
    }

    fn failed(kind: Option<&'static str>) -> Self {
        Self {
            success: false,
            kind,
        }
    }
}

/// `POST /waha/webhook`
///
/// WhatsApp gateway events. Non-message events, groups, and broadcasts are
/// acknowledged without effect; our own outbound copies update the lead
/// record through the handler's outbound path.
pub async fn waha_webhook(
    State(state): State<AppState>,
    body: String,
) -> Json<WebhookResponse> {
    let webhook: WahaWebhook = match serde_json::from_str(&body) {
        Ok(webhook) => webhook,
        Err(e) => {
            tracing::warn!("malformed gateway webhook: {}", e);
            return Json(WebhookResponse::failed(Some("malformed")));
        }
    };

    let Some(msg) = inbound::from_waha(&webhook) else {
        return Json(WebhookResponse::ignored("ignored"));
    };

    match inbound::validate(&msg) {
        // Outbound copies still go through the handler's recording path.
        Ok(()) | Err(Rejection::FromMe) => Json(process(&state, msg, state.waha.clone()).await),
        Err(rejection) => {
            tracing::debug!(
                "gateway message {} rejected: {:?}",
                msg.message_id,
                rejection
            );
            Json(WebhookResponse::ignored(rejection.response_type()))
        }
    }
}

/// `POST /telegram/webhook`
///
/// Telegram updates. Non-text, bot-author, and non-private updates are
/// acknowledged with no effect.
pub async fn telegram_webhook(
    State(state): State<AppState>,
    body: String,
) -> Json<WebhookResponse> {
    let update: TelegramUpdate = match serde_json::from_str(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!("malformed telegram update: {}", e);
            return Json(WebhookResponse::failed(Some("malformed")));
        }
    };

    let msg = match inbound::from_telegram(&update) {
        Ok(msg) => msg,
        Err(rejection) => {
            tracing::debug!("telegram update {} rejected: {:?}", update.update_id, rejection);
            return Json(WebhookResponse::ignored(rejection.response_type()));
        }
    };

    match inbound::validate(&msg) {
        Ok(()) => Json(process_telegram(&state, msg).await),
        Err(rejection) => Json(WebhookResponse::ignored(rejection.response_type())),
    }
}

/// Run the pipeline and hand any reply to the gateway sender.
async fn process(
    state: &AppState,
    msg: InboundMessage,
    sender: Option<std::sync::Arc<crate::outbound::WahaClient>>,
) -> WebhookResponse {
    let outcome = state.handler.handle(&msg).await;

    if outcome.should_reply
        && let Some(reply) = outcome.reply_text.clone()
    {
        match sender {
            Some(sender) => {
                let chat_id = msg.user_id.clone();
                let secondary = outcome.secondary_text.clone();
                // Deliver off the webhook path; the transport already got its 200.
                tokio::spawn(async move {
                    sender.deliver(&chat_id, &reply, secondary.as_deref()).await;
                });
            }
            None => tracing::warn!("no gateway sender configured; dropping reply"),
        }
    }

    if outcome.success {
        WebhookResponse::ok()
    } else {
        WebhookResponse::failed(outcome.error)
    }
}

/// Run the pipeline and hand any reply to the Telegram sender.
async fn process_telegram(state: &AppState, msg: InboundMessage) -> WebhookResponse {
    let outcome = state.handler.handle(&msg).await;

    if outcome.should_reply
        && let Some(reply) = outcome.reply_text.clone()
    {
        match state.telegram.clone() {
            Some(sender) => {
                let chat_id = msg.user_id.clone();
                let secondary = outcome.secondary_text.clone();
                tokio::spawn(async move {
                    sender.deliver(&chat_id, &reply, secondary.as_deref()).await;
                });
            }
            None => tracing::warn!("no telegram sender configured; dropping reply"),
        }
    }

    if outcome.success {
        WebhookResponse::ok()
    } else {
        WebhookResponse::failed(outcome.error)
    }
}

/// Liveness body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: `ok` or `degraded`.
    pub status: &'static str,
    /// Relational store status.
    pub database: &'static str,
    /// Which KV backend is in use.
    pub kv_backend: &'static str,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("health probe: database down: {}", e);
            "down"
        }
    };
    Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" },
        database,
        kv_backend: state.kv_backend,
    })
}
