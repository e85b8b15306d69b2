//! Inbound message normalization.
//!
//! Turns transport webhook payloads into the [`InboundMessage`] envelope the
//! handler consumes: WhatsApp jid normalization, group/broadcast detection,
//! admission validation, and a heuristic intent classifier used for logging.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::lead::Transport;

/// Normalized inbound message, transport differences erased.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Transport the message arrived on.
    pub transport: Transport,
    /// Transport-assigned message id, unique per transport.
    pub message_id: String,
    /// Normalized sender id (recipient id for our own outbound copies).
    pub user_id: String,
    /// Message text.
    pub text: String,
    /// Whether the transport marked the message as sent by us.
    pub from_me: bool,
    /// Whether the message belongs to a group chat.
    pub is_group: bool,
    /// Whether the message belongs to a broadcast/status channel.
    pub is_broadcast: bool,
    /// Transport timestamp.
    pub timestamp: DateTime<Utc>,
    /// Secondary identifiers the transport exposed.
    pub metadata: MessageMetadata,
}

/// Secondary identifiers carried alongside a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMetadata {
    /// Alternate id for the same human (e.g. a linked-device jid).
    pub alt_id: Option<String>,
    /// Bare phone digits, when a phone-style jid was observed.
    pub phone: Option<String>,
    /// Display name last observed.
    pub push_name: Option<String>,
}

/// Why a message was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No transport message id.
    MissingMessageId,
    /// No resolvable user id.
    MissingUserId,
    /// The transport marked the message as our own outbound.
    FromMe,
    /// Group chat message.
    Group,
    /// Broadcast/status message.
    Broadcast,
    /// Empty or whitespace-only text.
    EmptyText,
    /// Telegram update without message text.
    NonText,
    /// Telegram message authored by a bot.
    BotAuthor,
    /// Telegram chat other than a private one.
    NonPrivateChat,
}

impl Rejection {
    /// Response tag the webhook surface reports for this rejection.
    pub fn response_type(&self) -> &'static str {
        match self {
            Rejection::Group => "group_ignored",
            Rejection::Broadcast => "broadcast_ignored",
            Rejection::FromMe => "from_me",
            _ => "ignored",
        }
    }
}

/// Heuristic message intent. Logging only; dispatch is driven by lead state
/// and literal content, never by this classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Leading greeting word.
    Greeting,
    /// A bare menu digit.
    OptionSelect,
    /// Trailing question mark or leading interrogative.
    Question,
    /// Looks like form content.
    FormResponse,
    /// Anything else.
    Unknown,
}

// ── WhatsApp gateway wire format ──

/// Webhook envelope posted by the WhatsApp HTTP gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct WahaWebhook {
    /// Event name; only `message` and `message.any` carry messages.
    pub event: String,
    /// Gateway session identifier.
    #[serde(default)]
    pub session: Option<String>,
    /// Message payload; absent on non-message events.
    #[serde(default)]
    pub payload: Option<WahaPayload>,
}

/// Message payload of a gateway webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct WahaPayload {
    /// Gateway message id.
    #[serde(default)]
    pub id: Option<String>,
    /// Sender jid.
    #[serde(default)]
    pub from: Option<String>,
    /// Recipient jid (present on our own outbound copies).
    #[serde(default)]
    pub to: Option<String>,
    /// Message text.
    #[serde(default)]
    pub body: Option<String>,
    /// Whether we sent this message.
    #[serde(default, rename = "fromMe")]
    pub from_me: bool,
    /// Gateway group flag.
    #[serde(default, rename = "isGroup")]
    pub is_group: Option<bool>,
    /// Group sender, present only on group messages.
    #[serde(default)]
    pub participant: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Chat jid.
    #[serde(default, rename = "chatId")]
    pub chat_id: Option<String>,
    /// Raw client data.
    #[serde(default, rename = "_data")]
    pub data: Option<WahaRawData>,
}

/// Raw client data block.
#[derive(Debug, Clone, Deserialize)]
pub struct WahaRawData {
    /// Message key.
    #[serde(default)]
    pub key: Option<WahaKey>,
    /// Sender display name.
    #[serde(default, rename = "pushName")]
    pub push_name: Option<String>,
}

/// Message key within the raw client data.
#[derive(Debug, Clone, Deserialize)]
pub struct WahaKey {
    /// Chat jid as the client sees it.
    #[serde(default, rename = "remoteJid")]
    pub remote_jid: Option<String>,
    /// Alternate jid for the same chat (linked-device form).
    #[serde(default, rename = "remoteJidAlt")]
    pub remote_jid_alt: Option<String>,
    /// Client-side from-me flag.
    #[serde(default, rename = "fromMe")]
    pub from_me: Option<bool>,
}

// ── Telegram wire format ──

/// Telegram webhook update.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    /// Update sequence number.
    pub update_id: i64,
    /// Message content; absent on non-message updates.
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

/// Telegram message.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    /// Per-chat message id.
    pub message_id: i64,
    /// Author.
    #[serde(default)]
    pub from: Option<TelegramUser>,
    /// Chat the message belongs to.
    pub chat: TelegramChat,
    /// Unix timestamp in seconds.
    pub date: i64,
    /// Message text; absent for media.
    #[serde(default)]
    pub text: Option<String>,
}

/// Telegram user.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    /// User id.
    pub id: i64,
    /// Whether the author is a bot.
    #[serde(default)]
    pub is_bot: bool,
    /// Display name.
    #[serde(default)]
    pub first_name: Option<String>,
}

/// Telegram chat.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    /// Chat id.
    pub id: i64,
    /// Chat type: private, group, supergroup, channel.
    #[serde(rename = "type")]
    pub kind: String,
}

// ── Normalization ──

const WA_SERVER_SUFFIX: &str = "@s.whatsapp.net";
const WA_LEGACY_SUFFIX: &str = "@c.us";
const WA_LID_SUFFIX: &str = "@lid";

/// Normalize a WhatsApp user identifier.
///
/// `@lid` and `@s.whatsapp.net` forms are preserved, the legacy `@c.us`
/// suffix is rewritten, and bare phone digits (10+) get the server suffix.
/// Anything else passes through untouched.
pub fn normalize_user_id(raw: &str) -> String {
    let raw = raw.trim();
    if raw.ends_with(WA_LID_SUFFIX) || raw.ends_with(WA_SERVER_SUFFIX) {
        return raw.to_string();
    }
    if let Some(stripped) = raw.strip_suffix(WA_LEGACY_SUFFIX) {
        return format!("{stripped}{WA_SERVER_SUFFIX}");
    }
    if raw.len() >= 10 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return format!("{raw}{WA_SERVER_SUFFIX}");
    }
    raw.to_string()
}

fn is_group_jid(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

fn is_broadcast_jid(jid: &str) -> bool {
    jid.contains("status@broadcast") || jid.ends_with("@broadcast")
}

fn phone_digits(jid: &str) -> Option<String> {
    jid.strip_suffix(WA_SERVER_SUFFIX)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
}

fn timestamp_or_now(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

/// Normalize a WhatsApp gateway webhook into an [`InboundMessage`].
///
/// Returns `None` when the event carries no message payload.
pub fn from_waha(webhook: &WahaWebhook) -> Option<InboundMessage> {
    if webhook.event != "message" && webhook.event != "message.any" {
        return None;
    }
    let payload = webhook.payload.as_ref()?;

    let key = payload.data.as_ref().and_then(|d| d.key.as_ref());
    let from_me = key.and_then(|k| k.from_me).unwrap_or(payload.from_me);

    // For our own outbound copies the conversation peer is the recipient.
    let raw_user = if from_me {
        payload
            .chat_id
            .as_deref()
            .or(payload.to.as_deref())
            .or(payload.from.as_deref())
    } else {
        key.and_then(|k| k.remote_jid.as_deref())
            .or(payload.from.as_deref())
            .or(payload.chat_id.as_deref())
    };

    let chat_jid = payload
        .chat_id
        .as_deref()
        .or(key.and_then(|k| k.remote_jid.as_deref()))
        .or(payload.from.as_deref())
        .unwrap_or("");

    let is_group = payload.is_group.unwrap_or(false)
        || payload.participant.is_some()
        || is_group_jid(chat_jid)
        || raw_user.map(is_group_jid).unwrap_or(false);
    let is_broadcast =
        is_broadcast_jid(chat_jid) || raw_user.map(is_broadcast_jid).unwrap_or(false);

    let user_id = raw_user.map(normalize_user_id).unwrap_or_default();
    let alt_id = key
        .and_then(|k| k.remote_jid_alt.as_deref())
        .map(normalize_user_id)
        .filter(|alt| !alt.is_empty() && *alt != user_id);

    // A phone-style jid on either side yields the bare digits.
    let phone = phone_digits(&user_id).or_else(|| alt_id.as_deref().and_then(phone_digits));

    Some(InboundMessage {
        transport: Transport::Whatsapp,
        message_id: payload.id.clone().unwrap_or_default(),
        user_id,
        text: payload.body.clone().unwrap_or_default(),
        from_me,
        is_group,
        is_broadcast,
        timestamp: timestamp_or_now(payload.timestamp),
        metadata: MessageMetadata {
            alt_id,
            phone,
            push_name: payload
                .data
                .as_ref()
                .and_then(|d| d.push_name.clone())
                .filter(|n| !n.is_empty()),
        },
    })
}

/// Normalize a Telegram update into an [`InboundMessage`].
///
/// Only private-chat text messages from human authors are accepted.
///
/// # Errors
///
/// Returns the [`Rejection`] explaining why the update was refused.
pub fn from_telegram(update: &TelegramUpdate) -> Result<InboundMessage, Rejection> {
    let message = update.message.as_ref().ok_or(Rejection::NonText)?;
    let text = message.text.as_deref().ok_or(Rejection::NonText)?;
    let from = message.from.as_ref().ok_or(Rejection::MissingUserId)?;

    if from.is_bot {
        return Err(Rejection::BotAuthor);
    }
    if message.chat.kind != "private" {
        return Err(Rejection::NonPrivateChat);
    }

    Ok(InboundMessage {
        transport: Transport::Telegram,
        // Telegram message ids are per-chat; scope them for dedup.
        message_id: format!("{}:{}", message.chat.id, message.message_id),
        user_id: from.id.to_string(),
        text: text.to_string(),
        from_me: false,
        is_group: false,
        is_broadcast: false,
        timestamp: timestamp_or_now(Some(message.date)),
        metadata: MessageMetadata {
            alt_id: None,
            phone: None,
            push_name: from.first_name.clone(),
        },
    })
}

/// Admission check for a normalized message.
///
/// # Errors
///
/// Returns the first applicable [`Rejection`]. `FromMe` callers may still
/// route the message to the handler's outbound-copy path.
pub fn validate(msg: &InboundMessage) -> Result<(), Rejection> {
    if msg.message_id.is_empty() {
        return Err(Rejection::MissingMessageId);
    }
    if msg.user_id.is_empty() {
        return Err(Rejection::MissingUserId);
    }
    if msg.is_broadcast {
        return Err(Rejection::Broadcast);
    }
    if msg.is_group {
        return Err(Rejection::Group);
    }
    if msg.from_me {
        return Err(Rejection::FromMe);
    }
    if msg.text.trim().is_empty() {
        return Err(Rejection::EmptyText);
    }
    Ok(())
}

const GREETING_WORDS: [&str; 11] = [
    "hi", "hello", "halo", "hai", "selamat", "salam", "hey", "pagi", "siang", "sore", "malam",
];

const INTERROGATIVES: [&str; 15] = [
    "apa", "bagaimana", "gimana", "berapa", "kapan", "dimana", "siapa", "mengapa", "kenapa",
    "what", "how", "when", "where", "who", "why",
];

/// Classify a message's intent. Heuristic, used for logging only.
pub fn detect_intent(text: &str) -> Intent {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    let first_word = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");

    if GREETING_WORDS.contains(&first_word) {
        return Intent::Greeting;
    }

    if trimmed.len() == 1 && trimmed.chars().all(|c| ('1'..='9').contains(&c)) {
        return Intent::OptionSelect;
    }

    if trimmed.ends_with('?') || INTERROGATIVES.contains(&first_word) {
        return Intent::Question;
    }

    if crate::form::form_keyword_count(&lower) >= 2 || trimmed.contains('\n') {
        return Intent::FormResponse;
    }

    Intent::Unknown
}

#[cfg(test)]
mod tests;
