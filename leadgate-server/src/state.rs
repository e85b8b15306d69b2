//! Shared application state passed to all webhook handlers.

use std::sync::Arc;

use leadgate_core::handler::MessageHandler;
use leadgate_core::store::LeadStore;

use crate::outbound::{TelegramClient, WahaClient};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The inbound message pipeline.
    pub handler: Arc<MessageHandler>,
    /// Lead persistence, used by the health probe.
    pub store: Arc<LeadStore>,
    /// WhatsApp gateway sender; `None` when the transport is not configured.
    pub waha: Option<Arc<WahaClient>>,
    /// Telegram sender; `None` when the transport is not configured.
    pub telegram: Option<Arc<TelegramClient>>,
    /// Which KV backend is in use ("redis" or "memory"), for diagnostics.
    pub kv_backend: &'static str,
}
