//! Leadgate core library.
//!
//! Provides the inbound message processing pipeline for the lead
//! qualification bot: admission control (idempotency, cooldown, per-user
//! locking), the conversation state machine, lead persistence, form
//! extraction, and downstream job dispatch. Transport frontends normalize
//! their webhooks through [`inbound`] and feed [`handler::MessageHandler`].

pub mod config;
pub mod cooldown;
pub mod dedup;
pub mod form;
pub mod handler;
pub mod identity;
pub mod inbound;
pub mod jobs;
pub mod kv;
pub mod lead;
pub mod lock;
pub mod state;
pub mod store;
pub mod templates;

pub use config::{Config, ConfigError, MarkProcessed, PipelineConfig};
pub use cooldown::CooldownStore;
pub use dedup::IdempotencyStore;
pub use handler::{HandlerOutcome, MessageHandler};
pub use inbound::{InboundMessage, Rejection};
pub use jobs::{
    JobDispatcher, JobHandler, JobWorker, RetryPolicy, QUEUE_OPERATOR_NOTIFY,
    QUEUE_SPREADSHEET_SYNC,
};
pub use kv::{KvError, KvStore, MemoryKv, RedisKv};
pub use lead::{Lead, Transport};
pub use lock::UserLock;
pub use state::LeadState;
pub use store::{LeadStore, StoreError};
pub use templates::{TemplateKey, Templates};
