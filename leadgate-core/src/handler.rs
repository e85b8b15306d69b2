//! The inbound message pipeline.
//!
//! Sole entry point for a normalized inbound message. Composes admission
//! control (dedup, cooldown, per-user mutex), the transactional lead
//! decision sequence, state dispatch, and post-commit side effects into
//! one at-most-once, per-user-serialized flow.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{MarkProcessed, PipelineConfig};
use crate::cooldown::CooldownStore;
use crate::dedup::IdempotencyStore;
use crate::form;
use crate::inbound::{self, InboundMessage};
use crate::jobs::{
    EscalationData, JobDispatcher, NotificationKind, OperatorNotifyJob, PendingJob,
    SpreadsheetSyncJob,
};
use crate::kv::KvStore;
use crate::lead::{Direction, Lead};
use crate::lock::UserLock;
use crate::state::LeadState;
use crate::store::{LeadOptions, LeadStore, StoreError};
use crate::templates::{TemplateKey, Templates};

/// Escalation reason for repeated invalid input.
const REASON_MAX_WARNINGS: &str = "max_warnings";
/// Escalation reason for a message after form completion.
const REASON_POST_FORM: &str = "post_form_contact";
/// Escalation reason for a message on the partnership track.
const REASON_PARTNERSHIP: &str = "partnership_followup";

/// What the pipeline decided for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    /// Whether processing completed. `false` asks the transport to treat
    /// the message as undelivered (it may redeliver).
    pub success: bool,
    /// Whether the adapter should send a reply.
    pub should_reply: bool,
    /// The reply text, when `should_reply`.
    pub reply_text: Option<String>,
    /// A follow-up message the adapter sends after a settle delay.
    pub secondary_text: Option<String>,
    /// Machine-readable failure tag when `success` is `false`.
    pub error: Option<&'static str>,
}

impl HandlerOutcome {
    fn silent() -> Self {
        Self {
            success: true,
            should_reply: false,
            reply_text: None,
            secondary_text: None,
            error: None,
        }
    }

    fn reply(text: String) -> Self {
        Self {
            success: true,
            should_reply: true,
            reply_text: Some(text),
            secondary_text: None,
            error: None,
        }
    }

    fn reply_with_secondary(text: String, secondary: String) -> Self {
        Self {
            secondary_text: Some(secondary),
            ..Self::reply(text)
        }
    }

    fn failed(error: &'static str) -> Self {
        Self {
            success: false,
            should_reply: false,
            reply_text: None,
            secondary_text: None,
            error: Some(error),
        }
    }
}

/// Internal pipeline failure; mapped to a `success = false` outcome.
#[derive(Debug, Error)]
enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reply decision assembled during state dispatch.
#[derive(Debug, Default)]
struct Decision {
    reply: Option<String>,
    secondary: Option<String>,
}

impl Decision {
    fn reply(text: String) -> Self {
        Self {
            reply: Some(text),
            secondary: None,
        }
    }
}

/// The inbound message pipeline.
pub struct MessageHandler {
    store: Arc<LeadStore>,
    dedup: IdempotencyStore,
    lock: UserLock,
    cooldown: CooldownStore,
    dispatcher: JobDispatcher,
    templates: Templates,
    max_warnings: u32,
    lock_max_attempts: u32,
    mark_processed: MarkProcessed,
}

impl MessageHandler {
    /// Wire the pipeline over the lead store and the shared KV store.
    pub fn new(
        store: Arc<LeadStore>,
        kv: Arc<dyn KvStore>,
        templates: Templates,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            dedup: IdempotencyStore::new(
                Arc::clone(&kv),
                Duration::from_secs(config.idempotency_ttl_seconds),
            ),
            lock: UserLock::new(Arc::clone(&kv), Duration::from_secs(config.lock_ttl_seconds)),
            cooldown: CooldownStore::new(
                Arc::clone(&kv),
                Duration::from_secs(config.user_cooldown_seconds),
            ),
            dispatcher: JobDispatcher::new(kv),
            templates,
            max_warnings: config.max_warnings,
            lock_max_attempts: config.lock_max_attempts,
            mark_processed: config.mark_processed,
        }
    }

    /// Process one inbound message end to end.
    ///
    /// Never fails the caller: every internal error is logged and folded
    /// into the outcome so the webhook surface can always acknowledge.
    pub async fn handle(&self, msg: &InboundMessage) -> HandlerOutcome {
        // 1. Idempotency: fence before any processing so `message` and
        //    `message.any` duplicates collapse to one effect.
        if self.dedup.seen(msg.transport, &msg.message_id).await {
            tracing::info!("duplicate message {} on {}", msg.message_id, msg.transport);
            return HandlerOutcome::silent();
        }
        if self.mark_processed == MarkProcessed::Before {
            self.dedup.mark(msg.transport, &msg.message_id).await;
        }

        // 2. Our own outbound copies only refresh the lead record.
        if msg.from_me {
            return match self.record_outbound(msg).await {
                Ok(()) => HandlerOutcome::silent(),
                Err(e) => {
                    tracing::error!("outbound recording failed for {}: {}", msg.user_id, e);
                    HandlerOutcome::failed("database_failure")
                }
            };
        }

        tracing::debug!(
            "message {} from {}: intent {:?}",
            msg.message_id,
            msg.user_id,
            inbound::detect_intent(&msg.text)
        );

        // 3. Cooldown: log the interaction, stay silent.
        if self.cooldown.in_cooldown(&msg.user_id).await {
            tracing::info!("cooldown active for {}", msg.user_id);
            if let Err(e) = self.record_inbound_only(msg).await {
                tracing::error!("cooldown logging failed for {}: {}", msg.user_id, e);
            }
            return HandlerOutcome::silent();
        }

        // 4. Per-user mutex.
        let Some(token) = self
            .lock
            .acquire_with_retry(&msg.user_id, self.lock_max_attempts)
            .await
        else {
            // Give the transport a chance to redeliver: drop our mark.
            if self.mark_processed == MarkProcessed::Before {
                self.dedup.unmark(msg.transport, &msg.message_id).await;
            }
            return HandlerOutcome::failed("lock_failed");
        };

        // 5. Transactional decision sequence; the lock is released on every
        //    path and the transaction rolls back on drop.
        let result = self.process(msg).await;
        self.lock.release(&token).await;

        match result {
            Ok((decision, jobs)) => {
                // 6. Post-commit effects.
                if self.mark_processed == MarkProcessed::AfterCommit {
                    self.dedup.mark(msg.transport, &msg.message_id).await;
                }
                self.dispatcher.flush(jobs).await;

                match decision.reply {
                    Some(reply) => {
                        self.cooldown.set_cooldown(&msg.user_id).await;
                        match decision.secondary {
                            Some(secondary) => {
                                HandlerOutcome::reply_with_secondary(reply, secondary)
                            }
                            None => HandlerOutcome::reply(reply),
                        }
                    }
                    None => HandlerOutcome::silent(),
                }
            }
            Err(e) => {
                tracing::error!("processing failed for {}: {}", msg.user_id, e);
                HandlerOutcome::failed("database_failure")
            }
        }
    }

    /// Steps 5.a–5.e inside one transaction. Returns the reply decision and
    /// the jobs to flush after commit.
    async fn process(
        &self,
        msg: &InboundMessage,
    ) -> Result<(Decision, Vec<PendingJob>), HandlerError> {
        let mut tx = self.store.begin().await?;
        let mut jobs = Vec::new();

        // Reconcile identities before any lookup-by-primary can create a
        // second row for the same human.
        self.store
            .resolve_identity(&mut tx, &msg.user_id, msg.metadata.alt_id.as_deref())
            .await?;

        let (lead, is_new) = self
            .store
            .get_or_create(
                &mut tx,
                &msg.user_id,
                msg.transport,
                LeadOptions {
                    push_name: msg.metadata.push_name.clone(),
                    alt_id: msg.metadata.alt_id.clone(),
                },
            )
            .await?;

        if is_new {
            tracing::info!("new lead {} via {}", lead.lead_id, msg.transport);
            jobs.push(PendingJob::OperatorNotify(OperatorNotifyJob {
                kind: NotificationKind::NewLead,
                data: serde_json::json!({
                    "user_id": msg.user_id,
                    "push_name": msg.metadata.push_name,
                    "transport": msg.transport,
                }),
            }));
        }

        self.store
            .add_interaction(&mut tx, lead.lead_id, &msg.message_id, &msg.text, Direction::In)
            .await?;

        // Operator-owned states stay silent; their messages are only logged.
        if matches!(
            lead.state,
            LeadState::Existing | LeadState::ManualIntervention
        ) {
            tx.commit()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            return Ok((Decision::default(), jobs));
        }

        let decision = self.dispatch(&mut tx, &lead, msg, &mut jobs).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok((decision, jobs))
    }

    /// State dispatch (step 5.e).
    async fn dispatch(
        &self,
        tx: &mut sqlx::SqliteConnection,
        lead: &Lead,
        msg: &InboundMessage,
        jobs: &mut Vec<PendingJob>,
    ) -> Result<Decision, HandlerError> {
        match lead.state {
            LeadState::New => {
                self.store
                    .update_state(&mut *tx, lead.lead_id, LeadState::ChooseOption)
                    .await?;
                Ok(Decision::reply(self.templates.get(TemplateKey::Welcome)))
            }
            LeadState::ChooseOption => self.dispatch_option(tx, lead, msg, jobs).await,
            LeadState::FormSent | LeadState::FormInProgress => {
                self.dispatch_form(tx, lead, msg, jobs).await
            }
            LeadState::FormCompleted => {
                self.escalate(tx, lead, msg, REASON_POST_FORM, jobs).await?;
                Ok(Decision::reply(
                    self.templates.get(TemplateKey::QuestionReceived),
                ))
            }
            LeadState::Partnership => {
                self.escalate(tx, lead, msg, REASON_PARTNERSHIP, jobs).await?;
                Ok(Decision::reply(
                    self.templates.get(TemplateKey::QuestionReceived),
                ))
            }
            // Unreachable: filtered before dispatch.
            LeadState::Existing | LeadState::ManualIntervention => Ok(Decision::default()),
        }
    }

    /// CHOOSE_OPTION: the literal menu choice drives the branch.
    async fn dispatch_option(
        &self,
        tx: &mut sqlx::SqliteConnection,
        lead: &Lead,
        msg: &InboundMessage,
        jobs: &mut Vec<PendingJob>,
    ) -> Result<Decision, HandlerError> {
        match msg.text.trim() {
            "1" => {
                self.store
                    .update_state(&mut *tx, lead.lead_id, LeadState::FormSent)
                    .await?;
                Ok(Decision {
                    reply: Some(self.templates.get(TemplateKey::ChooseOptionAck)),
                    secondary: Some(self.templates.get(TemplateKey::FormTemplate)),
                })
            }
            "2" => {
                self.store
                    .update_state(&mut *tx, lead.lead_id, LeadState::ManualIntervention)
                    .await?;
                jobs.push(self.notification(
                    NotificationKind::PartnershipInterest,
                    lead,
                    msg,
                ));
                Ok(Decision::reply(
                    self.templates.get(TemplateKey::PartnershipAck),
                ))
            }
            "3" => {
                self.store
                    .update_state(&mut *tx, lead.lead_id, LeadState::ManualIntervention)
                    .await?;
                jobs.push(self.notification(NotificationKind::OtherNeeds, lead, msg));
                Ok(Decision::reply(
                    self.templates.get(TemplateKey::OtherNeedsAck),
                ))
            }
            _ => self.warn_or_escalate(tx, lead, msg, jobs, || {
                self.templates.get(TemplateKey::InvalidOption)
            })
            .await,
        }
    }

    /// FORM_SENT / FORM_IN_PROGRESS: parse, merge, check completeness.
    async fn dispatch_form(
        &self,
        tx: &mut sqlx::SqliteConnection,
        lead: &Lead,
        msg: &InboundMessage,
        jobs: &mut Vec<PendingJob>,
    ) -> Result<Decision, HandlerError> {
        if lead.state == LeadState::FormSent {
            self.store
                .update_state(&mut *tx, lead.lead_id, LeadState::FormInProgress)
                .await?;
        }

        let existing = self.store.get_form(&mut *tx, lead.lead_id).await?;
        let parsed = form::parse(&msg.text);
        let result = form::validate(&parsed, existing.as_ref().map(|f| &f.fields));
        self.store
            .upsert_form(&mut *tx, lead.lead_id, &parsed)
            .await?;

        if result.valid {
            self.store.mark_form_completed(&mut *tx, lead.lead_id).await?;
            self.store
                .update_state(&mut *tx, lead.lead_id, LeadState::FormCompleted)
                .await?;

            jobs.push(PendingJob::SpreadsheetSync(SpreadsheetSyncJob {
                lead_id: lead.lead_id,
                user_id: msg.user_id.clone(),
                transport: msg.transport,
                form: result.merged.clone(),
            }));
            jobs.push(PendingJob::OperatorNotify(OperatorNotifyJob {
                kind: NotificationKind::FormCompleted,
                data: serde_json::json!({
                    "user_id": msg.user_id,
                    "push_name": lead.push_name,
                    "transport": msg.transport,
                    "form": result.merged,
                }),
            }));

            tracing::info!("form completed for lead {}", lead.lead_id);
            return Ok(Decision::reply(
                self.templates.get(TemplateKey::FormReceived),
            ));
        }

        let missing = result.missing.clone();
        self.warn_or_escalate(tx, lead, msg, jobs, move || form::explain_missing(&missing))
            .await
    }

    /// Add a strike; escalate at the cap, otherwise reply with `fallback`.
    async fn warn_or_escalate(
        &self,
        tx: &mut sqlx::SqliteConnection,
        lead: &Lead,
        msg: &InboundMessage,
        jobs: &mut Vec<PendingJob>,
        fallback: impl FnOnce() -> String,
    ) -> Result<Decision, HandlerError> {
        let (warned, should_escalate) = self
            .store
            .increment_warning(&mut *tx, lead.lead_id, self.max_warnings)
            .await?;

        if should_escalate {
            self.escalate(tx, &warned, msg, REASON_MAX_WARNINGS, jobs).await?;
            return Ok(Decision::reply(
                self.templates.get(TemplateKey::EscalationNotice),
            ));
        }

        tracing::info!(
            "warning {}/{} for lead {}",
            warned.warning_count,
            self.max_warnings,
            lead.lead_id
        );
        Ok(Decision::reply(fallback()))
    }

    /// Hand the conversation to an operator.
    ///
    /// The transition is swallowed when the lead is already in
    /// `MANUAL_INTERVENTION`; the notification always goes out.
    async fn escalate(
        &self,
        tx: &mut sqlx::SqliteConnection,
        lead: &Lead,
        msg: &InboundMessage,
        reason: &str,
        jobs: &mut Vec<PendingJob>,
    ) -> Result<(), HandlerError> {
        match self
            .store
            .update_state(&mut *tx, lead.lead_id, LeadState::ManualIntervention)
            .await
        {
            Ok(_) => {}
            Err(StoreError::State(_)) => {
                tracing::debug!("lead {} already operator-owned", lead.lead_id);
            }
            Err(e) => return Err(e.into()),
        }

        let data = EscalationData {
            user_id: msg.user_id.clone(),
            last_message: msg.text.clone(),
            current_state: lead.state,
            warning_count: lead.warning_count,
            transport: msg.transport,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        };
        jobs.push(PendingJob::OperatorNotify(OperatorNotifyJob {
            kind: NotificationKind::Escalation,
            data: serde_json::to_value(&data).unwrap_or_default(),
        }));

        tracing::info!("escalated lead {} ({})", lead.lead_id, reason);
        Ok(())
    }

    fn notification(
        &self,
        kind: NotificationKind,
        lead: &Lead,
        msg: &InboundMessage,
    ) -> PendingJob {
        PendingJob::OperatorNotify(OperatorNotifyJob {
            kind,
            data: serde_json::json!({
                "user_id": msg.user_id,
                "push_name": lead.push_name,
                "transport": msg.transport,
                "last_message": msg.text,
            }),
        })
    }

    /// Step 2: our own outbound copy refreshes the lead and the log.
    async fn record_outbound(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        let mut tx = self.store.begin().await?;
        let lead = self
            .store
            .mark_existing(&mut tx, &msg.user_id, msg.transport)
            .await?;
        if !msg.text.trim().is_empty() {
            self.store
                .add_interaction(&mut tx, lead.lead_id, &msg.message_id, &msg.text, Direction::Out)
                .await?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// Step 3: a message under cooldown is logged but never answered.
    async fn record_inbound_only(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        let mut tx = self.store.begin().await?;
        let (lead, _) = self
            .store
            .get_or_create(
                &mut tx,
                &msg.user_id,
                msg.transport,
                LeadOptions {
                    push_name: msg.metadata.push_name.clone(),
                    alt_id: msg.metadata.alt_id.clone(),
                },
            )
            .await?;
        self.store
            .add_interaction(&mut tx, lead.lead_id, &msg.message_id, &msg.text, Direction::In)
            .await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}
