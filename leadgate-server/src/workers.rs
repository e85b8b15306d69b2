//! Background queue consumers.
//!
//! One worker per queue: spreadsheet row sync and operator notifications.
//! Both are at-least-once consumers of the shared store's lists; the
//! handlers tolerate redelivery (appending the same row twice is the
//! spreadsheet's documented worst case).

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use leadgate_core::config::Config;
use leadgate_core::jobs::{
    EscalationData, JobError, JobHandler, JobWorker, NotificationKind, OperatorNotifyJob,
    QUEUE_OPERATOR_NOTIFY, QUEUE_SPREADSHEET_SYNC, RetryPolicy, SpreadsheetSyncJob,
};
use leadgate_core::kv::KvStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::outbound::TelegramClient;

/// Appends completed form rows to the configured spreadsheet endpoint.
pub struct SheetAppendHandler {
    http: reqwest::Client,
    append_url: Option<String>,
}

impl SheetAppendHandler {
    /// Create a handler posting to `append_url`.
    pub fn new(append_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            append_url,
        }
    }
}

#[async_trait]
impl JobHandler for SheetAppendHandler {
    async fn handle(&self, payload: &serde_json::Value) -> Result<(), JobError> {
        let job: SpreadsheetSyncJob = serde_json::from_value(payload.clone())
            .map_err(|e| JobError::Malformed(e.to_string()))?;

        let Some(url) = &self.append_url else {
            tracing::warn!("no spreadsheet endpoint configured; dropping row for {}", job.user_id);
            return Ok(());
        };

        let row = serde_json::json!({
            "lead_id": job.lead_id,
            "user_id": job.user_id,
            "transport": job.transport,
            "biodata": job.form.biodata,
            "source_info": job.form.source_info,
            "business_type": job.form.business_type,
            "budget": job.form.budget,
            "start_plan": job.form.start_plan,
        });

        let result: anyhow::Result<()> = async {
            let response = self
                .http
                .post(url)
                .json(&row)
                .send()
                .await
                .context("append request failed")?;
            response.error_for_status().context("append rejected")?;
            Ok(())
        }
        .await;

        result.map_err(|e| JobError::Failed(format!("{:#}", e)))?;
        tracing::info!("appended spreadsheet row for {}", job.user_id);
        Ok(())
    }
}

/// Delivers operator notifications to the configured chat.
pub struct NotifyHandler {
    telegram: Option<Arc<TelegramClient>>,
    operator_chat_id: Option<String>,
}

impl NotifyHandler {
    /// Create a handler sending through `telegram` to `operator_chat_id`.
    pub fn new(telegram: Option<Arc<TelegramClient>>, operator_chat_id: Option<String>) -> Self {
        Self {
            telegram,
            operator_chat_id,
        }
    }

    fn title(kind: NotificationKind) -> &'static str {
        match kind {
            NotificationKind::Escalation => "🚨 Escalation",
            NotificationKind::NewLead => "✨ New lead",
            NotificationKind::FormCompleted => "✅ Form completed",
            NotificationKind::PartnershipInterest => "🤝 Partnership interest",
            NotificationKind::OtherNeeds => "📌 Other needs",
            NotificationKind::GeneralInquiry => "💬 General inquiry",
        }
    }

    /// Render the notification as a plain-text operator message.
    fn format(job: &OperatorNotifyJob) -> String {
        let mut text = String::from(Self::title(job.kind));
        text.push('\n');

        // Escalations carry a structured context worth spelling out.
        if job.kind == NotificationKind::Escalation
            && let Ok(data) = serde_json::from_value::<EscalationData>(job.data.clone())
        {
            text.push_str(&format!(
                "User: {}\nState: {}\nWarnings: {}\nReason: {}\nAt: {}\nLast message:\n{}",
                data.user_id,
                data.current_state,
                data.warning_count,
                data.reason,
                data.timestamp.to_rfc3339(),
                data.last_message,
            ));
            return text;
        }

        if let Some(object) = job.data.as_object() {
            for (key, value) in object {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => continue,
                    other => other.to_string(),
                };
                text.push_str(&format!("{}: {}\n", key, rendered));
            }
        }
        text
    }
}

#[async_trait]
impl JobHandler for NotifyHandler {
    async fn handle(&self, payload: &serde_json::Value) -> Result<(), JobError> {
        let job: OperatorNotifyJob = serde_json::from_value(payload.clone())
            .map_err(|e| JobError::Malformed(e.to_string()))?;

        let (Some(telegram), Some(chat_id)) = (&self.telegram, &self.operator_chat_id) else {
            tracing::warn!("no operator channel configured; dropping {:?}", job.kind);
            return Ok(());
        };

        telegram
            .send_message(chat_id, &Self::format(&job))
            .await
            .map_err(|e| JobError::Failed(format!("{:#}", e)))?;
        Ok(())
    }
}

/// Spawn both queue workers. Flip the returned sender to `true` to stop.
pub fn spawn_workers(
    kv: Arc<dyn KvStore>,
    config: &Config,
    telegram: Option<Arc<TelegramClient>>,
) -> (watch::Sender<bool>, Vec<JoinHandle<()>>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    let sheet_worker = JobWorker::new(
        Arc::clone(&kv),
        QUEUE_SPREADSHEET_SYNC,
        RetryPolicy::spreadsheet(config.jobs.spreadsheet_sync_max_attempts),
        Arc::new(SheetAppendHandler::new(
            config.jobs.spreadsheet_append_url.clone(),
        )),
    );
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move { sheet_worker.run(rx).await }));

    let notify_worker = JobWorker::new(
        kv,
        QUEUE_OPERATOR_NOTIFY,
        RetryPolicy::notify(config.jobs.operator_notify_max_attempts),
        Arc::new(NotifyHandler::new(
            telegram,
            config.jobs.operator_chat_id.clone(),
        )),
    );
    handles.push(tokio::spawn(async move { notify_worker.run(shutdown_rx).await }));

    (shutdown_tx, handles)
}
