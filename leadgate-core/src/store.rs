//! SQLite persistence for leads, interactions, and form fragments.
//!
//! Uses connection pooling and WAL mode, with migrations run on startup.
//! Every data method takes a `&mut SqliteConnection` so the handler can
//! thread one outer transaction through the whole per-message decision
//! sequence; SQLite's single-writer transactions give the row-level
//! exclusivity state transitions need.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::lead::{Direction, FormFields, FormFragment, Interaction, Lead, Transport};
use crate::state::{self, LeadState, StateError};

/// Errors that can occur during lead store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The requested lead was not found.
    #[error("lead not found: {0}")]
    NotFound(Uuid),

    /// A migration operation failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A state machine rule was violated.
    #[error(transparent)]
    State(#[from] StateError),

    /// Invalid data was encountered in a row.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Options for [`LeadStore::get_or_create`].
#[derive(Debug, Clone, Default)]
pub struct LeadOptions {
    /// Display name observed on the message.
    pub push_name: Option<String>,
    /// Alternate id observed on the message.
    pub alt_id: Option<String>,
}

/// SQLite-backed lead storage.
pub struct LeadStore {
    pool: SqlitePool,
}

impl LeadStore {
    /// Create a new LeadStore from a database URL.
    ///
    /// The URL should be in the format `sqlite:path/to/database.db`.
    /// Runs migrations automatically and enables WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if connection fails.
    /// Returns [`StoreError::Migration`] if migrations fail.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        // Ensure parent directory exists
        let path = PathBuf::from(url);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(url)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    /// Open the outer transaction for one message's decision sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction cannot start.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Liveness probe used by the health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn parse_transport(s: &str) -> Result<Transport, StoreError> {
        match s {
            "whatsapp" => Ok(Transport::Whatsapp),
            "telegram" => Ok(Transport::Telegram),
            other => Err(StoreError::InvalidData(format!(
                "unknown transport: {}",
                other
            ))),
        }
    }

    fn parse_direction(s: &str) -> Result<Direction, StoreError> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(StoreError::InvalidData(format!(
                "unknown direction: {}",
                other
            ))),
        }
    }

    fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
        Uuid::parse_str(s).map_err(|e| StoreError::InvalidData(format!("invalid UUID: {}", e)))
    }

    fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::InvalidData(format!("invalid datetime: {}", e)))
    }

    fn row_to_lead(row: &sqlx::sqlite::SqliteRow) -> Result<Lead, StoreError> {
        let lead_id: String = row.get("lead_id");
        let transport: String = row.get("transport");
        let state: String = row.get("state");
        let warning_count: i64 = row.get("warning_count");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(Lead {
            lead_id: Self::parse_uuid(&lead_id)?,
            primary_id: row.get("primary_id"),
            alt_id: row.get("alt_id"),
            push_name: row.get("push_name"),
            transport: Self::parse_transport(&transport)?,
            state: LeadState::parse(&state)?,
            warning_count: warning_count as u32,
            created_at: Self::parse_datetime(&created_at)?,
            updated_at: Self::parse_datetime(&updated_at)?,
        })
    }

    const LEAD_COLUMNS: &'static str = "lead_id, primary_id, alt_id, push_name, transport, \
                                        state, warning_count, created_at, updated_at";

    async fn fetch_lead_where(
        conn: &mut SqliteConnection,
        column: &str,
        value: &str,
    ) -> Result<Option<Lead>, StoreError> {
        let sql = format!(
            "SELECT {} FROM leads WHERE {} = ?",
            Self::LEAD_COLUMNS,
            column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_lead).transpose()
    }

    /// Get a lead by its primary identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_by_primary(
        &self,
        conn: &mut SqliteConnection,
        primary_id: &str,
    ) -> Result<Option<Lead>, StoreError> {
        Self::fetch_lead_where(conn, "primary_id", primary_id).await
    }

    /// Get a lead by its alternate identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_by_alt(
        &self,
        conn: &mut SqliteConnection,
        alt_id: &str,
    ) -> Result<Option<Lead>, StoreError> {
        Self::fetch_lead_where(conn, "alt_id", alt_id).await
    }

    /// Get a lead by its opaque id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_by_lead_id(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
    ) -> Result<Option<Lead>, StoreError> {
        Self::fetch_lead_where(conn, "lead_id", &lead_id.to_string()).await
    }

    /// Insert a new lead row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails (including a
    /// `primary_id` uniqueness violation).
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        lead: &Lead,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leads (lead_id, primary_id, alt_id, push_name, transport,
                               state, warning_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lead.lead_id.to_string())
        .bind(&lead.primary_id)
        .bind(&lead.alt_id)
        .bind(&lead.push_name)
        .bind(lead.transport.as_str())
        .bind(lead.state.as_str())
        .bind(lead.warning_count as i64)
        .bind(lead.created_at.to_rfc3339())
        .bind(lead.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Look up a lead by primary id, creating it in `NEW` when absent.
    ///
    /// When the lead exists, a differing `push_name` or a newly observed
    /// `alt_id` (stored one absent) refreshes those fields; otherwise the
    /// row is returned unchanged.
    ///
    /// Returns the lead and whether it was created by this call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    pub async fn get_or_create(
        &self,
        conn: &mut SqliteConnection,
        primary_id: &str,
        transport: Transport,
        options: LeadOptions,
    ) -> Result<(Lead, bool), StoreError> {
        if let Some(mut lead) = self.get_by_primary(&mut *conn, primary_id).await? {
            let push_name_changed = options
                .push_name
                .as_ref()
                .is_some_and(|name| lead.push_name.as_ref() != Some(name));
            let alt_id_new = options.alt_id.is_some() && lead.alt_id.is_none();

            if push_name_changed || alt_id_new {
                if push_name_changed {
                    lead.push_name = options.push_name.clone();
                }
                if alt_id_new {
                    lead.alt_id = options.alt_id.clone();
                }
                lead.updated_at = Utc::now();
                sqlx::query(
                    "UPDATE leads SET push_name = ?, alt_id = ?, updated_at = ? WHERE lead_id = ?",
                )
                .bind(&lead.push_name)
                .bind(&lead.alt_id)
                .bind(lead.updated_at.to_rfc3339())
                .bind(lead.lead_id.to_string())
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            }
            return Ok((lead, false));
        }

        let mut lead = Lead::new(primary_id, transport, LeadState::New);
        lead.push_name = options.push_name;
        lead.alt_id = options.alt_id;
        self.create(&mut *conn, &lead).await?;
        Ok((lead, true))
    }

    /// Record that we contacted this identity ourselves.
    ///
    /// Creates the lead in `EXISTING` when absent; moves a `NEW` lead to
    /// `EXISTING`; leaves every other state untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    pub async fn mark_existing(
        &self,
        conn: &mut SqliteConnection,
        primary_id: &str,
        transport: Transport,
    ) -> Result<Lead, StoreError> {
        match self.get_by_primary(&mut *conn, primary_id).await? {
            Some(lead) if lead.state == LeadState::New => {
                self.force_state(&mut *conn, lead.lead_id, LeadState::Existing)
                    .await
            }
            Some(lead) => Ok(lead),
            None => {
                let lead = Lead::new(primary_id, transport, LeadState::Existing);
                self.create(&mut *conn, &lead).await?;
                Ok(lead)
            }
        }
    }

    /// Transition a lead to `new_state`, validating against the machine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::State`] with the invalid pair when the table
    /// forbids the move; the row is left unchanged.
    /// Returns [`StoreError::NotFound`] if the lead does not exist.
    pub async fn update_state(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
        new_state: LeadState,
    ) -> Result<Lead, StoreError> {
        let lead = self
            .get_by_lead_id(&mut *conn, lead_id)
            .await?
            .ok_or(StoreError::NotFound(lead_id))?;

        state::attempt_transition(lead.state, new_state)?;
        self.force_state(&mut *conn, lead_id, new_state).await
    }

    /// Write a state without consulting the transition table. Only the
    /// `mark_existing` path uses this directly.
    async fn force_state(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
        new_state: LeadState,
    ) -> Result<Lead, StoreError> {
        let now = Utc::now();
        let result = sqlx::query("UPDATE leads SET state = ?, updated_at = ? WHERE lead_id = ?")
            .bind(new_state.as_str())
            .bind(now.to_rfc3339())
            .bind(lead_id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(lead_id));
        }

        self.get_by_lead_id(&mut *conn, lead_id)
            .await?
            .ok_or(StoreError::NotFound(lead_id))
    }

    /// Atomically add one warning strike.
    ///
    /// Returns the updated lead and whether the new count reached
    /// `max_warnings`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the lead does not exist.
    pub async fn increment_warning(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
        max_warnings: u32,
    ) -> Result<(Lead, bool), StoreError> {
        let result = sqlx::query(
            "UPDATE leads SET warning_count = warning_count + 1, updated_at = ? WHERE lead_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(lead_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(lead_id));
        }

        let lead = self
            .get_by_lead_id(&mut *conn, lead_id)
            .await?
            .ok_or(StoreError::NotFound(lead_id))?;
        let should_escalate = lead.warning_count >= max_warnings;
        Ok((lead, should_escalate))
    }

    /// Reset the warning counter (admin action).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the lead does not exist.
    pub async fn reset_warning(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE leads SET warning_count = 0, updated_at = ? WHERE lead_id = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(lead_id.to_string())
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(lead_id));
        }
        Ok(())
    }

    /// Append one message to the interaction log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn add_interaction(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
        message_id: &str,
        text: &str,
        direction: Direction,
    ) -> Result<Interaction, StoreError> {
        let interaction = Interaction {
            interaction_id: Uuid::now_v7(),
            lead_id,
            message_id: message_id.to_string(),
            text: text.to_string(),
            direction,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO lead_interactions (interaction_id, lead_id, message_id, text, direction, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(interaction.interaction_id.to_string())
        .bind(interaction.lead_id.to_string())
        .bind(&interaction.message_id)
        .bind(&interaction.text)
        .bind(interaction.direction.as_str())
        .bind(interaction.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(interaction)
    }

    /// All interactions for a lead, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_interactions(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
    ) -> Result<Vec<Interaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT interaction_id, lead_id, message_id, text, direction, created_at
            FROM lead_interactions
            WHERE lead_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(lead_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut interactions = Vec::new();
        for row in rows {
            let interaction_id: String = row.get("interaction_id");
            let row_lead_id: String = row.get("lead_id");
            let direction: String = row.get("direction");
            let created_at: String = row.get("created_at");

            interactions.push(Interaction {
                interaction_id: Self::parse_uuid(&interaction_id)?,
                lead_id: Self::parse_uuid(&row_lead_id)?,
                message_id: row.get("message_id"),
                text: row.get("text"),
                direction: Self::parse_direction(&direction)?,
                created_at: Self::parse_datetime(&created_at)?,
            });
        }

        Ok(interactions)
    }

    /// Fetch the form fragment for a lead, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_form(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
    ) -> Result<Option<FormFragment>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT lead_id, biodata, source_info, business_type, budget, start_plan,
                   completed, created_at
            FROM lead_form_data
            WHERE lead_id = ?
            "#,
        )
        .bind(lead_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let row_lead_id: String = row.get("lead_id");
        let completed: i64 = row.get("completed");
        let created_at: String = row.get("created_at");

        Ok(Some(FormFragment {
            lead_id: Self::parse_uuid(&row_lead_id)?,
            fields: FormFields {
                biodata: row.get("biodata"),
                source_info: row.get("source_info"),
                business_type: row.get("business_type"),
                budget: row.get("budget"),
                start_plan: row.get("start_plan"),
            },
            completed: completed != 0,
            created_at: Self::parse_datetime(&created_at)?,
        }))
    }

    /// Merge `partial` into the stored fragment, creating the row on first
    /// write. Non-null incoming values win; nulls preserve stored values.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    pub async fn upsert_form(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
        partial: &FormFields,
    ) -> Result<FormFragment, StoreError> {
        let existing = self.get_form(&mut *conn, lead_id).await?;
        let (merged, completed, created_at) = match existing {
            Some(fragment) => (
                partial.merged_into(&fragment.fields),
                fragment.completed,
                fragment.created_at,
            ),
            None => (partial.clone(), false, Utc::now()),
        };

        sqlx::query(
            r#"
            INSERT INTO lead_form_data (lead_id, biodata, source_info, business_type,
                                        budget, start_plan, completed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(lead_id) DO UPDATE SET
                biodata = excluded.biodata,
                source_info = excluded.source_info,
                business_type = excluded.business_type,
                budget = excluded.budget,
                start_plan = excluded.start_plan
            "#,
        )
        .bind(lead_id.to_string())
        .bind(&merged.biodata)
        .bind(&merged.source_info)
        .bind(&merged.business_type)
        .bind(&merged.budget)
        .bind(&merged.start_plan)
        .bind(completed as i64)
        .bind(created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(FormFragment {
            lead_id,
            fields: merged,
            completed,
            created_at,
        })
    }

    /// Flag the fragment as complete. Callers verify completeness first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no fragment row exists.
    pub async fn mark_form_completed(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE lead_form_data SET completed = 1 WHERE lead_id = ?")
            .bind(lead_id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(lead_id));
        }
        Ok(())
    }

    /// Rewrite a lead's identifiers (identity migration).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the lead does not exist.
    pub async fn set_identity(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
        primary_id: &str,
        alt_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE leads SET primary_id = ?, alt_id = ?, updated_at = ? WHERE lead_id = ?",
        )
        .bind(primary_id)
        .bind(alt_id)
        .bind(Utc::now().to_rfc3339())
        .bind(lead_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(lead_id));
        }
        Ok(())
    }

    /// Move every interaction from one lead to another (identity merge).
    ///
    /// Returns the number of re-parented rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn reparent_interactions(
        &self,
        conn: &mut SqliteConnection,
        from: Uuid,
        to: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE lead_interactions SET lead_id = ? WHERE lead_id = ?")
            .bind(to.to_string())
            .bind(from.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Delete a lead row (identity merge only; cascades to its data).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn delete_lead(
        &self,
        conn: &mut SqliteConnection,
        lead_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM leads WHERE lead_id = ?")
            .bind(lead_id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests;
