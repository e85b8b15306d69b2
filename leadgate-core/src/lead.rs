//! Domain types for leads, interactions, and form fragments.
//!
//! These mirror the three persistent tables and carry no storage logic;
//! the SQLite adapter in [`crate::store`] maps rows to and from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::LeadState;

/// Chat transport a lead arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// WhatsApp HTTP gateway.
    Whatsapp,
    /// Telegram bot API.
    Telegram,
}

impl Transport {
    /// Database and key-namespace representation of this transport.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Whatsapp => "whatsapp",
            Transport::Telegram => "telegram",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a recorded interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Message from the user to us.
    In,
    /// Message from us to the user.
    Out,
}

impl Direction {
    /// Database representation of this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// One human contact and their progress through qualification.
#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    /// Stable opaque identifier, unique for the lead's life.
    pub lead_id: Uuid,
    /// Normalized transport identifier used for all lookups. Unique.
    pub primary_id: String,
    /// Optional secondary identifier (e.g. a linked-device id).
    pub alt_id: Option<String>,
    /// Display name last observed on an inbound message.
    pub push_name: Option<String>,
    /// Transport the lead arrived on.
    pub transport: Transport,
    /// Current qualification state.
    pub state: LeadState,
    /// Invalid-input strikes; escalates at the configured cap.
    pub warning_count: u32,
    /// When the lead row was created.
    pub created_at: DateTime<Utc>,
    /// When the lead row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Create a new lead in the given initial state.
    ///
    /// Generates a UUID v7 (time-sortable) lead id and sets both timestamps
    /// to the current time.
    pub fn new(primary_id: impl Into<String>, transport: Transport, state: LeadState) -> Self {
        let now = Utc::now();
        Self {
            lead_id: Uuid::now_v7(),
            primary_id: primary_id.into(),
            alt_id: None,
            push_name: None,
            transport,
            state,
            warning_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the alternate identifier.
    pub fn with_alt_id(mut self, alt_id: impl Into<String>) -> Self {
        self.alt_id = Some(alt_id.into());
        self
    }

    /// Set the display name.
    pub fn with_push_name(mut self, push_name: impl Into<String>) -> Self {
        self.push_name = Some(push_name.into());
        self
    }
}

/// One inbound or outbound message recorded against a lead. Append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    /// Unique identifier for the interaction row.
    pub interaction_id: Uuid,
    /// The lead this interaction belongs to.
    pub lead_id: Uuid,
    /// Transport-assigned message id.
    pub message_id: String,
    /// Message text.
    pub text: String,
    /// Whether the message came from the user or from us.
    pub direction: Direction,
    /// When the interaction was recorded.
    pub created_at: DateTime<Utc>,
}

/// The five free-text answers captured by the qualification form.
///
/// `None` means "not yet provided". Fields fill monotonically; the only
/// overwrite path is [`FormFields::merged_into`], where a non-null incoming
/// value replaces any prior one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormFields {
    /// Name and city of residence.
    pub biodata: Option<String>,
    /// Where the lead heard about us.
    pub source_info: Option<String>,
    /// Kind of business the lead runs or plans.
    pub business_type: Option<String>,
    /// Stated budget.
    pub budget: Option<String>,
    /// When the lead plans to start.
    pub start_plan: Option<String>,
}

/// Canonical field order, matching the blank form template.
pub const FORM_FIELD_NAMES: [&str; 5] = [
    "biodata",
    "source_info",
    "business_type",
    "budget",
    "start_plan",
];

impl FormFields {
    /// Merge `self` (the newly parsed values) over `existing`.
    ///
    /// A non-null value in `self` wins; a null preserves whatever
    /// `existing` already holds.
    pub fn merged_into(&self, existing: &FormFields) -> FormFields {
        FormFields {
            biodata: self.biodata.clone().or_else(|| existing.biodata.clone()),
            source_info: self
                .source_info
                .clone()
                .or_else(|| existing.source_info.clone()),
            business_type: self
                .business_type
                .clone()
                .or_else(|| existing.business_type.clone()),
            budget: self.budget.clone().or_else(|| existing.budget.clone()),
            start_plan: self
                .start_plan
                .clone()
                .or_else(|| existing.start_plan.clone()),
        }
    }

    /// Names of fields that are still empty, in canonical order.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.biodata) {
            missing.push("biodata");
        }
        if is_blank(&self.source_info) {
            missing.push("source_info");
        }
        if is_blank(&self.business_type) {
            missing.push("business_type");
        }
        if is_blank(&self.budget) {
            missing.push("budget");
        }
        if is_blank(&self.start_plan) {
            missing.push("start_plan");
        }
        missing
    }

    /// Whether all five fields hold a non-empty value.
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Whether no field holds a value.
    pub fn is_empty(&self) -> bool {
        self.missing().len() == FORM_FIELD_NAMES.len()
    }
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// Accumulated form answers for one lead. At most one row per lead.
#[derive(Debug, Clone, PartialEq)]
pub struct FormFragment {
    /// The lead this fragment belongs to.
    pub lead_id: Uuid,
    /// The captured answers.
    pub fields: FormFields,
    /// Set when all five fields were non-empty at commit time.
    pub completed: bool,
    /// When the fragment row was created.
    pub created_at: DateTime<Utc>,
}
