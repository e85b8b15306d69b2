//! Conversation state machine for leads.
//!
//! Provides the [`LeadState`] enum, the allowed-transition table, and the
//! reply gate that decides whether the bot may answer automatically.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by state machine operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The requested transition is not in the allowed-transition table.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the lead was in.
        from: LeadState,
        /// State the caller asked for.
        to: LeadState,
    },

    /// A state string from the database did not match any known state.
    #[error("unknown lead state: {0}")]
    UnknownState(String),
}

/// Qualification state of a lead.
///
/// The machine starts at `New`. `Existing`, `ManualIntervention`,
/// `FormCompleted` and `Partnership` are terminal for automatic replies;
/// the machine can still move them on admin or escalation paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadState {
    /// First contact, nothing sent yet.
    New,
    /// Created reactively from our own outbound message; the bot stays silent.
    Existing,
    /// Welcome menu sent, waiting for an option.
    ChooseOption,
    /// Blank form template sent, waiting for the first answer.
    FormSent,
    /// At least one form answer received, form not yet complete.
    FormInProgress,
    /// All five form fields captured.
    FormCompleted,
    /// A human operator owns the conversation.
    ManualIntervention,
    /// Partnership track, handled by an operator.
    Partnership,
}

impl LeadState {
    /// All states, in a stable order. Used by tests and admin listings.
    pub const ALL: [LeadState; 8] = [
        LeadState::New,
        LeadState::Existing,
        LeadState::ChooseOption,
        LeadState::FormSent,
        LeadState::FormInProgress,
        LeadState::FormCompleted,
        LeadState::ManualIntervention,
        LeadState::Partnership,
    ];

    /// Database representation of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadState::New => "NEW",
            LeadState::Existing => "EXISTING",
            LeadState::ChooseOption => "CHOOSE_OPTION",
            LeadState::FormSent => "FORM_SENT",
            LeadState::FormInProgress => "FORM_IN_PROGRESS",
            LeadState::FormCompleted => "FORM_COMPLETED",
            LeadState::ManualIntervention => "MANUAL_INTERVENTION",
            LeadState::Partnership => "PARTNERSHIP",
        }
    }

    /// Parse a state from its database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownState`] for anything outside the table.
    pub fn parse(s: &str) -> Result<Self, StateError> {
        match s {
            "NEW" => Ok(LeadState::New),
            "EXISTING" => Ok(LeadState::Existing),
            "CHOOSE_OPTION" => Ok(LeadState::ChooseOption),
            "FORM_SENT" => Ok(LeadState::FormSent),
            "FORM_IN_PROGRESS" => Ok(LeadState::FormInProgress),
            "FORM_COMPLETED" => Ok(LeadState::FormCompleted),
            "MANUAL_INTERVENTION" => Ok(LeadState::ManualIntervention),
            "PARTNERSHIP" => Ok(LeadState::Partnership),
            other => Err(StateError::UnknownState(other.to_string())),
        }
    }

    /// Whether the bot may reply automatically while a lead is in this state.
    ///
    /// Leads in the four operator-owned states never get automatic replies;
    /// their inbound messages are still logged.
    pub fn reply_allowed(&self) -> bool {
        matches!(
            self,
            LeadState::New
                | LeadState::ChooseOption
                | LeadState::FormSent
                | LeadState::FormInProgress
        )
    }
}

impl std::fmt::Display for LeadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a transition against the allowed-transition table.
pub fn valid_transition(from: LeadState, to: LeadState) -> bool {
    use LeadState::*;
    match from {
        New => matches!(to, ChooseOption | ManualIntervention),
        Existing => false,
        ChooseOption => matches!(to, FormSent | Partnership | ManualIntervention),
        FormSent => matches!(to, FormInProgress | ManualIntervention),
        FormInProgress => matches!(to, FormCompleted | FormSent | ManualIntervention),
        FormCompleted => matches!(to, ManualIntervention | Partnership),
        ManualIntervention => matches!(to, New | ChooseOption | FormSent | Partnership),
        Partnership => matches!(to, ManualIntervention),
    }
}

/// Attempt a transition, returning the new state on success.
///
/// # Errors
///
/// Returns [`StateError::InvalidTransition`] and leaves `from` unchanged
/// when the pair is not in the table.
pub fn attempt_transition(from: LeadState, to: LeadState) -> Result<LeadState, StateError> {
    if valid_transition(from, to) {
        Ok(to)
    } else {
        Err(StateError::InvalidTransition { from, to })
    }
}
