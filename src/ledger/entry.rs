use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::Outcome;
use crate::item::{FieldValue, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    AlreadyHandled,
    Failure,
}

impl EntryStatus {
    /// Whether an entry with this status closes the identifier for good.
    pub fn is_done(self) -> bool {
        matches!(self, EntryStatus::Success | EntryStatus::AlreadyHandled)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Success => write!(f, "success"),
            EntryStatus::AlreadyHandled => write!(f, "already_handled"),
            EntryStatus::Failure => write!(f, "failure"),
        }
    }
}

/// One line of the ledger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub status: EntryStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub attempts: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// The raw source date, kept for auditing against the source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<FieldValue>,
}

impl LedgerEntry {
    pub fn from_outcome(item: &WorkItem, outcome: &Outcome, run_id: Uuid) -> Self {
        let (status, step, message) = match outcome {
            Outcome::Success { .. } => (EntryStatus::Success, None, String::new()),
            Outcome::AlreadyHandled { .. } => (
                EntryStatus::AlreadyHandled,
                None,
                "handled by an earlier run".to_string(),
            ),
            Outcome::Failure { step, message, .. } => {
                (EntryStatus::Failure, Some(step.clone()), message.clone())
            }
        };
        Self {
            id: item.id.clone(),
            status,
            timestamp: Utc::now(),
            step,
            attempts: outcome.attempts(),
            message,
            run_id: Some(run_id),
            date: item.date.clone(),
        }
    }
}
