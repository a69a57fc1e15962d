use serde::{Deserialize, Serialize};

/// Step name recorded when the validation pass rejects an item.
pub const VALIDATION_STEP: &str = "validation";

/// Step name recorded when an item keeps losing its session.
pub const SESSION_STEP: &str = "session";

/// Terminal result reported by a step sequence that ran to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The procedure was carried out.
    Done,
    /// The target reported the item as already handled by an earlier run.
    AlreadyHandled,
}

/// The result of processing one work item through its attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        attempts: u32,
    },
    AlreadyHandled {
        attempts: u32,
    },
    Failure {
        step: String,
        message: String,
        attempts: u32,
    },
}

impl Outcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts }
            | Outcome::AlreadyHandled { attempts }
            | Outcome::Failure { attempts, .. } => *attempts,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success { attempts } => write!(f, "success after {attempts} attempt(s)"),
            Outcome::AlreadyHandled { .. } => write!(f, "already handled"),
            Outcome::Failure {
                step,
                message,
                attempts,
            } => write!(f, "failed at `{step}` after {attempts} attempt(s): {message}"),
        }
    }
}

/// Counters produced at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub rounds: u32,
    pub succeeded: u32,
    pub already_handled: u32,
    pub failed: u32,
    /// Items skipped because the ledger already marks them done.
    pub skipped: u32,
    /// Items re-queued after their session died mid-attempt.
    pub requeued: u32,
    /// Outcomes that could not be persisted.
    pub ledger_errors: u32,
    /// Items with no terminal outcome: left over by a cancelled run, or lost
    /// with a worker that panicked.
    pub unfinished: u32,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success { .. } => self.succeeded += 1,
            Outcome::AlreadyHandled { .. } => self.already_handled += 1,
            Outcome::Failure { .. } => self.failed += 1,
        }
    }

    pub fn processed(&self) -> u32 {
        self.succeeded + self.already_handled + self.failed
    }

    /// True when every item reached a terminal outcome other than failure.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.unfinished == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_display() {
        assert_eq!(
            Outcome::Success { attempts: 3 }.to_string(),
            "success after 3 attempt(s)"
        );
        let failure = Outcome::Failure {
            step: "captcha".into(),
            message: "timed out".into(),
            attempts: 3,
        };
        assert_eq!(
            failure.to_string(),
            "failed at `captcha` after 3 attempt(s): timed out"
        );
        assert_eq!(failure.attempts(), 3);
    }

    #[test]
    fn summary_tallies_outcomes() {
        let mut summary = RunSummary::default();
        summary.record(&Outcome::Success { attempts: 1 });
        summary.record(&Outcome::AlreadyHandled { attempts: 1 });
        assert!(summary.is_clean());

        summary.record(&Outcome::Failure {
            step: VALIDATION_STEP.into(),
            message: "bad date".into(),
            attempts: 1,
        });
        assert_eq!(summary.processed(), 3);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_clean());

        let lost = RunSummary {
            unfinished: 1,
            ..RunSummary::default()
        };
        assert!(!lost.is_clean());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(Outcome::AlreadyHandled { attempts: 2 }).unwrap();
        assert_eq!(json["status"], "already_handled");
        assert_eq!(json["attempts"], 2);
    }
}
