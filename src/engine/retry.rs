use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outcome::{Completion, Outcome, VALIDATION_STEP};
use super::StepSequence;
use crate::error::StepError;
use crate::item::WorkItem;
use crate::session::{Session, SessionHandle};

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// delay = base * attempt
    #[default]
    Linear,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per item, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds for backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub policy: BackoffPolicy,
    /// Upper bound of random extra delay added to each backoff.
    #[serde(default)]
    pub jitter_ms: u64,
    /// Session deaths an item may suffer before it is recorded as failed.
    #[serde(default = "default_max_session_losses")]
    pub max_session_losses: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_session_losses() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            policy: BackoffPolicy::default(),
            jitter_ms: 0,
            max_session_losses: default_max_session_losses(),
        }
    }
}

impl RetryConfig {
    /// Delay after failed attempt `attempt` (1-based), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = match self.policy {
            BackoffPolicy::Linear => u64::from(attempt),
            BackoffPolicy::Exponential => 2u64.saturating_pow(attempt.saturating_sub(1)),
        };
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=self.jitter_ms))
    }
}

/// The result of evaluating one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Wait `delay`, then run the sequence again on the same session.
    Retry { delay: Duration, error: StepError },
    /// The item reached a terminal outcome.
    Complete(Outcome),
    /// The session died; the attempt does not count against the item.
    SessionLost(StepError),
}

/// Counts attempts for one item and decides what follows each of them.
#[derive(Debug)]
pub struct AttemptTracker<'a> {
    config: &'a RetryConfig,
    attempt: u32,
}

impl<'a> AttemptTracker<'a> {
    pub fn new(config: &'a RetryConfig) -> Self {
        Self::resume(config, 0)
    }

    /// Continues a budget already partly spent before the item lost its session.
    pub fn resume(config: &'a RetryConfig, attempts: u32) -> Self {
        Self {
            config,
            attempt: attempts,
        }
    }

    /// Marks the start of a new attempt and returns its 1-based number.
    pub fn begin(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next(&mut self, result: Result<Completion, StepError>) -> Transition {
        match result {
            Ok(Completion::Done) => Transition::Complete(Outcome::Success {
                attempts: self.attempt,
            }),
            Ok(Completion::AlreadyHandled) => Transition::Complete(Outcome::AlreadyHandled {
                attempts: self.attempt,
            }),
            Err(error) if error.is_session_loss() => {
                // The lost attempt is given back to the item.
                self.attempt = self.attempt.saturating_sub(1);
                Transition::SessionLost(error)
            }
            Err(error) => self.handle_failure(error),
        }
    }

    fn handle_failure(&mut self, error: StepError) -> Transition {
        if self.attempt < self.config.max_attempts.max(1) {
            Transition::Retry {
                delay: self.config.backoff(self.attempt),
                error,
            }
        } else {
            Transition::Complete(Outcome::Failure {
                step: error.step().to_string(),
                message: error.message().to_string(),
                attempts: self.attempt,
            })
        }
    }
}

/// How a coordinator run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempted {
    /// A terminal outcome to be recorded in the ledger.
    Finished(Outcome),
    /// The session died under the item; it should be requeued.
    ///
    /// `attempts` counts the step attempts charged so far, the lost one excluded.
    SessionLost { error: StepError, attempts: u32 },
    /// The run was cancelled during backoff; nothing is recorded.
    Cancelled { attempts: u32 },
}

/// Wraps step sequence invocations with validation, bounded retries and backoff.
pub struct RetryCoordinator {
    config: RetryConfig,
    cancel: CancellationToken,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `item` until it reaches a terminal outcome, loses its session,
    /// or the run is cancelled. `spent` is the number of attempts the item
    /// already used on a session that later died.
    pub async fn run<H, S>(
        &self,
        session: &mut Session<H>,
        item: &WorkItem,
        steps: &S,
        spent: u32,
    ) -> Attempted
    where
        H: SessionHandle,
        S: StepSequence<H>,
    {
        let slot = session.slot;
        let prepared = match item.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "item failed validation");
                return Attempted::Finished(Outcome::Failure {
                    step: VALIDATION_STEP.to_string(),
                    message: e.to_string(),
                    attempts: 1,
                });
            }
        };

        let mut tracker = AttemptTracker::resume(&self.config, spent);
        loop {
            let attempt = tracker.begin();
            debug!(item_id = %item.id, slot, attempt, "attempt started");
            let result = steps.execute(session.handle_mut(), &prepared).await;

            match tracker.next(result) {
                Transition::Complete(outcome) => return Attempted::Finished(outcome),
                Transition::SessionLost(error) => {
                    warn!(item_id = %item.id, slot, step = error.step(), error = %error, "session lost mid-attempt");
                    return Attempted::SessionLost {
                        error,
                        attempts: tracker.attempt(),
                    };
                }
                Transition::Retry { delay, error } => {
                    warn!(
                        item_id = %item.id,
                        slot,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        step = error.step(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            return Attempted::Cancelled { attempts: attempt };
                        }
                        () = sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::FieldValue;
    use crate::session::{Layout, SessionPool};
    use crate::testing::{FakeFactory, FakeSequence};

    fn item(id: &str) -> WorkItem {
        WorkItem::new(id, Some(FieldValue::Number(36526.0)))
    }

    fn config(max_attempts: u32, policy: BackoffPolicy) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1000,
            policy,
            ..Default::default()
        }
    }

    async fn one_session() -> Session<crate::testing::FakeHandle> {
        let mut pool = SessionPool::acquire(FakeFactory::new(), 1, Layout::default())
            .await
            .unwrap();
        pool.checkout(0).unwrap()
    }

    #[test]
    fn linear_backoff() {
        let config = config(5, BackoffPolicy::Linear);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(3000));
    }

    #[test]
    fn exponential_backoff() {
        let config = config(5, BackoffPolicy::Exponential);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let config = RetryConfig {
            jitter_ms: 250,
            ..config(3, BackoffPolicy::Linear)
        };
        for _ in 0..50 {
            let delay = config.backoff(2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2250));
        }
    }

    #[test]
    fn tracker_retries_then_fails_with_step() {
        let config = config(2, BackoffPolicy::Linear);
        let mut tracker = AttemptTracker::new(&config);

        tracker.begin();
        let t = tracker.next(Err(StepError::failed("form", "not found")));
        assert!(matches!(t, Transition::Retry { .. }));

        tracker.begin();
        let t = tracker.next(Err(StepError::failed("submit", "modal in the way")));
        assert_eq!(
            t,
            Transition::Complete(Outcome::Failure {
                step: "submit".into(),
                message: "modal in the way".into(),
                attempts: 2,
            })
        );
    }

    #[test]
    fn tracker_does_not_charge_session_loss() {
        let config = config(3, BackoffPolicy::Linear);
        let mut tracker = AttemptTracker::new(&config);
        tracker.begin();
        let t = tracker.next(Err(StepError::session_lost("navigate", "gone")));
        assert!(matches!(t, Transition::SessionLost(_)));
        assert_eq!(tracker.attempt(), 0);
    }

    #[test]
    fn resumed_tracker_keeps_spent_attempts() {
        let config = config(3, BackoffPolicy::Linear);
        let mut tracker = AttemptTracker::resume(&config, 2);
        assert_eq!(tracker.begin(), 3);
        let t = tracker.next(Err(StepError::failed("form", "still broken")));
        assert!(matches!(t, Transition::Complete(Outcome::Failure { attempts: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn step_failures_before_session_loss_are_reported() {
        let steps = FakeSequence::new();
        steps.script(
            "A",
            vec![
                Err(StepError::failed("form", "slow")),
                Err(StepError::failed("form", "slow")),
                Err(StepError::session_lost("submit", "refused")),
            ],
        );
        let coordinator = RetryCoordinator::new(
            config(3, BackoffPolicy::Linear),
            CancellationToken::new(),
        );
        let mut session = one_session().await;

        let attempted = coordinator.run(&mut session, &item("A"), &steps, 0).await;

        assert!(matches!(attempted, Attempted::SessionLost { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_sequence_is_bounded() {
        let steps = FakeSequence::new();
        steps.script(
            "A",
            (0..10).map(|_| Err(StepError::failed("captcha", "timeout"))).collect(),
        );
        let coordinator = RetryCoordinator::new(
            config(3, BackoffPolicy::Linear),
            CancellationToken::new(),
        );
        let mut session = one_session().await;

        let attempted = coordinator.run(&mut session, &item("A"), &steps, 0).await;

        assert_eq!(
            attempted,
            Attempted::Finished(Outcome::Failure {
                step: "captcha".into(),
                message: "timeout".into(),
                attempts: 3,
            })
        );
        assert_eq!(steps.calls_for("A").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_are_non_decreasing() {
        for policy in [BackoffPolicy::Linear, BackoffPolicy::Exponential] {
            let steps = FakeSequence::new();
            steps.script(
                "A",
                (0..5).map(|_| Err(StepError::failed("form", "flaky"))).collect(),
            );
            let coordinator = RetryCoordinator::new(config(5, policy), CancellationToken::new());
            let mut session = one_session().await;

            coordinator.run(&mut session, &item("A"), &steps, 0).await;

            let calls = steps.calls_for("A");
            assert_eq!(calls.len(), 5);
            let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
            assert!(gaps.windows(2).all(|g| g[0] <= g[1]), "{policy:?}: {gaps:?}");
            assert_eq!(gaps[0], Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_date_short_circuits_without_invoking_steps() {
        let steps = FakeSequence::new();
        let coordinator = RetryCoordinator::new(RetryConfig::default(), CancellationToken::new());
        let mut session = one_session().await;
        let bad = WorkItem::new("X", Some(FieldValue::Text("not a date".into())));

        let attempted = coordinator.run(&mut session, &bad, &steps, 0).await;

        match attempted {
            Attempted::Finished(Outcome::Failure { step, attempts, .. }) => {
                assert_eq!(step, VALIDATION_STEP);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(steps.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_same_session_then_succeeds() {
        let steps = FakeSequence::new();
        steps.script(
            "B",
            vec![
                Err(StepError::failed("form", "slow")),
                Err(StepError::failed("form", "slow")),
                Ok(Completion::Done),
            ],
        );
        let coordinator = RetryCoordinator::new(RetryConfig::default(), CancellationToken::new());
        let mut session = one_session().await;

        let attempted = coordinator.run(&mut session, &item("B"), &steps, 0).await;

        assert_eq!(attempted, Attempted::Finished(Outcome::Success { attempts: 3 }));
        let calls = steps.calls_for("B");
        assert!(calls.iter().all(|c| c.handle_id == calls[0].handle_id));
    }

    #[tokio::test(start_paused = true)]
    async fn already_handled_stops_without_retry() {
        let steps = FakeSequence::new();
        steps.script("C", vec![Ok(Completion::AlreadyHandled)]);
        let coordinator = RetryCoordinator::new(RetryConfig::default(), CancellationToken::new());
        let mut session = one_session().await;

        let attempted = coordinator.run(&mut session, &item("C"), &steps, 0).await;

        assert_eq!(
            attempted,
            Attempted::Finished(Outcome::AlreadyHandled { attempts: 1 })
        );
        assert_eq!(steps.calls_for("C").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_loss_is_reported_not_recorded() {
        let steps = FakeSequence::new();
        steps.script("D", vec![Err(StepError::session_lost("navigate", "refused"))]);
        let coordinator = RetryCoordinator::new(RetryConfig::default(), CancellationToken::new());
        let mut session = one_session().await;

        let attempted = coordinator.run(&mut session, &item("D"), &steps, 0).await;

        assert!(matches!(attempted, Attempted::SessionLost { attempts: 0, .. }));
        assert_eq!(steps.calls_for("D").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let steps = FakeSequence::new();
        steps.script("E", vec![Err(StepError::failed("form", "flaky"))]);
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(RetryConfig::default(), cancel.clone());
        let mut session = one_session().await;
        cancel.cancel();

        let attempted = coordinator.run(&mut session, &item("E"), &steps, 0).await;

        assert_eq!(attempted, Attempted::Cancelled { attempts: 1 });
        assert_eq!(steps.calls_for("E").len(), 1);
    }
}
