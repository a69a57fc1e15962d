use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::outcome::{Outcome, RunSummary, SESSION_STEP};
use super::retry::{Attempted, RetryCoordinator};
use super::StepSequence;
use crate::error::{LedgerError, RondoError};
use crate::item::WorkItem;
use crate::ledger::{Ledger, LedgerEntry};
use crate::session::{HealthMonitor, HealthStatus, Session, SessionFactory, SessionPool};
use crate::ui::BatchProgress;

/// Timing knobs for the round loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Pause between rounds so the target is not flooded.
    #[serde(default = "default_inter_round_pause_ms")]
    pub inter_round_pause_ms: u64,
    /// Minimum time between two probes of the same session.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// How long the run may stall with zero healthy sessions before aborting.
    #[serde(default = "default_pool_recovery_deadline_secs")]
    pub pool_recovery_deadline_secs: u64,
    /// Delay between recovery attempts while stalled.
    #[serde(default = "default_recovery_poll_ms")]
    pub recovery_poll_ms: u64,
}

fn default_inter_round_pause_ms() -> u64 {
    2000
}

fn default_health_interval_secs() -> u64 {
    60
}

fn default_pool_recovery_deadline_secs() -> u64 {
    300
}

fn default_recovery_poll_ms() -> u64 {
    5000
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            inter_round_pause_ms: default_inter_round_pause_ms(),
            health_interval_secs: default_health_interval_secs(),
            pool_recovery_deadline_secs: default_pool_recovery_deadline_secs(),
            recovery_poll_ms: default_recovery_poll_ms(),
        }
    }
}

/// Splits `items` into consecutive rounds of `pool_size`, preserving order.
///
/// Position `i` in a round always maps to slot `i`.
pub fn partition_rounds<T: Clone>(items: &[T], pool_size: usize) -> Vec<Vec<T>> {
    items.chunks(pool_size.max(1)).map(<[T]>::to_vec).collect()
}

#[derive(Clone)]
struct Pending {
    item: Arc<WorkItem>,
    /// Step attempts already charged on sessions that later died.
    attempts: u32,
    session_losses: u32,
}

struct Dispatched<H> {
    session: Session<H>,
    pending: Pending,
    /// `Err` carries the panic message of a worker that unwound.
    attempted: Result<Attempted, String>,
    appended: Option<Result<(), LedgerError>>,
}

/// Drives work items through the pool one round at a time.
pub struct BatchScheduler<S> {
    steps: Arc<S>,
    coordinator: Arc<RetryCoordinator>,
    monitor: HealthMonitor,
    config: ScheduleConfig,
    cancel: CancellationToken,
    run_id: Uuid,
    progress: Option<BatchProgress>,
}

impl<S> BatchScheduler<S> {
    pub fn new(
        steps: S,
        coordinator: RetryCoordinator,
        config: ScheduleConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            steps: Arc::new(steps),
            coordinator: Arc::new(coordinator),
            monitor: HealthMonitor::new(Duration::from_secs(config.health_interval_secs)),
            config,
            cancel,
            run_id: Uuid::new_v4(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: BatchProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Processes `items` to completion, cancellation, or pool exhaustion.
    ///
    /// Each round takes the next items for the currently healthy slots, skips
    /// identifiers the ledger already marks done, runs the rest concurrently
    /// and waits for all of them before the next round starts. A round in
    /// which every item was skipped is not counted and is not followed by
    /// the inter-round pause.
    pub async fn run<F>(
        &self,
        items: Vec<WorkItem>,
        pool: &mut SessionPool<F>,
        ledger: &Ledger,
    ) -> Result<RunSummary, RondoError>
    where
        F: SessionFactory,
        S: StepSequence<F::Handle>,
    {
        let mut pending: VecDeque<Pending> = items
            .into_iter()
            .map(|item| Pending {
                item: Arc::new(item),
                attempts: 0,
                session_losses: 0,
            })
            .collect();
        let mut summary = RunSummary::default();
        info!(run_id = %self.run_id, items = pending.len(), pool_size = pool.size(), "run started");

        while !pending.is_empty() {
            if self.cancel.is_cancelled() {
                break;
            }

            self.monitor.sweep(pool).await;
            let Some(slots) = self.healthy_slots(pool).await? else {
                break;
            };

            let done = ledger.snapshot().await?;
            let mut assignments = Vec::with_capacity(slots.len());
            for slot in slots {
                let Some(next) = pending.pop_front() else {
                    break;
                };
                if done.contains(&next.item.id) {
                    info!(item_id = %next.item.id, "already completed, skipping");
                    summary.skipped += 1;
                    if let Some(progress) = &self.progress {
                        progress.skip(&next.item.id);
                    }
                    continue;
                }
                assignments.push((slot, next));
            }
            if assignments.is_empty() {
                continue;
            }

            summary.rounds += 1;
            let round = summary.rounds;
            info!(round, dispatched = assignments.len(), remaining = pending.len(), "round started");

            let mut workers = JoinSet::new();
            let mut in_flight = HashMap::new();
            for (slot, next) in assignments {
                let Some(mut session) = pool.checkout(slot) else {
                    pending.push_front(next);
                    continue;
                };
                let coordinator = Arc::clone(&self.coordinator);
                let steps = Arc::clone(&self.steps);
                let ledger = ledger.clone();
                let run_id = self.run_id;
                let job = next.clone();
                let task = workers.spawn(async move {
                    let run = coordinator.run(&mut session, &job.item, steps.as_ref(), job.attempts);
                    let attempted = AssertUnwindSafe(run).catch_unwind().await.map_err(panic_message);
                    // Appended as soon as the item finishes, not at the barrier.
                    let appended = match &attempted {
                        Ok(Attempted::Finished(outcome)) => Some(
                            ledger
                                .append(LedgerEntry::from_outcome(&job.item, outcome, run_id))
                                .await,
                        ),
                        _ => None,
                    };
                    Dispatched {
                        session,
                        pending: job,
                        attempted,
                        appended,
                    }
                });
                in_flight.insert(task.id(), (slot, next));
            }

            let mut requeue = Vec::new();
            while let Some(joined) = workers.join_next_with_id().await {
                let Dispatched {
                    mut session,
                    pending: mut job,
                    attempted,
                    appended,
                } = match joined {
                    Ok((id, dispatched)) => {
                        in_flight.remove(&id);
                        dispatched
                    }
                    Err(e) => {
                        // The session went down with the task; `reclaim_lost` retires its slot.
                        match in_flight.remove(&e.id()) {
                            Some((slot, job)) => {
                                self.record_panic(round, slot, &job.item, &e.to_string(), &mut summary);
                            }
                            None => error!(round, error = %e, "worker task failed"),
                        }
                        continue;
                    }
                };

                match attempted {
                    Ok(Attempted::Finished(outcome)) => {
                        let appended = appended.unwrap_or(Ok(()));
                        self.settle(&job.item, &outcome, appended, &mut summary);
                    }
                    Ok(Attempted::SessionLost { error, attempts }) => {
                        session.status = HealthStatus::Unhealthy;
                        job.attempts = attempts;
                        job.session_losses += 1;
                        if job.session_losses > self.coordinator.config().max_session_losses {
                            let outcome = Outcome::Failure {
                                step: SESSION_STEP.to_string(),
                                message: format!(
                                    "session lost {} times, last: {error}",
                                    job.session_losses
                                ),
                                attempts: job.session_losses,
                            };
                            let appended = ledger
                                .append(LedgerEntry::from_outcome(
                                    &job.item,
                                    &outcome,
                                    self.run_id,
                                ))
                                .await;
                            self.settle(&job.item, &outcome, appended, &mut summary);
                        } else {
                            summary.requeued += 1;
                            if let Some(progress) = &self.progress {
                                progress.requeue(&job.item.id);
                            }
                            requeue.push((session.slot, job));
                        }
                    }
                    Ok(Attempted::Cancelled { .. }) => {
                        summary.unfinished += 1;
                    }
                    Err(message) => {
                        // Whatever the handle was doing is unknown; the next sweep replaces it.
                        session.status = HealthStatus::Unhealthy;
                        self.record_panic(round, session.slot, &job.item, &message, &mut summary);
                    }
                }
                pool.checkin(session);
            }
            pool.reclaim_lost();

            requeue.sort_by_key(|(slot, _)| *slot);
            for (_, item) in requeue.into_iter().rev() {
                pending.push_front(item);
            }
            info!(round, remaining = pending.len(), "round finished");

            if pending.is_empty() || self.cancel.is_cancelled() {
                continue;
            }
            tokio::select! {
                () = self.cancel.cancelled() => {}
                () = sleep(Duration::from_millis(self.config.inter_round_pause_ms)) => {}
            }
        }

        if self.cancel.is_cancelled() {
            summary.cancelled = true;
            summary.unfinished += pending.len() as u32;
            warn!(run_id = %self.run_id, unfinished = summary.unfinished, "run cancelled");
        }
        info!(run_id = %self.run_id, ?summary, "run finished");
        Ok(summary)
    }

    /// Healthy slots for the next round, stalling while there are none.
    ///
    /// Returns `None` when cancelled while stalled.
    async fn healthy_slots<F: SessionFactory>(
        &self,
        pool: &mut SessionPool<F>,
    ) -> Result<Option<Vec<usize>>, RondoError> {
        let slots = pool.healthy_slots();
        if !slots.is_empty() {
            return Ok(Some(slots));
        }

        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.pool_recovery_deadline_secs);
        warn!(
            deadline_secs = self.config.pool_recovery_deadline_secs,
            "no healthy sessions, waiting for recovery"
        );
        loop {
            self.monitor.sweep(pool).await;
            for slot in pool.retired_slots() {
                if let Err(e) = pool.revive(slot).await {
                    warn!(slot, error = %e, "slot recovery failed");
                }
            }
            let slots = pool.healthy_slots();
            if !slots.is_empty() {
                info!(healthy = slots.len(), "pool recovered");
                return Ok(Some(slots));
            }
            if Instant::now() >= deadline {
                return Err(RondoError::PoolExhausted {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(None),
                () = sleep(Duration::from_millis(self.config.recovery_poll_ms)) => {}
            }
        }
    }

    /// An item whose worker panicked. Nothing is written to the ledger, so a
    /// later run picks it up again.
    fn record_panic(&self, round: u32, slot: usize, item: &WorkItem, message: &str, summary: &mut RunSummary) {
        error!(round, slot, item_id = %item.id, panic = message, "worker panicked, item left unfinished");
        summary.unfinished += 1;
        if let Some(progress) = &self.progress {
            progress.unfinished(&item.id);
        }
    }

    fn settle(
        &self,
        item: &WorkItem,
        outcome: &Outcome,
        appended: Result<(), LedgerError>,
        summary: &mut RunSummary,
    ) {
        summary.record(outcome);
        match outcome {
            Outcome::Failure { step, message, attempts } => {
                error!(item_id = %item.id, step = step.as_str(), attempts, %message, "item failed");
            }
            _ => info!(item_id = %item.id, %outcome, "item finished"),
        }
        if let Err(e) = appended {
            summary.ledger_errors += 1;
            warn!(
                item_id = %item.id,
                error = %e,
                "outcome not persisted, the item may be processed again on resume"
            );
        }
        if let Some(progress) = &self.progress {
            progress.record(&item.id, outcome);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
