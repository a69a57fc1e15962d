//! In-process backend for `rondo demo`.
//!
//! Sessions live in memory and the step sequence rolls dice for each call, so
//! the whole engine (retries, session replacement, ledger resume) can be
//! watched without a browser or WebDriver server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::engine::{Completion, StepSequence};
use crate::error::{SessionError, StepError};
use crate::item::{FieldValue, PreparedItem, WorkItem};
use crate::session::{Placement, SessionFactory, SessionHandle};

const STEPS: &[&str] = &["open", "identity", "measurements", "submit"];

/// Probabilities and latency of the simulated step sequence.
#[derive(Debug, Clone, Copy)]
pub struct Chances {
    pub failure: f64,
    pub crash: f64,
    pub handled: f64,
    pub latency: Duration,
}

#[derive(Default)]
pub struct SimulatedFactory {
    next_id: AtomicUsize,
}

pub struct SimulatedSession {
    id: usize,
    alive: Arc<AtomicBool>,
}

impl SimulatedFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionFactory for SimulatedFactory {
    type Handle = SimulatedSession;

    async fn create(&self, slot: usize, placement: Placement) -> Result<SimulatedSession, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(slot, session = id, x = placement.x, y = placement.y, "simulated session opened");
        Ok(SimulatedSession {
            id,
            alive: Arc::new(AtomicBool::new(true)),
        })
    }
}

impl SessionHandle for SimulatedSession {
    async fn probe(&mut self) -> Result<(), SessionError> {
        if self.alive.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(SessionError::Probe(format!("simulated session {} crashed", self.id)))
        }
    }

    async fn close(self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Step sequence that succeeds, fails, crashes or reports "already handled"
/// at random according to [`Chances`].
pub struct SimulatedSequence {
    chances: Chances,
}

enum Roll {
    Done,
    Handled,
    Fail(&'static str),
    Crash(&'static str),
}

impl SimulatedSequence {
    pub fn new(chances: Chances) -> Self {
        Self { chances }
    }

    fn roll(&self) -> Roll {
        let mut rng = rand::rng();
        let step = STEPS[rng.random_range(0..STEPS.len())];
        let r: f64 = rng.random();
        let c = self.chances;
        if r < c.crash {
            Roll::Crash(step)
        } else if r < c.crash + c.failure {
            Roll::Fail(step)
        } else if r < c.crash + c.failure + c.handled {
            Roll::Handled
        } else {
            Roll::Done
        }
    }
}

impl StepSequence<SimulatedSession> for SimulatedSequence {
    async fn execute(
        &self,
        handle: &mut SimulatedSession,
        item: &PreparedItem,
    ) -> Result<Completion, StepError> {
        let roll = self.roll();
        tokio::time::sleep(self.chances.latency).await;

        match roll {
            Roll::Done => Ok(Completion::Done),
            Roll::Handled => Ok(Completion::AlreadyHandled),
            Roll::Fail(step) => Err(StepError::failed(
                step,
                format!("element not found while processing {}", item.id()),
            )),
            Roll::Crash(step) => {
                handle.alive.store(false, Ordering::Relaxed);
                Err(StepError::session_lost(
                    step,
                    format!("simulated session {} crashed", handle.id),
                ))
            }
        }
    }
}

/// Demo items `DEMO-0001..`; every tenth has no date and fails validation.
pub fn demo_items(count: usize) -> Vec<WorkItem> {
    (1..=count)
        .map(|n| {
            let date = (n % 10 != 0).then(|| FieldValue::Number(45_000.0 + n as f64));
            let mut item = WorkItem::new(format!("DEMO-{n:04}"), date)
                .with_field("weight", FieldValue::Number(50.0 + (n % 30) as f64));
            if n % 3 == 0 {
                item = item.with_field("note", FieldValue::Text("follow-up".into()));
            }
            item
        })
        .collect()
}
