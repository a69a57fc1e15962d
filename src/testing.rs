//! In-memory sessions and step sequences for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::{Completion, StepSequence};
use crate::error::{SessionError, StepError};
use crate::item::PreparedItem;
use crate::session::{Placement, Session, SessionFactory, SessionHandle};

#[derive(Default)]
struct FactoryState {
    next_id: usize,
    created: usize,
    probes: usize,
    close_attempts: usize,
    fail_close: bool,
    failing_creates: HashMap<usize, usize>,
    dead: HashSet<usize>,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    state: Arc<Mutex<FactoryState>>,
}

pub struct FakeHandle {
    pub id: usize,
    pub slot: usize,
    state: Arc<Mutex<FactoryState>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn probes(&self) -> usize {
        self.state.lock().unwrap().probes
    }

    pub fn close_attempts(&self) -> usize {
        self.state.lock().unwrap().close_attempts
    }

    /// The next `times` creations for `slot` fail.
    pub fn fail_creates_for_slot(&self, slot: usize, times: usize) {
        self.state.lock().unwrap().failing_creates.insert(slot, times);
    }

    pub fn fail_close(&self, fail: bool) {
        self.state.lock().unwrap().fail_close = fail;
    }

    pub fn kill_handle(&self, id: usize) {
        self.state.lock().unwrap().dead.insert(id);
    }
}

impl SessionFactory for FakeFactory {
    type Handle = FakeHandle;

    async fn create(&self, slot: usize, _placement: Placement) -> Result<FakeHandle, SessionError> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.failing_creates.get_mut(&slot)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(SessionError::Create {
                slot,
                message: "browser did not start".into(),
            });
        }
        state.next_id += 1;
        state.created += 1;
        Ok(FakeHandle {
            id: state.next_id,
            slot,
            state: Arc::clone(&self.state),
        })
    }
}

impl FakeHandle {
    pub fn kill(&self) {
        self.state.lock().unwrap().dead.insert(self.id);
    }
}

impl SessionHandle for FakeHandle {
    async fn probe(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.probes += 1;
        if state.dead.contains(&self.id) {
            Err(SessionError::Probe(format!("handle {} is gone", self.id)))
        } else {
            Ok(())
        }
    }

    async fn close(self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.close_attempts += 1;
        if state.fail_close {
            Err(SessionError::Close("already gone".into()))
        } else {
            Ok(())
        }
    }
}

impl Session<FakeHandle> {
    pub fn handle_id(&self) -> usize {
        self.handle().id
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub item_id: String,
    pub handle_id: usize,
    pub slot: usize,
    pub at: Instant,
}

#[derive(Default)]
struct SequenceState {
    scripts: HashMap<String, VecDeque<Result<Completion, StepError>>>,
    panics: HashSet<String>,
    calls: Vec<Call>,
}

/// Step sequence driven by per-item scripts. Unscripted calls succeed.
#[derive(Clone, Default)]
pub struct FakeSequence {
    state: Arc<Mutex<SequenceState>>,
    step_delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn script(&self, item_id: &str, results: Vec<Result<Completion, StepError>>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(item_id.to_string(), results.into());
    }

    /// Every call for `item_id` panics inside the worker.
    pub fn panic_on(&self, item_id: &str) {
        self.state.lock().unwrap().panics.insert(item_id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, item_id: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.item_id == item_id).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl StepSequence<FakeHandle> for FakeSequence {
    async fn execute(
        &self,
        handle: &mut FakeHandle,
        item: &PreparedItem,
    ) -> Result<Completion, StepError> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let (scripted, panics) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call {
                item_id: item.id().to_string(),
                handle_id: handle.id,
                slot: handle.slot,
                at: Instant::now(),
            });
            let panics = state.panics.contains(item.id());
            let scripted = state
                .scripts
                .get_mut(item.id())
                .and_then(|queue| queue.pop_front());
            (scripted, panics)
        };

        if panics {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            panic!("scripted panic for {}", item.id());
        }

        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let result = scripted.unwrap_or(Ok(Completion::Done));
        if matches!(&result, Err(e) if e.is_session_loss()) {
            handle.kill();
        }
        result
    }
}
