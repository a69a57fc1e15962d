use std::mem;

use tracing::{info, warn};

use super::{HealthStatus, Layout, Session, SessionFactory, SessionHandle};
use crate::error::SessionError;

enum Slot<H> {
    Idle(Session<H>),
    /// Owned by a worker for the duration of one item.
    CheckedOut { generation: u32 },
    /// Replacement failed; the slot takes no more work unless revived.
    Retired { generation: u32 },
}

/// Fixed set of slots, each holding at most one session.
pub struct SessionPool<F: SessionFactory> {
    factory: F,
    layout: Layout,
    slots: Vec<Slot<F::Handle>>,
}

impl<F: SessionFactory> SessionPool<F> {
    /// Creates `count` sessions placed according to `layout`.
    ///
    /// Slots whose session cannot be created start retired; the call fails
    /// only when no slot could be filled.
    pub async fn acquire(factory: F, count: usize, layout: Layout) -> Result<Self, SessionError> {
        let mut slots = Vec::with_capacity(count);
        let mut last_error = None;
        for slot in 0..count {
            let placement = layout.placement(slot);
            match factory.create(slot, placement).await {
                Ok(handle) => {
                    info!(slot, ?placement, "session created");
                    slots.push(Slot::Idle(Session::new(slot, placement, handle)));
                }
                Err(e) => {
                    warn!(slot, error = %e, "session creation failed, slot retired");
                    slots.push(Slot::Retired { generation: 0 });
                    last_error = Some(e);
                }
            }
        }

        let pool = Self {
            factory,
            layout,
            slots,
        };
        if pool.live_count() == 0 {
            return Err(last_error.unwrap_or(SessionError::Create {
                slot: 0,
                message: "pool size is zero".to_string(),
            }));
        }
        Ok(pool)
    }

    /// Cardinality of the pool, retired slots included.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Slots that are not retired.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s, Slot::Retired { .. }))
            .count()
    }

    /// Idle, healthy slots in slot order.
    pub fn healthy_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Slot::Idle(session) if session.is_healthy() => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn retired_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| matches!(s, Slot::Retired { .. }).then_some(i))
            .collect()
    }

    #[cfg(test)]
    pub fn session(&self, slot: usize) -> Option<&Session<F::Handle>> {
        match self.slots.get(slot) {
            Some(Slot::Idle(session)) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self, slot: usize) -> Option<&mut Session<F::Handle>> {
        match self.slots.get_mut(slot) {
            Some(Slot::Idle(session)) => Some(session),
            _ => None,
        }
    }

    /// Takes exclusive ownership of an idle session.
    pub fn checkout(&mut self, slot: usize) -> Option<Session<F::Handle>> {
        let entry = self.slots.get_mut(slot)?;
        let Slot::Idle(session) = entry else {
            return None;
        };
        let generation = session.generation;
        match mem::replace(entry, Slot::CheckedOut { generation }) {
            Slot::Idle(session) => Some(session),
            other => {
                *entry = other;
                None
            }
        }
    }

    /// Returns a session to its slot.
    pub fn checkin(&mut self, session: Session<F::Handle>) {
        let slot = session.slot;
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Slot::Idle(session);
        }
    }

    #[cfg(test)]
    pub fn mark_unhealthy(&mut self, slot: usize) {
        if let Some(session) = self.session_mut(slot) {
            session.status = HealthStatus::Unhealthy;
        }
    }

    /// Tears down `session` (best effort) and creates a fresh one for the
    /// same slot and placement.
    pub async fn replace(
        &self,
        session: Session<F::Handle>,
    ) -> Result<Session<F::Handle>, SessionError> {
        let slot = session.slot;
        let placement = session.placement;
        let generation = session.generation + 1;
        if let Err(e) = session.into_handle().close().await {
            warn!(slot, error = %e, "closing old session failed, ignoring");
        }
        let handle = self.factory.create(slot, placement).await?;
        let mut fresh = Session::new(slot, placement, handle);
        fresh.generation = generation;
        Ok(fresh)
    }

    /// Replaces the session in an idle slot. On failure the slot is retired.
    pub async fn replace_slot(&mut self, slot: usize) -> Result<(), SessionError> {
        let Some(mut session) = self.checkout(slot) else {
            return Ok(());
        };
        session.status = HealthStatus::Replacing;
        let generation = session.generation + 1;
        match self.replace(session).await {
            Ok(fresh) => {
                info!(slot, generation = fresh.generation, "session replaced");
                self.checkin(fresh);
                Ok(())
            }
            Err(e) => {
                warn!(slot, error = %e, "session replacement failed, slot retired");
                self.slots[slot] = Slot::Retired { generation };
                Err(e)
            }
        }
    }

    /// Tries to bring a retired slot back with a new session.
    pub async fn revive(&mut self, slot: usize) -> Result<(), SessionError> {
        let Some(Slot::Retired { generation }) = self.slots.get(slot) else {
            return Ok(());
        };
        let generation = *generation + 1;
        let placement = self.layout.placement(slot);
        let handle = self.factory.create(slot, placement).await?;
        let mut session = Session::new(slot, placement, handle);
        session.generation = generation;
        info!(slot, generation, "retired slot revived");
        self.slots[slot] = Slot::Idle(session);
        Ok(())
    }

    /// Retires slots whose session never came back from a worker.
    ///
    /// The handle went down with its worker and cannot be closed from here;
    /// the slot keeps its generation so a revival numbers the next handle on.
    pub fn reclaim_lost(&mut self) -> usize {
        let mut lost = 0;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if let Slot::CheckedOut { generation } = *entry {
                warn!(slot, generation, "session was not returned by its worker, slot retired");
                *entry = Slot::Retired { generation };
                lost += 1;
            }
        }
        lost
    }

    /// Closes every idle session. Individual failures are logged, never returned.
    pub async fn shutdown(self) {
        for entry in self.slots {
            if let Slot::Idle(session) = entry {
                let slot = session.slot;
                match session.into_handle().close().await {
                    Ok(()) => info!(slot, "session closed"),
                    Err(e) => warn!(slot, error = %e, "failed to close session"),
                }
            }
        }
    }
}
