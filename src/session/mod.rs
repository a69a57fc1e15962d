//! Sessions: exclusive handles to remote interactive contexts.

mod health;
mod layout;
mod pool;

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::SessionError;

pub use health::HealthMonitor;
pub use layout::Layout;
pub use pool::SessionPool;

/// Window position and size of a session on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Replacing,
}

/// A live handle to one remote session.
pub trait SessionHandle: Send + Sized + 'static {
    /// Cheap read-only liveness check.
    fn probe(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Releases the remote session.
    fn close(self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Creates handles for pool slots.
pub trait SessionFactory: Send + Sync + 'static {
    type Handle: SessionHandle;

    fn create(
        &self,
        slot: usize,
        placement: Placement,
    ) -> impl Future<Output = Result<Self::Handle, SessionError>> + Send;
}

/// A pooled session: the handle plus its slot bookkeeping.
#[derive(Debug)]
pub struct Session<H> {
    pub slot: usize,
    pub placement: Placement,
    pub status: HealthStatus,
    pub last_probe: Instant,
    /// Bumped every time the slot gets a fresh handle.
    pub generation: u32,
    handle: H,
}

impl<H: SessionHandle> Session<H> {
    pub fn new(slot: usize, placement: Placement, handle: H) -> Self {
        Self {
            slot,
            placement,
            status: HealthStatus::Healthy,
            last_probe: Instant::now(),
            generation: 0,
            handle,
        }
    }

    #[cfg(test)]
    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Probes the handle and records the result.
    pub async fn probe(&mut self) -> Result<(), SessionError> {
        let result = self.handle.probe().await;
        self.last_probe = Instant::now();
        self.status = match result {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        result
    }

    pub(crate) fn into_handle(self) -> H {
        self.handle
    }
}
