//! The orchestration engine: retry coordination and round scheduling.

mod outcome;
mod retry;
mod scheduler;

use std::future::Future;

use crate::error::StepError;
use crate::item::PreparedItem;

pub use outcome::{Completion, Outcome, RunSummary};
#[cfg(test)]
pub use retry::BackoffPolicy;
pub use retry::{RetryConfig, RetryCoordinator};
pub use scheduler::{BatchScheduler, ScheduleConfig, partition_rounds};

/// The domain procedure performed inside a session for one item.
///
/// Implementations must start every call from a fresh navigation so a retry
/// on the same session never resubmits half-finished state.
pub trait StepSequence<H>: Send + Sync + 'static {
    fn execute(
        &self,
        handle: &mut H,
        item: &PreparedItem,
    ) -> impl Future<Output = Result<Completion, StepError>> + Send;
}
