use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::{HealthStatus, Session, SessionFactory, SessionPool};

/// Periodic liveness checks over idle pool slots.
///
/// Probes are rate-limited per session by `interval`, not run every round.
/// Sessions found dead, or flagged unhealthy by a worker, are replaced before
/// the next round can assign work to their slot.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub replaced: usize,
    pub retired: usize,
}

impl HealthMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn is_due<H>(&self, session: &Session<H>, now: Instant) -> bool {
        now.saturating_duration_since(session.last_probe) >= self.interval
    }

    pub async fn sweep<F: SessionFactory>(&self, pool: &mut SessionPool<F>) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Instant::now();

        for slot in 0..pool.size() {
            let Some(session) = pool.session_mut(slot) else {
                continue;
            };

            let dead = if session.status == HealthStatus::Unhealthy {
                true
            } else if self.is_due(session, now) {
                report.probed += 1;
                match session.probe().await {
                    Ok(()) => false,
                    Err(e) => {
                        warn!(slot, error = %e, "health probe failed");
                        true
                    }
                }
            } else {
                false
            };

            if dead {
                match pool.replace_slot(slot).await {
                    Ok(()) => report.replaced += 1,
                    Err(_) => report.retired += 1,
                }
            }
        }

        if report != SweepReport::default() {
            debug!(?report, "health sweep finished");
        }
        report
    }
}
