//! The updater contract driven by the scheduler.

use std::time::Duration;

use crate::error::Result;
use crate::BoxFuture;

/// Reinit every Nth update cycle by default (once a minute at the default
/// 5-second cadence).
pub const DEFAULT_REINIT_RATE: u32 = 12;

/// A periodic snapshotter backing one or more MIB entries.
///
/// `update_data` refreshes the fast-changing maps; `reinit_data` rebuilds
/// the slow-changing ones (interface naming, key sets). Implementations
/// publish each refresh as a unit so concurrent readers never observe a
/// half-written snapshot.
pub trait MibUpdater: Send + Sync + 'static {
    /// Short name for log context.
    fn name(&self) -> &'static str;

    /// Rebuild slow-changing state. Called at startup and every
    /// [`reinit_rate`](MibUpdater::reinit_rate) update cycles.
    fn reinit_data(&self) -> BoxFuture<'_, Result<()>>;

    /// Refresh the published snapshot.
    fn update_data(&self) -> BoxFuture<'_, Result<()>>;

    /// Re-establish store connections after a store fault.
    fn reinit_connection(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Per-updater cadence override; `None` uses the agent-wide default.
    fn frequency(&self) -> Option<Duration> {
        None
    }

    /// Run `reinit_data` every Nth update cycle.
    fn reinit_rate(&self) -> u32 {
        DEFAULT_REINIT_RATE
    }
}
