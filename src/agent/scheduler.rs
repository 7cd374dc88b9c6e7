//! Updater scheduler.
//!
//! One task per updater: `reinit_data` at startup and every Nth cycle,
//! `update_data` every `frequency` seconds. A store fault logs WARN and
//! re-initializes the updater's connections; anything else logs ERROR and
//! the updater keeps serving its previous snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::mib::MibUpdater;

/// Default update cadence, overridable from the CLI.
pub const DEFAULT_UPDATE_FREQUENCY: Duration = Duration::from_secs(5);

pub struct UpdaterScheduler {
    updaters: Vec<Arc<dyn MibUpdater>>,
    default_frequency: Duration,
    cancel: CancellationToken,
}

impl UpdaterScheduler {
    pub fn new(
        updaters: Vec<Arc<dyn MibUpdater>>,
        default_frequency: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            updaters,
            default_frequency,
            cancel,
        }
    }

    /// Spawn the per-updater tasks; the returned set is joined at shutdown.
    pub fn spawn(self) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for updater in self.updaters {
            let frequency = updater.frequency().unwrap_or(self.default_frequency);
            let cancel = self.cancel.clone();
            tasks.spawn(run_updater(updater, frequency, cancel));
        }
        tasks
    }
}

async fn run_updater(updater: Arc<dyn MibUpdater>, frequency: Duration, cancel: CancellationToken) {
    let name = updater.name();
    debug!(updater = name, ?frequency, "updater task starting");

    if let Err(e) = updater.reinit_data().await {
        warn!(updater = name, error = %e, "initial reinit failed; retrying next cycle");
    }
    run_cycle(&updater, name).await;

    let reinit_rate = updater.reinit_rate().max(1);
    let mut cycles: u32 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(frequency) => {}
        }
        cycles = cycles.wrapping_add(1);
        if cycles % reinit_rate == 0 {
            if let Err(e) = updater.reinit_data().await {
                warn!(updater = name, error = %e, "periodic reinit failed");
            }
        }
        run_cycle(&updater, name).await;
    }
    debug!(updater = name, "updater task stopped");
}

async fn run_cycle(updater: &Arc<dyn MibUpdater>, name: &'static str) {
    match updater.update_data().await {
        Ok(()) => {}
        Err(e) if e.is_store() => {
            warn!(updater = name, error = %e, "store fault; re-initializing connection");
            if let Err(e) = updater.reinit_connection().await {
                warn!(updater = name, error = %e, "reinit_connection failed");
            }
        }
        Err(e) => {
            error!(updater = name, error = %e, "update failed; keeping previous snapshot");
        }
    }
}
