//! Agent supervisor.
//!
//! Wires the frozen MIB tree, the store handle, and the trap handlers into
//! their tasks, then orchestrates shutdown: trap readers first, then the
//! session, then the updater scheduler.

pub mod dispatch;
pub mod scheduler;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::mib::MibTree;
use crate::store::{DbConfig, SonicStore};
use crate::transport::{self, MasterAddr};
use crate::trap::{TrapEngine, TrapHandler};

pub use dispatch::{respond, MAX_RESPONSE_VARBINDS};
pub use scheduler::{UpdaterScheduler, DEFAULT_UPDATE_FREQUENCY};
pub use session::{Session, SessionOptions, SessionState};

/// Agent wiring knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Updater cadence default, settable from the CLI.
    pub update_frequency: Duration,
    /// snmpd config file scanned for the master endpoint.
    pub snmpd_conf: PathBuf,
    /// Session behavior.
    pub session: SessionOptions,
    /// Store layout for the trap engine; `None` loads `$DB_CONFIG_FILE`.
    pub db_config: Option<DbConfig>,
    /// Bound on queued notifications between trap engine and session.
    pub notify_queue_depth: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            update_frequency: DEFAULT_UPDATE_FREQUENCY,
            snmpd_conf: PathBuf::from(transport::SNMPD_CONFIG_PATH),
            session: SessionOptions::default(),
            db_config: None,
            notify_queue_depth: 256,
        }
    }
}

pub struct Agent {
    tree: Arc<MibTree>,
    store: Arc<dyn SonicStore>,
    trap_handlers: Vec<Arc<dyn TrapHandler>>,
    config: AgentConfig,
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(
        tree: MibTree,
        store: Arc<dyn SonicStore>,
        trap_handlers: Vec<Arc<dyn TrapHandler>>,
        config: AgentConfig,
    ) -> Agent {
        Agent {
            tree: Arc::new(tree),
            store,
            trap_handlers,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that triggers graceful shutdown when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Discover the master endpoint and serve until shutdown.
    pub async fn run(self) -> Result<()> {
        let addr = transport::discover_master_addr(&self.config.snmpd_conf);
        self.run_with_addr(addr).await
    }

    /// Serve a known master endpoint until shutdown.
    pub async fn run_with_addr(self, addr: MasterAddr) -> Result<()> {
        info!(
            leaves = self.tree.len(),
            subtrees = self.tree.registrations().len(),
            updaters = self.tree.updaters().len(),
            "starting agent"
        );

        let (notify_tx, notify_rx) = mpsc::channel(self.config.notify_queue_depth);

        // Independent tokens so shutdown can cancel in order: trap readers,
        // then the session, then the updaters.
        let scheduler_cancel = CancellationToken::new();
        let session_cancel = CancellationToken::new();
        let trap_cancel = CancellationToken::new();

        let mut updater_tasks = UpdaterScheduler::new(
            self.tree.updaters().to_vec(),
            self.config.update_frequency,
            scheduler_cancel.clone(),
        )
        .spawn();

        let session = Session::new(
            addr,
            self.tree.clone(),
            self.config.session.clone(),
            notify_rx,
            session_cancel.clone(),
        );
        let session_task = tokio::spawn(session.run());

        // A missing or malformed store config disables traps, nothing else.
        let db_config = match self.config.db_config.clone() {
            Some(config) => Ok(config),
            None => DbConfig::from_env(),
        };
        let trap_task = match db_config {
            Ok(db_config) => {
                match TrapEngine::new(
                    self.store.clone(),
                    &db_config,
                    self.trap_handlers.clone(),
                    notify_tx.clone(),
                    trap_cancel.clone(),
                ) {
                    Ok(engine) => Some(tokio::spawn(engine.run())),
                    Err(e) => {
                        error!(error = %e, "trap engine failed to start; traps disabled");
                        None
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "store config unavailable; traps disabled");
                None
            }
        };
        drop(notify_tx);

        self.shutdown.cancelled().await;
        info!("shutdown requested");

        trap_cancel.cancel();
        if let Some(task) = trap_task {
            let _ = task.await;
        }
        session_cancel.cancel();
        let _ = session_task.await;
        scheduler_cancel.cancel();
        while updater_tasks.join_next().await.is_some() {}

        info!("shutdown complete");
        Ok(())
    }
}
