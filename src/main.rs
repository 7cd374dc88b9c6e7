//! Daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use agentx_subagent::agent::{Agent, AgentConfig};
use agentx_subagent::mib::{MibBuilder, MibModule};
use agentx_subagent::mibs::{InterfacesMib, SystemMib};
use agentx_subagent::store::{MemoryStore, SonicStore};
use agentx_subagent::trap::{EnvMonTrap, LinkFlapTrap, TrapHandler};

/// AgentX sub-agent exposing switch state over SNMP.
#[derive(Debug, Parser)]
#[command(name = "agentx-subagent", version)]
struct Args {
    /// Background update frequency in seconds.
    #[arg(long = "update-frequency", default_value_t = 5)]
    update_frequency: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(args).await {
        Ok(()) => {
            info!("goodbye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "agent failed during startup");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> agentx_subagent::Result<()> {
    // The store client is deployment-specific; embedding builds wire their
    // own `SonicStore` through `Agent::new`. The standalone binary runs on
    // the in-process backend.
    let store: Arc<dyn SonicStore> = Arc::new(MemoryStore::new());

    let mut builder = MibBuilder::new();
    SystemMib::new(store.clone()).register(&mut builder);
    InterfacesMib::new(store.clone()).register(&mut builder);
    let tree = builder.freeze();

    let trap_handlers: Vec<Arc<dyn TrapHandler>> = vec![
        Arc::new(LinkFlapTrap::new(store.clone())),
        Arc::new(EnvMonTrap::new(store.clone())),
    ];

    let config = AgentConfig {
        update_frequency: Duration::from_secs(args.update_frequency.max(1)),
        ..AgentConfig::default()
    };

    let agent = Agent::new(tree, store, trap_handlers, config);
    let shutdown = agent.shutdown_token();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = sighup.recv() => {
                    debug!("SIGHUP ignored");
                }
            }
        }
    });

    info!(pid = std::process::id(), "starting agent");
    agent.run().await
}
