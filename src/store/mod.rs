//! Store abstraction.
//!
//! The agent reads switch state from a set of numbered key-value databases
//! and subscribes to their keyspace-notification channels. The concrete
//! client is an external collaborator; the core consumes this trait.

pub mod config;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::BoxFuture;

pub use config::{DbConfig, DatabaseConfig, InstanceConfig};
pub use memory::MemoryStore;

/// Numeric database id, as used in `__keyspace@<db>__:` channels.
pub type DbId = u32;

/// Database ids used by the stock modules.
pub const APPL_DB: DbId = 0;
pub const COUNTERS_DB: DbId = 2;
pub const CONFIG_DB: DbId = 4;
pub const STATE_DB: DbId = 6;

/// A hash entry: field name to string value.
pub type FieldMap = HashMap<String, String>;

/// One keyspace notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceEvent {
    /// Channel name, e.g. `__keyspace@0__:PORT_TABLE:Ethernet0`.
    pub channel: String,
    /// Operation verb, e.g. `hset` or `del`.
    pub operation: String,
}

/// A live pattern subscription on one store instance.
///
/// Dropping (or [`close`](EventSubscription::close)) unsubscribes.
pub struct EventSubscription {
    rx: mpsc::Receiver<KeyspaceEvent>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    /// Build from a receiver plus an unsubscribe hook.
    pub fn new(
        rx: mpsc::Receiver<KeyspaceEvent>,
        on_close: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self { rx, on_close }
    }

    /// Next event; `None` when the store side closed the subscription.
    pub async fn recv(&mut self) -> Option<KeyspaceEvent> {
        self.rx.recv().await
    }

    /// Unsubscribe explicitly.
    pub fn close(mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

/// Capabilities the core needs from the store client.
pub trait SonicStore: Send + Sync + 'static {
    /// All fields of one hash key; `Ok(None)` when the key is absent.
    fn get_all<'a>(&'a self, db: DbId, key: &'a str) -> BoxFuture<'a, Result<Option<FieldMap>>>;

    /// Keys matching a `*`-glob.
    fn keys<'a>(&'a self, db: DbId, glob: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Pattern-subscribe to keyspace channels on one named instance.
    fn psubscribe<'a>(
        &'a self,
        instance: &'a str,
        patterns: Vec<String>,
    ) -> BoxFuture<'a, Result<EventSubscription>>;

    /// Blocking-mode read: bounded retry with exponential backoff capped at
    /// 3 seconds per cycle, for keys expected to exist.
    fn get_all_blocking<'a>(&'a self, db: DbId, key: &'a str) -> BoxFuture<'a, Result<FieldMap>> {
        Box::pin(async move {
            let mut delay = Duration::from_millis(100);
            let cap = Duration::from_secs(3);
            let mut last_err: Option<Error> = None;
            for _ in 0..5 {
                match self.get_all(db, key).await {
                    Ok(Some(fields)) => return Ok(fields),
                    Ok(None) => last_err = None,
                    Err(e) => last_err = Some(e),
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(cap);
            }
            Err(last_err
                .unwrap_or_else(|| Error::store(format!("key {} missing in db {}", key, db))))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_all_blocking_retries_until_present() {
        let store = MemoryStore::new();
        let handle = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                store.insert(APPL_DB, "PORT_TABLE:Ethernet0", &[("oper_status", "up")]);
            })
        };
        let fields = store
            .get_all_blocking(APPL_DB, "PORT_TABLE:Ethernet0")
            .await
            .unwrap();
        assert_eq!(fields.get("oper_status").map(String::as_str), Some("up"));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_blocking_gives_up() {
        let store = MemoryStore::new();
        let err = store
            .get_all_blocking(STATE_DB, "PSU_INFO|PSU 1")
            .await
            .unwrap_err();
        assert!(err.is_store());
    }
}
