//! In-memory store implementation.
//!
//! Serves two roles: the test double used throughout the test suite, and the
//! in-process backend the binary falls back to when no external store client
//! is wired in by the embedding deployment.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use regex::Regex;
use tokio::sync::mpsc;

use super::{DbId, EventSubscription, FieldMap, KeyspaceEvent, SonicStore};
use crate::error::{Error, Result};
use crate::trap::pattern::glob_regex;
use crate::BoxFuture;

struct Subscriber {
    instance: String,
    patterns: Vec<Regex>,
    tx: mpsc::Sender<KeyspaceEvent>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<DbId, BTreeMap<String, FieldMap>>,
    subscribers: Vec<Subscriber>,
}

/// Shared-handle in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a hash key.
    pub fn insert(&self, db: DbId, key: &str, fields: &[(&str, &str)]) {
        let map: FieldMap = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut inner = self.inner.lock().expect("store lock");
        inner.data.entry(db).or_default().insert(key.to_owned(), map);
    }

    /// Update a single field, creating the key when absent.
    pub fn hset(&self, db: DbId, key: &str, field: &str, value: &str) {
        let mut inner = self.inner.lock().expect("store lock");
        inner
            .data
            .entry(db)
            .or_default()
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
    }

    /// Remove a key.
    pub fn remove(&self, db: DbId, key: &str) {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(table) = inner.data.get_mut(&db) {
            table.remove(key);
        }
    }

    /// Deliver a keyspace event to matching subscribers of `instance`.
    pub fn publish(&self, instance: &str, channel: &str, operation: &str) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in &inner.subscribers {
            if sub.instance != instance {
                continue;
            }
            if sub.patterns.iter().any(|re| re.is_match(channel)) {
                let event = KeyspaceEvent {
                    channel: channel.to_owned(),
                    operation: operation.to_owned(),
                };
                // Bounded channel; a full subscriber drops the event like a
                // slow pub/sub consumer would.
                let _ = sub.tx.try_send(event);
            }
        }
    }

    /// Publish the `__keyspace@<db>__:<key>` event for a key mutation.
    pub fn publish_keyspace(&self, instance: &str, db: DbId, key: &str, operation: &str) {
        let channel = format!("__keyspace@{}__:{}", db, key);
        self.publish(instance, &channel, operation);
    }

    /// Number of live subscriptions, for shutdown assertions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().expect("store lock");
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }
}

impl SonicStore for MemoryStore {
    fn get_all<'a>(&'a self, db: DbId, key: &'a str) -> BoxFuture<'a, Result<Option<FieldMap>>> {
        Box::pin(async move {
            let inner = self.inner.lock().expect("store lock");
            Ok(inner.data.get(&db).and_then(|table| table.get(key)).cloned())
        })
    }

    fn keys<'a>(&'a self, db: DbId, glob: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let re = glob_regex(glob)
                .map_err(|e| Error::store(format!("bad key glob {}: {}", glob, e)))?;
            let inner = self.inner.lock().expect("store lock");
            Ok(inner
                .data
                .get(&db)
                .map(|table| {
                    table
                        .keys()
                        .filter(|k| re.is_match(k))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default())
        })
    }

    fn psubscribe<'a>(
        &'a self,
        instance: &'a str,
        patterns: Vec<String>,
    ) -> BoxFuture<'a, Result<EventSubscription>> {
        Box::pin(async move {
            let mut compiled = Vec::with_capacity(patterns.len());
            for pattern in &patterns {
                let re = glob_regex(pattern)
                    .map_err(|e| Error::store(format!("bad pattern {}: {}", pattern, e)))?;
                compiled.push(re);
            }
            let (tx, rx) = mpsc::channel(64);
            let mut inner = self.inner.lock().expect("store lock");
            inner.subscribers.push(Subscriber {
                instance: instance.to_owned(),
                patterns: compiled,
                tx,
            });
            // Receiver drop closes the sender side; publish() reaps it.
            Ok(EventSubscription::new(rx, None))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{APPL_DB, STATE_DB};

    #[tokio::test]
    async fn test_get_all_and_keys() {
        let store = MemoryStore::new();
        store.insert(APPL_DB, "PORT_TABLE:Ethernet0", &[("oper_status", "up")]);
        store.insert(APPL_DB, "PORT_TABLE:Ethernet4", &[("oper_status", "down")]);
        store.insert(APPL_DB, "LAG_TABLE:PortChannel1", &[("oper_status", "up")]);

        let fields = store.get_all(APPL_DB, "PORT_TABLE:Ethernet0").await.unwrap();
        assert_eq!(
            fields.unwrap().get("oper_status").map(String::as_str),
            Some("up")
        );
        assert!(store.get_all(APPL_DB, "PORT_TABLE:Ethernet8").await.unwrap().is_none());
        assert!(store.get_all(STATE_DB, "PORT_TABLE:Ethernet0").await.unwrap().is_none());

        let mut keys = store.keys(APPL_DB, "PORT_TABLE:Ethernet*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["PORT_TABLE:Ethernet0", "PORT_TABLE:Ethernet4"]);
    }

    #[tokio::test]
    async fn test_psubscribe_routes_by_instance_and_pattern() {
        let store = MemoryStore::new();
        let mut sub = store
            .psubscribe("redis", vec!["__keyspace@0__:PORT_TABLE:Ethernet*".to_owned()])
            .await
            .unwrap();

        store.publish_keyspace("redis", 0, "PORT_TABLE:Ethernet0", "hset");
        // Wrong instance and wrong db: both silently dropped.
        store.publish_keyspace("redis2", 0, "PORT_TABLE:Ethernet0", "hset");
        store.publish_keyspace("redis", 1, "PORT_TABLE:Ethernet0", "hset");

        let event = sub.recv().await.unwrap();
        assert_eq!(event.channel, "__keyspace@0__:PORT_TABLE:Ethernet0");
        assert_eq!(event.operation, "hset");
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_reaped() {
        let store = MemoryStore::new();
        let sub = store
            .psubscribe("redis", vec!["__keyspace@6__:*".to_owned()])
            .await
            .unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
    }
}
