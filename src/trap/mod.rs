//! Trap engine.
//!
//! Subscribes to keyspace-notification channels across the configured store
//! instances, matches channels against compiled patterns, invokes the
//! registered handlers, and hands assembled notifications to the session
//! over a bounded queue. Handler failures are logged and never tear the
//! engine down; a lost subscription is re-armed with backoff.

pub mod envmon;
pub mod link_flap;
pub mod pattern;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::store::{DbConfig, SonicStore};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::BoxFuture;
use pattern::{compile_pattern, CompiledPattern};

pub use envmon::EnvMonTrap;
pub use link_flap::LinkFlapTrap;

/// The standard snmpTrapOID.0 prepended to every notification.
pub fn snmp_trap_oid() -> Oid {
    crate::oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0)
}

/// What a handler returns when a trap should be emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapNotification {
    pub trap_oid: Oid,
    pub var_binds: Vec<VarBind>,
}

/// A keyspace-event-driven trap source.
///
/// Handlers cache the mapped status value they would send, not raw store
/// fields: `process` returns `None` whenever the mapped value is unchanged,
/// so unrelated field updates never become trap storms.
pub trait TrapHandler: Send + Sync + 'static {
    /// Short name for log context.
    fn name(&self) -> &'static str;

    /// Store-ID-qualified keyspace patterns, e.g.
    /// `__keyspace@0__:PORT_TABLE:Ethernet*`.
    fn patterns(&self) -> Vec<String>;

    /// Seed the handler's cache from live store state. No traps are emitted
    /// during seeding.
    fn init(&self) -> BoxFuture<'_, Result<()>>;

    /// Handle one keyspace event.
    fn process<'a>(
        &'a self,
        channel: &'a str,
        operation: &'a str,
    ) -> BoxFuture<'a, Result<Option<TrapNotification>>>;
}

struct InstanceRoute {
    instance: String,
    raw_patterns: Vec<String>,
    matchers: Vec<(CompiledPattern, Vec<Arc<dyn TrapHandler>>)>,
}

/// The multi-instance subscriber.
pub struct TrapEngine {
    store: Arc<dyn SonicStore>,
    handlers: Vec<Arc<dyn TrapHandler>>,
    routes: Vec<InstanceRoute>,
    notify_tx: mpsc::Sender<Vec<VarBind>>,
    cancel: CancellationToken,
}

impl TrapEngine {
    /// Compile patterns and route them to store instances. Invalid patterns
    /// are logged and skipped; a pattern whose database is missing from the
    /// store config is a startup error.
    pub fn new(
        store: Arc<dyn SonicStore>,
        db_config: &DbConfig,
        handlers: Vec<Arc<dyn TrapHandler>>,
        notify_tx: mpsc::Sender<Vec<VarBind>>,
        cancel: CancellationToken,
    ) -> Result<TrapEngine> {
        // Aggregate pattern -> handlers, preserving declaration order.
        let mut order: Vec<String> = Vec::new();
        let mut by_pattern: HashMap<String, Vec<Arc<dyn TrapHandler>>> = HashMap::new();
        for handler in &handlers {
            for raw in handler.patterns() {
                let slot = by_pattern.entry(raw.clone()).or_insert_with(|| {
                    order.push(raw.clone());
                    Vec::new()
                });
                slot.push(handler.clone());
            }
        }

        let mut routes: Vec<InstanceRoute> = Vec::new();
        for raw in order {
            let compiled = match compile_pattern(&raw) {
                Ok(compiled) => compiled,
                Err(e) => {
                    error!(pattern = %raw, error = %e, "invalid trap pattern, skipping");
                    continue;
                }
            };
            let instance = db_config.instance_for_db(compiled.db).ok_or_else(|| {
                Error::config(
                    "database_config",
                    format!("no store instance serves db {} for pattern {}", compiled.db, raw),
                )
            })?;
            let handlers = by_pattern.remove(&raw).unwrap_or_default();
            let idx = match routes.iter().position(|r| r.instance == instance) {
                Some(idx) => idx,
                None => {
                    routes.push(InstanceRoute {
                        instance: instance.to_owned(),
                        raw_patterns: Vec::new(),
                        matchers: Vec::new(),
                    });
                    routes.len() - 1
                }
            };
            routes[idx].raw_patterns.push(raw);
            routes[idx].matchers.push((compiled, handlers));
        }

        Ok(TrapEngine {
            store,
            handlers,
            routes,
            notify_tx,
            cancel,
        })
    }

    /// Seed handler caches, then run one reader per store instance until
    /// cancelled.
    pub async fn run(self) {
        for handler in &self.handlers {
            if let Err(e) = handler.init().await {
                error!(handler = handler.name(), error = %e, "trap handler init failed");
            }
        }

        info!(
            instances = self.routes.len(),
            handlers = self.handlers.len(),
            "trap engine starting"
        );

        let mut readers = JoinSet::new();
        for route in self.routes {
            let store = self.store.clone();
            let notify_tx = self.notify_tx.clone();
            let cancel = self.cancel.clone();
            readers.spawn(instance_reader(store, route, notify_tx, cancel));
        }
        while readers.join_next().await.is_some() {}
        info!("trap engine stopped");
    }
}

async fn instance_reader(
    store: Arc<dyn SonicStore>,
    route: InstanceRoute,
    notify_tx: mpsc::Sender<Vec<VarBind>>,
    cancel: CancellationToken,
) {
    let mut backoff = Duration::from_millis(200);
    let backoff_cap = Duration::from_secs(3);
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            result = store.psubscribe(&route.instance, route.raw_patterns.clone()) => result,
        };
        match subscribed {
            Ok(mut subscription) => {
                debug!(
                    instance = %route.instance,
                    patterns = route.raw_patterns.len(),
                    "keyspace subscription armed"
                );
                backoff = Duration::from_millis(200);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            subscription.close();
                            return;
                        }
                        event = subscription.recv() => match event {
                            Some(event) => {
                                dispatch_event(&route, &event.channel, &event.operation, &notify_tx).await;
                            }
                            None => {
                                warn!(instance = %route.instance, "subscription lost, re-arming");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(instance = %route.instance, error = %e, "subscribe failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(backoff_cap);
            }
        }
    }
}

async fn dispatch_event(
    route: &InstanceRoute,
    channel: &str,
    operation: &str,
    notify_tx: &mpsc::Sender<Vec<VarBind>>,
) {
    for (pattern, handlers) in &route.matchers {
        if !pattern.regex.is_match(channel) {
            continue;
        }
        debug!(channel, pattern = %pattern.raw, "keyspace event matched");
        for handler in handlers {
            match handler.process(channel, operation).await {
                Ok(Some(notification)) => {
                    if notification.var_binds.is_empty() {
                        warn!(
                            handler = handler.name(),
                            "notification without varbinds, dropping"
                        );
                        continue;
                    }
                    let mut varbinds = Vec::with_capacity(1 + notification.var_binds.len());
                    varbinds.push(VarBind::new(
                        snmp_trap_oid(),
                        Value::ObjectIdentifier(notification.trap_oid.clone()),
                    ));
                    varbinds.extend(notification.var_binds);
                    if notify_tx.try_send(varbinds).is_err() {
                        warn!(
                            handler = handler.name(),
                            "notify queue full or closed, dropping trap"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(handler = handler.name(), error = %e, "trap handler failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct StaticHandler {
        patterns: Vec<String>,
        trap_oid: Oid,
    }

    impl TrapHandler for StaticHandler {
        fn name(&self) -> &'static str {
            "static"
        }
        fn patterns(&self) -> Vec<String> {
            self.patterns.clone()
        }
        fn init(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn process<'a>(
            &'a self,
            channel: &'a str,
            _operation: &'a str,
        ) -> BoxFuture<'a, Result<Option<TrapNotification>>> {
            Box::pin(async move {
                Ok(Some(TrapNotification {
                    trap_oid: self.trap_oid.clone(),
                    var_binds: vec![VarBind::new(
                        crate::oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 1),
                        Value::string(channel.to_owned()),
                    )],
                }))
            })
        }
    }

    fn config() -> DbConfig {
        DbConfig::from_json(
            r#"{
                "INSTANCES": {"redis": {"hostname": "127.0.0.1", "port": 6379}},
                "DATABASES": {
                    "APPL_DB": {"id": 0, "instance": "redis"},
                    "STATE_DB": {"id": 6, "instance": "redis"}
                }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_engine_prepends_snmp_trap_oid() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handler = Arc::new(StaticHandler {
            patterns: vec!["__keyspace@0__:PORT_TABLE:Ethernet*".to_owned()],
            trap_oid: crate::oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3),
        });
        let engine = TrapEngine::new(
            store.clone() as Arc<dyn SonicStore>,
            &config(),
            vec![handler],
            tx,
            cancel.clone(),
        )
        .unwrap();
        let task = tokio::spawn(engine.run());

        // Wait for the subscription, then fire an event.
        for _ in 0..50 {
            if store.subscriber_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.publish_keyspace("redis", 0, "PORT_TABLE:Ethernet0", "hset");

        let varbinds = rx.recv().await.unwrap();
        assert_eq!(varbinds.len(), 2);
        assert_eq!(varbinds[0].name, snmp_trap_oid());
        assert_eq!(
            varbinds[0].value,
            Value::ObjectIdentifier(crate::oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3))
        );

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unroutable_db_is_config_error() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = mpsc::channel(16);
        let handler = Arc::new(StaticHandler {
            patterns: vec!["__keyspace@9__:SOME_TABLE|*".to_owned()],
            trap_oid: crate::oid!(1, 3, 6, 1),
        });
        let err = TrapEngine::new(
            store as Arc<dyn SonicStore>,
            &config(),
            vec![handler],
            tx,
            CancellationToken::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_invalid_pattern_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = mpsc::channel(16);
        let handler = Arc::new(StaticHandler {
            patterns: vec![
                "PORT_TABLE:no-db-prefix*".to_owned(),
                "__keyspace@0__:PORT_TABLE:Ethernet*".to_owned(),
            ],
            trap_oid: crate::oid!(1, 3, 6, 1),
        });
        let engine = TrapEngine::new(
            store as Arc<dyn SonicStore>,
            &config(),
            vec![handler],
            tx,
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(engine.routes.len(), 1);
        assert_eq!(engine.routes[0].raw_patterns.len(), 1);
    }
}
