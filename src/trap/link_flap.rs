//! linkUp/linkDown notifications.
//!
//! Watches front-panel ports, port channels, and the management interface
//! across their owning databases. The cache keys the (admin, oper) status
//! pair per interface; an event that leaves the pair unchanged emits
//! nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::pattern::split_channel;
use super::{TrapHandler, TrapNotification};
use crate::error::Result;
use crate::oid::Oid;
use crate::store::{SonicStore, APPL_DB, CONFIG_DB, STATE_DB};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::{mibs, oid, BoxFuture};

const HANDLER_NAME: &str = "link-flap";

fn link_down_oid() -> Oid {
    oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3)
}

fn link_up_oid() -> Oid {
    oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 4)
}

/// RFC 1213 ifAdminStatus/ifOperStatus integer for a status string.
fn status_int(status: &str) -> i32 {
    match status {
        "up" => 1,
        _ => 2,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct LinkStatus {
    oper: String,
    admin: String,
}

#[derive(Default)]
struct Caches {
    /// Keyed by full APPL_DB key, e.g. `PORT_TABLE:Ethernet0`.
    ether: HashMap<String, LinkStatus>,
    /// Keyed by full APPL_DB key, e.g. `LAG_TABLE:PortChannel1`.
    lag: HashMap<String, LinkStatus>,
    /// Keyed by interface name, e.g. `eth0`.
    mgmt: HashMap<String, LinkStatus>,
}

pub struct LinkFlapTrap {
    store: Arc<dyn SonicStore>,
    cache: Mutex<Caches>,
}

impl LinkFlapTrap {
    pub fn new(store: Arc<dyn SonicStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(Caches::default()),
        }
    }

    async fn seed_appl(&self, glob: &str) -> Result<HashMap<String, LinkStatus>> {
        let mut table = HashMap::new();
        for key in self.store.keys(APPL_DB, glob).await? {
            let entry = self.store.get_all_blocking(APPL_DB, &key).await?;
            table.insert(key, status_from_fields(&entry));
        }
        Ok(table)
    }

    async fn seed_mgmt(&self) -> Result<HashMap<String, LinkStatus>> {
        let mut table: HashMap<String, LinkStatus> = HashMap::new();

        // admin_status lives in the config DB.
        for key in self.store.keys(CONFIG_DB, "MGMT_PORT|eth*").await? {
            let Some(if_name) = key.split('|').nth(1).map(str::to_owned) else {
                continue;
            };
            let entry = self.store.get_all_blocking(CONFIG_DB, &key).await?;
            let admin = entry
                .get("admin_status")
                .cloned()
                .unwrap_or_else(|| "down".to_owned());
            table.insert(
                if_name,
                LinkStatus {
                    oper: "down".to_owned(),
                    admin,
                },
            );
        }

        // oper_status lives in the state DB.
        for key in self.store.keys(STATE_DB, "MGMT_PORT_TABLE|eth*").await? {
            let Some(if_name) = key.split('|').nth(1).map(str::to_owned) else {
                continue;
            };
            let entry = self.store.get_all_blocking(STATE_DB, &key).await?;
            let oper = entry
                .get("oper_status")
                .cloned()
                .unwrap_or_else(|| "down".to_owned());
            table
                .entry(if_name)
                .or_insert_with(|| LinkStatus {
                    oper: String::new(),
                    admin: "down".to_owned(),
                })
                .oper = oper;
        }
        Ok(table)
    }

    /// Read the current (admin, oper) pair for the event's interface.
    async fn current_status(&self, db: u32, key: &str) -> Result<Option<(String, LinkStatus)>> {
        match db {
            STATE_DB => {
                // Management oper change; admin comes from this interface's
                // cached config record.
                let Some(entry) = self.store.get_all(STATE_DB, key).await? else {
                    return Ok(None);
                };
                let Some(oper) = entry.get("oper_status").cloned() else {
                    warn!(key, "oper_status missing, no trap generated");
                    return Ok(None);
                };
                let Some(if_name) = key.split('|').nth(1).map(str::to_owned) else {
                    return Ok(None);
                };
                let admin = {
                    let cache = self.cache.lock().expect("cache lock");
                    cache
                        .mgmt
                        .get(&if_name)
                        .map(|s| s.admin.clone())
                        .unwrap_or_else(|| "down".to_owned())
                };
                Ok(Some((if_name, LinkStatus { oper, admin })))
            }
            CONFIG_DB => {
                // Management admin change; oper comes from the cache.
                let Some(entry) = self.store.get_all(CONFIG_DB, key).await? else {
                    return Ok(None);
                };
                let Some(admin) = entry.get("admin_status").cloned() else {
                    warn!(key, "admin_status missing, no trap generated");
                    return Ok(None);
                };
                let Some(if_name) = key.split('|').nth(1).map(str::to_owned) else {
                    return Ok(None);
                };
                let oper = {
                    let cache = self.cache.lock().expect("cache lock");
                    cache
                        .mgmt
                        .get(&if_name)
                        .map(|s| s.oper.clone())
                        .unwrap_or_else(|| "down".to_owned())
                };
                Ok(Some((if_name, LinkStatus { oper, admin })))
            }
            APPL_DB => {
                let Some(entry) = self.store.get_all(APPL_DB, key).await? else {
                    return Ok(None);
                };
                let if_name = if let Some(name) = key.strip_prefix("PORT_TABLE:") {
                    name
                } else if let Some(name) = key.strip_prefix("LAG_TABLE:") {
                    name
                } else {
                    warn!(key, "no cache table for key");
                    return Ok(None);
                };
                Ok(Some((if_name.to_owned(), status_from_fields(&entry))))
            }
            _ => {
                warn!(db, key, "event from unexpected database");
                Ok(None)
            }
        }
    }

    /// Update the cache; true when the pair changed (or the key is new).
    fn update_cache(&self, db: u32, key: &str, if_name: &str, status: &LinkStatus) -> bool {
        let mut cache = self.cache.lock().expect("cache lock");
        let table = if key.starts_with("PORT_TABLE:Ethernet") {
            &mut cache.ether
        } else if key.starts_with("LAG_TABLE:PortChannel") {
            &mut cache.lag
        } else if db == STATE_DB || db == CONFIG_DB {
            &mut cache.mgmt
        } else {
            warn!(key, "no cache table for key");
            return false;
        };
        let cache_key = if db == APPL_DB { key } else { if_name };
        match table.get_mut(cache_key) {
            Some(cached) if cached == status => false,
            Some(cached) => {
                *cached = status.clone();
                true
            }
            None => {
                table.insert(cache_key.to_owned(), status.clone());
                true
            }
        }
    }

    fn build_notification(if_name: &str, status: &LinkStatus) -> Option<TrapNotification> {
        let trap_oid = match status.oper.as_str() {
            "up" => link_up_oid(),
            "down" => link_down_oid(),
            other => {
                warn!(if_name, oper_status = other, "unexpected oper_status, no trap generated");
                return None;
            }
        };
        let Some(if_index) = mibs::port_ifindex(if_name) else {
            warn!(if_name, "no ifIndex for interface, no trap generated");
            return None;
        };
        let var_binds = vec![
            VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, if_index),
                Value::Integer(if_index as i32),
            ),
            VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 7, if_index),
                Value::Integer(status_int(&status.admin)),
            ),
            VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 8, if_index),
                Value::Integer(status_int(&status.oper)),
            ),
        ];
        Some(TrapNotification {
            trap_oid,
            var_binds,
        })
    }
}

fn status_from_fields(entry: &crate::store::FieldMap) -> LinkStatus {
    LinkStatus {
        oper: entry
            .get("oper_status")
            .cloned()
            .unwrap_or_else(|| "down".to_owned()),
        admin: entry
            .get("admin_status")
            .cloned()
            .unwrap_or_else(|| "down".to_owned()),
    }
}

impl TrapHandler for LinkFlapTrap {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    fn patterns(&self) -> Vec<String> {
        vec![
            "__keyspace@0__:LAG_TABLE:PortChannel*".to_owned(),
            "__keyspace@0__:PORT_TABLE:Ethernet*".to_owned(),
            "__keyspace@6__:MGMT_PORT_TABLE|eth*".to_owned(),
            "__keyspace@4__:MGMT_PORT|eth*".to_owned(),
        ]
    }

    fn init(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let ether = self.seed_appl("PORT_TABLE:Ethernet*").await?;
            let lag = self.seed_appl("LAG_TABLE:PortChannel*").await?;
            let mgmt = self.seed_mgmt().await?;
            let mut cache = self.cache.lock().expect("cache lock");
            cache.ether = ether;
            cache.lag = lag;
            cache.mgmt = mgmt;
            Ok(())
        })
    }

    fn process<'a>(
        &'a self,
        channel: &'a str,
        _operation: &'a str,
    ) -> BoxFuture<'a, Result<Option<TrapNotification>>> {
        Box::pin(async move {
            let Some((db, key)) = split_channel(channel) else {
                warn!(channel, "malformed keyspace channel");
                return Ok(None);
            };
            let Some((if_name, status)) = self.current_status(db, key).await? else {
                return Ok(None);
            };
            if !self.update_cache(db, key, &if_name, &status) {
                return Ok(None);
            }
            Ok(Self::build_notification(&if_name, &status))
        })
    }
}
