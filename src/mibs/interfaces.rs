//! RFC 1213 interfaces group over the port and management tables.
//!
//! Each ifTable column is an overlay: front-panel ports answer first,
//! management interfaces fill in their own index range. Counters are
//! 64-bit in the store and masked to 32 bits here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::mib::{next_in_sorted, MibBuilder, MibEntry, MibModule, MibUpdater, SubtreeIndex};
use crate::mibs::{port_ifindex, MGMT_IFINDEX_BASE};
use crate::oid::Oid;
use crate::store::{FieldMap, SonicStore, APPL_DB, CONFIG_DB, COUNTERS_DB, STATE_DB};
use crate::value::Value;
use crate::{oid, BoxFuture};

/// RFC 1213 caps ifSpeed at a 32-bit gauge.
const RFC1213_MAX_SPEED: u64 = 4_294_967_295;

/// IANA ifType ethernetCsmacd.
const IF_TYPE_ETHERNET: i32 = 6;

const IF_ADMIN_STATUS: u32 = 7;
const IF_OPER_STATUS: u32 = 8;

/// ifEntry columns served by this module.
const COLUMNS: [u32; 11] = [1, 2, 3, 4, 5, IF_ADMIN_STATUS, IF_OPER_STATUS, 10, 14, 16, 20];

#[derive(Debug, Clone, Default)]
struct IfRow {
    name: String,
    if_type: i32,
    mtu: i32,
    speed_mbps: u64,
    admin: i32,
    oper: i32,
    in_octets: u64,
    in_errors: u64,
    out_octets: u64,
    out_errors: u64,
}

#[derive(Debug, Default)]
struct Snapshot {
    /// Sorted `[ifindex]` sub-ids for front-panel ports.
    port_index: Vec<Oid>,
    /// Sorted `[ifindex]` sub-ids for management interfaces.
    mgmt_index: Vec<Oid>,
    rows: HashMap<u32, IfRow>,
}

fn status_int(entry: &FieldMap, field: &str) -> i32 {
    match entry.get(field).map(String::as_str) {
        Some("up") => 1,
        _ => 2,
    }
}

fn counter(entry: Option<&FieldMap>, field: &str) -> u64 {
    entry
        .and_then(|e| e.get(field))
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

pub struct InterfacesUpdater {
    store: Arc<dyn SonicStore>,
    port_keys: RwLock<Vec<String>>,
    mgmt_names: RwLock<Vec<String>>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl InterfacesUpdater {
    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().expect("snapshot lock").clone()
    }

    async fn port_row(&self, key: &str) -> Result<Option<(u32, IfRow)>> {
        let Some(name) = key.strip_prefix("PORT_TABLE:") else {
            return Ok(None);
        };
        let Some(if_index) = port_ifindex(name) else {
            return Ok(None);
        };
        let Some(entry) = self.store.get_all(APPL_DB, key).await? else {
            return Ok(None);
        };
        let counters_key = format!("COUNTERS:{}", name);
        let counters = self.store.get_all(COUNTERS_DB, &counters_key).await?;
        let row = IfRow {
            name: name.to_owned(),
            if_type: IF_TYPE_ETHERNET,
            mtu: entry.get("mtu").and_then(|m| m.parse().ok()).unwrap_or(0),
            speed_mbps: entry.get("speed").and_then(|s| s.parse().ok()).unwrap_or(0),
            admin: status_int(&entry, "admin_status"),
            oper: status_int(&entry, "oper_status"),
            in_octets: counter(counters.as_ref(), "SAI_PORT_STAT_IF_IN_OCTETS"),
            in_errors: counter(counters.as_ref(), "SAI_PORT_STAT_IF_IN_ERRORS"),
            out_octets: counter(counters.as_ref(), "SAI_PORT_STAT_IF_OUT_OCTETS"),
            out_errors: counter(counters.as_ref(), "SAI_PORT_STAT_IF_OUT_ERRORS"),
        };
        Ok(Some((if_index, row)))
    }

    async fn mgmt_row(&self, name: &str) -> Result<Option<(u32, IfRow)>> {
        let Some(if_index) = port_ifindex(name) else {
            return Ok(None);
        };
        let config_key = format!("MGMT_PORT|{}", name);
        let Some(config) = self.store.get_all(CONFIG_DB, &config_key).await? else {
            return Ok(None);
        };
        let state_key = format!("MGMT_PORT_TABLE|{}", name);
        let state = self.store.get_all(STATE_DB, &state_key).await?;
        let row = IfRow {
            name: name.to_owned(),
            if_type: IF_TYPE_ETHERNET,
            mtu: config.get("mtu").and_then(|m| m.parse().ok()).unwrap_or(1500),
            speed_mbps: config.get("speed").and_then(|s| s.parse().ok()).unwrap_or(1000),
            admin: status_int(&config, "admin_status"),
            oper: state.as_ref().map(|s| status_int(s, "oper_status")).unwrap_or(2),
            ..Default::default()
        };
        Ok(Some((if_index, row)))
    }
}

impl MibUpdater for InterfacesUpdater {
    fn name(&self) -> &'static str {
        "interfaces"
    }

    fn reinit_data(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut port_keys = self.store.keys(APPL_DB, "PORT_TABLE:Ethernet*").await?;
            port_keys.sort();
            let mgmt_names: Vec<String> = self
                .store
                .keys(CONFIG_DB, "MGMT_PORT|eth*")
                .await?
                .iter()
                .filter_map(|key| key.split('|').nth(1).map(str::to_owned))
                .collect();
            *self.port_keys.write().expect("key lock") = port_keys;
            *self.mgmt_names.write().expect("key lock") = mgmt_names;
            Ok(())
        })
    }

    fn update_data(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let port_keys = self.port_keys.read().expect("key lock").clone();
            let mgmt_names = self.mgmt_names.read().expect("key lock").clone();

            let mut snapshot = Snapshot::default();
            for key in &port_keys {
                if let Some((if_index, row)) = self.port_row(key).await? {
                    snapshot.port_index.push(oid!(if_index));
                    snapshot.rows.insert(if_index, row);
                }
            }
            for name in &mgmt_names {
                if let Some((if_index, row)) = self.mgmt_row(name).await? {
                    snapshot.mgmt_index.push(oid!(if_index));
                    snapshot.rows.insert(if_index, row);
                }
            }
            snapshot.port_index.sort();
            snapshot.mgmt_index.sort();

            // Published as a unit: readers see the old or the new snapshot,
            // never a mix.
            *self.snapshot.write().expect("snapshot lock") = Arc::new(snapshot);
            Ok(())
        })
    }
}

struct PortIndex(Arc<InterfacesUpdater>);

impl SubtreeIndex for PortIndex {
    fn next(&self, sub_id: &[u32], include: bool) -> Option<Oid> {
        next_in_sorted(&self.0.snapshot().port_index, sub_id, include)
    }
}

struct MgmtIndex(Arc<InterfacesUpdater>);

impl SubtreeIndex for MgmtIndex {
    fn next(&self, sub_id: &[u32], include: bool) -> Option<Oid> {
        next_in_sorted(&self.0.snapshot().mgmt_index, sub_id, include)
    }
}

fn column_value(row: &IfRow, if_index: u32, column: u32) -> Option<Value> {
    match column {
        1 => Some(Value::Integer(if_index as i32)),
        2 => Some(Value::string(row.name.clone())),
        3 => Some(Value::Integer(row.if_type)),
        4 => Some(Value::Integer(row.mtu)),
        5 => {
            let bps = row.speed_mbps.saturating_mul(1_000_000).min(RFC1213_MAX_SPEED);
            Some(Value::Gauge32(bps as u32))
        }
        IF_ADMIN_STATUS => Some(Value::Integer(row.admin)),
        IF_OPER_STATUS => Some(Value::Integer(row.oper)),
        10 => Some(Value::counter32_masked(row.in_octets)),
        14 => Some(Value::counter32_masked(row.in_errors)),
        16 => Some(Value::counter32_masked(row.out_octets)),
        20 => Some(Value::counter32_masked(row.out_errors)),
        _ => None,
    }
}

pub struct InterfacesMib {
    updater: Arc<InterfacesUpdater>,
}

impl InterfacesMib {
    pub fn new(store: Arc<dyn SonicStore>) -> Self {
        Self {
            updater: Arc::new(InterfacesUpdater {
                store,
                port_keys: RwLock::new(Vec::new()),
                mgmt_names: RwLock::new(Vec::new()),
                snapshot: RwLock::new(Arc::new(Snapshot::default())),
            }),
        }
    }

    fn column_entry(&self, column: u32) -> MibEntry {
        let ports = {
            let updater = self.updater.clone();
            MibEntry::subtree(Arc::new(PortIndex(self.updater.clone())), move |sub| {
                let [if_index] = sub else { return None };
                if *if_index >= MGMT_IFINDEX_BASE {
                    return None;
                }
                let snapshot = updater.snapshot();
                let row = snapshot.rows.get(if_index)?;
                column_value(row, *if_index, column)
            })
        };
        let mgmt = {
            let updater = self.updater.clone();
            MibEntry::subtree(Arc::new(MgmtIndex(self.updater.clone())), move |sub| {
                let [if_index] = sub else { return None };
                if *if_index < MGMT_IFINDEX_BASE {
                    return None;
                }
                let snapshot = updater.snapshot();
                let row = snapshot.rows.get(if_index)?;
                column_value(row, *if_index, column)
            })
        };
        MibEntry::overlay(ports, mgmt)
    }
}

impl MibModule for InterfacesMib {
    fn register(&self, builder: &mut MibBuilder) {
        let mut module = builder.module(oid!(1, 3, 6, 1, 2, 1, 2));
        module.updater(self.updater.clone());

        let updater = self.updater.clone();
        module.scalar(&[1, 0], move || {
            let snapshot = updater.snapshot();
            Some(Value::Integer(
                (snapshot.port_index.len() + snapshot.mgmt_index.len()) as i32,
            ))
        });

        for column in COLUMNS {
            let entry = self.column_entry(column);
            module.entry(&[2, 1, column], entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mib::{GetOutcome, MibTree};
    use crate::store::MemoryStore;

    async fn seeded_tree() -> MibTree {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            APPL_DB,
            "PORT_TABLE:Ethernet0",
            &[
                ("admin_status", "up"),
                ("oper_status", "up"),
                ("mtu", "9100"),
                ("speed", "100000"),
            ],
        );
        store.insert(
            APPL_DB,
            "PORT_TABLE:Ethernet4",
            &[("admin_status", "up"), ("oper_status", "down"), ("mtu", "9100")],
        );
        store.insert(
            COUNTERS_DB,
            "COUNTERS:Ethernet0",
            &[
                ("SAI_PORT_STAT_IF_IN_OCTETS", "4294967297"),
                ("SAI_PORT_STAT_IF_OUT_OCTETS", "1000"),
            ],
        );
        store.insert(CONFIG_DB, "MGMT_PORT|eth0", &[("admin_status", "up")]);
        store.insert(STATE_DB, "MGMT_PORT_TABLE|eth0", &[("oper_status", "up")]);

        let mib = InterfacesMib::new(store as Arc<dyn SonicStore>);
        let mut builder = MibBuilder::new();
        mib.register(&mut builder);
        let tree = builder.freeze();
        for updater in tree.updaters() {
            updater.reinit_data().await.unwrap();
            updater.update_data().await.unwrap();
        }
        tree
    }

    fn value_at(tree: &MibTree, oid: &Oid) -> Value {
        match tree.get_value(oid) {
            GetOutcome::Value(value) => value,
            other => panic!("no value at {}: {:?}", oid, other),
        }
    }

    #[tokio::test]
    async fn test_if_number_counts_both_kinds() {
        let tree = seeded_tree().await;
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 1, 0)),
            Value::Integer(3)
        );
    }

    #[tokio::test]
    async fn test_if_index_walk_crosses_overlay() {
        let tree = seeded_tree().await;
        let mut walked = Vec::new();
        let mut cursor = oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1);
        let mut include = true;
        while let Some((next, value)) = tree.next_value(&cursor, include) {
            if !next.starts_with(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1)) {
                break;
            }
            walked.push(value);
            cursor = next;
            include = false;
        }
        // Ethernet0 -> 1, Ethernet4 -> 5, eth0 -> 10000, in walk order.
        assert_eq!(
            walked,
            vec![Value::Integer(1), Value::Integer(5), Value::Integer(10000)]
        );
    }

    #[tokio::test]
    async fn test_column_values() {
        let tree = seeded_tree().await;
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1)),
            Value::string("Ethernet0")
        );
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 4, 1)),
            Value::Integer(9100)
        );
        // 100 Gb/s overflows the 32-bit gauge and is capped.
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 5, 1)),
            Value::Gauge32(u32::MAX)
        );
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 8, 5)),
            Value::Integer(2)
        );
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 10000)),
            Value::string("eth0")
        );
    }

    #[tokio::test]
    async fn test_counters_masked_to_32_bits() {
        let tree = seeded_tree().await;
        // 2^32 + 1 masks to 1.
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 10, 1)),
            Value::Counter32(1)
        );
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 16, 1)),
            Value::Counter32(1000)
        );
        // Absent counters read as zero.
        assert_eq!(
            value_at(&tree, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 10, 5)),
            Value::Counter32(0)
        );
    }

    #[tokio::test]
    async fn test_missing_row_is_no_such_instance() {
        let tree = seeded_tree().await;
        assert_eq!(
            tree.get_value(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 2)),
            GetOutcome::NoSuchInstance
        );
    }
}
