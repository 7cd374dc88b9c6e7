//! PSU and fan environmental-monitor notifications (Cisco EnvMon values).
//!
//! Many store fields mutate on every poll cycle (voltage, temperature,
//! speed); the cache holds only the mapped status integer actually sent, so
//! a trap goes out exactly when that mapped value changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::{TrapHandler, TrapNotification};
use crate::error::Result;
use crate::store::{FieldMap, SonicStore, STATE_DB};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::{oid, BoxFuture};

const HANDLER_NAME: &str = "envmon";

/// Cisco EnvMon fan states.
mod fan_status {
    pub const UP: i32 = 2;
    pub const DOWN: i32 = 3;
    pub const WARNING: i32 = 4;
}

/// Cisco EnvMon power-supply states.
mod psu_status {
    pub const OFF_ENV_OTHER: i32 = 1;
    pub const ON: i32 = 2;
    pub const OFF_ENV_POWER: i32 = 5;
    pub const OFF_ENV_TEMP: i32 = 6;
    pub const FAILED: i32 = 8;
    pub const ON_BUT_INLINE_POWER_FAIL: i32 = 12;
}

fn field_true(entry: &FieldMap, field: &str) -> bool {
    entry
        .get(field)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parse a numeric field: absent reads as 0, unparseable disables the
/// threshold check that uses it.
fn field_f64(entry: &FieldMap, field: &str) -> Option<f64> {
    match entry.get(field) {
        None => Some(0.0),
        Some(raw) => raw.parse().ok(),
    }
}

/// Mapped fan status. This is the semantic state: traps fire only when it
/// changes.
fn calc_fan_status(entry: &FieldMap) -> i32 {
    if !field_true(entry, "presence") {
        return fan_status::DOWN;
    }
    if !field_true(entry, "status") {
        return fan_status::DOWN;
    }
    if field_true(entry, "is_under_speed") || field_true(entry, "is_over_speed") {
        return fan_status::WARNING;
    }
    fan_status::UP
}

/// Mapped PSU status, with voltage/temperature threshold checks.
fn calc_psu_status(entry: &FieldMap) -> i32 {
    if !field_true(entry, "presence") {
        return psu_status::OFF_ENV_OTHER;
    }
    if !field_true(entry, "status") {
        return psu_status::FAILED;
    }
    if field_true(entry, "power_overload") {
        return psu_status::OFF_ENV_POWER;
    }
    if let (Some(voltage), Some(vmin), Some(vmax)) = (
        field_f64(entry, "voltage"),
        field_f64(entry, "voltage_min_threshold"),
        field_f64(entry, "voltage_max_threshold"),
    ) {
        if (vmin != 0.0 && voltage < vmin) || (vmax != 0.0 && voltage > vmax) {
            return psu_status::ON_BUT_INLINE_POWER_FAIL;
        }
    }
    if let (Some(temp), Some(threshold)) = (
        field_f64(entry, "temp"),
        field_f64(entry, "temp_threshold"),
    ) {
        if threshold != 0.0 && temp >= threshold {
            return psu_status::OFF_ENV_TEMP;
        }
    }
    psu_status::ON
}

/// EnvMon fan index from a key suffix: `PSU1_FAN1` -> 101,
/// `FANTRAY2_1` -> 21, anything else -> 0.
fn fan_index(suffix: &str) -> u32 {
    static PSU_FAN: OnceLock<Regex> = OnceLock::new();
    static FANTRAY: OnceLock<Regex> = OnceLock::new();
    let psu_fan =
        PSU_FAN.get_or_init(|| Regex::new(r"^PSU(\d+)_FAN(\d+)$").expect("static regex"));
    let fantray =
        FANTRAY.get_or_init(|| Regex::new(r"^FANTRAY(\d+)_(\d+)$").expect("static regex"));

    let upper = suffix.to_ascii_uppercase();
    if let Some(captures) = psu_fan.captures(&upper) {
        let psu: u32 = captures[1].parse().unwrap_or(0);
        let fan: u32 = captures[2].parse().unwrap_or(0);
        return psu * 100 + fan;
    }
    if let Some(captures) = fantray.captures(&upper) {
        let tray: u32 = captures[1].parse().unwrap_or(0);
        let fan: u32 = captures[2].parse().unwrap_or(0);
        return tray * 10 + fan;
    }
    0
}

/// EnvMon PSU index from a key suffix: first number after "PSU".
fn psu_index(suffix: &str) -> u32 {
    static PSU: OnceLock<Regex> = OnceLock::new();
    let psu = PSU.get_or_init(|| {
        RegexBuilder::new(r"PSU\s*(\d+)")
            .case_insensitive(true)
            .build()
            .expect("static regex")
    });
    psu.captures(suffix)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

pub struct EnvMonTrap {
    store: Arc<dyn SonicStore>,
    fans: Mutex<HashMap<String, i32>>,
    psus: Mutex<HashMap<String, i32>>,
}

impl EnvMonTrap {
    pub fn new(store: Arc<dyn SonicStore>) -> Self {
        Self {
            store,
            fans: Mutex::new(HashMap::new()),
            psus: Mutex::new(HashMap::new()),
        }
    }

    async fn seed(&self, glob: &str, calc: fn(&FieldMap) -> i32) -> Result<HashMap<String, i32>> {
        let mut table = HashMap::new();
        for key in self.store.keys(STATE_DB, glob).await? {
            let entry = self.store.get_all_blocking(STATE_DB, &key).await?;
            table.insert(key, calc(&entry));
        }
        Ok(table)
    }

    fn fan_notification(key: &str, status: i32) -> TrapNotification {
        let suffix = key.split('|').nth(1).unwrap_or(key);
        let index = fan_index(suffix);
        TrapNotification {
            trap_oid: oid!(1, 3, 6, 1, 4, 1, 9, 9, 117, 1, 4, 1, 1, 1),
            var_binds: vec![VarBind::new(
                oid!(1, 3, 6, 1, 4, 1, 9, 9, 117, 1, 4, 1, 1, 1, index),
                Value::Integer(status),
            )],
        }
    }

    fn psu_notification(key: &str, status: i32) -> TrapNotification {
        let suffix = key.split('|').nth(1).unwrap_or(key);
        let index = psu_index(suffix);
        TrapNotification {
            trap_oid: oid!(1, 3, 6, 1, 4, 1, 9, 9, 117, 1, 1, 2, 1, 2),
            var_binds: vec![VarBind::new(
                oid!(1, 3, 6, 1, 4, 1, 9, 9, 117, 1, 1, 2, 1, 2, index),
                Value::Integer(status),
            )],
        }
    }
}

impl TrapHandler for EnvMonTrap {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    fn patterns(&self) -> Vec<String> {
        vec![
            "__keyspace@6__:FAN_INFO|*".to_owned(),
            "__keyspace@6__:PSU_INFO|*".to_owned(),
        ]
    }

    fn init(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let fans = self.seed("FAN_INFO|*", calc_fan_status).await?;
            let psus = self.seed("PSU_INFO|*", calc_psu_status).await?;
            *self.fans.lock().expect("fan cache lock") = fans;
            *self.psus.lock().expect("psu cache lock") = psus;
            Ok(())
        })
    }

    fn process<'a>(
        &'a self,
        channel: &'a str,
        _operation: &'a str,
    ) -> BoxFuture<'a, Result<Option<TrapNotification>>> {
        Box::pin(async move {
            let Some((_, key)) = super::pattern::split_channel(channel) else {
                warn!(channel, "malformed keyspace channel");
                return Ok(None);
            };
            let Some(entry) = self.store.get_all(STATE_DB, key).await? else {
                return Ok(None);
            };

            if key.starts_with("FAN_INFO|") {
                let status = calc_fan_status(&entry);
                let mut fans = self.fans.lock().expect("fan cache lock");
                if fans.get(key) == Some(&status) {
                    return Ok(None);
                }
                fans.insert(key.to_owned(), status);
                drop(fans);
                Ok(Some(Self::fan_notification(key, status)))
            } else if key.starts_with("PSU_INFO|") {
                let status = calc_psu_status(&entry);
                let mut psus = self.psus.lock().expect("psu cache lock");
                if psus.get(key) == Some(&status) {
                    return Ok(None);
                }
                psus.insert(key.to_owned(), status);
                drop(psus);
                Ok(Some(Self::psu_notification(key, status)))
            } else {
                Ok(None)
            }
        })
    }
}
