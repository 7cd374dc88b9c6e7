//! Store instance configuration.
//!
//! The trap engine needs to know which host/port serves each numbered
//! database; that mapping lives in a JSON file shared with the rest of the
//! switch stack. A missing or malformed file is fatal for the trap engine
//! only.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::DbId;
use crate::error::{Error, Result};

/// Environment variable overriding the config path.
pub const DB_CONFIG_PATH_ENV: &str = "DB_CONFIG_FILE";

/// Default config path.
pub const DEFAULT_DB_CONFIG_PATH: &str = "/var/run/redis/sonic-db/database_config.json";

/// One store instance endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceConfig {
    pub hostname: String,
    pub port: u16,
}

/// One named database: numeric id plus owning instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    pub id: DbId,
    pub instance: String,
}

/// The instance/database layout.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(rename = "INSTANCES")]
    pub instances: HashMap<String, InstanceConfig>,
    #[serde(rename = "DATABASES")]
    pub databases: HashMap<String, DatabaseConfig>,
}

impl DbConfig {
    /// Load from `$DB_CONFIG_FILE`, falling back to the default path.
    pub fn from_env() -> Result<DbConfig> {
        let path = std::env::var(DB_CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_DB_CONFIG_PATH.to_owned());
        Self::from_path(Path::new(&path))
    }

    /// Load and validate one file.
    pub fn from_path(path: &Path) -> Result<DbConfig> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(display.clone(), e.to_string()))?;
        Self::from_json(&raw).map_err(|e| match e {
            Error::Config { message, .. } => Error::config(display.clone(), message),
            other => other,
        })
    }

    /// Parse from a JSON string.
    pub fn from_json(raw: &str) -> Result<DbConfig> {
        let config: DbConfig = serde_json::from_str(raw)
            .map_err(|e| Error::config("<inline>", e.to_string()))?;
        for (name, db) in &config.databases {
            if !config.instances.contains_key(&db.instance) {
                return Err(Error::config(
                    "<inline>",
                    format!("database {} references unknown instance {}", name, db.instance),
                ));
            }
        }
        Ok(config)
    }

    /// The instance name serving a numeric database id.
    pub fn instance_for_db(&self, db: DbId) -> Option<&str> {
        self.databases
            .values()
            .find(|d| d.id == db)
            .map(|d| d.instance.as_str())
    }
}
