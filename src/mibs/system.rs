//! system group: sysName.0 from the device metadata table.

use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::mib::{MibBuilder, MibModule, MibUpdater};
use crate::oid;
use crate::store::{SonicStore, CONFIG_DB};
use crate::value::Value;
use crate::BoxFuture;

const DEVICE_METADATA_KEY: &str = "DEVICE_METADATA|localhost";

pub struct SystemUpdater {
    store: Arc<dyn SonicStore>,
    sys_name: RwLock<Option<String>>,
}

impl SystemUpdater {
    fn sys_name(&self) -> Option<String> {
        self.sys_name.read().expect("snapshot lock").clone()
    }
}

impl MibUpdater for SystemUpdater {
    fn name(&self) -> &'static str {
        "system"
    }

    fn reinit_data(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn update_data(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let hostname = self
                .store
                .get_all(CONFIG_DB, DEVICE_METADATA_KEY)
                .await?
                .and_then(|entry| entry.get("hostname").cloned());
            *self.sys_name.write().expect("snapshot lock") = hostname;
            Ok(())
        })
    }
}

pub struct SystemMib {
    updater: Arc<SystemUpdater>,
}

impl SystemMib {
    pub fn new(store: Arc<dyn SonicStore>) -> Self {
        Self {
            updater: Arc::new(SystemUpdater {
                store,
                sys_name: RwLock::new(None),
            }),
        }
    }
}

impl MibModule for SystemMib {
    fn register(&self, builder: &mut MibBuilder) {
        let mut module = builder.module(oid!(1, 3, 6, 1, 2, 1, 1));
        module.updater(self.updater.clone());
        let updater = self.updater.clone();
        module.scalar(&[5, 0], move || updater.sys_name().map(Value::string));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mib::GetOutcome;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_sys_name_from_device_metadata() {
        let store = Arc::new(MemoryStore::new());
        store.insert(CONFIG_DB, DEVICE_METADATA_KEY, &[("hostname", "leaf-1")]);

        let mib = SystemMib::new(store.clone() as Arc<dyn SonicStore>);
        let mut builder = MibBuilder::new();
        mib.register(&mut builder);
        let tree = builder.freeze();

        // Before the first update the scalar has no instance.
        assert_eq!(
            tree.get_value(&oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)),
            GetOutcome::NoSuchInstance
        );

        tree.updaters()[0].update_data().await.unwrap();
        assert_eq!(
            tree.get_value(&oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)),
            GetOutcome::Value(Value::string("leaf-1"))
        );
    }
}
