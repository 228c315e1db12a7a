use std::sync::Arc;

use log::error;
use nero_location::{KeyValueStore, prelude::*};
use serde_json::Value;
use tauri::{AppHandle, Wry};
use tauri_plugin_store::{Store, StoreExt};

const STORE_NAME: &str = "location";

/// Location data that should survive the app being closed
pub struct TauriStore(Arc<Store<Wry>>);

impl TauriStore {
    pub fn open(app: &AppHandle) -> Result<Self> {
        let store = app
            .store(STORE_NAME)
            .context("Couldn't open location store")?;
        Ok(Self(store))
    }
}

impl KeyValueStore for TauriStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.0.get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result {
        self.0.set(key, value);
        self.0.save().context("Failed to save location store")
    }

    fn remove(&self, key: &str) {
        self.0.delete(key);
        if let Err(why) = self.0.save() {
            error!("Failed to save location store: {why:?}");
        }
    }
}
