use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use log::debug;
use nero_location::{
    Coordinate, GeoPlatform, PermissionStatus, PlatformError, PlatformErrorCode, PositionOptions,
    WatchId, WatchReading, WatchSink, is_secure_origin,
};

/// A platform driven by a script instead of a GPS chip
pub struct SimPlatform {
    /// Origin the simulated page is served from
    origin: String,
    status: Mutex<PermissionStatus>,
    position: Mutex<WatchReading>,
    watches: Mutex<HashMap<WatchId, WatchSink>>,
    next_watch: AtomicU32,
    opened: AtomicU32,
}

impl SimPlatform {
    pub fn new(start: Coordinate, origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            status: Mutex::new(PermissionStatus::Prompt),
            position: Mutex::new(Ok(start)),
            watches: Mutex::default(),
            next_watch: AtomicU32::new(1),
            opened: AtomicU32::new(0),
        }
    }

    pub fn set_status(&self, status: PermissionStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = status;
        }
    }

    /// Make `reading` the current position and push it to every open subscription
    pub fn emit(&self, reading: WatchReading) {
        if let Ok(mut position) = self.position.lock() {
            *position = reading.clone();
        }
        if let Ok(watches) = self.watches.lock() {
            for sink in watches.values() {
                sink.send(reading.clone()).ok();
            }
        }
    }

    pub fn active_watches(&self) -> usize {
        self.watches.lock().map(|w| w.len()).unwrap_or_default()
    }

    pub fn opened_watches(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl GeoPlatform for SimPlatform {
    fn is_secure_context(&self) -> bool {
        is_secure_origin(&self.origin)
    }

    async fn permission_status(&self) -> PermissionStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(PermissionStatus::Unknown)
    }

    async fn get_current_position(
        &self,
        _options: PositionOptions,
    ) -> Result<Coordinate, PlatformError> {
        self.position
            .lock()
            .map_err(|_| PlatformError::new(PlatformErrorCode::Unknown, "Simulator poisoned"))?
            .clone()
    }

    fn watch_position(
        &self,
        options: PositionOptions,
        sink: WatchSink,
    ) -> Result<WatchId, PlatformError> {
        let id = self.next_watch.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!("Sim watch {id} opened with {options:?}");
        self.watches
            .lock()
            .map_err(|_| PlatformError::new(PlatformErrorCode::Unknown, "Simulator poisoned"))?
            .insert(id, sink);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        if let Ok(mut watches) = self.watches.lock() {
            watches.remove(&id);
        }
        debug!("Sim watch {id} cleared");
    }
}
