use chrono::TimeDelta;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    coordinate::{Coordinate, UtcDT},
    store::KeyValueStore,
};

/// Key the last known location is saved under in the session store
pub const CACHED_LOCATION_KEY: &str = "nero_user_location";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedLocation {
    pub location: Coordinate,
    pub saved_at: UtcDT,
}

/// Last known coordinate, mirrored to session storage so a reload doesn't need a new fix
#[derive(Debug, Clone, Default)]
pub struct LocationCache {
    current: Option<CachedLocation>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from `store`, entries older than `freshness` are ignored
    pub fn load(store: &impl KeyValueStore, freshness: TimeDelta, now: UtcDT) -> Self {
        let cached = store
            .get(CACHED_LOCATION_KEY)
            .and_then(|v| match serde_json::from_value::<CachedLocation>(v) {
                Ok(c) => Some(c),
                Err(why) => {
                    warn!("Could not load cached location: {why}");
                    None
                }
            })
            .filter(|c| now - c.saved_at < freshness);

        if let Some(cached) = cached.as_ref() {
            info!("Loaded cached location: {:?}", cached.location);
        }

        Self { current: cached }
    }

    pub fn get(&self) -> Option<&Coordinate> {
        self.current.as_ref().map(|c| &c.location)
    }

    pub fn last_update(&self) -> Option<UtcDT> {
        self.current.as_ref().map(|c| c.saved_at)
    }

    /// Whether the cached location is younger than `max_age`
    pub fn is_fresh(&self, max_age: TimeDelta, now: UtcDT) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| now - c.saved_at < max_age)
    }

    pub fn update(&mut self, store: &impl KeyValueStore, location: Coordinate, now: UtcDT) {
        let cached = CachedLocation {
            location,
            saved_at: now,
        };
        self.current = Some(cached);

        let res = serde_json::to_value(cached)
            .map_err(anyhow::Error::from)
            .and_then(|v| store.set(CACHED_LOCATION_KEY, v));

        match res {
            Ok(()) => debug!("Cached location {:.5},{:.5}", location.lat, location.lng),
            Err(why) => warn!("Could not cache location: {why:?}"),
        }
    }

    pub fn clear(&mut self, store: &impl KeyValueStore) {
        self.current = None;
        store.remove(CACHED_LOCATION_KEY);
    }
}
