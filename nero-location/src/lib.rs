mod adapter;
mod cache;
mod config;
mod coordinate;
mod detector;
mod error;
mod geolocator;
mod permission;
mod platform;
mod store;
mod tracking;

pub use adapter::{BatteryAdapter, RecoveryAction, TrackingOverride};
pub use cache::{CACHED_LOCATION_KEY, CachedLocation, LocationCache};
pub use config::{LocationConfig, PositionOptions, WatchOptions};
pub use coordinate::{Coordinate, LocationComponent, UtcDT, accuracy_delta, distance_meters};
pub use detector::ChangeDetector;
pub use error::{LocationError, PlatformError, PlatformErrorCode};
pub use geolocator::{Geolocator, PromptedLocation};
pub use permission::{
    PERMISSION_STATE_KEY, PermissionSnapshot, PermissionState, PermissionStatus, PermissionStore,
};
pub use platform::{GeoPlatform, WatchId, WatchReading, WatchSink, is_secure_origin};
pub use store::{KeyValueStore, MemoryStore};
pub use tracking::{TrackingMode, Watch, WatchEvent};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
