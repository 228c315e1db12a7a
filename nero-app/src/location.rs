use chrono::{DateTime, Utc};
use log::{error, warn};
use nero_location::{
    Coordinate, GeoPlatform, PermissionStatus, PlatformError, PlatformErrorCode, PositionOptions,
    WatchId, WatchSink,
};
use tauri::{AppHandle, plugin::PermissionState};
use tauri_plugin_geolocation::{
    GeolocationExt, Position, PositionOptions as PluginOptions, WatchEvent,
};

/// The device's location services, through the geolocation plugin
pub struct TauriPlatform(AppHandle);

impl TauriPlatform {
    pub fn new(app: AppHandle) -> Self {
        Self(app)
    }
}

fn plugin_options(options: PositionOptions) -> PluginOptions {
    PluginOptions {
        enable_high_accuracy: options.enable_high_accuracy,
        timeout: options.timeout_ms,
        maximum_age: options.maximum_age_ms,
    }
}

fn to_coordinate(pos: Position) -> Coordinate {
    let coords = pos.coords;
    let timestamp = i64::try_from(pos.timestamp)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);
    Coordinate {
        lat: coords.latitude,
        lng: coords.longitude,
        accuracy: Some(coords.accuracy),
        timestamp,
        speed: coords.speed,
        heading: coords.heading,
    }
}

/// The plugin only hands us a message, so recover the code from it
fn classify(message: String) -> PlatformError {
    let lower = message.to_lowercase();
    let code = if lower.contains("denied") || lower.contains("permission") {
        PlatformErrorCode::PermissionDenied
    } else if lower.contains("timeout") || lower.contains("timed out") {
        PlatformErrorCode::Timeout
    } else if lower.contains("unavailable") || lower.contains("disabled") {
        PlatformErrorCode::PositionUnavailable
    } else {
        PlatformErrorCode::Unknown
    };
    PlatformError::new(code, message)
}

impl GeoPlatform for TauriPlatform {
    fn is_secure_context(&self) -> bool {
        // Native webviews aren't subject to the browser origin rules
        true
    }

    async fn permission_status(&self) -> PermissionStatus {
        match self.0.geolocation().check_permissions() {
            Ok(status) => match status.location {
                PermissionState::Granted => PermissionStatus::Granted,
                PermissionState::Denied => PermissionStatus::Denied,
                _ => PermissionStatus::Prompt,
            },
            Err(why) => {
                warn!("Failed to check location permission: {why:?}");
                PermissionStatus::Unknown
            }
        }
    }

    async fn get_current_position(
        &self,
        options: PositionOptions,
    ) -> Result<Coordinate, PlatformError> {
        let app = self.0.clone();
        let res = tauri::async_runtime::spawn_blocking(move || {
            app.geolocation()
                .get_current_position(Some(plugin_options(options)))
        })
        .await;

        match res {
            Ok(Ok(pos)) => Ok(to_coordinate(pos)),
            Ok(Err(why)) => Err(classify(why.to_string())),
            Err(why) => {
                error!("Location request task failed: {why:?}");
                Err(PlatformError::new(PlatformErrorCode::Unknown, why.to_string()))
            }
        }
    }

    fn watch_position(
        &self,
        options: PositionOptions,
        sink: WatchSink,
    ) -> Result<WatchId, PlatformError> {
        self.0
            .geolocation()
            .watch_position(plugin_options(options), move |event| {
                let reading = match event {
                    WatchEvent::Position(pos) => Ok(to_coordinate(pos)),
                    WatchEvent::Error(msg) => Err(classify(msg)),
                };
                // Receiver gone means the session was torn down
                sink.send(reading).ok();
            })
            .map_err(|why| classify(why.to_string()))
    }

    fn clear_watch(&self, id: WatchId) {
        if let Err(why) = self.0.geolocation().clear_watch(id) {
            warn!("Failed to clear location watch {id}: {why:?}");
        }
    }
}
