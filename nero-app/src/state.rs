use std::sync::Arc;

use log::{error, info, warn};
use nero_images::{HttpCheck, ImageConfig, ImageResolver};
use nero_location::{
    Coordinate, Geolocator, LocationConfig, LocationError, MemoryStore, Watch,
};
use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Manager};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};
use tauri_specta::Event;
use tokio::sync::broadcast::error::RecvError;

use crate::{location::TauriPlatform, storage::TauriStore};

pub type AppLocator = Geolocator<TauriPlatform, MemoryStore, TauriStore>;

pub type LocatorHandle = Arc<AppLocator>;

pub type ImageHandle = Arc<ImageResolver<HttpCheck>>;

const STORAGE_BUCKET: Option<&str> = option_env!("NERO_STORAGE_BUCKET");

/// Something happened on the running watch, either a new position or an error
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
#[serde(tag = "type", content = "data")]
pub enum LocationUpdate {
    Location(Coordinate),
    Error(LocationError),
}

/// The last known location changed, from any source
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub struct LocationChanged(Coordinate);

pub fn error_dialog(app: &AppHandle, msg: &str) {
    app.dialog()
        .message(msg)
        .kind(MessageDialogKind::Error)
        .show(|_| {});
}

/// Build the location manager for this app and hand it to Tauri
pub fn setup_locator(app: &AppHandle) -> anyhow::Result<()> {
    let domain = app.config().identifier.clone();
    let durable = TauriStore::open(app)?;
    let locator = Arc::new(Geolocator::init(
        TauriPlatform::new(app.clone()),
        MemoryStore::new(),
        durable,
        &domain,
        LocationConfig::default(),
    ));

    forward_changes(app.clone(), &locator);
    app.manage::<LocatorHandle>(locator);

    Ok(())
}

/// Build the image resolver, images come from the bundle unless a bucket was set at build time
pub fn setup_images(app: &AppHandle) -> anyhow::Result<()> {
    let config = match STORAGE_BUCKET {
        Some(bucket) => ImageConfig::with_bucket(bucket),
        None => ImageConfig::default(),
    };
    let resolver = ImageResolver::new(HttpCheck::new()?, config);
    app.manage::<ImageHandle>(Arc::new(resolver));
    Ok(())
}

fn forward_changes(app: AppHandle, locator: &AppLocator) {
    let mut rx = locator.subscribe();
    tauri::async_runtime::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(location) => {
                    if let Err(why) = LocationChanged(location).emit(&app) {
                        warn!("Error emitting location change: {why:?}");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Location listener fell behind by {missed} updates");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Pump a watch's events to the UI until it ends
pub fn forward_watch(app: AppHandle, mut watch: Watch) {
    tauri::async_runtime::spawn(async move {
        while let Some(event) = watch.next().await {
            let update = match event {
                Ok(location) => LocationUpdate::Location(location),
                Err(why) => {
                    error!("Watch error: {why}");
                    if why == LocationError::PermissionDenied {
                        error_dialog(&app, &why.to_string());
                    }
                    LocationUpdate::Error(why)
                }
            };
            if let Err(why) = update.emit(&app) {
                warn!("Error emitting location update: {why:?}");
            }
        }
        info!("Location watch ended");
    });
}

/// Stop tracking before the app goes away
pub async fn shutdown_locator(app: &AppHandle) {
    if let Some(locator) = app.try_state::<LocatorHandle>() {
        locator.shutdown().await;
    }
}
