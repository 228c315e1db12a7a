mod location;
mod state;
mod storage;

use log::LevelFilter;
use nero_images::ResolvedImage;
use nero_location::{
    Coordinate, LocationError, PermissionSnapshot, PermissionStatus, PositionOptions,
    PromptedLocation, WatchOptions,
};
use tauri::{AppHandle, RunEvent, State};
use tauri_specta::{ErrorHandlingMode, collect_commands, collect_events};

use std::result::Result as StdResult;

use crate::state::{
    ImageHandle, LocationChanged, LocationUpdate, LocatorHandle, forward_watch, setup_images,
    setup_locator, shutdown_locator,
};

type Result<T = (), E = LocationError> = StdResult<T, E>;

// == ONE-SHOT COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Get the user's location, reusing the last known one if it's recent enough for `options`.
/// Pass `null` for the default options.
async fn get_current_location(
    options: Option<PositionOptions>,
    state: State<'_, LocatorHandle>,
) -> Result<Coordinate> {
    let options = options.unwrap_or(state.config().one_shot);
    state.get_current_location(options).await
}

#[tauri::command]
#[specta::specta]
/// Same as [get_current_location], but retries timeouts and unavailable positions with backoff
async fn get_current_location_with_retry(
    options: Option<PositionOptions>,
    state: State<'_, LocatorHandle>,
) -> Result<Coordinate> {
    let options = options.unwrap_or(state.config().one_shot);
    state.get_current_location_with_retry(options).await
}

#[tauri::command]
#[specta::specta]
/// Get the user's location, also reporting whether a permission prompt was shown for it
async fn request_location_with_prompt(
    options: Option<PositionOptions>,
    state: State<'_, LocatorHandle>,
) -> Result<PromptedLocation> {
    let options = options.unwrap_or(state.config().one_shot);
    state.request_location_with_prompt(options).await
}

#[tauri::command]
#[specta::specta]
/// The last known location, if there is one
async fn get_cached_location(state: State<'_, LocatorHandle>) -> Result<Option<Coordinate>> {
    Ok(state.get_cached_location().await)
}

// == PERMISSION COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Whether asking for a location could work at all right now
async fn has_location_support(state: State<'_, LocatorHandle>) -> Result<bool> {
    Ok(state.has_location_support().await)
}

#[tauri::command]
#[specta::specta]
/// Remembered permission history along with what the OS says right now
async fn get_permission_state(state: State<'_, LocatorHandle>) -> Result<PermissionSnapshot> {
    Ok(state.get_permission_state().await)
}

#[tauri::command]
#[specta::specta]
/// Whether the UI should explain why it wants the user's location before asking
async fn should_show_permission_prompt(state: State<'_, LocatorHandle>) -> Result<bool> {
    Ok(state.should_show_permission_prompt().await)
}

#[tauri::command]
#[specta::specta]
/// Forget remembered grants and denials
async fn clear_permission_state(state: State<'_, LocatorHandle>) -> Result {
    state.clear_permission_state().await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// Tell the backend the OS permission changed, a denial drops the last known location and
/// stops tracking
async fn handle_permission_change(
    status: PermissionStatus,
    state: State<'_, LocatorHandle>,
) -> Result {
    state.handle_permission_change(status).await;
    Ok(())
}

// == TRACKING COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Start watching the user's location, updates arrive as [LocationUpdate] events. Replaces
/// any running watch.
async fn watch_position(
    options: Option<WatchOptions>,
    app: AppHandle,
    state: State<'_, LocatorHandle>,
) -> Result {
    let options = options.unwrap_or(state.config().watch);
    let watch = state.watch_position(options).await?;
    forward_watch(app, watch);
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// Stop the running watch
async fn clear_watch(state: State<'_, LocatorHandle>) -> Result {
    state.clear_watch().await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// Like [watch_position], but adapts to how fast the user is moving
async fn start_real_time_tracking(
    options: Option<WatchOptions>,
    app: AppHandle,
    state: State<'_, LocatorHandle>,
) -> Result {
    let options = options.unwrap_or(state.config().watch);
    let watch = state.start_real_time_tracking(options).await?;
    forward_watch(app, watch);
    Ok(())
}

#[tauri::command]
#[specta::specta]
async fn stop_real_time_tracking(state: State<'_, LocatorHandle>) -> Result {
    state.stop_real_time_tracking().await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// Minimum movement in meters before a new location is reported
async fn set_location_change_threshold(
    meters: f64,
    state: State<'_, LocatorHandle>,
) -> Result {
    state.set_location_change_threshold(meters).await
}

#[tauri::command]
#[specta::specta]
/// Coarse, infrequent fixes until [clear_tracking_override] is called
async fn optimize_for_battery(state: State<'_, LocatorHandle>) -> Result {
    state.optimize_for_battery().await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// Fine, fresh fixes until [clear_tracking_override] is called
async fn optimize_for_accuracy(state: State<'_, LocatorHandle>) -> Result {
    state.optimize_for_accuracy().await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
async fn clear_tracking_override(state: State<'_, LocatorHandle>) -> Result {
    state.clear_tracking_override().await;
    Ok(())
}

// == IMAGE COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Where the UI should load the image stored at `path` from, falls back to a placeholder when
/// the image is missing
async fn resolve_image(path: String, images: State<'_, ImageHandle>) -> Result<ResolvedImage> {
    Ok(images.resolve(&path).await)
}

#[tauri::command]
#[specta::specta]
/// Forget which images were found, so they're checked again
async fn clear_image_cache(images: State<'_, ImageHandle>) -> Result {
    images.clear_cache().await;
    Ok(())
}

pub fn mk_specta() -> tauri_specta::Builder {
    tauri_specta::Builder::<tauri::Wry>::new()
        .error_handling(ErrorHandlingMode::Throw)
        .commands(collect_commands![
            get_current_location,
            get_current_location_with_retry,
            request_location_with_prompt,
            get_cached_location,
            has_location_support,
            get_permission_state,
            should_show_permission_prompt,
            clear_permission_state,
            handle_permission_change,
            watch_position,
            clear_watch,
            start_real_time_tracking,
            stop_real_time_tracking,
            set_location_change_threshold,
            optimize_for_battery,
            optimize_for_accuracy,
            clear_tracking_override,
            resolve_image,
            clear_image_cache,
        ])
        .events(collect_events![LocationUpdate, LocationChanged])
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let builder = mk_specta();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(LevelFilter::Debug)
                .build(),
        )
        .plugin(tauri_plugin_geolocation::init())
        .plugin(tauri_plugin_store::Builder::default().build())
        .invoke_handler(builder.invoke_handler())
        .setup(move |app| {
            builder.mount_events(app);
            setup_locator(app.handle())?;
            setup_images(app.handle())?;
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|handle, event| {
            if let RunEvent::Exit = event {
                tauri::async_runtime::block_on(shutdown_locator(handle));
            }
        });
}
