use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, Notify, broadcast, mpsc},
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until},
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::{BatteryAdapter, RecoveryAction},
    cache::LocationCache,
    config::{LocationConfig, PositionOptions, WatchOptions},
    coordinate::{Coordinate, UtcDT},
    detector::ChangeDetector,
    error::{LocationError, PlatformErrorCode},
    permission::{PermissionSnapshot, PermissionStatus, PermissionStore},
    platform::{GeoPlatform, WatchReading},
    store::KeyValueStore,
    tracking::{TrackingMode, TrackingSession, Watch, WatchEvent},
};

type Readings = mpsc::UnboundedReceiver<WatchReading>;
type EventTx = mpsc::UnboundedSender<WatchEvent>;

const LISTENER_CAPACITY: usize = 16;

/// A location obtained through [Geolocator::request_location_with_prompt]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct PromptedLocation {
    #[serde(flatten)]
    pub location: Coordinate,
    /// Whether the user had to be asked for permission to get this location
    pub showed_prompt: bool,
}

struct LocatorState {
    permission: PermissionStore,
    cache: LocationCache,
    detector: ChangeDetector,
    adapter: BatteryAdapter,
}

/// Owns everything location related for the app: permission history, the last known
/// location, and the single live tracking session. Construct once with [Geolocator::init]
/// and share behind an [Arc].
pub struct Geolocator<P: GeoPlatform, S: KeyValueStore, D: KeyValueStore> {
    platform: P,
    /// Scoped to this run of the app, holds the last known location
    session: S,
    /// Survives restarts, holds permission history
    durable: D,
    config: LocationConfig,
    state: Mutex<LocatorState>,
    tracking: Mutex<Option<TrackingSession>>,
    next_session: AtomicU64,
    updates: broadcast::Sender<Coordinate>,
}

impl<P, S, D> Geolocator<P, S, D>
where
    P: GeoPlatform + 'static,
    S: KeyValueStore + 'static,
    D: KeyValueStore + 'static,
{
    /// Create the manager for `domain`, restoring permission history and the last cached
    /// location from the given stores
    pub fn init(platform: P, session: S, durable: D, domain: &str, config: LocationConfig) -> Self {
        let now = Self::get_now();
        let permission = PermissionStore::load(&durable, domain, config.permission_cooldown());
        let cache = LocationCache::load(&session, config.storage_freshness(), now);
        let detector =
            ChangeDetector::new(config.default_threshold_meters, config.accuracy_delta_meters);
        let adapter = BatteryAdapter::new(
            config.watch,
            config.default_threshold_meters,
            config.timeout_cap_ms,
        );
        let (updates, _) = broadcast::channel(LISTENER_CAPACITY);

        info!("Location manager ready for {domain}");

        Self {
            platform,
            session,
            durable,
            config,
            state: Mutex::new(LocatorState {
                permission,
                cache,
                detector,
                adapter,
            }),
            tracking: Mutex::new(None),
            next_session: AtomicU64::new(1),
            updates,
        }
    }

    /// Stop any tracking, call before dropping the manager
    pub async fn shutdown(&self) {
        self.clear_watch().await;
        info!("Location manager shut down");
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &LocationConfig {
        &self.config
    }

    #[cfg(test)]
    fn get_now() -> UtcDT {
        let fake = tokio::time::Instant::now();
        let real = std::time::Instant::now();
        Utc::now() + (fake.into_std().duration_since(real) + Duration::from_secs(1))
    }

    #[cfg(not(test))]
    fn get_now() -> UtcDT {
        Utc::now()
    }

    fn check_capability(&self) -> Result<(), LocationError> {
        if !self.platform.has_geolocation() {
            Err(LocationError::Unsupported)
        } else if !self.platform.is_secure_context() {
            Err(LocationError::InsecureContext)
        } else {
            Ok(())
        }
    }

    /// Get the user's location, reusing the cached one if it's younger than
    /// `options.maximum_age_ms`
    pub async fn get_current_location(
        &self,
        options: PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        self.check_capability()?;

        let status = self.platform.permission_status().await;

        {
            let mut state = self.state.lock().await;
            let now = Self::get_now();

            if status == PermissionStatus::Denied {
                if state.permission.should_skip_request(now) {
                    return Err(LocationError::PermissionDenied);
                }
                // The denial is old enough that the user may have changed their settings
                state.permission.reset_denied(now);
                state.permission.save(&self.durable, now);
            }

            if state.cache.is_fresh(options.maximum_age(), now) {
                if let Some(location) = state.cache.get() {
                    debug!("Using cached location");
                    return Ok(*location);
                }
            }
        }

        self.request_position(options).await
    }

    /// Like [Geolocator::get_current_location], retrying timeouts and unavailable positions
    /// with exponential backoff
    pub async fn get_current_location_with_retry(
        &self,
        options: PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        let max_retries = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.get_current_location(options).await {
                Err(why) if why.is_transient() && attempt < max_retries => {
                    let delay = self.config.backoff_delay(attempt);
                    info!("Retrying location in {delay:?} (attempt {attempt}): {why}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                res => {
                    if res.is_err() && attempt >= max_retries {
                        error!("Giving up on location after {attempt} attempts");
                    }
                    break res;
                }
            }
        }
    }

    /// Get a location, also reporting whether the user had to be prompted for it
    pub async fn request_location_with_prompt(
        &self,
        options: PositionOptions,
    ) -> Result<PromptedLocation, LocationError> {
        self.check_capability()?;

        let status = self.platform.permission_status().await;

        let granted = {
            let state = self.state.lock().await;
            if !state.permission.can_request(status, Self::get_now()) {
                return Err(LocationError::PermissionDenied);
            }
            state.permission.has_been_granted()
        };

        if granted {
            let location = self.get_current_location(options).await?;
            Ok(PromptedLocation {
                location,
                showed_prompt: false,
            })
        } else {
            let location = self.request_position(options).await?;
            Ok(PromptedLocation {
                location,
                showed_prompt: true,
            })
        }
    }

    async fn request_position(&self, options: PositionOptions) -> Result<Coordinate, LocationError> {
        match self.platform.get_current_position(options).await {
            Ok(location) => {
                {
                    let mut state = self.state.lock().await;
                    let now = Self::get_now();
                    state.permission.mark_granted(now);
                    state.permission.save(&self.durable, now);
                }
                self.accept(location).await;
                info!("New location obtained");
                Ok(location)
            }
            Err(why) => {
                if why.code == PlatformErrorCode::PermissionDenied {
                    self.record_denial().await;
                }
                error!("Location error: {why}");
                Err(why.into())
            }
        }
    }

    async fn record_denial(&self) {
        let mut state = self.state.lock().await;
        let now = Self::get_now();
        state.permission.mark_denied(now);
        state.permission.save(&self.durable, now);
    }

    /// Cache a new location and tell listeners about it
    async fn accept(&self, location: Coordinate) {
        let mut state = self.state.lock().await;
        state.cache.update(&self.session, location, Self::get_now());
        drop(state);
        // No listeners is fine
        let _ = self.updates.send(location);
    }

    /// Receive every newly accepted location, from any acquisition path
    pub fn subscribe(&self) -> broadcast::Receiver<Coordinate> {
        self.updates.subscribe()
    }

    pub async fn get_cached_location(&self) -> Option<Coordinate> {
        self.state.lock().await.cache.get().copied()
    }

    /// Whether asking for a location has any chance of working right now
    pub async fn has_location_support(&self) -> bool {
        if self.check_capability().is_err() {
            return false;
        }
        self.platform.permission_status().await != PermissionStatus::Denied
    }

    pub async fn get_permission_state(&self) -> PermissionSnapshot {
        let status = self.platform.permission_status().await;
        self.state.lock().await.permission.snapshot(status)
    }

    pub async fn should_show_permission_prompt(&self) -> bool {
        let status = self.platform.permission_status().await;
        self.state
            .lock()
            .await
            .permission
            .should_show_prompt(status, Self::get_now())
    }

    pub async fn clear_permission_state(&self) {
        self.state.lock().await.permission.clear(&self.durable);
    }

    /// React to the platform reporting a permission change, a revocation drops the cached
    /// location and stops tracking
    pub async fn handle_permission_change(&self, status: PermissionStatus) {
        if status != PermissionStatus::Denied {
            return;
        }

        self.state.lock().await.cache.clear(&self.session);
        self.clear_watch().await;
        info!("Location permission revoked");
    }

    pub async fn set_location_change_threshold(&self, meters: f64) -> Result<(), LocationError> {
        let mut state = self.state.lock().await;
        state.detector.set_threshold(meters)?;
        state.adapter.set_threshold(meters);
        Ok(())
    }

    pub async fn location_change_threshold(&self) -> f64 {
        self.state.lock().await.detector.threshold()
    }

    pub async fn optimize_for_battery(&self) {
        self.state.lock().await.adapter.optimize_for_battery();
        self.reconfigure().await;
    }

    pub async fn optimize_for_accuracy(&self) {
        self.state.lock().await.adapter.optimize_for_accuracy();
        self.reconfigure().await;
    }

    /// Go back to adjusting tracking based on speed
    pub async fn clear_tracking_override(&self) {
        self.state.lock().await.adapter.clear_override();
    }

    async fn reconfigure(&self) {
        if let Some(session) = self.tracking.lock().await.as_ref() {
            if session.mode == TrackingMode::Adaptive {
                session.reconfigure.notify_one();
            }
        }
    }

    pub async fn is_tracking(&self) -> bool {
        self.tracking.lock().await.is_some()
    }

    /// Continuously watch the user's location, only reporting readings that moved (or
    /// changed accuracy) significantly. Replaces any running watch.
    pub async fn watch_position(self: &Arc<Self>, options: WatchOptions) -> Result<Watch, LocationError> {
        self.start_tracking(TrackingMode::Basic, options).await
    }

    /// Stop the running watch, if any
    pub async fn clear_watch(&self) {
        if let Some(session) = self.tracking.lock().await.take() {
            session.stop(&self.platform);
        }
    }

    /// Like [Geolocator::watch_position], but thresholds and platform options adapt to
    /// the user's speed and to platform errors
    pub async fn start_real_time_tracking(
        self: &Arc<Self>,
        options: WatchOptions,
    ) -> Result<Watch, LocationError> {
        self.start_tracking(TrackingMode::Adaptive, options).await
    }

    pub async fn stop_real_time_tracking(&self) {
        self.clear_watch().await;
    }

    async fn start_tracking(
        self: &Arc<Self>,
        mode: TrackingMode,
        options: WatchOptions,
    ) -> Result<Watch, LocationError> {
        if let Some(threshold) = options.threshold_meters {
            self.set_location_change_threshold(threshold).await?;
        }

        // Establishes permission before we open anything long-lived
        let initial = self.get_current_location(options.position()).await?;

        let platform_options = {
            let mut state = self.state.lock().await;
            if mode == TrackingMode::Adaptive {
                if state.adapter.pinned().is_none() {
                    state.adapter = BatteryAdapter::new(
                        options,
                        state.detector.threshold(),
                        self.config.timeout_cap_ms,
                    );
                }
                state.adapter.options()
            } else {
                options.position()
            }
        };

        let mut tracking = self.tracking.lock().await;

        if let Some(previous) = tracking.take() {
            previous.stop(&self.platform);
        }

        let (sink, readings) = mpsc::unbounded_channel();
        let watch_id = self
            .platform
            .watch_position(platform_options, sink)
            .map_err(LocationError::from)?;

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = TrackingSession::new(id, mode, options, watch_id);
        let cancel = session.cancel.clone();
        let reconfigure = session.reconfigure.clone();
        *tracking = Some(session);
        drop(tracking);

        info!("Started {mode:?} tracking session {id}");

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(initial));

        let this = self.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            this.tracking_loop(id, mode, readings, tx, task_cancel, reconfigure)
                .await;
        });

        Ok(Watch::new(rx, cancel))
    }

    /// Sleep for `delay` unless the session is cancelled first. Returns whether to keep going.
    async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Close the session's current platform subscription and open a new one with `options`.
    /// Returns [None] if the session is no longer the live one.
    async fn resubscribe(
        &self,
        session_id: u64,
        options: PositionOptions,
    ) -> Option<Result<Readings, LocationError>> {
        let mut tracking = self.tracking.lock().await;
        let session = tracking.as_mut().filter(|s| s.id == session_id)?;

        if let Some(old) = session.watch_id.take() {
            self.platform.clear_watch(old);
        }

        let (sink, readings) = mpsc::unbounded_channel();
        match self.platform.watch_position(options, sink) {
            Ok(id) => {
                session.watch_id = Some(id);
                debug!("Session {session_id} resubscribed as watch {id}");
                Some(Ok(readings))
            }
            Err(why) => {
                warn!("Failed to reopen location watch: {why}");
                Some(Err(why.into()))
            }
        }
    }

    /// Close the platform subscription without reopening it
    async fn suspend(&self, session_id: u64) {
        let mut tracking = self.tracking.lock().await;
        if let Some(session) = tracking.as_mut().filter(|s| s.id == session_id) {
            if let Some(old) = session.watch_id.take() {
                self.platform.clear_watch(old);
            }
        }
    }

    async fn end_session(&self, session_id: u64) {
        let mut tracking = self.tracking.lock().await;
        if tracking.as_ref().is_some_and(|s| s.id == session_id) {
            if let Some(session) = tracking.take() {
                session.stop(&self.platform);
            }
        }
    }

    /// Run a reading through the change detector. Returns new platform options if the
    /// reading changed them (adaptive mode only) and whether the receiver is still listening.
    async fn handle_reading(
        &self,
        mode: TrackingMode,
        location: Coordinate,
        tx: &EventTx,
    ) -> (Option<PositionOptions>, bool) {
        let mut state = self.state.lock().await;

        let (changed_options, detector) = match mode {
            TrackingMode::Basic => (None, state.detector),
            TrackingMode::Adaptive => {
                let changed = state
                    .adapter
                    .adapt_to_speed(location.speed)
                    .then(|| state.adapter.options());
                let detector = ChangeDetector::new(
                    state.adapter.threshold(),
                    self.config.accuracy_delta_meters,
                );
                (changed, detector)
            }
        };

        if !detector.has_changed_significantly(state.cache.get(), &location) {
            return (changed_options, !tx.is_closed());
        }

        drop(state);
        debug!("Significant location change");
        self.accept(location).await;
        (changed_options, tx.send(Ok(location)).is_ok())
    }

    async fn tracking_loop(
        &self,
        session_id: u64,
        mode: TrackingMode,
        mut readings: Readings,
        tx: EventTx,
        cancel: CancellationToken,
        reconfigure: Arc<Notify>,
    ) {
        // Basic mode gets one restart per timeout streak
        let mut restarted = false;
        let mut last_update = Instant::now();
        let mut periodic = self
            .config
            .periodic_interval()
            .filter(|_| mode == TrackingMode::Adaptive)
            .map(|period| {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });

        'session: loop {
            let event = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break 'session;
                }

                _ = reconfigure.notified() => {
                    LoopEvent::Reopen(self.state.lock().await.adapter.options())
                }

                reading = readings.recv() => match reading {
                    Some(reading) => LoopEvent::Reading(reading),
                    None => {
                        debug!("Platform closed watch for session {session_id}");
                        break 'session;
                    }
                },

                _ = next_tick(&mut periodic) => {
                    debug!("Periodic location check for session {session_id}");
                    let options = self.state.lock().await.adapter.options();
                    LoopEvent::Reading(self.platform.get_current_position(options).await)
                }

                _ = sleep_until(last_update + self.config.stale_after()), if mode == TrackingMode::Adaptive => {
                    info!("No location in {:?}, restarting tracking", self.config.stale_after());
                    last_update = Instant::now();
                    LoopEvent::Reopen(self.state.lock().await.adapter.options())
                }
            };

            let next_options = match event {
                LoopEvent::Reopen(options) => Some(options),
                LoopEvent::Reading(Ok(location)) => {
                    restarted = false;
                    last_update = Instant::now();
                    let (new_options, listening) = self.handle_reading(mode, location, &tx).await;
                    if !listening {
                        break 'session;
                    }
                    new_options
                }
                LoopEvent::Reading(Err(why)) => {
                    let why = LocationError::from(why);
                    warn!("Watch position error: {why}");

                    match self.recover(mode, &why, &mut restarted).await {
                        Recovery::Forward => {
                            if tx.send(Err(why)).is_err() {
                                break 'session;
                            }
                            None
                        }
                        Recovery::Restart { options, forward } => {
                            if forward && tx.send(Err(why)).is_err() {
                                break 'session;
                            }
                            self.suspend(session_id).await;
                            if !Self::pause(&cancel, self.config.watch_restart_delay()).await {
                                break 'session;
                            }
                            Some(options)
                        }
                        Recovery::Stop => {
                            let _ = tx.send(Err(why));
                            break 'session;
                        }
                    }
                }
            };

            if let Some(new_options) = next_options {
                match self.resubscribe(session_id, new_options).await {
                    Some(Ok(new_readings)) => readings = new_readings,
                    Some(Err(why)) => {
                        let _ = tx.send(Err(why));
                        break 'session;
                    }
                    None => break 'session,
                }
            }
        }

        self.end_session(session_id).await;
        debug!("Tracking session {session_id} ended");
    }

    async fn recover(&self, mode: TrackingMode, why: &LocationError, restarted: &mut bool) -> Recovery {
        if *why == LocationError::PermissionDenied {
            self.record_denial().await;
            return Recovery::Stop;
        }

        match mode {
            TrackingMode::Basic => match why {
                LocationError::Timeout if !*restarted => {
                    *restarted = true;
                    let options = self
                        .tracking
                        .lock()
                        .await
                        .as_ref()
                        .map(|s| s.options.position())
                        .unwrap_or(self.config.watch.position());
                    Recovery::Restart {
                        options,
                        forward: false,
                    }
                }
                _ => Recovery::Forward,
            },
            TrackingMode::Adaptive => {
                let mut state = self.state.lock().await;
                match state.adapter.recover(why) {
                    // Only timeouts under the cap restart quietly
                    RecoveryAction::Resubscribe => Recovery::Restart {
                        options: state.adapter.options(),
                        forward: *why == LocationError::PositionUnavailable,
                    },
                    RecoveryAction::Continue => Recovery::Forward,
                    RecoveryAction::Stop => Recovery::Stop,
                }
            }
        }
    }
}

/// Wait for the next tick, forever if there's no interval
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

enum LoopEvent {
    /// A fix or error, from the subscription or a periodic check
    Reading(WatchReading),
    /// Reopen the subscription with these options
    Reopen(PositionOptions),
}

enum Recovery {
    /// Hand the error to the watcher and carry on
    Forward,
    /// Tear down, wait, and reopen with these options, optionally telling the watcher first
    Restart {
        options: PositionOptions,
        forward: bool,
    },
    /// Hand the error to the watcher and end the session
    Stop,
}
