use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    config::WatchOptions,
    coordinate::Coordinate,
    error::LocationError,
    platform::{GeoPlatform, WatchId},
};

/// An event delivered to a [Watch]
pub type WatchEvent = Result<Coordinate, LocationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum TrackingMode {
    /// Fixed options, a timeout reopens the subscription once
    Basic,
    /// Options follow the user's speed and the platform's errors
    Adaptive,
}

/// The one live continuous subscription
pub(crate) struct TrackingSession {
    pub id: u64,
    pub mode: TrackingMode,
    pub options: WatchOptions,
    pub watch_id: Option<WatchId>,
    pub cancel: CancellationToken,
    pub reconfigure: Arc<Notify>,
}

impl TrackingSession {
    pub fn new(id: u64, mode: TrackingMode, options: WatchOptions, watch_id: WatchId) -> Self {
        Self {
            id,
            mode,
            options,
            watch_id: Some(watch_id),
            cancel: CancellationToken::new(),
            reconfigure: Arc::new(Notify::new()),
        }
    }

    /// Close the platform subscription and tell the session's task to exit
    pub fn stop(mut self, platform: &impl GeoPlatform) {
        if let Some(id) = self.watch_id.take() {
            platform.clear_watch(id);
        }
        self.cancel.cancel();
        info!("Stopped {:?} tracking session {}", self.mode, self.id);
    }
}

/// Receiving end of a continuous subscription. Events arrive in the order the platform
/// produced them, delivery ends when tracking stops or this is dropped.
pub struct Watch {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    cancel: CancellationToken,
}

impl Watch {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<WatchEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Wait for the next event, [None] once tracking has stopped
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Take an already delivered event without waiting
    pub fn try_next(&mut self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
