use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
/// Options handed to the platform for a single position request
pub struct PositionOptions {
    /// Ask for GPS-grade accuracy at the cost of battery
    pub enable_high_accuracy: bool,
    /// Milliseconds the platform may take before reporting a timeout
    pub timeout_ms: u32,
    /// Milliseconds a previously obtained position stays acceptable
    pub maximum_age_ms: u32,
}

impl PositionOptions {
    pub fn maximum_age(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.maximum_age_ms as i64)
    }
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: false,
            timeout_ms: 10_000,
            maximum_age_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
/// Options for continuous tracking, the platform options plus a movement threshold
pub struct WatchOptions {
    pub enable_high_accuracy: bool,
    pub timeout_ms: u32,
    pub maximum_age_ms: u32,
    /// Minimum movement in meters before a reading is reported, [None] keeps the current one
    pub threshold_meters: Option<f64>,
}

impl WatchOptions {
    pub fn position(&self) -> PositionOptions {
        PositionOptions {
            enable_high_accuracy: self.enable_high_accuracy,
            timeout_ms: self.timeout_ms,
            maximum_age_ms: self.maximum_age_ms,
        }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: 15_000,
            maximum_age_ms: 60_000,
            threshold_meters: None,
        }
    }
}

impl From<PositionOptions> for WatchOptions {
    fn from(v: PositionOptions) -> Self {
        Self {
            enable_high_accuracy: v.enable_high_accuracy,
            timeout_ms: v.timeout_ms,
            maximum_age_ms: v.maximum_age_ms,
            threshold_meters: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, specta::Type)]
#[serde(default)]
/// Tunables for the location manager, every field has a sensible default
pub struct LocationConfig {
    /// Seconds after a denial during which no new permission prompt is attempted
    pub permission_cooldown_secs: u32,
    /// Seconds a coordinate saved to session storage stays loadable
    pub storage_freshness_secs: u32,
    /// Movement in meters that counts as a significant change
    pub default_threshold_meters: f64,
    /// Change in reported accuracy in meters that counts as a significant change
    pub accuracy_delta_meters: f64,
    /// Delay before a watch that timed out is reopened
    pub watch_restart_delay_ms: u32,
    /// Attempts made by retrying acquisitions before giving up
    pub max_retries: u32,
    /// First backoff delay, doubled on every further attempt
    pub backoff_base_ms: u32,
    /// Seconds without a reading before real-time tracking reopens its subscription
    pub stale_after_secs: u32,
    /// Upper bound when stretching the timeout after repeated timeouts
    pub timeout_cap_ms: u32,
    /// Seconds between one-shot fixes that real-time tracking takes alongside its
    /// subscription, 0 turns them off
    pub periodic_interval_secs: u32,
    /// Defaults for one-shot requests
    pub one_shot: PositionOptions,
    /// Defaults for continuous tracking
    pub watch: WatchOptions,
}

impl LocationConfig {
    pub fn permission_cooldown(&self) -> TimeDelta {
        TimeDelta::seconds(self.permission_cooldown_secs as i64)
    }

    pub fn storage_freshness(&self) -> TimeDelta {
        TimeDelta::seconds(self.storage_freshness_secs as i64)
    }

    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_millis(self.watch_restart_delay_ms as u64)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs as u64)
    }

    pub fn periodic_interval(&self) -> Option<Duration> {
        (self.periodic_interval_secs != 0)
            .then(|| Duration::from_secs(self.periodic_interval_secs as u64))
    }

    /// Delay before retry number `attempt` (starting at 1)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis((self.backoff_base_ms as u64).saturating_mul(factor))
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            permission_cooldown_secs: 60,
            storage_freshness_secs: 60 * 60,
            default_threshold_meters: 10.0,
            accuracy_delta_meters: 20.0,
            watch_restart_delay_ms: 2_000,
            max_retries: 5,
            backoff_base_ms: 2_000,
            stale_after_secs: 120,
            timeout_cap_ms: 30_000,
            periodic_interval_secs: 45,
            one_shot: PositionOptions::default(),
            watch: WatchOptions::default(),
        }
    }
}
