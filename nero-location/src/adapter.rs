use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    config::{PositionOptions, WatchOptions},
    error::LocationError,
};

/// Above this speed (m/s) we're likely in a vehicle
const FAST_SPEED: f64 = 15.0;
/// Above this speed (m/s) we're likely cycling or running
const MODERATE_SPEED: f64 = 5.0;
/// Below this speed (m/s) we're standing around or strolling
const STATIONARY_SPEED: f64 = 1.0;

const FAST_THRESHOLD: f64 = 50.0;
const MODERATE_THRESHOLD: f64 = 20.0;
const STATIONARY_THRESHOLD: f64 = 5.0;
const DEFAULT_THRESHOLD: f64 = 10.0;

const STATIONARY_TIMEOUT_MS: u32 = 20_000;
const STATIONARY_MAX_AGE_MS: u32 = 45_000;
const MOVING_TIMEOUT_MS: u32 = 10_000;
const MOVING_MAX_AGE_MS: u32 = 15_000;

/// How the tracker should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Keep the current subscription
    Continue,
    /// Options changed, reopen the subscription with [BatteryAdapter::options]
    Resubscribe,
    /// Give up tracking entirely
    Stop,
}

/// A manually pinned tracking profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum TrackingOverride {
    Battery,
    Accuracy,
}

/// Tunes tracking options to how fast the user is moving and to how the platform is coping
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryAdapter {
    options: PositionOptions,
    threshold_meters: f64,
    timeout_cap_ms: u32,
    pinned: Option<TrackingOverride>,
}

impl BatteryAdapter {
    pub fn new(options: WatchOptions, default_threshold: f64, timeout_cap_ms: u32) -> Self {
        Self {
            options: options.position(),
            threshold_meters: options.threshold_meters.unwrap_or(default_threshold),
            timeout_cap_ms,
            pinned: None,
        }
    }

    pub fn options(&self) -> PositionOptions {
        self.options
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_meters
    }

    pub fn pinned(&self) -> Option<TrackingOverride> {
        self.pinned
    }

    /// Re-tune for the latest reported speed. Returns whether the platform options changed
    /// and the subscription needs reopening.
    pub fn adapt_to_speed(&mut self, speed: Option<f64>) -> bool {
        let Some(speed) = speed.filter(|s| s.is_finite() && *s >= 0.0) else {
            return false;
        };

        if self.pinned.is_some() {
            return false;
        }

        self.threshold_meters = if speed > FAST_SPEED {
            FAST_THRESHOLD
        } else if speed > MODERATE_SPEED {
            MODERATE_THRESHOLD
        } else if speed < STATIONARY_SPEED {
            STATIONARY_THRESHOLD
        } else {
            DEFAULT_THRESHOLD
        };

        let (timeout_ms, maximum_age_ms) = if speed < STATIONARY_SPEED {
            (STATIONARY_TIMEOUT_MS, STATIONARY_MAX_AGE_MS)
        } else {
            (MOVING_TIMEOUT_MS, MOVING_MAX_AGE_MS)
        };

        let changed =
            self.options.timeout_ms != timeout_ms || self.options.maximum_age_ms != maximum_age_ms;

        self.options.timeout_ms = timeout_ms;
        self.options.maximum_age_ms = maximum_age_ms;

        debug!(
            "Adapted to {speed:.1} m/s: threshold {}m, timeout {}ms",
            self.threshold_meters, self.options.timeout_ms
        );

        changed
    }

    /// Coarse, infrequent fixes
    pub fn optimize_for_battery(&mut self) {
        self.options = PositionOptions {
            enable_high_accuracy: false,
            timeout_ms: self.timeout_cap_ms,
            maximum_age_ms: 300_000,
        };
        self.threshold_meters = FAST_THRESHOLD;
        self.pinned = Some(TrackingOverride::Battery);
        info!("Tracking optimized for battery");
    }

    /// Fine, fresh fixes
    pub fn optimize_for_accuracy(&mut self) {
        self.options = PositionOptions {
            enable_high_accuracy: true,
            timeout_ms: MOVING_TIMEOUT_MS,
            maximum_age_ms: 0,
        };
        self.threshold_meters = STATIONARY_THRESHOLD;
        self.pinned = Some(TrackingOverride::Accuracy);
        info!("Tracking optimized for accuracy");
    }

    /// Hand control back to speed adaptation
    pub fn clear_override(&mut self) {
        self.pinned = None;
    }

    pub fn set_threshold(&mut self, meters: f64) {
        self.threshold_meters = meters;
    }

    pub fn recover(&mut self, error: &LocationError) -> RecoveryAction {
        match error {
            LocationError::Timeout => {
                if self.options.timeout_ms >= self.timeout_cap_ms {
                    return RecoveryAction::Continue;
                }
                let stretched = (self.options.timeout_ms as f64 * 1.5) as u32;
                self.options.timeout_ms = stretched.min(self.timeout_cap_ms);
                info!("Location timed out, timeout now {}ms", self.options.timeout_ms);
                RecoveryAction::Resubscribe
            }
            LocationError::PositionUnavailable => {
                if self.options.enable_high_accuracy {
                    self.options.enable_high_accuracy = false;
                    info!("Position unavailable, falling back to low accuracy");
                    RecoveryAction::Resubscribe
                } else {
                    RecoveryAction::Continue
                }
            }
            LocationError::PermissionDenied
            | LocationError::Unsupported
            | LocationError::InsecureContext => RecoveryAction::Stop,
            LocationError::Unknown | LocationError::InvalidThreshold(_) => {
                RecoveryAction::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_adapter() -> BatteryAdapter {
        BatteryAdapter::new(WatchOptions::default(), 10.0, 30_000)
    }

    #[test]
    fn test_speed_thresholds() {
        let mut adapter = mk_adapter();
        let cases = [
            (20.0, 50.0),
            (15.5, 50.0),
            (15.0, 20.0),
            (6.0, 20.0),
            (5.0, 10.0),
            (1.0, 10.0),
            (0.5, 5.0),
            (0.0, 5.0),
        ];

        for (speed, threshold) in cases {
            adapter.adapt_to_speed(Some(speed));
            assert_eq!(adapter.threshold(), threshold, "Wrong threshold for {speed} m/s");
        }
    }

    #[test]
    fn test_stationary_vs_moving_timing() {
        let mut adapter = mk_adapter();

        assert!(adapter.adapt_to_speed(Some(0.2)));
        assert_eq!(adapter.options().timeout_ms, 20_000);
        assert_eq!(adapter.options().maximum_age_ms, 45_000);

        // Same band again, nothing to reopen
        assert!(!adapter.adapt_to_speed(Some(0.4)));

        assert!(adapter.adapt_to_speed(Some(8.0)));
        assert_eq!(adapter.options().timeout_ms, 10_000);
        assert_eq!(adapter.options().maximum_age_ms, 15_000);
    }

    #[test]
    fn test_missing_speed_changes_nothing() {
        let mut adapter = mk_adapter();
        let before = adapter.clone();
        assert!(!adapter.adapt_to_speed(None));
        assert!(!adapter.adapt_to_speed(Some(f64::NAN)));
        assert_eq!(adapter, before);
    }

    #[test]
    fn test_override_pins_profile() {
        let mut adapter = mk_adapter();
        adapter.optimize_for_battery();
        assert!(!adapter.options().enable_high_accuracy);
        assert_eq!(adapter.threshold(), 50.0);

        adapter.adapt_to_speed(Some(0.1));
        assert_eq!(adapter.threshold(), 50.0);

        adapter.optimize_for_accuracy();
        assert!(adapter.options().enable_high_accuracy);
        assert_eq!(adapter.options().maximum_age_ms, 0);
        assert_eq!(adapter.threshold(), 5.0);

        adapter.clear_override();
        adapter.adapt_to_speed(Some(20.0));
        assert_eq!(adapter.threshold(), 50.0);
    }

    #[test]
    fn test_timeout_stretches_to_cap() {
        let mut adapter = mk_adapter();
        assert_eq!(adapter.options().timeout_ms, 15_000);

        assert_eq!(adapter.recover(&LocationError::Timeout), RecoveryAction::Resubscribe);
        assert_eq!(adapter.options().timeout_ms, 22_500);

        assert_eq!(adapter.recover(&LocationError::Timeout), RecoveryAction::Resubscribe);
        assert_eq!(adapter.options().timeout_ms, 30_000);

        // Nothing left to stretch
        assert_eq!(adapter.recover(&LocationError::Timeout), RecoveryAction::Continue);
        assert_eq!(adapter.options().timeout_ms, 30_000);
    }

    #[test]
    fn test_unavailable_downgrades_once() {
        let mut adapter = mk_adapter();
        assert!(adapter.options().enable_high_accuracy);
        assert_eq!(
            adapter.recover(&LocationError::PositionUnavailable),
            RecoveryAction::Resubscribe
        );
        assert!(!adapter.options().enable_high_accuracy);
        assert_eq!(
            adapter.recover(&LocationError::PositionUnavailable),
            RecoveryAction::Continue
        );
    }

    #[test]
    fn test_denied_stops() {
        let mut adapter = mk_adapter();
        assert_eq!(adapter.recover(&LocationError::PermissionDenied), RecoveryAction::Stop);
        assert_eq!(adapter.recover(&LocationError::Unknown), RecoveryAction::Continue);
    }
}
