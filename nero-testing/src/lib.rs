mod platform;

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use log::info;
use nero_location::{
    Coordinate, Geolocator, LocationConfig, LocationError, MemoryStore, PlatformError,
    PlatformErrorCode, TrackingMode, UtcDT, WatchEvent, WatchOptions, WatchReading,
};
use serde::{Deserialize, Serialize};
use tokio::{task::yield_now, time::Instant};

pub use platform::SimPlatform;

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

pub type SimLocator = Geolocator<SimPlatform, MemoryStore, MemoryStore>;

fn default_domain() -> String {
    "sim.nero.local".to_string()
}

fn default_origin() -> String {
    "https://sim.nero.local".to_string()
}

/// A recorded or invented trip to play back through the location manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Origin the page is served from, location access needs a secure one
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Where the device is when tracking starts
    pub start: RoutePoint,
    pub steps: Vec<RouteStep>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
}

impl RoutePoint {
    pub fn at(&self, timestamp: UtcDT) -> Coordinate {
        Coordinate {
            lat: self.lat,
            lng: self.lng,
            accuracy: self.accuracy,
            timestamp,
            speed: self.speed,
            heading: self.heading,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// The platform reports a position
    Fix(RoutePoint),
    /// The platform reports an error
    Error(PlatformErrorCode),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteStep {
    /// Milliseconds after tracking started
    pub at_ms: u64,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl RouteStep {
    pub fn fix(at_ms: u64, point: RoutePoint) -> Self {
        Self {
            at_ms,
            kind: StepKind::Fix(point),
        }
    }

    pub fn error(at_ms: u64, code: PlatformErrorCode) -> Self {
        Self {
            at_ms,
            kind: StepKind::Error(code),
        }
    }

    fn reading(&self, timestamp: UtcDT) -> WatchReading {
        match self.kind {
            StepKind::Fix(point) => Ok(point.at(timestamp)),
            StepKind::Error(code) => Err(PlatformError::new(code, "Simulated error")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimOutcome {
    Delivered(Coordinate),
    Error(LocationError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub at_ms: u64,
    pub outcome: SimOutcome,
}

/// What the caller of the location manager would have seen during a replay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimReport {
    pub events: Vec<SimEvent>,
    /// Readings and errors the platform produced
    pub emitted: usize,
    /// Platform subscriptions opened over the whole run
    pub watches_opened: u32,
}

impl SimReport {
    fn record(&mut self, at_ms: u64, event: WatchEvent) {
        let outcome = match event {
            Ok(location) => SimOutcome::Delivered(location),
            Err(why) => SimOutcome::Error(why),
        };
        self.events.push(SimEvent { at_ms, outcome });
    }

    pub fn delivered(&self) -> impl Iterator<Item = &Coordinate> {
        self.events.iter().filter_map(|e| match &e.outcome {
            SimOutcome::Delivered(c) => Some(c),
            SimOutcome::Error(_) => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &LocationError> {
        self.events.iter().filter_map(|e| match &e.outcome {
            SimOutcome::Error(why) => Some(why),
            SimOutcome::Delivered(_) => None,
        })
    }
}

/// Give the tracking task a chance to process what was just emitted
async fn settle() {
    for _ in 0..32 {
        yield_now().await;
    }
}

/// Play `route` through a fresh location manager and collect everything its watch reports
pub async fn replay(
    route: &Route,
    mode: TrackingMode,
    config: LocationConfig,
    options: WatchOptions,
) -> Result<SimReport> {
    let started_at = Utc::now();
    let platform = SimPlatform::new(route.start.at(started_at), route.origin.as_str());
    let locator: Arc<SimLocator> = Arc::new(Geolocator::init(
        platform,
        MemoryStore::new(),
        MemoryStore::new(),
        &route.domain,
        config,
    ));

    let mut watch = match mode {
        TrackingMode::Basic => locator.watch_position(options).await,
        TrackingMode::Adaptive => locator.start_real_time_tracking(options).await,
    }
    .context("Failed to start tracking")?;

    info!("Replaying {} steps in {mode:?} mode", route.steps.len());

    let clock = Instant::now();
    let mut report = SimReport::default();
    let mut last_at = 0;

    while let Some(event) = watch.try_next() {
        report.record(0, event);
    }

    for step in route.steps.iter() {
        tokio::time::sleep_until(clock + Duration::from_millis(step.at_ms)).await;
        let timestamp = started_at + TimeDelta::milliseconds(step.at_ms as i64);
        locator.platform().emit(step.reading(timestamp));
        report.emitted += 1;
        last_at = step.at_ms;

        settle().await;
        while let Some(event) = watch.try_next() {
            report.record(step.at_ms, event);
        }
    }

    locator.shutdown().await;

    while let Some(event) = watch.next().await {
        report.record(last_at, event);
    }

    report.watches_opened = locator.platform().opened_watches();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use tokio::test;

    use super::*;

    const START: (f64, f64) = (37.5665, 126.9780);
    /// Meters per degree of latitude on the haversine sphere
    const METERS_PER_DEGREE: f64 = 111_195.0;

    fn point_north(meters: f64, speed: Option<f64>) -> RoutePoint {
        RoutePoint {
            lat: START.0 + meters / METERS_PER_DEGREE,
            lng: START.1,
            accuracy: Some(5.0),
            speed,
            heading: speed.map(|_| 0.0),
        }
    }

    /// One reading per second, each `step_m` further north
    fn straight_route(step_m: f64, steps: u64, speed: Option<f64>) -> Route {
        Route {
            domain: default_domain(),
            origin: default_origin(),
            start: point_north(0.0, speed),
            steps: (1..=steps)
                .map(|i| RouteStep::fix(i * 1000, point_north(step_m * i as f64, speed)))
                .collect(),
        }
    }

    #[test(start_paused = true)]
    async fn test_walk_reports_every_ten_meters() {
        let route = straight_route(4.0, 10, None);

        let report = replay(
            &route,
            TrackingMode::Basic,
            LocationConfig::default(),
            WatchOptions::default(),
        )
        .await
        .expect("Replay failed");

        assert_eq!(report.emitted, 10);
        assert_eq!(report.errors().count(), 0);
        // The starting fix, then 12m, 24m and 36m
        let at: Vec<u64> = report.events.iter().map(|e| e.at_ms).collect();
        assert_eq!(at, vec![0, 3000, 6000, 9000]);
        assert_eq!(report.watches_opened, 1);
    }

    #[test(start_paused = true)]
    async fn test_drive_widens_threshold() {
        let route = straight_route(20.0, 10, Some(20.0));

        let report = replay(
            &route,
            TrackingMode::Adaptive,
            LocationConfig::default(),
            WatchOptions::default(),
        )
        .await
        .expect("Replay failed");

        // At 20 m/s only 50m moves count, so 60m, 120m and 180m
        assert_eq!(report.delivered().count(), 4);
        // Moving speed swaps in shorter timeouts once
        assert_eq!(report.watches_opened, 2);
    }

    #[test(start_paused = true)]
    async fn test_basic_timeout_restarts_watch() {
        let route = Route {
            domain: default_domain(),
            origin: default_origin(),
            start: point_north(0.0, None),
            steps: vec![
                RouteStep::fix(1000, point_north(15.0, None)),
                RouteStep::error(2000, PlatformErrorCode::Timeout),
                RouteStep::fix(5000, point_north(30.0, None)),
            ],
        };

        let report = replay(
            &route,
            TrackingMode::Basic,
            LocationConfig::default(),
            WatchOptions::default(),
        )
        .await
        .expect("Replay failed");

        assert_eq!(report.errors().count(), 0);
        assert_eq!(report.delivered().count(), 3);
        assert_eq!(report.watches_opened, 2);
    }

    #[test(start_paused = true)]
    async fn test_denial_ends_replay() {
        let route = Route {
            domain: default_domain(),
            origin: default_origin(),
            start: point_north(0.0, None),
            steps: vec![
                RouteStep::error(1000, PlatformErrorCode::PermissionDenied),
                RouteStep::fix(2000, point_north(50.0, None)),
            ],
        };

        let report = replay(
            &route,
            TrackingMode::Adaptive,
            LocationConfig::default(),
            WatchOptions::default(),
        )
        .await
        .expect("Replay failed");

        let errors: Vec<_> = report.errors().cloned().collect();
        assert_eq!(errors, vec![LocationError::PermissionDenied]);
        // Only the starting fix, nothing after the denial
        assert_eq!(report.delivered().count(), 1);
    }

    #[test(start_paused = true)]
    async fn test_insecure_origin_refuses_tracking() {
        let mut route = straight_route(4.0, 3, None);
        route.origin = "http://nero.example".to_string();

        let why = replay(
            &route,
            TrackingMode::Basic,
            LocationConfig::default(),
            WatchOptions::default(),
        )
        .await
        .expect_err("Tracked from an insecure origin");

        assert_eq!(
            why.downcast_ref::<LocationError>(),
            Some(&LocationError::InsecureContext)
        );

        // Plain http is fine on the loopback host
        route.origin = "http://localhost:5173".to_string();
        let report = replay(
            &route,
            TrackingMode::Basic,
            LocationConfig::default(),
            WatchOptions::default(),
        )
        .await
        .expect("Replay failed");
        assert_eq!(report.delivered().count(), 2);
    }

    #[test]
    async fn test_route_json() {
        let raw = r#"{
            "start": { "lat": 37.5665, "lng": 126.978 },
            "steps": [
                { "at_ms": 1000, "fix": { "lat": 37.567, "lng": 126.978, "speed": 1.2 } },
                { "at_ms": 2000, "error": "Timeout" }
            ]
        }"#;

        let route: Route = serde_json::from_str(raw).expect("Failed to parse route");

        assert_eq!(route.domain, "sim.nero.local");
        assert_eq!(route.origin, "https://sim.nero.local");
        assert_eq!(route.steps.len(), 2);
        assert!(matches!(
            route.steps[0].kind,
            StepKind::Fix(RoutePoint { speed: Some(_), accuracy: None, .. })
        ));
        assert!(matches!(
            route.steps[1].kind,
            StepKind::Error(PlatformErrorCode::Timeout)
        ));
    }
}
