use crate::{
    coordinate::{Coordinate, accuracy_delta, distance_meters},
    error::LocationError,
};

/// Decides whether a new reading is worth reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeDetector {
    threshold_meters: f64,
    accuracy_delta_meters: f64,
}

impl ChangeDetector {
    pub fn new(threshold_meters: f64, accuracy_delta_meters: f64) -> Self {
        Self {
            threshold_meters,
            accuracy_delta_meters,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_meters
    }

    pub fn set_threshold(&mut self, meters: f64) -> Result<(), LocationError> {
        if !meters.is_finite() || meters < 0.0 {
            return Err(LocationError::InvalidThreshold(meters.to_string()));
        }
        self.threshold_meters = meters;
        Ok(())
    }

    /// A reading is significant if it moved at least the threshold, or if the reported
    /// accuracy shifted by more than the accuracy delta (the GPS locked on or lost its fix).
    pub fn has_changed_significantly(&self, prev: Option<&Coordinate>, next: &Coordinate) -> bool {
        let Some(prev) = prev else {
            return true;
        };

        distance_meters(prev, next) >= self.threshold_meters
            || accuracy_delta(prev, next) > self.accuracy_delta_meters
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(10.0, 20.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn at(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng, Utc::now())
    }

    #[test]
    fn test_first_reading_is_significant() {
        let det = ChangeDetector::default();
        assert!(det.has_changed_significantly(None, &at(37.5665, 126.9780)));
    }

    #[test]
    fn test_city_hall_hop_is_significant() {
        let det = ChangeDetector::default();
        let a = at(37.5665, 126.9780);
        let b = at(37.5675, 126.9790);
        assert!(det.has_changed_significantly(Some(&a), &b));
    }

    #[test]
    fn test_jitter_is_ignored() {
        let det = ChangeDetector::default();
        // ~1.1m north
        let a = at(37.5665, 126.9780).with_accuracy(10.0);
        let b = at(37.56651, 126.9780).with_accuracy(15.0);
        assert!(!det.has_changed_significantly(Some(&a), &b));
    }

    #[test]
    fn test_accuracy_jump_is_significant() {
        let det = ChangeDetector::default();
        let a = at(37.5665, 126.9780).with_accuracy(65.0);
        let b = at(37.5665, 126.9780).with_accuracy(8.0);
        assert!(det.has_changed_significantly(Some(&a), &b));
    }

    #[test]
    fn test_accuracy_delta_boundary() {
        let det = ChangeDetector::default();
        let a = at(37.5665, 126.9780).with_accuracy(30.0);
        let b = at(37.5665, 126.9780).with_accuracy(10.0);
        assert!(!det.has_changed_significantly(Some(&a), &b));
    }

    #[test]
    fn test_threshold_is_respected() {
        let mut det = ChangeDetector::default();
        let a = at(37.5665, 126.9780);
        let b = at(37.5675, 126.9790);
        let d = a.distance_to(&b);

        det.set_threshold(d + 1.0).expect("Threshold rejected");
        assert!(!det.has_changed_significantly(Some(&a), &b));

        det.set_threshold(d).expect("Threshold rejected");
        assert!(det.has_changed_significantly(Some(&a), &b));
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut det = ChangeDetector::default();
        assert!(det.set_threshold(-1.0).is_err());
        assert!(det.set_threshold(f64::NAN).is_err());
        assert!(det.set_threshold(f64::INFINITY).is_err());
        assert_eq!(det.threshold(), 10.0);
    }
}
