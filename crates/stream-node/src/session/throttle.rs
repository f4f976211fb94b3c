use std::time::{Duration, Instant};

/// Decides which frames get a detection pass
///
/// A frame qualifies when detection is enabled, its 1-based count is a
/// multiple of the interval and enough time passed since the last attempt.
#[derive(Debug)]
pub struct DetectionThrottle {
    min_interval: Duration,
    frame_count: u64,
    last_attempt: Option<Instant>,
}

impl DetectionThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            frame_count: 0,
            last_attempt: None,
        }
    }

    /// Frames seen so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Count a new frame and decide whether to run detection on it
    pub fn on_frame(&mut self, enabled: bool, interval: u32, now: Instant) -> bool {
        self.frame_count += 1;

        let interval = u64::from(interval.max(1));
        if !enabled || self.frame_count % interval != 0 {
            return false;
        }

        let due = self
            .last_attempt
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_interval);
        if due {
            self.last_attempt = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_eligible_frame_is_interval() {
        let mut throttle = DetectionThrottle::new(Duration::ZERO);
        let now = Instant::now();

        let decisions: Vec<bool> = (0..10).map(|_| throttle.on_frame(true, 5, now)).collect();
        assert_eq!(
            decisions,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
        assert_eq!(throttle.frame_count(), 10);
    }

    #[test]
    fn test_min_interval_enforced() {
        let mut throttle = DetectionThrottle::new(Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(throttle.on_frame(true, 1, t0));
        assert!(!throttle.on_frame(true, 1, t0 + Duration::from_millis(500)));
        assert!(!throttle.on_frame(true, 1, t0 + Duration::from_millis(1999)));
        assert!(throttle.on_frame(true, 1, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_disabled_still_counts_frames() {
        let mut throttle = DetectionThrottle::new(Duration::ZERO);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(!throttle.on_frame(false, 5, now));
        }
        assert_eq!(throttle.frame_count(), 5);
        // Frame 10 is the next eligible one once re-enabled
        for _ in 0..4 {
            assert!(!throttle.on_frame(true, 5, now));
        }
        assert!(throttle.on_frame(true, 5, now));
    }

    #[test]
    fn test_zero_interval_treated_as_every_frame() {
        let mut throttle = DetectionThrottle::new(Duration::ZERO);
        assert!(throttle.on_frame(true, 0, Instant::now()));
    }
}
