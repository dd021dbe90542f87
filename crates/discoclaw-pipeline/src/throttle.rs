//! Throttled placeholder edits during streaming (spec §4.3 step 5): accumulate
//! deltas, edit no more often than `interval`, always flush on the final call.

use std::time::{Duration, Instant};

pub struct EditThrottle {
    interval: Duration,
    last_edit: Option<Instant>,
}

impl EditThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_edit: None,
        }
    }

    /// Whether enough time has elapsed since the last edit to send another
    /// one. Always `true` on the first call.
    pub fn should_edit(&self, now: Instant) -> bool {
        match self.last_edit {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    pub fn mark_edited(&mut self, now: Instant) {
        self.last_edit = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_always_edits() {
        let throttle = EditThrottle::new(Duration::from_millis(1000));
        assert!(throttle.should_edit(Instant::now()));
    }

    #[test]
    fn rapid_second_call_is_throttled() {
        let mut throttle = EditThrottle::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        throttle.mark_edited(t0);
        assert!(!throttle.should_edit(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn call_after_interval_is_allowed() {
        let mut throttle = EditThrottle::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        throttle.mark_edited(t0);
        assert!(throttle.should_edit(t0 + Duration::from_millis(1001)));
    }
}
