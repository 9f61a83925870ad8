use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Interval gate deciding when the next update is due.
///
/// A timer that has never fired is always due, so a freshly started worker
/// runs its first cycle immediately regardless of the interval length.
#[derive(Debug)]
pub struct UpdateTimer {
    interval: Duration,
    last_update: Mutex<Option<Instant>>,
}

impl UpdateTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_update: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` and records the current instant when at least one
    /// interval has elapsed since the last `true` result. Has no side effects
    /// when it returns `false`.
    pub fn needs_update(&self) -> bool {
        let now = Instant::now();
        let mut last = self
            .last_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let due = match *last {
            None => true,
            Some(previous) => now.saturating_duration_since(previous) >= self.interval,
        };
        if due {
            *last = Some(now);
        }
        due
    }

    /// Instant at which the next update becomes due.
    pub fn next_due(&self) -> Instant {
        let last = self
            .last_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            None => Instant::now(),
            Some(previous) => previous + self.interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn first_check_is_due_then_waits_full_interval() {
        let timer = UpdateTimer::new(Duration::from_secs(30));
        assert!(timer.needs_update());
        assert!(!timer.needs_update());

        advance(Duration::from_secs(29)).await;
        assert!(!timer.needs_update());

        advance(Duration::from_secs(1)).await;
        assert!(timer.needs_update());
        assert!(!timer.needs_update());
    }

    #[tokio::test(start_paused = true)]
    async fn next_due_tracks_last_update() {
        let timer = UpdateTimer::new(Duration::from_secs(5));
        let start = Instant::now();
        assert!(timer.next_due() <= start);

        assert!(timer.needs_update());
        assert_eq!(timer.next_due(), start + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_interval_is_always_due() {
        let timer = UpdateTimer::new(Duration::ZERO);
        assert!(timer.needs_update());
        assert!(timer.needs_update());
    }
}
