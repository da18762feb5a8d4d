//! Wall-clock source injected into every time-dependent component.

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time derived from tokio's clock, so a paused runtime
/// (`tokio::time::pause` / `advance`) moves it deterministically.
#[derive(Debug, Clone)]
pub struct MockClock {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl MockClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
        }
    }

    pub fn from_epoch_seconds(secs: i64) -> Self {
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        self.base + Duration::from_std(elapsed).unwrap_or(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn mock_clock_follows_tokio_time() {
        let clock = MockClock::from_epoch_seconds(1_000);
        assert_eq!(clock.now().timestamp(), 1_000);

        tokio::time::advance(std::time::Duration::from_secs(42)).await;
        assert_eq!(clock.now().timestamp(), 1_042);
    }

    #[test]
    fn system_clock_is_recent() {
        let now = SystemClock.now();
        assert!(now.timestamp() > 1_600_000_000);
    }
}
