//! Fixed-interval call pacing for the classification service.
//!
//! The service enforces a calls-per-minute ceiling. [`Pacer`] spaces attempt
//! starts at least `60s / calls_per_minute` apart, whether the previous
//! attempt succeeded or failed. The interval is fixed, not adaptive.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl Pacer {
    /// A pacer admitting `calls_per_minute` attempts per minute (at least one).
    pub fn per_minute(calls_per_minute: u32) -> Self {
        Self::with_interval(Duration::from_secs(60) / calls_per_minute.max(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next slot and claim it. The first call never waits.
    pub async fn acquire(&mut self) {
        if let Some(slot) = self.next_slot {
            if slot > Instant::now() {
                tokio::time::sleep_until(slot).await;
            }
        }
        self.next_slot = Some(Instant::now() + self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_from_rate() {
        assert_eq!(Pacer::per_minute(15).interval(), Duration::from_secs(4));
        assert_eq!(Pacer::per_minute(120).interval(), Duration::from_millis(500));
        assert_eq!(Pacer::per_minute(0).interval(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_spaced() {
        let mut pacer = Pacer::per_minute(15);
        let start = Instant::now();

        pacer.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        pacer.acquire().await;
        pacer.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(8));
        assert!(start.elapsed() < Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_do_not_wait_again() {
        let mut pacer = Pacer::with_interval(Duration::from_secs(4));
        pacer.acquire().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let before = Instant::now();
        pacer.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
