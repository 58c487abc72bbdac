use tokio::time::Duration;

/// Ceiling as a multiple of the base interval.
const CEILING_FACTOR: u32 = 10;

/// Geometric backoff for a refresher's auto-interval: doubles on each
/// consecutive error sweep, capped at ten times the base, and resets on the
/// first success.
#[derive(Debug)]
pub(crate) struct Backoff {
    base: Duration,
    streak: u32,
}

impl Backoff {
    pub(crate) fn new(base: Duration) -> Self {
        Self { base, streak: 0 }
    }

    pub(crate) fn interval(&self) -> Duration {
        let multiplier = 1u32
            .checked_shl(self.streak)
            .unwrap_or(CEILING_FACTOR)
            .min(CEILING_FACTOR);
        self.base * multiplier
    }

    pub(crate) fn record_error(&mut self) {
        self.streak = self.streak.saturating_add(1);
    }

    pub(crate) fn record_success(&mut self) {
        self.streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_to_the_ceiling_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(10));
        assert_eq!(backoff.interval(), Duration::from_secs(10));

        backoff.record_error();
        assert_eq!(backoff.interval(), Duration::from_secs(20));
        backoff.record_error();
        assert_eq!(backoff.interval(), Duration::from_secs(40));
        backoff.record_error();
        assert_eq!(backoff.interval(), Duration::from_secs(80));
        backoff.record_error();
        assert_eq!(backoff.interval(), Duration::from_secs(100));
        backoff.record_error();
        assert_eq!(backoff.interval(), Duration::from_secs(100));

        backoff.record_success();
        assert_eq!(backoff.interval(), Duration::from_secs(10));
    }
}
