use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// A manually advanceable clock for deterministic lease-expiry and
/// recency-decay tests, so scenario tests don't depend on wall time.
pub struct FakeClock {
    epoch_seconds: AtomicI64,
}

impl FakeClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        FakeClock {
            epoch_seconds: AtomicI64::new(now.timestamp()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.epoch_seconds.load(Ordering::SeqCst), 0).unwrap()
    }

    pub fn advance(&self, seconds: i64) {
        self.epoch_seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_now_forward() {
        let start = Utc::now();
        let clock = FakeClock::at(start);
        clock.advance(601);
        assert_eq!((clock.now() - start).num_seconds(), 601);
    }
}
