//! # Box Office Testing
//!
//! Testing utilities for reducers built on `box-office-core`:
//!
//! - [`mocks::FixedClock`] / [`mocks::test_clock`] for deterministic timestamps
//! - [`mocks::SteppingClock`] for flows that need time to move between steps
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - [`assertions`] over the effects a reducer returns


pub use reducer_test::{assertions, ReducerTest};

/// Mock implementations of environment traits
pub mod mocks {
    use box_office_core::environment::Clock;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// # Example
    ///
    /// ```
    /// use box_office_testing::mocks::FixedClock;
    /// use box_office_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by a fixed step every time it is read
    ///
    /// Useful when a test needs `created_at < paid_at < issued_at`.
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: Duration,
    }

    impl SteppingClock {
        /// Start at `start`, advancing `step` per reading
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut next = self
                .next
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_089))
    }
}

pub use mocks::{test_clock, FixedClock, SteppingClock};

#[cfg(test)]
mod tests {
    use super::*;
    use box_office_core::environment::Clock;
    use chrono::{Datelike, Duration};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().year(), 2025);
        assert_eq!(clock.now().ordinal(), 1);
    }

    #[test]
    fn test_stepping_clock_moves_forward() {
        let start = test_clock().now();
        let clock = SteppingClock::new(start, Duration::seconds(1));
        let first = clock.now();
        let second = clock.now();
        assert_eq!(first, start);
        assert_eq!(second - first, Duration::seconds(1));
    }
}
