use std::time::{Duration, Instant};

/// Time source for the fetcher. Politeness gaps and backoff both go through
/// `sleep`, so a fake clock can run a whole retry sequence instantly.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

#[cfg(test)]
pub mod fake {
    use std::cell::{Cell, RefCell};
    use std::time::{Duration, Instant};

    use super::Clock;

    /// Advances on `sleep` and records every requested wait.
    pub struct FakeClock {
        start: Instant,
        elapsed: Cell<Duration>,
        pub sleeps: RefCell<Vec<Duration>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            FakeClock {
                start: Instant::now(),
                elapsed: Cell::new(Duration::ZERO),
                sleeps: RefCell::new(Vec::new()),
            }
        }

        pub fn advance(&self, d: Duration) {
            self.elapsed.set(self.elapsed.get() + d);
        }

        pub fn total_slept(&self) -> Duration {
            self.sleeps.borrow().iter().sum()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.start + self.elapsed.get()
        }

        fn sleep(&self, d: Duration) {
            self.sleeps.borrow_mut().push(d);
            self.advance(d);
        }
    }
}
