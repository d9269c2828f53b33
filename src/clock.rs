use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Abstraction over wall-clock time. The runtime only reads "now" through
/// this seam, so tests can substitute a deterministic implementation
/// instead of mutating process-wide state.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Steppable clock for tests. Each read returns the current time and then
/// advances it by one microsecond, so successive timestamps within a
/// frozen test still increase.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Moves the clock to the given instant.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.lock() = time;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock();
        let now = *current;
        *current = now + Duration::microseconds(1);
        now
    }
}
