use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;

/// A source of UTC instants for everything time-stamped in a room.
pub trait Clock
where
    Self: Send + Sync + 'static,
{
    /// Returns the current instant.
    ///
    /// Implementations must return strictly increasing values with microsecond precision,
    /// so instants survive a round trip through the database unchanged and two
    /// calls never compare equal.
    fn now(&self) -> DateTime<Utc>;
}

/// Drops sub-microsecond precision, which postgres does not store.
pub fn truncate_to_micros(instant: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = (instant.nanosecond() / 1_000) * 1_000;
    instant.with_nanosecond(nanos).unwrap_or(instant)
}

/// The wall clock, made strictly monotonic.
#[derive(Debug)]
pub struct SystemClock {
    last: Mutex<DateTime<Utc>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = truncate_to_micros(Utc::now());
        let mut last = self.last.lock();

        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };

        *last = next;
        next
    }
}

/// A clock that only moves when told to. Every read still ticks forward by one microsecond.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(truncate_to_micros(start)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current = truncate_to_micros(*current + by);
    }

    /// Returns the instant the next read would start from, without ticking.
    pub fn peek(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock();
        let now = *current;

        *current = now + Duration::microseconds(1);
        now
    }
}
