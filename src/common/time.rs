use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A source of wall-clock time, in milliseconds since the Unix epoch.
///
/// The cache only uses the clock for time-to-live math and for the
/// `loaded_at_millis` timestamp of [`EntryStats`][entry-stats]. It is never used
/// to time out a lookup.
///
/// [entry-stats]: ../stats/struct.EntryStats.html
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

/// The default [`Clock`].
///
/// Reads `std::time::SystemTime` once at construction and then advances with a
/// monotonic source, so the reported time never goes backwards when the system
/// clock is adjusted. With the `quanta` feature the monotonic source is
/// `quanta::Instant`, which can be faster than `std::time::Instant` depending on
/// the CPU architecture.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin_millis: u64,
    ty: ClockType,
}

#[derive(Clone, Debug)]
enum ClockType {
    /// Uses `std::time::Instant` to measure the time elapsed since the origin.
    Standard { origin: std::time::Instant },
    #[cfg(feature = "quanta")]
    /// Uses `quanta::Instant` to measure the time elapsed since the origin.
    Hybrid { origin: quanta::Instant },
}

impl Default for ClockType {
    /// If the `quanta` feature is enabled, `Hybrid` will be used. Otherwise,
    /// `Standard` will be used.
    fn default() -> Self {
        #[cfg(feature = "quanta")]
        {
            return ClockType::Hybrid {
                origin: quanta::Instant::now(),
            };
        }

        #[allow(unreachable_code)]
        ClockType::Standard {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        let origin_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_to_millis)
            // The system clock is set before 1970. Count from the epoch.
            .unwrap_or_default();
        Self {
            origin_millis,
            ty: ClockType::default(),
        }
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let elapsed = match &self.ty {
            ClockType::Standard { origin } => origin.elapsed(),
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { origin } => quanta::Instant::now().duration_since(*origin),
        };
        self.origin_millis
            .saturating_add(duration_to_millis(elapsed))
    }
}

/// A [`Clock`] whose time only moves when told to.
///
/// Clones share the same time, so a test can hand one clone to a cache builder
/// and keep another to advance the time.
///
/// ```rust
/// use lookup_cache::ManualClock;
/// use lookup_cache::Clock;
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// let handle = clock.clone();
/// handle.advance(Duration::from_secs(5));
/// assert_eq!(clock.now_millis(), 6_000);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now_millis)),
        }
    }

    pub fn set_millis(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::Release);
    }

    pub fn advance(&self, duration: Duration) {
        let millis = duration_to_millis(duration);
        let mut current = self.now.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(millis);
            match self
                .now
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
/// `Duration::MAX` therefore means "never".
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{duration_to_millis, Clock, ManualClock, SystemClock};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[test]
    fn system_clock_tracks_wall_time() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let clock = SystemClock::default();
        let t1 = clock.now_millis();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now_millis();

        assert!(t1 >= before);
        assert!(t2 >= t1 + 5);
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(10);
        let handle = clock.clone();

        handle.advance(Duration::from_millis(90));
        assert_eq!(clock.now_millis(), 100);

        handle.set_millis(42);
        assert_eq!(clock.now_millis(), 42);

        handle.advance(Duration::MAX);
        assert_eq!(clock.now_millis(), u64::MAX);
    }

    #[test]
    fn infinite_duration_saturates() {
        assert_eq!(duration_to_millis(Duration::MAX), u64::MAX);
        assert_eq!(duration_to_millis(Duration::from_secs(3)), 3_000);
    }
}
