use std::{fmt, sync::Arc, time::Duration};

use crate::common::time::duration_to_millis;

#[derive(Clone, Debug)]
/// The policy of a cache.
pub struct Policy {
    max_capacity: usize,
    time_to_live: Option<Duration>,
}

impl Policy {
    pub(crate) fn new(max_capacity: usize, time_to_live: Option<Duration>) -> Self {
        Self {
            max_capacity,
            time_to_live,
        }
    }

    /// Returns the `max_capacity` of the cache.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Returns the uniform `time_to_live` of the cache.
    ///
    /// Returns `None` when entries never expire, whether no time-to-live was
    /// configured or it was set to `Duration::MAX`, and when the time-to-live
    /// depends on the lookup outcome.
    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }
}

pub(crate) type TimeToLiveFn<V, E> = Arc<dyn Fn(Result<&V, &E>) -> Duration + Send + Sync + 'static>;

/// Decides how long a lookup outcome stays fresh.
pub(crate) enum TimeToLive<V, E> {
    Never,
    Uniform(Duration),
    ByOutcome(TimeToLiveFn<V, E>),
}

impl<V, E> Clone for TimeToLive<V, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::Uniform(d) => Self::Uniform(*d),
            Self::ByOutcome(f) => Self::ByOutcome(Arc::clone(f)),
        }
    }
}

impl<V, E> fmt::Debug for TimeToLive<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Uniform(d) => f.debug_tuple("Uniform").field(d).finish(),
            Self::ByOutcome(_) => f.write_str("ByOutcome(..)"),
        }
    }
}

impl<V, E> TimeToLive<V, E> {
    /// The uniform duration, if there is one.
    pub(crate) fn uniform(&self) -> Option<Duration> {
        match self {
            Self::Uniform(d) => Some(*d),
            Self::Never | Self::ByOutcome(_) => None,
        }
    }

    /// The instant, in wall-clock milliseconds, after which an outcome loaded
    /// at `now_millis` has expired. Saturates at `u64::MAX`.
    pub(crate) fn expires_at(&self, outcome: Result<&V, &E>, now_millis: u64) -> u64 {
        let ttl = match self {
            Self::Never => return u64::MAX,
            Self::Uniform(d) => *d,
            Self::ByOutcome(f) => f(outcome),
        };
        now_millis.saturating_add(duration_to_millis(ttl))
    }
}
