use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Once the cache grows past this size, expired entries are swept on insert.
const SWEEP_THRESHOLD: usize = 1024;

/// (experiment id, treatment)
pub(crate) type ThrottleKey = (String, Option<String>);

/// Remembers when an event for each (experiment, treatment) pair was last sent.
#[derive(Debug, Default)]
pub(crate) struct ThrottleCache {
    last_sent: HashMap<ThrottleKey, DateTime<Utc>>,
}

impl ThrottleCache {
    /// Returns `true` if an event for `key` was sent less than `window` before `now`.
    pub fn is_throttled(&self, key: &ThrottleKey, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_sent
            .get(key)
            .is_some_and(|last_sent| now.signed_duration_since(*last_sent) < window)
    }

    /// Record that an event for `key` is being sent at `now`.
    ///
    /// Entries older than `window` can no longer throttle anything, so they are dropped once the
    /// cache is large.
    pub fn record(&mut self, key: ThrottleKey, now: DateTime<Utc>, window: Duration) {
        self.last_sent.insert(key, now);

        if self.last_sent.len() > SWEEP_THRESHOLD {
            self.last_sent
                .retain(|_, last_sent| now.signed_duration_since(*last_sent) < window);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.last_sent.len()
    }
}
