//! Log throttling
//!
//! A failing device tends to fail on every frame. The throttler lets the first
//! occurrence of a keyed message through, swallows repeats for an interval and
//! reports how many were swallowed when the key is next allowed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Keyed rate limiter for log messages
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a throttler that allows one message per key per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Decide whether a message for `key` may be logged now.
    ///
    /// Returns `Some(n)` when it may, where `n` is the number of messages
    /// suppressed since the last one that got through; `None` when throttled.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = std::mem::take(&mut entry.suppressed);
                entry.last_logged = now;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Whether a message for `key` may be logged now
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Forget `key`, typically once the condition behind it has recovered
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// One message per key every 5 seconds
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `warn!`, appending the suppressed count when nonzero
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)*);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert_eq!(throttler.check("device"), Some(0));
        assert_eq!(throttler.check("device"), None);
        assert_eq!(throttler.check("device"), None);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(throttler.check("device"), Some(2));
        assert_eq!(throttler.check("device"), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("lock"));
        assert!(throttler.should_log("empty_frame"));
        assert!(!throttler.should_log("lock"));
        assert_eq!(throttler.len(), 2);
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("lock"));
        throttler.clear("lock");
        assert!(throttler.should_log("lock"));
        throttler.clear("lock");
        assert!(throttler.is_empty());
    }
}
