use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-command minimum spacing on the wire. Commands are keyed by name, so a different
/// mode request is never held back by the previous one.
#[derive(Debug)]
pub struct CommandRateLimit {
    last: HashMap<String, Instant>,
    min_interval: Duration,
}

impl CommandRateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: HashMap::new(), min_interval }
    }

    pub fn allow(&mut self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&mut self, key: &str, now: Instant) -> bool {
        if let Some(t) = self.last.get(key) {
            if now.saturating_duration_since(*t) < self.min_interval {
                return false;
            }
        }
        self.last.insert(key.to_string(), now);
        true
    }

    /// Let the next `key` command through regardless of spacing.
    pub fn reset(&mut self, key: &str) {
        self.last.remove(key);
    }
}
