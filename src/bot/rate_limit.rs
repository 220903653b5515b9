//! Per-user message rate limiting.

use std::collections::HashMap;

use crate::config::RateLimitConfig;

/// Fixed-slot sliding window limiter.
///
/// Each user owns exactly `max_requests` slots, each holding the unix time at
/// which it becomes free again. Admitting a message takes a free slot and
/// renews it for `window` seconds; with no free slot the message is denied.
/// Memory per user is constant no matter how chatty they are. Boundaries are
/// approximate: a slot is renewed, not appended to a log.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: i64,
    slots: HashMap<String, Vec<i64>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests.max(1),
            window: config.window,
            slots: HashMap::new(),
        }
    }

    /// Returns true if the message is allowed, false if the user is rate limited.
    pub fn admit(&mut self, user_id: &str, now: i64) -> bool {
        let renewed = now + self.window;

        let Some(slots) = self.slots.get_mut(user_id) else {
            let mut slots = vec![0; self.max_requests];
            slots[0] = renewed;
            self.slots.insert(user_id.to_string(), slots);
            return true;
        };

        match slots.iter_mut().find(|free_at| **free_at <= now) {
            Some(slot) => {
                *slot = renewed;
                true
            }
            None => false,
        }
    }

    /// Number of users with a slot array.
    #[cfg(test)]
    pub fn tracked_users(&self) -> usize {
        self.slots.len()
    }
}
