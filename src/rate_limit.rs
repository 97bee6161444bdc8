//! Per-client request rate limiting.
//!
//! The relay only talks to the [`RateLimiter`] trait; the in-process
//! [`FixedWindowLimiter`] is the default backing store. A multi-instance
//! deployment would plug in a shared store behind the same trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::LimitsConfig;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request may proceed; `remaining` more fit in the current window.
    Allowed { remaining: u32 },
    /// The key is over budget until the window resets.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Decides whether a request for `key` may proceed, recording it if so.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateDecision;

    /// Number of keys currently tracked (for diagnostics).
    fn tracked_keys(&self) -> usize;
}

/// Request counter for a single key.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_start: Instant,
}

/// Fixed-window limiter held in process memory.
///
/// A window opens on the first request for a key and lasts `window`. Within
/// it at most `max_requests` are admitted; rejected requests are not counted.
/// The table never holds more than `max_tracked_keys` records.
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    max_tracked_keys: usize,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration, max_tracked_keys: usize) -> Self {
        Self {
            max_requests,
            window,
            max_tracked_keys: max_tracked_keys.max(1),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(
            limits.rate_limit_requests,
            limits.rate_limit_window(),
            limits.max_tracked_keys,
        )
    }

    /// Same as [`RateLimiter::check`] with an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(record) = records.get_mut(key) {
            let elapsed = now.saturating_duration_since(record.window_start);
            if elapsed <= self.window {
                if record.count >= self.max_requests {
                    return RateDecision::Limited {
                        retry_after: self.window - elapsed,
                    };
                }
                record.count += 1;
                return RateDecision::Allowed {
                    remaining: self.max_requests - record.count,
                };
            }
        } else if records.len() >= self.max_tracked_keys {
            self.make_room(&mut records, now);
        }

        if self.max_requests == 0 {
            return RateDecision::Limited {
                retry_after: self.window,
            };
        }

        records.insert(
            key.to_string(),
            RateLimitRecord {
                count: 1,
                window_start: now,
            },
        );
        RateDecision::Allowed {
            remaining: self.max_requests - 1,
        }
    }

    /// Drop expired records; if none expired, drop the oldest window.
    fn make_room(&self, records: &mut HashMap<String, RateLimitRecord>, now: Instant) {
        let before = records.len();
        records.retain(|_, r| now.saturating_duration_since(r.window_start) <= self.window);

        if records.len() >= self.max_tracked_keys {
            let oldest = records
                .iter()
                .min_by_key(|(_, r)| r.window_start)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                records.remove(&key);
            }
        }

        debug!(
            dropped = before - records.len(),
            tracked = records.len(),
            "Rate-limit table pruned"
        );
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    fn tracked_keys(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
