//! Fixed-window rate limiting
//!
//! Windowed counters keyed by an arbitrary string (connection id for the
//! control plane, channel name for the data plane). Counters reset when
//! their 60-second window elapses; a periodic sweep drops idle entries so
//! the map does not grow with churned keys.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Blocked { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitResult::Allowed { .. } => None,
            RateLimitResult::Blocked { retry_after } => Some(*retry_after),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counter set with a shared window length
pub struct FixedWindowLimiter {
    window: Duration,
    counters: DashMap<String, WindowCounter>,
    violations: AtomicU64,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            counters: DashMap::new(),
            violations: AtomicU64::new(0),
        }
    }

    /// Count one hit against `key` and check it against `limit`
    pub fn check(&self, key: &str, limit: u32) -> RateLimitResult {
        self.check_at(key, limit, Instant::now())
    }

    /// Deterministic variant used by the sweep task and tests
    pub fn check_at(&self, key: &str, limit: u32, now: Instant) -> RateLimitResult {
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(WindowCounter { count: 0, window_start: now });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= limit {
            self.violations.fetch_add(1, Ordering::Relaxed);
            let elapsed = now.duration_since(entry.window_start);
            let retry_after = self.window.saturating_sub(elapsed);
            return RateLimitResult::Blocked { retry_after };
        }

        entry.count += 1;
        RateLimitResult::Allowed { remaining: limit - entry.count }
    }

    /// Current count within the active window, zero if none
    pub fn current_count(&self, key: &str) -> u32 {
        self.counters
            .get(key)
            .filter(|c| c.window_start.elapsed() < self.window)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Drop the counter for a key entirely (connection teardown)
    pub fn forget(&self, key: &str) {
        self.counters.remove(key);
    }

    /// Remove counters whose window elapsed; returns how many were swept
    pub fn sweep(&self) -> usize {
        let before = self.counters.len();
        let window = self.window;
        self.counters
            .retain(|_, counter| counter.window_start.elapsed() < window);
        before - self.counters.len()
    }

    /// Total blocked checks since startup
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}
