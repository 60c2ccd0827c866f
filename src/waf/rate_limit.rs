//! IP+path sliding-window rate limiter.
//!
//! Shared mutable state: per-key timestamp windows behind a parking_lot Mutex,
//! so append and prune happen atomically per check. Every `SWEEP_EVERY`th
//! check sweeps the whole map, so keys from one-off sources do not accumulate
//! while traffic keeps flowing.

use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SWEEP_EVERY: u64 = 1024;

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
    limit: u32,
    window: Duration,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit: config.requests_per_window,
            window: Duration::from_secs(config.window_seconds),
            checks: AtomicU64::new(0),
        }
    }

    /// Record one request for `(ip, path)` and report whether it stays within
    /// the window limit.
    pub fn check(&self, ip: &str, path: &str) -> bool {
        let key = format!("{ip} {path}");
        let now = Instant::now();
        let sweep_due = self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == 0;

        let mut windows = self.windows.lock();
        if sweep_due {
            sweep(&mut windows, now, self.window);
        }

        let timestamps = windows.entry(key).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.limit as usize {
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Drop keys whose whole window has expired.
    pub fn prune(&self) {
        sweep(&mut self.windows.lock(), Instant::now(), self.window);
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

fn sweep(windows: &mut HashMap<String, Vec<Instant>>, now: Instant, window: Duration) {
    windows.retain(|_, timestamps| {
        timestamps.retain(|t| now.duration_since(*t) < window);
        !timestamps.is_empty()
    });
}
