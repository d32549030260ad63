//! Per-key fixed-window request limiter.
//!
//! Windows older than the configured length are dropped lazily when their key
//! is seen again and by [`RateLimiter::sweep`]. The table never holds more
//! than `max_keys` entries: a new key arriving at a full table evicts the
//! window that started first.

use crate::infra::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    max_keys: usize,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs.max(1)),
            max_requests: config.max_requests.max(1),
            max_keys: config.max_keys.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts one request for `key`. On refusal returns the whole seconds
    /// until the key's window resets.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        let mut table = self.table();
        if let Some(w) = table.get_mut(key) {
            if now.saturating_duration_since(w.started) >= self.window {
                *w = Window { started: now, count: 1 };
                return Ok(());
            }
            if w.count >= self.max_requests {
                let reset = self.window.saturating_sub(now.saturating_duration_since(w.started));
                return Err(reset.as_secs_f64().ceil().max(1.0) as u64);
            }
            w.count += 1;
            return Ok(());
        }

        if table.len() >= self.max_keys {
            let window = self.window;
            table.retain(|_, w| now.saturating_duration_since(w.started) < window);
        }
        if table.len() >= self.max_keys {
            if let Some(oldest) = table.iter().min_by_key(|(_, w)| w.started).map(|(k, _)| k.clone()) {
                table.remove(&oldest);
            }
        }
        table.insert(key.to_string(), Window { started: now, count: 1 });
        Ok(())
    }

    /// Drops every expired window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut table = self.table();
        let before = table.len();
        let window = self.window;
        table.retain(|_, w| now.saturating_duration_since(w.started) < window);
        before - table.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.table().len()
    }
}
