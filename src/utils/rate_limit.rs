use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed-window request counter keyed by account id or client address.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Arc<DashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Counts one request for `key`. Returns false once the window is full.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert((now, 0));
        let (started, count) = entry.value_mut();

        if now.duration_since(*started) >= self.window {
            *started = now;
            *count = 0;
        }

        if *count >= self.max_requests {
            return false;
        }
        *count += 1;
        true
    }

    /// Drops windows that have already elapsed.
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, (started, _)| now.duration_since(*started) < self.window);
    }
}
