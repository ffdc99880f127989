//! In-process sliding windows

use super::{retry_after_secs, RateDecision, RateLimitStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;

struct Window {
    window_ms: u64,
    /// Request timestamps in ms, oldest first
    stamps: VecDeque<i64>,
}

impl Window {
    fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            stamps: VecDeque::new(),
        }
    }

    /// Remove entries at or before `now - window_ms`
    fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms as i64;
        while self.stamps.front().map_or(false, |&t| t <= cutoff) {
            self.stamps.pop_front();
        }
    }
}

/// Sliding windows held in a sharded map; each key's window is mutated under
/// its shard lock, so check-and-record is atomic per key.
#[derive(Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, Window>,
}

impl MemoryWindowStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryWindowStore {
    async fn hit(&self, key: &str, now_ms: i64, window_ms: u64, max_requests: u32) -> RateDecision {
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::new(window_ms));
        window.window_ms = window_ms;
        window.evict(now_ms);

        let count = window.stamps.len();
        if count >= max_requests as usize {
            return RateDecision::Deny {
                retry_after_secs: retry_after_secs(now_ms, window.stamps.front().copied(), window_ms),
            };
        }

        window.stamps.push_back(now_ms);
        RateDecision::Allow {
            remaining: max_requests - count as u32 - 1,
        }
    }

    async fn count(&self, key: &str, now_ms: i64, window_ms: u64) -> usize {
        let cutoff = now_ms - window_ms as i64;
        self.windows
            .get(key)
            .map(|w| w.stamps.iter().filter(|&&t| t > cutoff).count())
            .unwrap_or(0)
    }

    async fn expire(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| {
            w.evict(now_ms);
            !w.stamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }
}
