use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            enabled,
        }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action write limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub post_limit: usize,
    pub post_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub message_limit: usize,
    pub message_window: Duration,
    pub upload_limit: usize,
    pub upload_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(name)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        }
        Self {
            post_limit: usize_env("RL_POST_LIMIT", 10),
            post_window: dur_env("RL_POST_WINDOW", 300),
            comment_limit: usize_env("RL_COMMENT_LIMIT", 30),
            comment_window: dur_env("RL_COMMENT_WINDOW", 60),
            message_limit: usize_env("RL_MESSAGE_LIMIT", 60),
            message_window: dur_env("RL_MESSAGE_WINDOW", 60),
            upload_limit: usize_env("RL_UPLOAD_LIMIT", 20),
            upload_window: dur_env("RL_UPLOAD_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers; keys are acting-user ids.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }
    pub fn allow_post(&self, user: i64) -> bool {
        self.limiter
            .check(&format!("post:{user}"), self.cfg.post_limit, self.cfg.post_window)
    }
    pub fn allow_comment(&self, user: i64) -> bool {
        self.limiter.check(
            &format!("comment:{user}"),
            self.cfg.comment_limit,
            self.cfg.comment_window,
        )
    }
    pub fn allow_message(&self, user: i64) -> bool {
        self.limiter.check(
            &format!("message:{user}"),
            self.cfg.message_limit,
            self.cfg.message_window,
        )
    }
    pub fn allow_upload(&self, user: i64) -> bool {
        self.limiter.check(
            &format!("upload:{user}"),
            self.cfg.upload_limit,
            self.cfg.upload_window,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 {
            assert!(rl.check("k", 3, window));
        }
        assert!(!rl.check("k", 3, window));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..100 {
            assert!(rl.check("k", 1, Duration::from_secs(60)));
        }
    }
}
