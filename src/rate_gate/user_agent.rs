//! Rotating pool of realistic desktop browser user agents.
//!
//! Identifying as a generic HTTP client invites more aggressive CAPTCHA
//! gating from the upstream archive than a browser-shaped `User-Agent`
//! does. The gate rotates across a small pool with low probability so
//! requests don't look perfectly uniform either.

use std::sync::Mutex;

use rand::Rng;

/// Probability that a given `acquire()` call rotates to a new user agent.
pub const ROTATION_PROBABILITY: f64 = 0.3;

const POOL: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Tracks a currently-selected user agent and rotates it probabilistically.
pub struct UserAgentRotator {
    current: Mutex<usize>,
}

impl UserAgentRotator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Mutex::new(0),
        }
    }

    /// Returns the current user agent, rotating to a new one first with
    /// probability [`ROTATION_PROBABILITY`].
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn pick(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if rng.gen_bool(ROTATION_PROBABILITY) {
            *current = rng.gen_range(0..POOL.len());
        }
        POOL[*current]
    }
}

impl Default for UserAgentRotator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_always_returns_pool_member() {
        let rotator = UserAgentRotator::new();
        for _ in 0..50 {
            assert!(POOL.contains(&rotator.pick()));
        }
    }

    #[test]
    fn test_pool_is_desktop_browsers_only() {
        for ua in POOL {
            assert!(ua.starts_with("Mozilla/5.0"));
        }
    }
}
