//! Login-attempt throttling (§4.5, §8 boundary behavior). Per-IP failure
//! counter in memory — after 5 failures in 15 minutes, further attempts from
//! that IP return 429 until the window clears, then the counter resets.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

const MAX_ATTEMPTS: u32 = 5;
const WINDOW: chrono::Duration = chrono::Duration::minutes(15);

struct Window {
    failures: u32,
    window_started: DateTime<Utc>,
}

/// Per-IP login throttle. Cleared windows are dropped lazily on next access
/// rather than via a background sweep — the map stays small in practice
/// (one entry per distinct attacking/forgetful IP).
pub struct LoginThrottle {
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl LoginThrottle {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this IP is currently locked out (5th+ failure
    /// within the current 15-minute window).
    pub async fn is_locked_out(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        let windows = self.windows.lock().await;
        match windows.get(&ip) {
            Some(w) if now - w.window_started < WINDOW => w.failures >= MAX_ATTEMPTS,
            _ => false,
        }
    }

    /// Record a failed attempt, starting a fresh window if the previous one
    /// expired.
    pub async fn record_failure(&self, ip: IpAddr, now: DateTime<Utc>) {
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(ip).or_insert_with(|| Window {
            failures: 0,
            window_started: now,
        });
        if now - entry.window_started >= WINDOW {
            entry.failures = 0;
            entry.window_started = now;
        }
        entry.failures += 1;
    }

    /// Clear the window on a successful login.
    pub async fn record_success(&self, ip: IpAddr) {
        self.windows.lock().await.remove(&ip);
    }
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn sixth_failure_locks_out() {
        let throttle = LoginThrottle::new();
        let now = Utc::now();
        for _ in 0..5 {
            throttle.record_failure(ip(), now).await;
        }
        assert!(throttle.is_locked_out(ip(), now).await);
    }

    #[tokio::test]
    async fn window_clears_after_expiry() {
        let throttle = LoginThrottle::new();
        let now = Utc::now();
        for _ in 0..5 {
            throttle.record_failure(ip(), now).await;
        }
        let later = now + chrono::Duration::minutes(16);
        assert!(!throttle.is_locked_out(ip(), later).await);
        throttle.record_failure(ip(), later).await;
        assert!(!throttle.is_locked_out(ip(), later).await);
    }

    #[tokio::test]
    async fn success_clears_window() {
        let throttle = LoginThrottle::new();
        let now = Utc::now();
        throttle.record_failure(ip(), now).await;
        throttle.record_success(ip()).await;
        assert!(!throttle.is_locked_out(ip(), now).await);
    }
}
