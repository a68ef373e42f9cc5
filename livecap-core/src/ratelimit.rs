//! Process-wide per-platform minimum-interval gate for outbound polls.
//!
//! Every platform API call goes through [`PlatformRateLimiter::acquire`],
//! which blocks until at least `min_interval` has passed since the previous
//! access to the same platform. Platforms without a configured entry are not
//! throttled. Cancellation is observed promptly: the wait is an ordinary
//! timer future the caller may drop.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Gate {
    min_interval: Duration,
    last_access: Option<Instant>,
}

/// Reported by [`PlatformRateLimiter::wait_info`] for status surfaces.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WaitInfo {
    /// Seconds since the last access to this platform.
    pub waited_seconds: f64,
    /// Seconds until the next `acquire` would return immediately.
    pub seconds_until_next: f64,
    /// Configured minimum interval in seconds.
    pub interval_seconds: u64,
}

#[derive(Default)]
pub struct PlatformRateLimiter {
    gates: Mutex<HashMap<String, Gate>>,
}

impl PlatformRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum access interval for a platform. Clamped to ≥ 1 s.
    pub fn set_platform_limit(&self, platform: &str, interval_secs: u64) {
        let interval = Duration::from_secs(interval_secs).max(MIN_INTERVAL);
        let mut gates = self.gates.lock();
        match gates.get_mut(platform) {
            Some(gate) => gate.min_interval = interval,
            None => {
                gates.insert(
                    platform.to_string(),
                    Gate {
                        min_interval: interval,
                        last_access: None,
                    },
                );
            }
        }
    }

    pub fn remove_platform_limit(&self, platform: &str) {
        self.gates.lock().remove(platform);
    }

    /// Configured limits, platform → interval seconds.
    #[must_use]
    pub fn platform_limits(&self) -> HashMap<String, u64> {
        self.gates
            .lock()
            .iter()
            .map(|(k, g)| (k.clone(), g.min_interval.as_secs()))
            .collect()
    }

    /// Block until the platform gate opens, then stamp the access time.
    pub async fn acquire(&self, platform: &str) {
        loop {
            let wait = {
                let mut gates = self.gates.lock();
                let Some(gate) = gates.get_mut(platform) else {
                    // No entry means no throttling.
                    return;
                };
                let now = Instant::now();
                match gate.last_access {
                    Some(last) if now.duration_since(last) < gate.min_interval => {
                        gate.min_interval - now.duration_since(last)
                    }
                    _ => {
                        gate.last_access = Some(now);
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Clear the last access so the next `acquire` returns immediately.
    ///
    /// Used by explicit user-triggered refresh.
    pub fn force_access(&self, platform: &str) {
        if let Some(gate) = self.gates.lock().get_mut(platform) {
            gate.last_access = None;
        }
    }

    /// Wait status for a platform, `None` when it is not throttled.
    #[must_use]
    pub fn wait_info(&self, platform: &str) -> Option<WaitInfo> {
        let gates = self.gates.lock();
        let gate = gates.get(platform)?;
        let now = Instant::now();
        let waited = gate
            .last_access
            .map_or(0.0, |last| now.duration_since(last).as_secs_f64());
        let until_next = gate.last_access.map_or(0.0, |last| {
            gate.min_interval
                .saturating_sub(now.duration_since(last))
                .as_secs_f64()
        });
        Some(WaitInfo {
            waited_seconds: waited,
            seconds_until_next: until_next,
            interval_seconds: gate.min_interval.as_secs(),
        })
    }

    /// Reconcile the gate table with the platform configs: platforms with a
    /// positive interval are (re)configured, stale entries are dropped.
    pub fn sync_limits(&self, limits: &HashMap<String, u64>) {
        {
            let mut gates = self.gates.lock();
            gates.retain(|platform, _| limits.contains_key(platform));
        }
        for (platform, interval) in limits {
            if *interval > 0 {
                self.set_platform_limit(platform, *interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_acquires_are_spaced() {
        let limiter = PlatformRateLimiter::new();
        limiter.set_platform_limit("bilibili", 3);

        let start = Instant::now();
        let mut deltas = Vec::new();
        for _ in 0..5 {
            limiter.acquire("bilibili").await;
            deltas.push(start.elapsed());
        }

        // t0, t0+3, t0+6, t0+9, t0+12 under paused time.
        for (i, delta) in deltas.iter().enumerate() {
            let expected = Duration::from_secs(3 * i as u64);
            assert!(
                *delta >= expected,
                "acquire {i} returned after {delta:?}, expected >= {expected:?}"
            );
            assert!(*delta < expected + Duration::from_millis(50));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_access_opens_gate() {
        let limiter = PlatformRateLimiter::new();
        limiter.set_platform_limit("douyu", 30);

        limiter.acquire("douyu").await;
        limiter.force_access("douyu");

        let start = Instant::now();
        limiter.acquire("douyu").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_unknown_platform_not_throttled() {
        let limiter = PlatformRateLimiter::new();
        for _ in 0..100 {
            limiter.acquire("unknown").await;
        }
        assert!(limiter.wait_info("unknown").is_none());
    }

    #[test]
    fn test_interval_clamped_to_one_second() {
        let limiter = PlatformRateLimiter::new();
        limiter.set_platform_limit("huya", 0);
        assert_eq!(limiter.platform_limits()["huya"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_info_reports_remaining() {
        let limiter = PlatformRateLimiter::new();
        limiter.set_platform_limit("twitch", 10);
        limiter.acquire("twitch").await;

        tokio::time::advance(Duration::from_secs(4)).await;
        let info = limiter.wait_info("twitch").unwrap();
        assert_eq!(info.interval_seconds, 10);
        assert!((info.waited_seconds - 4.0).abs() < 0.1);
        assert!((info.seconds_until_next - 6.0).abs() < 0.1);
    }

    #[test]
    fn test_sync_limits_drops_stale_entries() {
        let limiter = PlatformRateLimiter::new();
        limiter.set_platform_limit("a", 5);
        limiter.set_platform_limit("b", 5);

        let mut limits = HashMap::new();
        limits.insert("b".to_string(), 7_u64);
        limiter.sync_limits(&limits);

        let current = limiter.platform_limits();
        assert!(!current.contains_key("a"));
        assert_eq!(current["b"], 7);
    }
}
