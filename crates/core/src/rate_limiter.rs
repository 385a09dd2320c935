//! Adaptive per-host rate limiting (§4.4). Each host gets its own delay,
//! widened on throttling/errors and narrowed on sustained success, with an
//! optional windowed "ML" variant that looks at recent history instead of
//! reacting to the single latest fetch.

use crate::config::RateLimiterConfig;
use crate::models::HostProfile;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// What the rate limiter needs to know about the fetch that just happened,
/// in order to adjust a host's delay for the next one.
#[derive(Debug, Clone, Copy)]
pub struct FetchOutcome {
    pub status_code: Option<u16>,
    pub was_transport_error: bool,
    pub latency_ms: u64,
}

impl FetchOutcome {
    pub fn success(latency_ms: u64, status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            was_transport_error: false,
            latency_ms,
        }
    }

    pub fn transport_error() -> Self {
        Self {
            status_code: None,
            was_transport_error: true,
            latency_ms: 0,
        }
    }

    /// A request that never completed within the configured timeout.
    /// Treated the same as a transport error by both delay formulas: the
    /// host gets worse, not better, for never answering in time.
    pub fn timeout() -> Self {
        Self {
            status_code: None,
            was_transport_error: true,
            latency_ms: 0,
        }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    initial_delay: f64,
    ml_mode: bool,
    human_like_delays: bool,
    profiles: Mutex<HashMap<String, HostProfile>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, initial_delay: f64, ml_mode: bool) -> Self {
        Self::with_jitter(config, initial_delay, ml_mode, false)
    }

    pub fn with_jitter(
        config: RateLimiterConfig,
        initial_delay: f64,
        ml_mode: bool,
        human_like_delays: bool,
    ) -> Self {
        Self {
            config,
            initial_delay,
            ml_mode,
            human_like_delays,
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Sleeps the remaining portion of the host's current delay since its
    /// last request. Call once per fetch, immediately before issuing the
    /// request; call `record_outcome_for` afterwards with the result so the
    /// delay can adjust for next time without sleeping a second time.
    pub async fn wait(&self, host: &str) {
        let sleep_for = {
            let mut profiles = self.profiles.lock().unwrap();
            let profile = profiles
                .entry(host.to_string())
                .or_insert_with(|| HostProfile::new(host.to_string(), self.initial_delay));

            let sleep_for = match profile.last_request_at {
                Some(last) => {
                    let elapsed = last.elapsed().as_secs_f64();
                    (profile.current_delay - elapsed).max(0.0)
                }
                None => 0.0,
            };
            profile.last_request_at = Some(Instant::now());
            sleep_for
        };
        let sleep_for = if self.human_like_delays {
            self.jittered(sleep_for)
        } else {
            sleep_for
        };
        if sleep_for > 0.0 {
            sleep(Duration::from_secs_f64(sleep_for)).await;
        }
    }

    /// Widens `base` by up to 30%, strictly additive so the enforced delay
    /// never drops below what `wait` already computed — satellites hitting
    /// the same host just wake up a little later than the floor, never
    /// earlier.
    fn jittered(&self, base: f64) -> f64 {
        base + rand::random::<f64>() * 0.3 * base
    }

    /// Records the outcome of the fetch `wait` most recently gated, and
    /// adjusts the host's delay for the next call. Never sleeps.
    pub fn record_outcome_for(&self, host: &str, outcome: FetchOutcome) {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .entry(host.to_string())
            .or_insert_with(|| HostProfile::new(host.to_string(), self.initial_delay));
        self.record_outcome(profile, outcome);
    }

    fn record_outcome(&self, profile: &mut HostProfile, outcome: FetchOutcome) {
        if profile.history.len() >= self.config.history_size {
            profile.history.pop_front();
        }
        profile
            .history
            .push_back((outcome.status_code.unwrap_or(0), outcome.latency_ms));

        profile.current_delay = if self.ml_mode {
            self.windowed_delay(profile, outcome)
        } else {
            self.reactive_delay(profile, outcome)
        }
        .clamp(self.config.min_delay, self.config.max_delay);
    }

    /// The default, single-sample rule from §4.4.
    fn reactive_delay(&self, profile: &HostProfile, outcome: FetchOutcome) -> f64 {
        let current = profile.current_delay;
        if outcome.status_code == Some(429) {
            current * 2.0
        } else if outcome.was_transport_error || matches!(outcome.status_code, Some(s) if s >= 500)
        {
            current * self.config.failure_factor
        } else if outcome.latency_ms > 5000 {
            current * 1.2
        } else {
            (current * self.config.success_factor).max(self.initial_delay)
        }
    }

    /// The ML-mode windowed rule: looks at the success ratio and average
    /// latency over the retained history rather than just the latest
    /// sample, per §4.4's "ML-mode" note.
    fn windowed_delay(&self, profile: &HostProfile, outcome: FetchOutcome) -> f64 {
        let current = profile.current_delay;
        if outcome.status_code == Some(429) {
            return current * self.config.failure_factor * 2.0;
        }
        if outcome.was_transport_error || matches!(outcome.status_code, Some(s) if s >= 500) {
            return current * self.config.failure_factor;
        }

        let total = profile.history.len().max(1) as f64;
        let successes = profile
            .history
            .iter()
            .filter(|(status, _)| *status != 0 && *status < 400)
            .count() as f64;
        let success_ratio = successes / total;
        let avg_response_time: f64 =
            profile.history.iter().map(|(_, ms)| *ms as f64).sum::<f64>() / total;

        if avg_response_time > 3000.0 {
            current * (1.0 + avg_response_time / 10000.0)
        } else if success_ratio < 0.7 {
            current * self.config.failure_factor
        } else {
            (current * self.config.success_factor).max(self.initial_delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimiterConfig {
        RateLimiterConfig {
            history_size: 10,
            success_factor: 0.9,
            failure_factor: 1.5,
            min_delay: 0.1,
            max_delay: 60.0,
        }
    }

    #[tokio::test]
    async fn throttle_status_doubles_delay() {
        let limiter = RateLimiter::new(config(), 1.0, false);
        limiter.wait("example.com").await;
        limiter.record_outcome_for("example.com", FetchOutcome::success(100, 429));
        let delay = limiter.profiles.lock().unwrap().get("example.com").unwrap().current_delay;
        assert_eq!(delay, 2.0);
    }

    #[tokio::test]
    async fn server_error_applies_failure_factor() {
        let limiter = RateLimiter::new(config(), 1.0, false);
        limiter.wait("example.com").await;
        limiter.record_outcome_for("example.com", FetchOutcome::success(100, 503));
        let delay = limiter.profiles.lock().unwrap().get("example.com").unwrap().current_delay;
        assert_eq!(delay, 1.5);
    }

    #[tokio::test]
    async fn slow_response_applies_latency_penalty() {
        let limiter = RateLimiter::new(config(), 1.0, false);
        limiter.wait("example.com").await;
        limiter.record_outcome_for("example.com", FetchOutcome::success(5500, 200));
        let delay = limiter.profiles.lock().unwrap().get("example.com").unwrap().current_delay;
        assert!((delay - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fast_success_narrows_delay_but_not_below_initial() {
        let limiter = RateLimiter::new(config(), 1.0, false);
        limiter.wait("example.com").await;
        limiter.record_outcome_for("example.com", FetchOutcome::success(100, 200));
        let delay = limiter.profiles.lock().unwrap().get("example.com").unwrap().current_delay;
        assert_eq!(delay, 1.0);
    }

    #[tokio::test]
    async fn delay_never_exceeds_max_delay() {
        let mut cfg = config();
        cfg.max_delay = 3.0;
        let limiter = RateLimiter::new(cfg, 2.0, false);
        limiter.wait("example.com").await;
        limiter.record_outcome_for("example.com", FetchOutcome::success(100, 429));
        let delay = limiter.profiles.lock().unwrap().get("example.com").unwrap().current_delay;
        assert_eq!(delay, 3.0);
    }

    #[tokio::test]
    async fn human_like_jitter_never_sleeps_less_than_current_delay() {
        let limiter = RateLimiter::with_jitter(config(), 0.2, false, true);
        limiter.wait("example.com").await; // first call: no prior request, sleeps 0
        let started = Instant::now();
        limiter.wait("example.com").await; // gated by current_delay (0.2s) plus jitter
        let elapsed = started.elapsed().as_secs_f64();
        assert!(
            elapsed >= 0.2,
            "jittered wait slept {elapsed}s, less than current_delay 0.2s"
        );
    }
}
