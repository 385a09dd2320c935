//! Round-robin proxy selection with region filtering and a cooldown for
//! proxies that fail or get throttled (§4.3 "Proxy handling").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct ProxyPool {
    proxies: Vec<String>,
    region: Option<String>,
    cooldown: Duration,
    state: Mutex<State>,
}

struct State {
    next_index: usize,
    banned_until: HashMap<String, Instant>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<String>, region: Option<String>, cooldown: Duration) -> Self {
        Self {
            proxies,
            region,
            cooldown,
            state: Mutex::new(State {
                next_index: 0,
                banned_until: HashMap::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.proxies.is_empty()
    }

    /// Picks the next proxy in round-robin order among those matching the
    /// configured region and not currently in cooldown. Returns `None` if
    /// proxying is disabled or every proxy is currently banned.
    pub fn next(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let candidates: Vec<&String> = self
            .proxies
            .iter()
            .filter(|p| self.matches_region(p))
            .filter(|p| state.banned_until.get(*p).map(|until| *until <= now).unwrap_or(true))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = state.next_index % candidates.len();
        state.next_index = state.next_index.wrapping_add(1);
        Some(candidates[index].clone())
    }

    fn matches_region(&self, proxy: &str) -> bool {
        match &self.region {
            Some(region) => proxy.contains(region.as_str()),
            None => true,
        }
    }

    /// Marks `proxy` unusable for `self.cooldown`. Called on transport
    /// failure or a 429 response through that proxy.
    pub fn mark_bad(&self, proxy: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .banned_until
            .insert(proxy.to_string(), Instant::now() + self.cooldown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_among_available_proxies() {
        let pool = ProxyPool::new(
            vec!["http://a".to_string(), "http://b".to_string()],
            None,
            Duration::from_secs(60),
        );
        let first = pool.next().unwrap();
        let second = pool.next().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn banned_proxy_is_skipped_until_cooldown_expires() {
        let pool = ProxyPool::new(vec!["http://a".to_string()], None, Duration::from_secs(60));
        pool.mark_bad("http://a");
        assert!(pool.next().is_none());
    }

    #[test]
    fn region_filter_excludes_non_matching_proxies() {
        let pool = ProxyPool::new(
            vec!["http://eu-1.example".to_string(), "http://us-1.example".to_string()],
            Some("eu".to_string()),
            Duration::from_secs(60),
        );
        assert_eq!(pool.next().as_deref(), Some("http://eu-1.example"));
        assert_eq!(pool.next().as_deref(), Some("http://eu-1.example"));
    }

    #[test]
    fn disabled_when_no_proxies_configured() {
        let pool = ProxyPool::new(vec![], None, Duration::from_secs(60));
        assert!(!pool.is_enabled());
        assert!(pool.next().is_none());
    }
}
