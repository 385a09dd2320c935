//! Per-host robots.txt cache (§4.7). Fetches and parses `/robots.txt` once
//! per host per TTL, fails open (permissive) on any network or parse
//! failure so a single flaky host never stalls the crawl, and logs a
//! warning when it does.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Default)]
struct RobotsRules {
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl RobotsRules {
    fn permissive() -> Self {
        Self::default()
    }

    /// Longest matching rule wins; an Allow and Disallow of equal length
    /// resolves to Allow, matching the common robots.txt convention.
    fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| -> Option<usize> {
            patterns
                .iter()
                .filter(|p| !p.is_empty() && path.starts_with(p.as_str()))
                .map(|p| p.len())
                .max()
        };
        match (longest(&self.allow), longest(&self.disallow)) {
            (Some(a), Some(d)) => a >= d,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => true,
        }
    }
}

struct CacheEntry {
    fetched_at: Instant,
    rules: RobotsRules,
}

pub struct RobotsCache {
    client: reqwest::Client,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `user_agent` may fetch `url` per the host's robots.txt.
    /// Malformed URLs and hosts we fail to reach are treated as allowed.
    pub async fn can_fetch(&self, url: &Url, user_agent: &str) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };
        let key = format!("{}://{}:{}", url.scheme(), host, url.port_or_known_default().unwrap_or(0));

        if let Some(entry) = self.entries.read().await.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.rules.is_allowed(url.path());
            }
        }

        let rules = self.fetch_rules(url, &key, user_agent).await;
        let allowed = rules.is_allowed(url.path());
        self.entries.write().await.insert(
            key,
            CacheEntry {
                fetched_at: Instant::now(),
                rules,
            },
        );
        allowed
    }

    async fn fetch_rules(&self, url: &Url, host_key: &str, user_agent: &str) -> RobotsRules {
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);

        match self.client.get(robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => parse_robots_txt(&body, user_agent),
                Err(error) => {
                    warn!(host = host_key, %error, "failed to read robots.txt body, failing open");
                    RobotsRules::permissive()
                }
            },
            // 404 and similar mean "no restrictions published".
            Ok(_) => RobotsRules::permissive(),
            Err(error) => {
                warn!(host = host_key, %error, "failed to fetch robots.txt, failing open");
                RobotsRules::permissive()
            }
        }
    }
}

struct Group {
    agents: Vec<String>,
    rules: Vec<(bool, String)>,
}

fn parse_robots_txt(body: &str, user_agent: &str) -> RobotsRules {
    let mut groups: Vec<Group> = Vec::new();
    let mut current: Option<Group> = None;

    for raw_line in body.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_lowercase().as_str() {
            "user-agent" => match &mut current {
                Some(group) if !group.rules.is_empty() => {
                    groups.push(current.take().unwrap());
                    current = Some(Group {
                        agents: vec![value.to_lowercase()],
                        rules: Vec::new(),
                    });
                }
                Some(group) => group.agents.push(value.to_lowercase()),
                None => {
                    current = Some(Group {
                        agents: vec![value.to_lowercase()],
                        rules: Vec::new(),
                    })
                }
            },
            "allow" => {
                if let Some(group) = &mut current {
                    group.rules.push((true, value));
                }
            }
            "disallow" => {
                if let Some(group) = &mut current {
                    group.rules.push((false, value));
                }
            }
            _ => {}
        }
    }
    if let Some(group) = current.take() {
        groups.push(group);
    }

    let ua_lower = user_agent.to_lowercase();
    let chosen = groups
        .iter()
        .find(|g| g.agents.iter().any(|a| a != "*" && ua_lower.contains(a.as_str())))
        .or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

    match chosen {
        Some(group) => {
            let mut rules = RobotsRules::default();
            for (allow, pattern) in &group.rules {
                if *allow {
                    rules.allow.push(pattern.clone());
                } else {
                    rules.disallow.push(pattern.clone());
                }
            }
            rules
        }
        None => RobotsRules::permissive(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallow_all_blocks_every_path() {
        let body = "User-agent: *\nDisallow: /\n";
        let rules = parse_robots_txt(body, "crawl-orchestrator/0.0.1");
        assert!(!rules.is_allowed("/anything"));
    }

    #[test]
    fn allow_overrides_longer_disallow_when_equal_length() {
        let body = "User-agent: *\nDisallow: /private\nAllow: /private\n";
        let rules = parse_robots_txt(body, "crawl-orchestrator/0.0.1");
        assert!(rules.is_allowed("/private"));
    }

    #[test]
    fn more_specific_allow_wins_over_shorter_disallow() {
        let body = "User-agent: *\nDisallow: /private\nAllow: /private/public\n";
        let rules = parse_robots_txt(body, "crawl-orchestrator/0.0.1");
        assert!(rules.is_allowed("/private/public/page"));
        assert!(!rules.is_allowed("/private/secret"));
    }

    #[test]
    fn specific_user_agent_group_takes_precedence_over_wildcard() {
        let body = "User-agent: *\nDisallow: /\n\nUser-agent: crawl-orchestrator\nDisallow:\n";
        let rules = parse_robots_txt(body, "crawl-orchestrator/0.0.1");
        assert!(rules.is_allowed("/anything"));
    }

    #[test]
    fn missing_robots_txt_is_permissive() {
        let rules = RobotsRules::permissive();
        assert!(rules.is_allowed("/anything"));
    }
}
