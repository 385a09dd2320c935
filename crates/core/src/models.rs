use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Lifecycle state of a crawl job. Terminal states are absorbing: once a
/// job reaches Completed, Failed or Cancelled it never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    InProgress,
    Paused,
    Stopped,
    Cancelled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Per-job crawl parameters, attached at submit and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub max_pages: u32,
    pub max_depth: u32,
    pub delay_seconds: f64,
    pub respect_robots_txt: bool,
    pub follow_redirects: bool,
    pub render_javascript: bool,
    pub user_agent: String,
    pub user_agent_rotation: bool,
    /// Empty means any domain is allowed.
    pub allowed_domains: HashSet<String>,
    pub custom_headers: HashMap<String, String>,
    pub proxy_list: Vec<String>,
    pub proxy_region: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_depth: 3,
            delay_seconds: 1.0,
            respect_robots_txt: true,
            follow_redirects: true,
            render_javascript: false,
            user_agent: "crawl-orchestrator/0.0.1".to_string(),
            user_agent_rotation: false,
            allowed_domains: HashSet::new(),
            custom_headers: HashMap::new(),
            proxy_list: Vec::new(),
            proxy_region: None,
            timeout_seconds: 30,
        }
    }
}

impl CrawlConfig {
    pub fn is_domain_allowed(&self, host: &str) -> bool {
        self.allowed_domains.is_empty() || self.allowed_domains.contains(host)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlError {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub error_type: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

/// A crawl job as tracked by the Coordinator and JobStore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub target_url: String,
    pub seed_urls: Vec<String>,
    pub config: CrawlConfig,
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub urls_crawled: u32,
    pub links_found: u32,
    pub error_log: Vec<CrawlError>,
}

impl Job {
    /// Builds a new job in the state appropriate for its `scheduled_at`:
    /// Pending if scheduled in the future, Queued otherwise. Does not
    /// validate; see `Coordinator::submit` for the validation rules.
    pub fn new(target_url: String, seed_urls: Vec<String>, config: CrawlConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            target_url,
            seed_urls,
            config,
            status: JobStatus::Queued,
            scheduled_at: None,
            created_at: now,
            completed_at: None,
            progress: 0,
            urls_crawled: 0,
            links_found: 0,
            error_log: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: CrawlError) {
        self.error_log.push(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Follow,
    NoFollow,
    Sponsored,
    Ugc,
    Canonical,
    Redirect,
}

impl LinkType {
    /// Derives the link type from `rel` attributes using the precedence
    /// sponsored > ugc > nofollow > canonical > redirect > follow.
    pub fn from_rel_attributes(rel_attributes: &[String]) -> Self {
        let has = |value: &str| rel_attributes.iter().any(|r| r == value);
        if has("sponsored") {
            LinkType::Sponsored
        } else if has("ugc") {
            LinkType::Ugc
        } else if has("nofollow") {
            LinkType::NoFollow
        } else if has("canonical") {
            LinkType::Canonical
        } else if has("redirect") {
            LinkType::Redirect
        } else {
            LinkType::Follow
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: Uuid,
    pub source_url: String,
    pub target_url: String,
    pub anchor_text: String,
    pub rel_attributes: Vec<String>,
    pub link_type: LinkType,
    pub context_text: String,
    pub http_status: Option<u16>,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeoMetrics {
    pub url: String,
    pub title_length: Option<usize>,
    pub meta_description_length: Option<usize>,
    pub h1_count: u32,
    pub h2_count: u32,
    pub internal_links: u32,
    pub external_links: u32,
    pub images_count: u32,
    pub images_without_alt: u32,
    pub has_canonical: bool,
    pub has_robots_meta: bool,
    pub has_schema_markup: bool,
    pub structured_data_types: Vec<String>,
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub twitter_title: Option<String>,
    pub twitter_description: Option<String>,
    pub mobile_friendly: bool,
    pub page_size_bytes: Option<u64>,
    pub http_status: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub issues: Vec<String>,
    pub audit_timestamp: DateTime<Utc>,
}

impl SeoMetrics {
    pub fn new(url: String) -> Self {
        Self {
            url,
            audit_timestamp: Utc::now(),
            ..Default::default()
        }
    }
}

/// Aggregate statistics carried by the final summary CrawlResult.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_crawled: u32,
    pub total_links_found: u32,
    pub backlinks_found: u32,
    pub failed_urls_count: u32,
    pub domains_visited_count: u32,
    pub avg_response_time_ms: f64,
    pub status_code_distribution: HashMap<u16, u32>,
    pub crawl_duration_seconds: f64,
}

/// The result of crawling a single URL, or the final aggregate summary
/// for a job (`is_final_summary = true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub job_id: Uuid,
    pub url: String,
    pub status_code: u16,
    pub content_type: String,
    pub crawl_time_ms: u64,
    pub links_found: Vec<Link>,
    pub seo_metrics: Option<SeoMetrics>,
    pub error_message: Option<String>,
    pub anomaly_flags: HashSet<String>,
    pub crawl_timestamp: DateTime<Utc>,
    pub is_final_summary: bool,
    #[serde(default)]
    pub errors: Vec<CrawlError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CrawlStats>,
}

impl CrawlResult {
    pub fn synthetic_denial(job_id: Uuid, url: String, status_code: u16, message: &str) -> Self {
        Self {
            job_id,
            url,
            status_code,
            content_type: String::new(),
            crawl_time_ms: 0,
            links_found: Vec::new(),
            seo_metrics: None,
            error_message: Some(message.to_string()),
            anomaly_flags: HashSet::new(),
            crawl_timestamp: Utc::now(),
            is_final_summary: false,
            errors: Vec::new(),
            stats: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostProfile {
    pub host: String,
    pub current_delay: f64,
    pub history: std::collections::VecDeque<(u16, u64)>,
    pub last_request_at: Option<std::time::Instant>,
}

impl HostProfile {
    pub fn new(host: String, initial_delay: f64) -> Self {
        Self {
            host,
            current_delay: initial_delay,
            history: std::collections::VecDeque::new(),
            last_request_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteLiveness {
    pub satellite_id: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl SatelliteLiveness {
    pub fn is_active(&self, crawler_timeout_secs: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() < crawler_timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_type_precedence_sponsored_wins_over_everything() {
        let rels = vec!["ugc".to_string(), "sponsored".to_string(), "nofollow".to_string()];
        assert_eq!(LinkType::from_rel_attributes(&rels), LinkType::Sponsored);
    }

    #[test]
    fn link_type_precedence_ugc_over_nofollow() {
        let rels = vec!["nofollow".to_string(), "ugc".to_string()];
        assert_eq!(LinkType::from_rel_attributes(&rels), LinkType::Ugc);
    }

    #[test]
    fn link_type_defaults_to_follow() {
        assert_eq!(LinkType::from_rel_attributes(&[]), LinkType::Follow);
    }

    #[test]
    fn crawl_config_allows_any_domain_when_empty() {
        let config = CrawlConfig::default();
        assert!(config.is_domain_allowed("anything.example"));
    }

    #[test]
    fn crawl_config_restricts_to_allowed_domains() {
        let mut config = CrawlConfig::default();
        config.allowed_domains.insert("example.com".to_string());
        assert!(config.is_domain_allowed("example.com"));
        assert!(!config.is_domain_allowed("other.com"));
    }

    #[test]
    fn satellite_liveness_expires_after_timeout() {
        let stale = SatelliteLiveness {
            satellite_id: "sat-1".to_string(),
            last_heartbeat: Utc::now() - chrono::Duration::seconds(120),
        };
        assert!(!stale.is_active(30));
    }
}
