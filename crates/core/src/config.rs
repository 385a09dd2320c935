use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub monitoring: MonitoringConfig,
    pub rate_limiter: RateLimiterConfig,
    pub crawler: CrawlerConfig,
    pub anti_detection: AntiDetectionConfig,
    pub proxy: ProxyConfig,
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub job_queue_name: String,
    pub result_queue_name: String,
    pub dead_letter_queue_name: String,
    pub scheduled_jobs_queue: String,
    pub heartbeat_queue_sorted_name: String,
    pub scheduler_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub crawler_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub history_size: usize,
    pub success_factor: f64,
    pub failure_factor: f64,
    pub min_delay: f64,
    pub max_delay: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub delay_seconds: f64,
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub respect_robots_txt: bool,
    pub follow_redirects: bool,
    pub render_javascript: bool,
    pub max_crawl_depth_adjustment: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiDetectionConfig {
    pub ml_rate_optimization: bool,
    pub human_like_delays: bool,
    pub request_header_randomization: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub use_proxies: bool,
    pub proxy_retry_delay_seconds: u64,
    pub max_failures_before_ban: u32,
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            redis_url: env::var("REDIS_URL")
                .map_err(|_| CoreError::Config("REDIS_URL is required".to_string()))?,
            queue: QueueConfig {
                job_queue_name: env::var("QUEUE_JOB_QUEUE_NAME")
                    .unwrap_or_else(|_| "crawl_jobs".to_string()),
                result_queue_name: env::var("QUEUE_RESULT_QUEUE_NAME")
                    .unwrap_or_else(|_| "crawl_results".to_string()),
                dead_letter_queue_name: env::var("QUEUE_DEAD_LETTER_QUEUE_NAME")
                    .unwrap_or_else(|_| "dead_letter_queue".to_string()),
                scheduled_jobs_queue: env::var("QUEUE_SCHEDULED_JOBS_QUEUE")
                    .unwrap_or_else(|_| "scheduled_crawl_jobs".to_string()),
                heartbeat_queue_sorted_name: env::var("QUEUE_HEARTBEAT_QUEUE_SORTED_NAME")
                    .unwrap_or_else(|_| "crawler_heartbeats_sorted".to_string()),
                scheduler_interval: var_or("QUEUE_SCHEDULER_INTERVAL", 5),
            },
            monitoring: MonitoringConfig {
                crawler_timeout: var_or("MONITORING_CRAWLER_TIMEOUT", 30),
            },
            rate_limiter: RateLimiterConfig {
                history_size: var_or("RATE_LIMITER_HISTORY_SIZE", 10),
                success_factor: var_or("RATE_LIMITER_SUCCESS_FACTOR", 0.9),
                failure_factor: var_or("RATE_LIMITER_FAILURE_FACTOR", 1.5),
                min_delay: var_or("RATE_LIMITER_MIN_DELAY", 0.1),
                max_delay: var_or("RATE_LIMITER_MAX_DELAY", 60.0),
            },
            crawler: CrawlerConfig {
                delay_seconds: var_or("CRAWLER_DELAY_SECONDS", 1.0),
                timeout_seconds: var_or("CRAWLER_TIMEOUT_SECONDS", 30),
                user_agent: env::var("CRAWLER_USER_AGENT")
                    .unwrap_or_else(|_| "crawl-orchestrator/0.0.1".to_string()),
                respect_robots_txt: var_or("CRAWLER_RESPECT_ROBOTS_TXT", true),
                follow_redirects: var_or("CRAWLER_FOLLOW_REDIRECTS", true),
                render_javascript: var_or("CRAWLER_RENDER_JAVASCRIPT", false),
                max_crawl_depth_adjustment: var_or("CRAWLER_MAX_CRAWL_DEPTH_ADJUSTMENT", 0),
            },
            anti_detection: AntiDetectionConfig {
                ml_rate_optimization: var_or("ANTI_DETECTION_ML_RATE_OPTIMIZATION", false),
                human_like_delays: var_or("ANTI_DETECTION_HUMAN_LIKE_DELAYS", false),
                request_header_randomization: var_or(
                    "ANTI_DETECTION_REQUEST_HEADER_RANDOMIZATION",
                    false,
                ),
            },
            proxy: ProxyConfig {
                use_proxies: var_or("PROXY_USE_PROXIES", false),
                proxy_retry_delay_seconds: var_or("PROXY_RETRY_DELAY_SECONDS", 300),
                max_failures_before_ban: var_or("PROXY_MAX_FAILURES_BEFORE_BAN", 3),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_or_falls_back_to_default_when_unset() {
        assert_eq!(var_or::<u64>("CORE_CONFIG_TEST_MISSING_VAR", 42), 42);
    }
}
