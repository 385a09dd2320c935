//! The per-job crawl loop (§4.3): pop a URL from the frontier, gate it
//! through host policy and the rate limiter, fetch it, extract links and
//! metrics, and repeat until the frontier is empty, `max_pages` is hit,
//! or the job is paused/stopped/cancelled.

use crate::control::ControlState;
use crate::fetcher::{FetchError, Fetcher};
use crate::frontier::Frontier;
use crate::proxy::ProxyPool;
use chrono::Utc;
use core::broker::Broker;
use core::content_parser::ContentParser;
use core::error::Result as CoreResult;
use core::job_store::JobStore;
use core::link_extractor::LinkExtractor;
use core::models::{CrawlConfig, CrawlResult, Job, JobStatus};
use core::rate_limiter::{FetchOutcome, RateLimiter};
use core::robots::RobotsCache;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEARTBEAT_URL_INTERVAL: u32 = 10;

pub struct CrawlLoopDeps {
    pub broker: Broker,
    pub store: Arc<dyn JobStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub robots: Arc<RobotsCache>,
    pub link_extractor: Arc<LinkExtractor>,
    pub content_parser: Arc<ContentParser>,
    pub fetcher: Arc<Fetcher>,
    pub control: Arc<ControlState>,
    pub satellite_id: String,
}

/// Host component of `target_url`, lowercased. Empty if unparseable;
/// every link then simply fails the backlink predicate below.
fn target_host(target_url: &str) -> String {
    Url::parse(target_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

/// A discovered link counts as a backlink (§4.3 "Target identification")
/// if its target equals `job.target_url` verbatim, or its host equals or
/// is a subdomain of the job's target host.
fn is_backlink(link_target: &str, job_target_url: &str, target_host: &str) -> bool {
    if target_host.is_empty() {
        return false;
    }
    if link_target == job_target_url {
        return true;
    }
    match Url::parse(link_target).ok().and_then(|u| u.host_str().map(|h| h.to_lowercase())) {
        Some(host) => host == target_host || host.ends_with(&format!(".{target_host}")),
        None => false,
    }
}

/// Runs the crawl loop for `job` to completion, pushing every
/// intermediate and the final CrawlResult onto the result queue as they
/// are produced. Returns once the job terminates for any reason in §4.3
/// "Termination".
pub async fn run(deps: &CrawlLoopDeps, job: &Job) -> CoreResult<()> {
    let config = &job.config;
    let proxy_pool = ProxyPool::new(
        config.proxy_list.clone(),
        config.proxy_region.clone(),
        Duration::from_secs(300),
    );
    let target_host = target_host(&job.target_url);
    let mut frontier = Frontier::seeded(&job.seed_urls);
    let mut urls_since_heartbeat: u32 = 0;

    loop {
        // Per-iteration contract step 1: the cancellation point.
        match wait_while_paused(deps, job.id).await {
            ControlOutcome::Continue => {}
            ControlOutcome::Stop => break,
        }

        let Some((url, depth)) = frontier.pop() else {
            break;
        };
        if frontier.visited.contains(&url) || depth >= config.max_depth {
            continue;
        }
        frontier.mark_visited(&url);

        let Ok(parsed_url) = Url::parse(&url) else {
            frontier.mark_failed(&url);
            continue;
        };
        let host = parsed_url.host_str().unwrap_or("").to_string();

        if let Some(denial) = host_policy_denial(deps, config, &parsed_url, job.id, &url).await {
            push_result(deps, &denial).await;
            frontier.mark_failed(&url);
            continue;
        }

        deps.rate_limiter.wait(&host).await;

        let proxy = proxy_pool.next();
        let fetch_started = Utc::now();
        let fetch_result = deps.fetcher.fetch(&parsed_url, config, proxy.as_deref()).await;

        let result = match fetch_result {
            Ok(response) => {
                deps.rate_limiter.record_outcome_for(
                    &host,
                    FetchOutcome::success(response.latency_ms, response.status_code),
                );
                if response.status_code == 429 {
                    if let Some(proxy) = &proxy {
                        proxy_pool.mark_bad(proxy);
                    }
                }
                frontier.record_response(&host, response.status_code, response.latency_ms);

                let mut links = Vec::new();
                let mut seo_metrics = None;
                let mut anomaly_flags = deps.content_parser.detect_anomalies(&response.body);
                if response.content_type.contains("text/html") {
                    let document = Html::parse_document(&response.body);
                    links = deps.link_extractor.extract_links(&document, &response.final_url);
                    for link in &mut links {
                        link.http_status = Some(response.status_code);
                    }
                    seo_metrics = Some(deps.content_parser.parse(&document, &response.final_url));
                } else {
                    // Thin/bot-block detection only makes sense for pages
                    // meant to carry readable content.
                    anomaly_flags.clear();
                }

                frontier.total_links_found += links.len() as u32;
                let target_links: Vec<_> = links
                    .iter()
                    .filter(|l| is_backlink(&l.target_url, &job.target_url, &target_host))
                    .cloned()
                    .collect();
                frontier.backlinks_found += target_links.len() as u32;

                for link in &links {
                    if config.is_domain_allowed(
                        Url::parse(&link.target_url)
                            .ok()
                            .and_then(|u| u.host_str().map(str::to_string))
                            .unwrap_or_default()
                            .as_str(),
                    ) {
                        frontier.enqueue(link.target_url.clone(), depth + 1, config.max_pages);
                    }
                }

                CrawlResult {
                    job_id: job.id,
                    url: url.clone(),
                    status_code: response.status_code,
                    content_type: response.content_type,
                    crawl_time_ms: response.latency_ms,
                    links_found: target_links,
                    seo_metrics,
                    error_message: None,
                    anomaly_flags,
                    crawl_timestamp: fetch_started,
                    is_final_summary: false,
                    errors: Vec::new(),
                    stats: None,
                }
            }
            Err(FetchError::Timeout) => {
                deps.rate_limiter.record_outcome_for(&host, FetchOutcome::timeout());
                frontier.mark_failed(&url);
                frontier.record_response(&host, 408, 0);
                synthetic_result(job.id, &url, 408, "request timed out")
            }
            Err(FetchError::Transport(error)) => {
                if let Some(proxy) = &proxy {
                    proxy_pool.mark_bad(proxy);
                }
                deps.rate_limiter.record_outcome_for(&host, FetchOutcome::transport_error());
                frontier.mark_failed(&url);
                frontier.record_response(&host, 0, 0);
                synthetic_result(job.id, &url, 0, &format!("transport error: {error}"))
            }
        };

        // Step 7: links_found on this result already carries only the
        // target-matching subset, so it's safe to always emit it.
        push_result(deps, &result).await;

        urls_since_heartbeat += 1;
        if urls_since_heartbeat >= HEARTBEAT_URL_INTERVAL {
            heartbeat(deps).await;
            urls_since_heartbeat = 0;
        }

        if frontier.pages_crawled >= config.max_pages {
            break;
        }
    }

    let stats = frontier.into_stats();
    let final_result = CrawlResult {
        job_id: job.id,
        url: job.target_url.clone(),
        status_code: 200,
        content_type: String::new(),
        crawl_time_ms: 0,
        links_found: Vec::new(),
        seo_metrics: None,
        error_message: None,
        anomaly_flags: Default::default(),
        crawl_timestamp: Utc::now(),
        is_final_summary: true,
        errors: Vec::new(),
        stats: Some(stats),
    };
    push_result(deps, &final_result).await;
    deps.control.forget(job.id);
    Ok(())
}

enum ControlOutcome {
    Continue,
    Stop,
}

/// Polls JobStore status while Paused, and observes CANCEL_JOB / a
/// Stopped|Cancelled status as the loop's single cancellation point.
async fn wait_while_paused(deps: &CrawlLoopDeps, job_id: Uuid) -> ControlOutcome {
    loop {
        if deps.control.is_cancelled(job_id) {
            return ControlOutcome::Stop;
        }
        match deps.store.get(job_id).await {
            Ok(Some(job)) => match job.status {
                JobStatus::Stopped | JobStatus::Cancelled => return ControlOutcome::Stop,
                JobStatus::Paused => {
                    sleep(PAUSE_POLL_INTERVAL).await;
                    continue;
                }
                _ => return ControlOutcome::Continue,
            },
            Ok(None) => return ControlOutcome::Stop,
            Err(error) => {
                warn!(%error, "job store unreachable while polling pause state, retrying");
                sleep(PAUSE_POLL_INTERVAL).await;
            }
        }
    }
}

/// Step 3 of §4.3: `allowed_domains` and robots.txt gates. Returns a
/// synthetic-denial CrawlResult when either refuses the fetch.
async fn host_policy_denial(
    deps: &CrawlLoopDeps,
    config: &CrawlConfig,
    url: &Url,
    job_id: Uuid,
    raw_url: &str,
) -> Option<CrawlResult> {
    let host = url.host_str().unwrap_or("");
    if !config.is_domain_allowed(host) {
        return Some(synthetic_result(job_id, raw_url, 403, "Domain not allowed by config"));
    }
    if config.respect_robots_txt && !deps.robots.can_fetch(url, &config.user_agent).await {
        return Some(synthetic_result(job_id, raw_url, 403, "Blocked by robots.txt rules"));
    }
    None
}

fn synthetic_result(job_id: Uuid, url: &str, status_code: u16, message: &str) -> CrawlResult {
    CrawlResult::synthetic_denial(job_id, url.to_string(), status_code, message)
}

async fn push_result(deps: &CrawlLoopDeps, result: &CrawlResult) {
    match serde_json::to_string(result) {
        Ok(payload) => {
            if let Err(error) = deps.broker.push(&deps.broker.keys.result_queue, &payload).await {
                warn!(%error, url = %result.url, "failed to push crawl result, dropping");
            }
        }
        Err(error) => warn!(%error, "failed to serialize crawl result"),
    }
}

async fn heartbeat(deps: &CrawlLoopDeps) {
    let now = Utc::now().timestamp() as f64;
    if let Err(error) = deps.broker.zadd(&deps.broker.keys.heartbeats, &deps.satellite_id, now).await {
        debug!(%error, "heartbeat write failed, will retry next interval");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlink_matches_exact_target_url() {
        assert!(is_backlink("http://t.example/", "http://t.example/", "t.example"));
    }

    #[test]
    fn backlink_matches_subdomain_of_target_host() {
        assert!(is_backlink("http://blog.t.example/post", "http://t.example/", "t.example"));
    }

    #[test]
    fn backlink_rejects_unrelated_host() {
        assert!(!is_backlink("http://other.example/", "http://t.example/", "t.example"));
    }

    #[test]
    fn backlink_rejects_host_that_merely_contains_target_as_suffix_string() {
        // "eviltarget.example" ends with "target.example" as a string but
        // is not a subdomain of it; the dot-prefixed suffix check must
        // reject this.
        assert!(!is_backlink(
            "http://eviltarget.example/",
            "http://target.example/",
            "target.example"
        ));
    }
}
