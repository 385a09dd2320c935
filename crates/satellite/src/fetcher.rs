//! HTTP client abstraction (§4.3 step 5, §6). Wraps `reqwest` with the
//! per-job `timeout_seconds` and `follow_redirects` settings, and exposes
//! the hook a headless-browser capability would plug into when
//! `render_javascript` is requested. No such renderer ships with this
//! crate, so the hook always falls through to the plain HTTP path, with
//! a warning.

use async_trait::async_trait;
use core::models::CrawlConfig;
use reqwest::redirect::Policy;
use std::time::{Duration, Instant};
use tracing::warn;
use url::Url;

#[derive(Debug)]
pub struct FetchResponse {
    pub status_code: u16,
    pub body: String,
    pub content_type: String,
    pub final_url: String,
    pub latency_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
}

/// Pluggable point for a headless-browser capability. No implementation
/// ships here; satellites without one simply never have `Some(renderer)`
/// configured, and `render_javascript` requests fall back to plain HTTP.
#[async_trait]
pub trait JsRenderer: Send + Sync {
    async fn render(&self, url: &Url, proxy: Option<&str>, timeout: Duration) -> Result<FetchResponse, FetchError>;
}

pub struct Fetcher {
    client: reqwest::Client,
    renderer: Option<Box<dyn JsRenderer>>,
}

impl Fetcher {
    pub fn new(user_agent: &str, follow_redirects: bool) -> Self {
        let redirect_policy = if follow_redirects {
            Policy::limited(10)
        } else {
            Policy::none()
        };
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(redirect_policy)
            .build()
            .expect("reqwest client configuration is static and valid");
        Self {
            client,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn JsRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Fetches `url` honoring `config`'s timeout, redirect policy, and
    /// custom headers. Uses the headless-browser path when
    /// `render_javascript` is set and a renderer is configured.
    pub async fn fetch(&self, url: &Url, config: &CrawlConfig, proxy: Option<&str>) -> Result<FetchResponse, FetchError> {
        let timeout = Duration::from_secs(config.timeout_seconds);

        if config.render_javascript {
            if let Some(renderer) = &self.renderer {
                return renderer.render(url, proxy, timeout).await;
            }
            warn!(%url, "render_javascript requested but no headless-browser renderer is configured, falling back to plain HTTP");
        }

        let started = Instant::now();
        let mut request = self.client.get(url.clone()).timeout(timeout);
        for (name, value) in &config.custom_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(proxy_url) = proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                // reqwest::Client doesn't support per-request proxies, so a
                // dedicated client is built for this one fetch when a
                // proxy is in play. This trades a little setup cost for
                // keeping the common (no-proxy) path on the shared client.
                let proxied = reqwest::Client::builder()
                    .user_agent(config.user_agent.as_str())
                    .proxy(proxy)
                    .build()?;
                let mut proxied_request = proxied.get(url.clone()).timeout(timeout);
                for (name, value) in &config.custom_headers {
                    proxied_request = proxied_request.header(name.as_str(), value.as_str());
                }
                return Self::execute(proxied_request, started).await;
            }
        }

        Self::execute(request, started).await
    }

    async fn execute(request: reqwest::RequestBuilder, started: Instant) -> Result<FetchResponse, FetchError> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(err)
            }
        })?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        Ok(FetchResponse {
            status_code,
            body,
            content_type,
            final_url,
            latency_ms,
        })
    }
}
