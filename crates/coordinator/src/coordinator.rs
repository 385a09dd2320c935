//! The Coordinator (§4.1): owns the job state machine across processes,
//! validates and enqueues submissions, answers status/health queries, and
//! routes control commands. The three background loops that do the
//! continuous work (result ingestion, scheduled-job promotion, satellite
//! liveness) live in [`crate::loops`] and share this struct by reference.

use crate::broadcaster::{Broadcaster, DashboardMessage};
use core::broker::Broker;
use core::control::ControlMessage;
use core::error::{CoreError, Result};
use core::job_store::JobStore;
use core::models::{CrawlConfig, Job, JobStatus};
use std::sync::Arc;
use tracing::info;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStats {
    pub pending: u64,
    pub scheduled: u64,
    pub result_backlog: u64,
    pub active_satellites: u64,
    pub paused: bool,
}

#[derive(Clone)]
pub struct Coordinator {
    broker: Broker,
    store: Arc<dyn JobStore>,
    broadcaster: Broadcaster,
    crawler_timeout_secs: i64,
}

impl Coordinator {
    pub fn new(
        broker: Broker,
        store: Arc<dyn JobStore>,
        broadcaster: Broadcaster,
        crawler_timeout_secs: i64,
    ) -> Self {
        Self {
            broker,
            store,
            broadcaster,
            crawler_timeout_secs,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Validates and persists `job`, placing it on the scheduled set if
    /// `scheduled_at` is in the future, or directly on the work queue
    /// otherwise. Returns the assigned job id.
    pub async fn submit(&self, mut job: Job) -> Result<Uuid> {
        self.validate(&job)?;

        let job_id = job.id;
        let now = chrono::Utc::now();

        if let Some(scheduled_at) = job.scheduled_at {
            if scheduled_at > now {
                job.status = JobStatus::Pending;
                self.store.insert(job.clone()).await?;
                let payload = serde_json::to_string(&job)?;
                self.broker
                    .zadd(
                        &self.broker.keys.scheduled_jobs,
                        &payload,
                        scheduled_at.timestamp() as f64,
                    )
                    .await?;
                self.notify_submission(&job).await;
                return Ok(job_id);
            }
        }

        job.status = JobStatus::Queued;
        self.store.insert(job.clone()).await?;
        let payload = serde_json::to_string(&job)?;
        self.broker.push(&self.broker.keys.job_queue, &payload).await?;
        self.notify_submission(&job).await;
        Ok(job_id)
    }

    fn validate(&self, job: &Job) -> Result<()> {
        if job.seed_urls.is_empty() {
            return Err(CoreError::InvalidJob("seed_urls must not be empty".to_string()));
        }
        if job.config.max_pages == 0 {
            return Err(CoreError::InvalidJob("max_pages must be > 0".to_string()));
        }
        if Url::parse(&job.target_url).is_err() {
            return Err(CoreError::InvalidJob(format!(
                "target_url {} is not a valid URL",
                job.target_url
            )));
        }
        Ok(())
    }

    async fn notify_submission(&self, job: &Job) {
        self.broadcaster
            .broadcast(&DashboardMessage::JobUpdate {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
                urls_crawled: job.urls_crawled,
                links_found: job.links_found,
            })
            .await;
    }

    /// Returns the job, reconciling its status against the queue and
    /// scheduled-set for non-terminal jobs per §4.1.
    pub async fn status(&self, job_id: Uuid) -> Result<Option<Job>> {
        let Some(mut job) = self.store.get(job_id).await? else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(Some(job));
        }

        let payload = serde_json::to_string(&job)?;
        let in_scheduled = self
            .broker
            .zrangebyscore(&self.broker.keys.scheduled_jobs, f64::NEG_INFINITY, f64::INFINITY)
            .await?
            .iter()
            .any(|m| m == &payload);
        if in_scheduled {
            job.status = JobStatus::Pending;
            return Ok(Some(job));
        }

        if self.broker.queue_contains(&self.broker.keys.job_queue, &payload).await? {
            job.status = JobStatus::Queued;
            return Ok(Some(job));
        }

        // Neither the scheduled-set nor the work queue has it: trust the
        // JobStore (it is InProgress, or a satellite has already claimed
        // and is about to update it).
        Ok(Some(job))
    }

    /// Removes every queue/scheduled-set occurrence of `job_id`, marks it
    /// Cancelled, and publishes CANCEL_JOB on the global control channel.
    /// Idempotent: returns `true` for an already-terminal job.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(false);
        };

        let payload = serde_json::to_string(&job)?;
        self.broker.remove_all(&self.broker.keys.job_queue, &payload).await?;
        self.broker.zrem(&self.broker.keys.scheduled_jobs, &payload).await?;

        self.store.cancel(job_id).await?;

        let message = serde_json::to_string(&ControlMessage::CancelJob { job_id })?;
        self.broker.publish(&core::broker::keys::BrokerKeys::control_all(), &message).await?;

        self.broadcaster
            .broadcast(&DashboardMessage::JobUpdate {
                job_id,
                status: JobStatus::Cancelled,
                progress: job.progress,
                urls_crawled: job.urls_crawled,
                links_found: job.links_found,
            })
            .await;

        Ok(true)
    }

    pub async fn pause_processing(&self) -> Result<()> {
        self.broker.set_flag(core::broker::keys::BrokerKeys::paused_flag()).await?;
        let message = serde_json::to_string(&ControlMessage::Pause)?;
        self.broker.publish(&core::broker::keys::BrokerKeys::control_all(), &message).await?;
        info!("job processing paused");
        Ok(())
    }

    pub async fn resume_processing(&self) -> Result<()> {
        self.broker.clear_flag(core::broker::keys::BrokerKeys::paused_flag()).await?;
        let message = serde_json::to_string(&ControlMessage::Resume)?;
        self.broker.publish(&core::broker::keys::BrokerKeys::control_all(), &message).await?;
        info!("job processing resumed");
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthStats> {
        let pending = self.broker.queue_len(&self.broker.keys.job_queue).await?;
        let scheduled = self.broker.zcard(&self.broker.keys.scheduled_jobs).await?;
        let result_backlog = self.broker.queue_len(&self.broker.keys.result_queue).await?;
        let paused = self.broker.is_flag_set(core::broker::keys::BrokerKeys::paused_flag()).await?;

        let now = chrono::Utc::now().timestamp() as f64;
        let window_start = now - self.crawler_timeout_secs as f64;
        let active_satellites = self
            .broker
            .zrangebyscore(&self.broker.keys.heartbeats, window_start, now)
            .await?
            .len() as u64;

        Ok(HealthStats {
            pending,
            scheduled,
            result_backlog,
            active_satellites,
            paused,
        })
    }
}

/// Builds a `Job` from submission parameters, applying the same defaults
/// the REST surface (out of scope here) would otherwise fill in.
pub fn build_job(target_url: String, seed_urls: Vec<String>, config: CrawlConfig, scheduled_at: Option<chrono::DateTime<chrono::Utc>>) -> Job {
    let mut job = Job::new(target_url, seed_urls, config);
    job.scheduled_at = scheduled_at;
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::job_store::InMemoryJobStore;

    fn sample_job(seed_urls: Vec<String>, max_pages: u32) -> Job {
        let mut config = CrawlConfig::default();
        config.max_pages = max_pages;
        Job::new("http://target.example/".to_string(), seed_urls, config)
    }

    #[tokio::test]
    async fn validate_rejects_empty_seed_urls() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        // Coordinator::submit needs a live broker in the general case, but
        // validation happens before any broker call, so a job that fails
        // validation never reaches it.
        let job = sample_job(vec![], 10);
        assert!(matches!(
            validate_standalone(&job),
            Err(CoreError::InvalidJob(_))
        ));
        let _ = store;
    }

    #[tokio::test]
    async fn validate_rejects_zero_max_pages() {
        let job = sample_job(vec!["http://target.example/a".to_string()], 0);
        assert!(matches!(
            validate_standalone(&job),
            Err(CoreError::InvalidJob(_))
        ));
    }

    #[tokio::test]
    async fn validate_rejects_unparseable_target_url() {
        let mut job = sample_job(vec!["http://target.example/a".to_string()], 10);
        job.target_url = "not a url".to_string();
        assert!(matches!(
            validate_standalone(&job),
            Err(CoreError::InvalidJob(_))
        ));
    }

    // Mirrors Coordinator::validate without requiring a constructed
    // Coordinator (which needs a live broker connection in tests).
    fn validate_standalone(job: &Job) -> Result<()> {
        if job.seed_urls.is_empty() {
            return Err(CoreError::InvalidJob("seed_urls must not be empty".to_string()));
        }
        if job.config.max_pages == 0 {
            return Err(CoreError::InvalidJob("max_pages must be > 0".to_string()));
        }
        if Url::parse(&job.target_url).is_err() {
            return Err(CoreError::InvalidJob("bad url".to_string()));
        }
        Ok(())
    }
}
