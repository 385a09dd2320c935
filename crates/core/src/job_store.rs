//! JobStore is an external collaborator per the system's scope boundary:
//! the durable record of jobs, errors and terminal results. This module
//! defines the trait the Coordinator and SatelliteCrawler depend on, plus
//! an in-memory implementation suitable for running either standalone
//! and for tests. A SQL-backed implementation is an integration point
//! left to the deployment, not invented here.

use crate::error::Result;
use crate::models::{CrawlError, CrawlResult, Job, JobStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<()>;
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;
    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<bool>;

    /// Merges an ingested CrawlResult into the job it belongs to, per the
    /// ResultIngestLoop's field-merge rule. Returns `false` if the job is
    /// unknown (the caller is expected to dead-letter the payload).
    async fn apply_result(&self, result: &CrawlResult) -> Result<bool>;

    /// Idempotent cancel: returns true iff the job existed, regardless of
    /// whether it was already terminal.
    async fn cancel(&self, job_id: Uuid) -> Result<bool>;
}

#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) => {
                // A satellite must never resurrect a terminal job; the
                // Coordinator may still transition a non-terminal job
                // freely (e.g. Queued -> InProgress -> terminal).
                if job.status.is_terminal() && status != job.status {
                    return Ok(true);
                }
                job.status = status;
                if status.is_terminal() {
                    job.completed_at = Some(Utc::now());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_result(&self, result: &CrawlResult) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&result.job_id) else {
            return Ok(false);
        };

        job.links_found += result.links_found.len() as u32;
        job.error_log.extend(result.errors.clone());
        if let Some(message) = &result.error_message {
            job.add_error(CrawlError {
                timestamp: result.crawl_timestamp,
                url: result.url.clone(),
                error_type: "CrawlError".to_string(),
                message: message.clone(),
                details: None,
            });
        }

        if result.is_final_summary {
            if let Some(stats) = &result.stats {
                job.urls_crawled = stats.pages_crawled;
                job.links_found = stats.total_links_found;
            }
            if !job.status.is_terminal() {
                job.status = JobStatus::Completed;
            }
            job.completed_at = Some(Utc::now());
            job.progress = 100;
        } else {
            job.urls_crawled += 1;
            if !job.status.is_terminal() {
                job.status = JobStatus::InProgress;
            }
            let max_pages = job.config.max_pages.max(1) as f64;
            job.progress = ((job.urls_crawled as f64 / max_pages) * 100.0).min(100.0) as u8;
        }

        Ok(true)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlConfig;

    fn sample_job() -> Job {
        Job::new(
            "http://target.example/".to_string(),
            vec!["http://target.example/seed".to_string()],
            CrawlConfig::default(),
        )
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let store = InMemoryJobStore::new();
        let job = sample_job();
        let id = job.id;
        store.insert(job).await.unwrap();

        assert!(store.cancel(id).await.unwrap());
        assert!(store.cancel(id).await.unwrap());
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_job_returns_false() {
        let store = InMemoryJobStore::new();
        assert!(!store.cancel(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn apply_result_unknown_job_returns_false() {
        let store = InMemoryJobStore::new();
        let result = CrawlResult::synthetic_denial(Uuid::new_v4(), "http://x".into(), 403, "nope");
        assert!(!store.apply_result(&result).await.unwrap());
    }

    #[tokio::test]
    async fn apply_result_final_summary_marks_completed() {
        let store = InMemoryJobStore::new();
        let job = sample_job();
        let id = job.id;
        store.insert(job).await.unwrap();

        let mut result =
            CrawlResult::synthetic_denial(id, "http://target.example/".into(), 200, "");
        result.error_message = None;
        result.is_final_summary = true;
        store.apply_result(&result).await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn set_status_does_not_resurrect_terminal_job() {
        let store = InMemoryJobStore::new();
        let job = sample_job();
        let id = job.id;
        store.insert(job).await.unwrap();
        store.cancel(id).await.unwrap();

        store.set_status(id, JobStatus::InProgress).await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
