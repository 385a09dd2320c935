//! SatelliteCrawler main loop (§4.2): continuously pop jobs from the
//! work queue, run them through the crawl loop, and keep the control
//! listener and heartbeat emitter running alongside it.

use crate::control::ControlState;
use crate::crawl_loop::{self, CrawlLoopDeps};
use chrono::Utc;
use core::broker::keys::BrokerKeys;
use core::broker::Broker;
use core::control::JobStatusEvent;
use core::error::Result;
use core::job_store::JobStore;
use core::models::{Job, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const JOB_POP_TIMEOUT: Duration = Duration::from_secs(5);
const PAUSED_IDLE_SLEEP: Duration = Duration::from_secs(1);

pub struct SatelliteCrawler {
    pub satellite_id: String,
    pub broker: Broker,
    pub store: Arc<dyn JobStore>,
    pub control: Arc<ControlState>,
    pub deps_factory: Arc<dyn Fn(&Job) -> CrawlLoopDeps + Send + Sync>,
}

impl SatelliteCrawler {
    /// Runs forever: pops a job, promotes it to InProgress, hands it to
    /// the crawl loop, and repeats. Broker errors are logged and retried
    /// rather than ending the process, matching §7's "background loops
    /// never terminate on error".
    pub async fn run(&self) {
        loop {
            if self.control.is_paused() || self.job_processing_globally_paused().await {
                tokio::time::sleep(PAUSED_IDLE_SLEEP).await;
                continue;
            }

            let popped = self.broker.pop_blocking(&self.broker.keys.job_queue, JOB_POP_TIMEOUT).await;
            let payload = match popped {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(error) => {
                    warn!(%error, "broker unreachable popping job queue, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let job: Job = match serde_json::from_str(&payload) {
                Ok(job) => job,
                Err(error) => {
                    error!(%error, "failed to deserialize popped job, dropping");
                    continue;
                }
            };

            if let Err(error) = self.run_job(job).await {
                error!(%error, "crawl loop exited with error");
            }
        }
    }

    async fn job_processing_globally_paused(&self) -> bool {
        self.broker
            .is_flag_set(BrokerKeys::paused_flag())
            .await
            .unwrap_or(false)
    }

    async fn run_job(&self, job: Job) -> Result<()> {
        if !self.store.set_status(job.id, JobStatus::InProgress).await? {
            // The job vanished from the store between pop and claim; no
            // point attempting to crawl it.
            warn!(job_id = %job.id, "job disappeared from store before claiming, skipping");
            return Ok(());
        }
        info!(job_id = %job.id, satellite_id = %self.satellite_id, "satellite claimed job");
        self.broadcast_status(job.id, JobStatus::InProgress).await;

        self.heartbeat().await;
        let deps = (self.deps_factory)(&job);
        crawl_loop::run(&deps, &job).await?;
        self.heartbeat().await;
        Ok(())
    }

    /// Publishes a `JobStatusEvent` on the job-status channel so the
    /// Coordinator's relay loop can apply the transition to its own
    /// JobStore and broadcast it to dashboard subscribers — a satellite
    /// process has no direct handle to the Coordinator's Broadcaster.
    async fn broadcast_status(&self, job_id: uuid::Uuid, status: JobStatus) {
        let event = JobStatusEvent { job_id, status };
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(error) = self.broker.publish(BrokerKeys::job_status_updates(), &payload).await {
                    warn!(%error, %job_id, "failed to publish job status event");
                }
            }
            Err(error) => warn!(%error, "failed to serialize job status event"),
        }
    }

    async fn heartbeat(&self) {
        let now = Utc::now().timestamp() as f64;
        if let Err(error) = self.broker.zadd(&self.broker.keys.heartbeats, &self.satellite_id, now).await {
            warn!(%error, "heartbeat write failed");
        }
    }
}
