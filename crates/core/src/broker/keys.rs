//! Broker key namespace (§6): list/sorted-set/pub-sub names, each
//! configurable via `QueueConfig` with sensible defaults.

use crate::config::QueueConfig;

#[derive(Debug, Clone)]
pub struct BrokerKeys {
    pub job_queue: String,
    pub result_queue: String,
    pub dead_letter_queue: String,
    pub scheduled_jobs: String,
    pub heartbeats: String,
}

impl BrokerKeys {
    pub fn from_config(queue: &QueueConfig) -> Self {
        Self {
            job_queue: queue.job_queue_name.clone(),
            result_queue: queue.result_queue_name.clone(),
            dead_letter_queue: queue.dead_letter_queue_name.clone(),
            scheduled_jobs: queue.scheduled_jobs_queue.clone(),
            heartbeats: queue.heartbeat_queue_sorted_name.clone(),
        }
    }

    pub fn paused_flag() -> &'static str {
        "job_processing_paused"
    }

    pub fn control_all() -> String {
        "crawler_control:all".to_string()
    }

    pub fn control_satellite(satellite_id: &str) -> String {
        format!("crawler_control:{satellite_id}")
    }

    /// Pub/sub channel satellites publish `JobStatusEvent`s on, and the
    /// Coordinator's job-status relay loop subscribes to.
    pub fn job_status_updates() -> &'static str {
        "job_status_updates"
    }
}
