//! The background loops described in §4.1: result ingestion,
//! scheduled-job promotion, satellite liveness monitoring, and the
//! job-status relay that closes the loop on §4.2 step 3's "Set
//! Job.status=InProgress in JobStore; broadcast." Each is independently
//! resilient to broker outages (exponential backoff, never terminating
//! the process) and stops only when its shutdown signal fires, checked
//! once per iteration so cancellation unwinds within one poll interval
//! per §5.

use crate::broadcaster::DashboardMessage;
use crate::coordinator::Coordinator;
use core::broker::keys::BrokerKeys;
use core::control::JobStatusEvent;
use core::error::CoreError;
use core::models::{CrawlResult, Job, JobStatus};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RESULT_POP_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Sleeps with exponential backoff, doubling `current` each call up to
/// `BACKOFF_MAX`, and returns the delay actually used.
async fn backoff(current: &mut Duration) {
    sleep(*current).await;
    *current = (*current * 2).min(BACKOFF_MAX);
}

/// Consumes `crawl_results`, merging each payload into the JobStore and
/// broadcasting `job_update`. Unknown jobs and malformed payloads are
/// dead-lettered rather than dropped.
pub async fn result_ingest_loop(coordinator: Coordinator, shutdown: CancellationToken) {
    let mut backoff_delay = BACKOFF_INITIAL;
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let popped = tokio::select! {
            popped = coordinator.broker().pop_blocking(&coordinator.broker().keys.result_queue, RESULT_POP_TIMEOUT) => popped,
            _ = shutdown.cancelled() => return,
        };

        let payload = match popped {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(CoreError::Broker(err)) => {
                warn!(error = %err, "broker unreachable in result ingest loop, retrying");
                backoff(&mut backoff_delay).await;
                continue;
            }
            Err(err) => {
                error!(error = %err, "unexpected error popping result queue");
                backoff(&mut backoff_delay).await;
                continue;
            }
        };
        backoff_delay = BACKOFF_INITIAL;

        if let Err(err) = ingest_one(&coordinator, &payload).await {
            error!(error = %err, "failed to dead-letter malformed or unknown result");
        }
    }
}

async fn ingest_one(coordinator: &Coordinator, payload: &str) -> core::error::Result<()> {
    let result: CrawlResult = match serde_json::from_str(payload) {
        Ok(result) => result,
        Err(err) => {
            warn!(error = %err, "malformed crawl result payload, dead-lettering");
            coordinator
                .broker()
                .push(&coordinator.broker().keys.dead_letter_queue, payload)
                .await?;
            return Ok(());
        }
    };

    let applied = coordinator.store().apply_result(&result).await?;
    if !applied {
        warn!(job_id = %result.job_id, "result references unknown job, dead-lettering");
        coordinator
            .broker()
            .push(&coordinator.broker().keys.dead_letter_queue, payload)
            .await?;
        return Ok(());
    }

    if let Some(job) = coordinator.store().get(result.job_id).await? {
        coordinator
            .broadcaster()
            .broadcast(&DashboardMessage::JobUpdate {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
                urls_crawled: job.urls_crawled,
                links_found: job.links_found,
            })
            .await;
    }

    Ok(())
}

/// Every `interval`, sweeps `scheduled_crawl_jobs` for entries due (score
/// <= now) and promotes them onto `crawl_jobs`, earliest `scheduled_at`
/// first, via a single atomic pipeline per entry.
pub async fn scheduler_promotion_loop(
    coordinator: Coordinator,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut backoff_delay = BACKOFF_INITIAL;
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.cancelled() => return,
        }

        match promote_due_jobs(&coordinator).await {
            Ok(promoted) => {
                backoff_delay = BACKOFF_INITIAL;
                if promoted > 0 {
                    info!(promoted, "promoted scheduled jobs to work queue");
                }
            }
            Err(err) => {
                warn!(error = %err, "scheduler promotion sweep failed, retrying with backoff");
                backoff(&mut backoff_delay).await;
            }
        }
    }
}

async fn promote_due_jobs(coordinator: &Coordinator) -> core::error::Result<usize> {
    let now = chrono::Utc::now().timestamp() as f64;
    let due = coordinator
        .broker()
        .zrangebyscore(&coordinator.broker().keys.scheduled_jobs, f64::NEG_INFINITY, now)
        .await?;

    // zrangebyscore already returns members ordered ascending by score,
    // i.e. earliest scheduled_at first, satisfying the sweep ordering
    // guarantee in §5 without any extra sort here.
    let mut promoted = 0;
    for payload in due {
        let job: Job = match serde_json::from_str(&payload) {
            Ok(job) => job,
            Err(err) => {
                warn!(error = %err, "unparseable scheduled job payload, dead-lettering");
                coordinator
                    .broker()
                    .push(&coordinator.broker().keys.dead_letter_queue, &payload)
                    .await?;
                coordinator
                    .broker()
                    .zrem(&coordinator.broker().keys.scheduled_jobs, &payload)
                    .await?;
                continue;
            }
        };

        coordinator
            .broker()
            .move_scheduled_to_queue(
                &coordinator.broker().keys.scheduled_jobs,
                &coordinator.broker().keys.job_queue,
                &payload,
            )
            .await?;
        coordinator.store().set_status(job.id, JobStatus::Queued).await?;
        coordinator
            .broadcaster()
            .broadcast(&DashboardMessage::JobUpdate {
                job_id: job.id,
                status: JobStatus::Queued,
                progress: job.progress,
                urls_crawled: job.urls_crawled,
                links_found: job.links_found,
            })
            .await;
        promoted += 1;
    }
    Ok(promoted)
}

/// Every `interval`, recomputes the active-satellite count from the
/// heartbeat sorted-set and broadcasts a `dashboard_update` snapshot.
/// Stale satellites are never removed from the set here; they are simply
/// excluded from the active window until they heartbeat again.
pub async fn satellite_monitor_loop(
    coordinator: Coordinator,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut backoff_delay = BACKOFF_INITIAL;
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.cancelled() => return,
        }

        match coordinator.health().await {
            Ok(stats) => {
                backoff_delay = BACKOFF_INITIAL;
                coordinator
                    .broadcaster()
                    .broadcast(&DashboardMessage::DashboardUpdate {
                        pending: stats.pending,
                        scheduled: stats.scheduled,
                        result_backlog: stats.result_backlog,
                        active_satellites: stats.active_satellites,
                        paused: stats.paused,
                    })
                    .await;
            }
            Err(err) => {
                warn!(error = %err, "satellite monitor sweep failed, retrying with backoff");
                backoff(&mut backoff_delay).await;
            }
        }
    }
}

/// Subscribes to `job_status_updates` and applies each `JobStatusEvent` a
/// satellite publishes (currently just Queued→InProgress, §4.2 step 3) to
/// the JobStore, then broadcasts the resulting job_update. Delivery is
/// best-effort pub/sub, same as the control channel; a dropped event
/// just means the dashboard lags until the next result or health sweep.
/// Resubscribes with backoff if the broker connection drops.
pub async fn job_status_relay_loop(coordinator: Coordinator, shutdown: CancellationToken) {
    let mut backoff_delay = BACKOFF_INITIAL;
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let mut pubsub = match coordinator.broker().subscribe(&[BrokerKeys::job_status_updates()]).await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                warn!(error = %err, "failed to subscribe to job status channel, retrying");
                backoff(&mut backoff_delay).await;
                continue;
            }
        };
        backoff_delay = BACKOFF_INITIAL;

        let mut stream = pubsub.on_message();
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = shutdown.cancelled() => return,
            };
            let Some(msg) = next else {
                warn!("job status subscription ended, resubscribing");
                break;
            };
            let Ok(payload): Result<String, _> = msg.get_payload() else {
                continue;
            };
            match serde_json::from_str::<JobStatusEvent>(&payload) {
                Ok(event) => apply_status_event(&coordinator, event).await,
                Err(err) => warn!(error = %err, "malformed job status event, ignoring"),
            }
        }
    }
}

async fn apply_status_event(coordinator: &Coordinator, event: JobStatusEvent) {
    match coordinator.store().set_status(event.job_id, event.status).await {
        Ok(true) => {
            if let Ok(Some(job)) = coordinator.store().get(event.job_id).await {
                coordinator
                    .broadcaster()
                    .broadcast(&DashboardMessage::JobUpdate {
                        job_id: job.id,
                        status: job.status,
                        progress: job.progress,
                        urls_crawled: job.urls_crawled,
                        links_found: job.links_found,
                    })
                    .await;
            }
        }
        Ok(false) => warn!(job_id = %event.job_id, "job status event references unknown or terminal job"),
        Err(err) => warn!(error = %err, job_id = %event.job_id, "failed to apply job status event"),
    }
}
