//! Local, in-process mirror of the control-channel state a satellite
//! observes (§4.2 "Control subscription"). A background task drains
//! `crawler_control:all` and `crawler_control:{id}`, updating this state;
//! the main loop and crawl loop check it between suspension points so a
//! CANCEL_JOB or PAUSE is never more than one poll interval stale.

use core::broker::keys::BrokerKeys;
use core::broker::Broker;
use core::control::ControlMessage;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ControlState {
    paused: AtomicBool,
    cancelled_jobs: Mutex<HashSet<Uuid>>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled_jobs: Mutex::new(HashSet::new()),
        }
    }
}

impl ControlState {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self, job_id: Uuid) -> bool {
        self.cancelled_jobs.lock().unwrap().contains(&job_id)
    }

    /// Drops stale job ids once a job finishes, so the set doesn't grow
    /// unbounded over a long-lived satellite process.
    pub fn forget(&self, job_id: Uuid) {
        self.cancelled_jobs.lock().unwrap().remove(&job_id);
    }
}

/// Subscribes to the global and per-satellite control channels and
/// updates `state` for as long as the broker connection lives. Runs until
/// the pub/sub stream ends (broker disconnect); the caller is expected to
/// treat satellite liveness as best-effort for control delivery, per §4.1
/// "delivery is best-effort".
pub async fn run_control_listener(broker: Broker, satellite_id: String, state: std::sync::Arc<ControlState>) {
    let all_channel = BrokerKeys::control_all();
    let own_channel = BrokerKeys::control_satellite(&satellite_id);

    let mut pubsub = match broker.subscribe(&[&all_channel, &own_channel]).await {
        Ok(pubsub) => pubsub,
        Err(error) => {
            warn!(%error, "failed to subscribe to control channels");
            return;
        }
    };

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let Ok(payload): Result<String, _> = msg.get_payload() else {
            continue;
        };
        match serde_json::from_str::<ControlMessage>(&payload) {
            Ok(ControlMessage::Pause) => {
                state.paused.store(true, Ordering::Relaxed);
                info!("satellite observed PAUSE");
            }
            Ok(ControlMessage::Resume) => {
                state.paused.store(false, Ordering::Relaxed);
                info!("satellite observed RESUME");
            }
            Ok(ControlMessage::CancelJob { job_id }) => {
                state.cancelled_jobs.lock().unwrap().insert(job_id);
                info!(%job_id, "satellite observed CANCEL_JOB");
            }
            Err(error) => {
                warn!(%error, "malformed control channel message, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unpaused_with_no_cancellations() {
        let state = ControlState::default();
        assert!(!state.is_paused());
        assert!(!state.is_cancelled(Uuid::new_v4()));
    }

    #[test]
    fn forget_removes_a_cancelled_job() {
        let state = ControlState::default();
        let job_id = Uuid::new_v4();
        state.cancelled_jobs.lock().unwrap().insert(job_id);
        assert!(state.is_cancelled(job_id));
        state.forget(job_id);
        assert!(!state.is_cancelled(job_id));
    }
}
