//! Control-channel message shape published by the Coordinator and
//! consumed by satellites over `crawler_control:all` / `crawler_control:{id}`.

use crate::models::JobStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    Pause,
    Resume,
    CancelJob { job_id: Uuid },
}

/// The opposite-direction notification: a satellite publishes this on
/// `job_status_updates` whenever it moves a job's status locally (§4.2
/// step 3's "Set Job.status=InProgress in JobStore; broadcast"), since a
/// satellite process has no direct handle to the Coordinator's
/// in-process `Broadcaster`. The Coordinator relays it into the JobStore
/// and a `job_update` broadcast, same as `ResultIngestLoop` does for
/// crawl results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_job_round_trips_through_json() {
        let job_id = Uuid::new_v4();
        let msg = ControlMessage::CancelJob { job_id };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ControlMessage = serde_json::from_str(&json).unwrap();
        match back {
            ControlMessage::CancelJob { job_id: back_id } => assert_eq!(back_id, job_id),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn pause_serializes_without_payload_field_error() {
        let json = serde_json::to_string(&ControlMessage::Pause).unwrap();
        assert!(json.contains("\"command\":\"PAUSE\""));
    }
}
