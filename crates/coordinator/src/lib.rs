pub mod broadcaster;
pub mod coordinator;
pub mod health;
pub mod loops;
pub mod ws;

use crate::broadcaster::Broadcaster;
use crate::coordinator::Coordinator;

/// Shared axum handler state: the Coordinator (which itself holds the
/// Broker and JobStore) plus the Broadcaster the websocket route
/// subscribes to.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub broadcaster: Broadcaster,
}
