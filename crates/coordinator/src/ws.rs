//! Dashboard WebSocket endpoint (§4.8, §6). New connections receive a
//! `connection_established` frame, then every broadcast the Broadcaster
//! emits until they disconnect or are pruned for falling behind.

use crate::broadcaster::{DashboardMessage, SubscribeError};
use crate::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::debug;

pub async fn dashboard_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let (id, mut receiver) = match state.broadcaster.subscribe().await {
        Ok(subscription) => subscription,
        Err(SubscribeError::MaxConnectionsReached) => {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: 1013,
                    reason: "Max connections reached".into(),
                })))
                .await;
            return;
        }
    };

    let established = DashboardMessage::ConnectionEstablished {
        message: "connected".to_string(),
        timestamp: chrono::Utc::now(),
    };
    if let Ok(json) = serde_json::to_string(&established) {
        if sink.send(Message::Text(json.into())).await.is_err() {
            state.broadcaster.unsubscribe(id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            outgoing = receiver.recv() => {
                match outgoing {
                    Some(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Dashboard frames are currently server -> client
                        // only; any client message is accepted and ignored.
                    }
                    Some(Err(error)) => {
                        debug!(%error, "dashboard websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.broadcaster.unsubscribe(id).await;
}
