//! Dashboard viewer WebSocket
//!
//! Each connection joins the broadcaster, receives its init event and then
//! every update, serialized as JSON text frames. The socket leaves the
//! registry on close, send failure or a dropped event stream.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use trafficstate::model::ViewerEvent;

use crate::rest_api::DashboardState;

/// Handle WebSocket upgrade for a dashboard viewer.
///
/// Route: `GET /ws`
pub async fn dashboard_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<DashboardState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_viewer_socket(socket, state))
}

fn encode_event(event: &ViewerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            log::error!("viewer event serialization failed: {}", e);
            None
        }
    }
}

async fn handle_viewer_socket(socket: WebSocket, state: DashboardState) {
    let mut handle = state.broadcaster.join().await;
    let viewer_id = handle.id;
    let (mut sender, mut receiver) = socket.split();

    log::debug!("viewer {} socket established", viewer_id);

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => {
                    let Some(frame) = encode_event(&event) else {
                        continue;
                    };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                // viewers only listen; ignore pings and stray frames
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("viewer {} socket error: {}", viewer_id, e);
                    break;
                }
            },
        }
    }

    state.broadcaster.leave(viewer_id).await;
    log::debug!("viewer {} socket closed", viewer_id);
}
