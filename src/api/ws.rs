use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::state::AppContext;

/// Upgrades `/meetings/{id}/stream` to a WebSocket that receives
/// summary-update and segment-added events for one meeting.
pub async fn stream(
    ws: WebSocketUpgrade,
    Path(meeting_id): Path<String>,
    State(ctx): State<Arc<AppContext>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, meeting_id, ctx))
}

async fn handle_socket(socket: WebSocket, meeting_id: String, ctx: Arc<AppContext>) {
    let (subscriber_id, mut events) = ctx.bus.subscribe(&meeting_id);
    info!("websocket connected for meeting {}", meeting_id);

    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let Ok(payload) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            message = incoming.next() => {
                match message {
                    Some(Ok(message)) => {
                        debug!("received WS data for meeting {}: {:?}", meeting_id, message);
                    }
                    _ => break,
                }
            }
        }
    }

    ctx.bus.unsubscribe(&meeting_id, subscriber_id);
    info!("websocket disconnected for meeting {}", meeting_id);
}
