//! WebSocket handler for viewer connections.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use quotechat_protocol::ChatFrame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

use super::hub::{ConnectionId, Hub, Outbound, Viewer};
use crate::api::AppState;
use crate::auth::OptionalUser;
use crate::chat::{Author, ChatService};

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// How much of a rejected frame makes it into the log.
const FRAME_PREVIEW_CHARS: usize = 64;

/// WebSocket upgrade handler. Viewers without a token join anonymously and
/// can only read.
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    ws: WebSocketUpgrade,
) -> Response {
    let viewer = match user {
        Some(user) => Viewer::user(user.id, user.username),
        None => Viewer::anonymous(),
    };
    info!("WebSocket upgrade request from {}", viewer.username);

    let hub = state.hub.clone();
    let chat = state.chat.clone();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, hub, chat, viewer))
}

async fn handle_ws_connection(socket: WebSocket, hub: Hub, chat: ChatService, viewer: Viewer) {
    let (sender, mut receiver) = socket.split();
    let subscription = hub.register(viewer).await;
    let conn_id = subscription.id;
    let viewer = subscription.viewer;

    let mut writer = tokio::spawn(write_loop(sender, subscription.outbound, conn_id));

    loop {
        tokio::select! {
            next = receiver.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&chat, &viewer, conn_id, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("Binary frame on {}, ignoring", conn_id);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!("{} ({}) closed WebSocket connection", conn_id, viewer.username);
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error on {}: {}", conn_id, e);
                    break;
                }
            },
            // The writer stops on a write error or when the hub drops us.
            _ = &mut writer => {
                debug!("Writer for {} finished", conn_id);
                break;
            }
        }
    }

    writer.abort();
    hub.unregister(conn_id).await;
}

/// Drain the outbound buffer to the socket, with periodic pings.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    conn_id: ConnectionId,
) {
    let period = Duration::from_secs(PING_INTERVAL_SECS);
    let mut ping_interval = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Dropped by the hub.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(message.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize broadcast: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json.into())).await {
                    debug!("Write to {} failed: {}", conn_id, e);
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_frame(chat: &ChatService, viewer: &Viewer, conn_id: ConnectionId, text: &str) {
    let frame = match serde_json::from_str::<ChatFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "Malformed frame from {} ({} bytes): {} - {:?}",
                conn_id,
                text.len(),
                e,
                frame_preview(text)
            );
            return;
        }
    };

    let Some(user_id) = viewer.user_id else {
        debug!("Ignoring message from anonymous viewer on {}", conn_id);
        return;
    };

    let author = Author::new(user_id, viewer.username.clone());
    if let Err(e) = chat.submit(&author, &frame.content).await {
        warn!("Failed to handle message from {}: {}", viewer.username, e);
    }
}

/// Leading characters of `text`, cut on a char boundary.
fn frame_preview(text: &str) -> &str {
    match text.char_indices().nth(FRAME_PREVIEW_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
