//! Signaling Connection Handler
//!
//! One task pair per WebSocket connection: a sender task draining the
//! peer's outbound queue and an input task parsing and dispatching frames.
//! The handler never interprets negotiation payloads — routing only.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::protocol::{SignalEvent, SignalRequest};

use super::rooms::{PEER_OUTBOUND_BUFFER, RoomDirectory};

/// Handle one signaling connection for its whole lifetime. Room cleanup runs
/// synchronously on the exit path, before the task finishes.
pub async fn handle_signaling(socket: WebSocket, directory: Arc<RoomDirectory>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<SignalEvent>(PEER_OUTBOUND_BUFFER);
    let peer_id = directory.register(tx).await;
    info!(peer = %peer_id, "signaling connection opened");

    // Drain the outbound queue into the socket
    let sender_task = async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("failed to serialize signaling event: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    // Parse and dispatch incoming frames
    let directory_in = directory.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<SignalRequest>(&text) {
                    Ok(request) => dispatch(&directory_in, peer_id, request).await,
                    Err(e) => {
                        warn!(peer = %peer_id, "dropping malformed signaling frame: {e}");
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!(peer = %peer_id, "client closed connection");
                    break;
                }
                Err(e) => {
                    debug!(peer = %peer_id, "websocket error: {e}");
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(peer = %peer_id, "sender task ended"),
        _ = input_task => debug!(peer = %peer_id, "input task ended"),
    }

    directory.disconnect(peer_id).await;
    info!(peer = %peer_id, "signaling connection closed");
}

async fn dispatch(directory: &RoomDirectory, peer_id: Uuid, request: SignalRequest) {
    match request {
        SignalRequest::CreateRoom { visibility } => {
            directory.create_room(peer_id, visibility).await;
        }
        SignalRequest::JoinRoom {
            room_id,
            device_info,
        } => {
            directory.join_room(peer_id, &room_id, device_info).await;
        }
        SignalRequest::Offer { target, sdp } => {
            directory
                .relay_to(peer_id, target, SignalEvent::Offer { sdp, from: peer_id })
                .await;
        }
        SignalRequest::Answer { target, sdp } => {
            directory
                .relay_to(peer_id, target, SignalEvent::Answer { sdp, from: peer_id })
                .await;
        }
        SignalRequest::IceCandidate { target, candidate } => {
            directory
                .relay_to(
                    peer_id,
                    target,
                    SignalEvent::IceCandidate {
                        candidate,
                        from: peer_id,
                    },
                )
                .await;
        }
        SignalRequest::KeyExchange { target, key } => {
            directory
                .relay_to(
                    peer_id,
                    target,
                    SignalEvent::SessionKey { key, from: peer_id },
                )
                .await;
        }
        SignalRequest::DeviceInfoUpdate { device_info } => {
            directory.broadcast_device_info(peer_id, device_info).await;
        }
    }
}
