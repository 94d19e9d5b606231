//! Signaling Link
//!
//! The client side of the persistent relay connection: a writer task
//! draining outbound requests and a reader task parsing inbound events.
//! Establishing the link is itself fallible and bounded by a timeout.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::protocol::{SignalEvent, SignalRequest};

/// Outbound / inbound queue depth on the signaling link.
const LINK_BUFFER: usize = 64;

pub struct SignalingLink {
    out_tx: mpsc::Sender<SignalRequest>,
}

impl SignalingLink {
    /// Connect to the relay within `timeout`. Returns the link plus the
    /// stream of relay events; the stream ends when the link drops.
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<SignalEvent>), ConnectionError> {
        let connect = tokio_tungstenite::connect_async(url);
        let (ws, _) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))?
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

        let (mut ws_write, mut ws_read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<SignalRequest>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<SignalEvent>(LINK_BUFFER);

        // Writer: drain outbound requests into the socket
        tokio::spawn(async move {
            while let Some(request) = out_rx.recv().await {
                let json = match serde_json::to_string(&request) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("failed to serialize signaling request: {e}");
                        continue;
                    }
                };
                if ws_write
                    .send(tungstenite::Message::Text(json.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = ws_write.send(tungstenite::Message::Close(None)).await;
        });

        // Reader: parse inbound events; dropping in_tx ends the event
        // stream, which is how the owner learns the link died
        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(tungstenite::Message::Text(text)) => {
                        match serde_json::from_str::<SignalEvent>(&text) {
                            Ok(event) => {
                                if in_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("dropping malformed relay frame: {e}");
                            }
                        }
                    }
                    Ok(tungstenite::Message::Close(_)) => {
                        debug!("relay closed the signaling link");
                        break;
                    }
                    Err(e) => {
                        debug!("signaling link error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok((Self { out_tx }, in_rx))
    }

    pub async fn send(&self, request: SignalRequest) -> Result<(), ConnectionError> {
        self.out_tx
            .send(request)
            .await
            .map_err(|_| ConnectionError::LinkDropped)
    }
}
