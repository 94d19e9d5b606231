//! Peer Connection Client
//!
//! Public handle plus the actor task behind it. The handle's operations are
//! plain async calls answered over oneshots; everything the remote side
//! does (peers joining, progress, completed files, failures) arrives on the
//! event stream returned by [`PeerClient::connect`].

mod actor;
mod crypto;
mod signaling;
mod state;
mod transfer;

pub use state::NegotiationState;
pub use transfer::{OutgoingFile, ReceivedFile};

use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::ClientFileConfig;
use crate::error::{ClientError, TransferError};
use crate::protocol::{DeviceInfo, RoomVisibility};
use crate::transport::Negotiator;

use actor::{ClientActor, Command, EVENT_BUFFER, INTERNAL_BUFFER, Internal};
use signaling::SignalingLink;

/// Everything the remote side causes, in the order it happened.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A peer joined the room this client hosts
    PeerJoined {
        peer_id: Uuid,
        device_info: DeviceInfo,
    },
    /// A member left the hosted room
    PeerLeft { peer_id: Uuid },
    /// A room member refreshed its device info
    PeerDeviceInfo { device_info: DeviceInfo },
    /// The direct channel is open — file bytes may flow
    Connected,
    /// Outbound progress, fired after every chunk
    SendProgress { percent: f64 },
    /// Inbound progress, fired on every chunk arrival
    ReceiveProgress { percent: f64 },
    /// A transfer completed and passed the completeness check
    FileReceived { file: ReceivedFile },
    /// The room was closed (host gone or idled out)
    RoomClosed { room_id: String },
    /// Something failed; the client is in `failed` unless this was a
    /// transfer-level error
    Error { error: ClientError },
    /// `close()` finished
    Closed,
}

/// Cloneable handle to one peer connection attempt.
#[derive(Clone)]
pub struct PeerClient {
    internal_tx: mpsc::Sender<Internal>,
}

impl PeerClient {
    /// Establish the signaling link (bounded by the configured timeout) and
    /// start the client actor. Returns the handle plus the event stream.
    pub async fn connect(
        config: &ClientFileConfig,
        device_info: DeviceInfo,
        negotiator: Negotiator,
    ) -> Result<(Self, mpsc::Receiver<PeerEvent>), ClientError> {
        let (link, mut signal_rx) =
            SignalingLink::connect(&config.relay_url, config.connect_timeout()).await?;

        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        // Pump relay events into the actor queue; the stream ending is the
        // link-drop signal
        let forward_tx = internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = signal_rx.recv().await {
                if forward_tx.send(Internal::Signal(event)).await.is_err() {
                    return;
                }
            }
            let _ = forward_tx.send(Internal::LinkDropped).await;
        });

        let actor = ClientActor::new(
            config.clone(),
            device_info,
            negotiator,
            link,
            events_tx,
            internal_tx.clone(),
        );
        tokio::spawn(actor.run(internal_rx));

        Ok((Self { internal_tx }, events_rx))
    }

    /// Host entry point: allocate a room and wait for its id.
    pub async fn create_room(&self, visibility: RoomVisibility) -> Result<String, ClientError> {
        let (respond_to, response) = oneshot::channel();
        self.command(Command::CreateRoom {
            visibility,
            respond_to,
        })
        .await?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Joiner entry point.
    pub async fn join_room(&self, room_id: &str) -> Result<(), ClientError> {
        let (respond_to, response) = oneshot::channel();
        self.command(Command::JoinRoom {
            room_id: room_id.to_string(),
            respond_to,
        })
        .await?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Broadcast refreshed device info to the room. Purely informational.
    pub async fn update_device_info(&self, device_info: DeviceInfo) -> Result<(), ClientError> {
        self.command(Command::UpdateDeviceInfo { device_info }).await
    }

    /// Stream a file from disk to the connected peer. Resolves once the
    /// completion marker has been sent.
    pub async fn send_file(&self, path: &Path) -> Result<(), ClientError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransferError::Source(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        self.send_bytes(OutgoingFile {
            name,
            mime_type,
            bytes,
        })
        .await
    }

    /// Stream an in-memory file to the connected peer.
    pub async fn send_bytes(&self, file: OutgoingFile) -> Result<(), ClientError> {
        let (respond_to, response) = oneshot::channel();
        self.command(Command::SendFile { file, respond_to }).await?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Tear down the transport channel and the signaling link. Pending
    /// operations reject; an in-flight transfer rejects rather than
    /// resolving silently.
    pub async fn close(&self) {
        let (respond_to, response) = oneshot::channel();
        if self.command(Command::Close { respond_to }).await.is_ok() {
            let _ = response.await;
        }
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.internal_tx
            .send(Internal::Command(command))
            .await
            .map_err(|_| ClientError::Closed)
    }
}
