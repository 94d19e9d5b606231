//! Peer Client Actor
//!
//! Single task owning the negotiation state machine, the signaling link,
//! and the direct channel. Everything reaches it through one internal
//! queue — commands from the handle, relay events, channel frames, and
//! completions from helper tasks — so state transitions are serialized by
//! construction.

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientFileConfig;
use crate::error::{
    ClientError, ConnectionError, NegotiationError, ProtocolViolation, RoomError, TransferError,
};
use crate::protocol::{DeviceInfo, RoomVisibility, SignalEvent, SignalRequest};
use crate::transport::{DirectChannel, Negotiator, PendingSession};

use super::PeerEvent;
use super::crypto::ChunkCipher;
use super::signaling::SignalingLink;
use super::state::{NegotiationState, StateMachine};
use super::transfer::{self, FileTransferSession, OutgoingFile, TransferControl, TransferFrame};

pub(super) const INTERNAL_BUFFER: usize = 128;
pub(super) const EVENT_BUFFER: usize = 256;

/// Requests from the public handle.
pub(super) enum Command {
    CreateRoom {
        visibility: RoomVisibility,
        respond_to: oneshot::Sender<Result<String, ClientError>>,
    },
    JoinRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },
    UpdateDeviceInfo {
        device_info: DeviceInfo,
    },
    SendFile {
        file: OutgoingFile,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
}

/// Everything the actor can wake up on.
pub(super) enum Internal {
    Command(Command),
    Signal(SignalEvent),
    LinkDropped,
    ChannelOpen(Result<DirectChannel, NegotiationError>),
    Frame(Vec<u8>),
    ChannelClosed,
    SendFinished(Result<(), TransferError>),
}

enum PendingRoom {
    Create(oneshot::Sender<Result<String, ClientError>>),
    Join(oneshot::Sender<Result<(), ClientError>>),
}

#[derive(Clone, Copy)]
enum DeadlineKind {
    RoomAck,
    Negotiation,
}

struct Deadline {
    at: Instant,
    kind: DeadlineKind,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

pub(super) struct ClientActor {
    config: ClientFileConfig,
    device_info: DeviceInfo,
    negotiator: Negotiator,
    link: Option<SignalingLink>,
    machine: StateMachine,
    events: mpsc::Sender<PeerEvent>,
    internal_tx: mpsc::Sender<Internal>,
    remote_peer: Option<Uuid>,
    session: Option<PendingSession>,
    /// Host role: false until the joiner's answer has been applied.
    answered: bool,
    /// Channel that reported open before the handshake finished.
    stashed_channel: Option<DirectChannel>,
    channel_tx: Option<mpsc::Sender<Vec<u8>>>,
    cipher: Option<ChunkCipher>,
    pending_room: Option<PendingRoom>,
    pending_send: Option<oneshot::Sender<Result<(), ClientError>>>,
    recv_session: Option<FileTransferSession>,
    deadline: Option<Deadline>,
    cancel: CancellationToken,
}

impl ClientActor {
    pub(super) fn new(
        config: ClientFileConfig,
        device_info: DeviceInfo,
        negotiator: Negotiator,
        link: SignalingLink,
        events: mpsc::Sender<PeerEvent>,
        internal_tx: mpsc::Sender<Internal>,
    ) -> Self {
        Self {
            config,
            device_info,
            negotiator,
            link: Some(link),
            machine: StateMachine::new(),
            events,
            internal_tx,
            remote_peer: None,
            session: None,
            answered: false,
            stashed_channel: None,
            channel_tx: None,
            cipher: None,
            pending_room: None,
            pending_send: None,
            recv_session: None,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub(super) async fn run(mut self, mut internal_rx: mpsc::Receiver<Internal>) {
        loop {
            let deadline_at = self.deadline.as_ref().map(|d| d.at);
            let flow = tokio::select! {
                maybe = internal_rx.recv() => match maybe {
                    Some(event) => self.handle(event).await,
                    // Every handle is gone; nothing can reach us any more
                    None => Flow::Stop,
                },
                _ = sleep_until(deadline_at), if deadline_at.is_some() => {
                    self.handle_deadline().await
                }
            };
            if flow == Flow::Stop {
                break;
            }
        }
        // Idempotent: close()/fail() already ran this on their way out
        self.teardown(None);
    }

    async fn handle(&mut self, event: Internal) -> Flow {
        match event {
            Internal::Command(command) => self.handle_command(command).await,
            Internal::Signal(signal) => self.handle_signal(signal).await,
            Internal::LinkDropped => {
                if self.machine.state().is_terminal() {
                    return Flow::Stop;
                }
                self.fail(ConnectionError::LinkDropped.into()).await
            }
            Internal::ChannelOpen(Ok(channel)) => self.on_channel_open(channel).await,
            Internal::ChannelOpen(Err(error)) => self.fail(error.into()).await,
            Internal::Frame(frame) => self.on_frame(frame).await,
            Internal::ChannelClosed => self.on_channel_closed().await,
            Internal::SendFinished(result) => self.on_send_finished(result).await,
        }
    }

    // === Commands ===

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::CreateRoom {
                visibility,
                respond_to,
            } => {
                if let Err(violation) = self.machine.room_requested() {
                    let _ = respond_to.send(Err(violation.into()));
                    return Flow::Continue;
                }
                if self
                    .signal(SignalRequest::CreateRoom { visibility })
                    .await
                    .is_err()
                {
                    let _ = respond_to.send(Err(ConnectionError::LinkDropped.into()));
                    return self.fail(ConnectionError::LinkDropped.into()).await;
                }
                self.pending_room = Some(PendingRoom::Create(respond_to));
                self.arm_deadline(DeadlineKind::RoomAck);
                Flow::Continue
            }
            Command::JoinRoom {
                room_id,
                respond_to,
            } => {
                if let Err(violation) = self.machine.room_requested() {
                    let _ = respond_to.send(Err(violation.into()));
                    return Flow::Continue;
                }
                let request = SignalRequest::JoinRoom {
                    room_id,
                    device_info: self.device_info.to_value(),
                };
                if self.signal(request).await.is_err() {
                    let _ = respond_to.send(Err(ConnectionError::LinkDropped.into()));
                    return self.fail(ConnectionError::LinkDropped.into()).await;
                }
                self.pending_room = Some(PendingRoom::Join(respond_to));
                self.arm_deadline(DeadlineKind::RoomAck);
                Flow::Continue
            }
            Command::UpdateDeviceInfo { device_info } => {
                self.device_info = device_info.clone();
                let request = SignalRequest::DeviceInfoUpdate {
                    device_info: device_info.to_value(),
                };
                if self.signal(request).await.is_err() {
                    debug!("device-info-update dropped: signaling link is gone");
                }
                Flow::Continue
            }
            Command::SendFile { file, respond_to } => self.start_send(file, respond_to),
            Command::Close { respond_to } => {
                self.teardown(None);
                self.machine.close();
                let _ = self.events.try_send(PeerEvent::Closed);
                let _ = respond_to.send(());
                Flow::Stop
            }
        }
    }

    fn start_send(
        &mut self,
        file: OutgoingFile,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    ) -> Flow {
        let Some(channel_tx) = self.channel_tx.clone() else {
            let _ = respond_to.send(Err(TransferError::NotConnected.into()));
            return Flow::Continue;
        };
        if self.pending_send.is_some() {
            let _ = respond_to.send(Err(TransferError::SendInProgress.into()));
            return Flow::Continue;
        }
        let cipher = if self.config.encryption {
            match self.cipher.clone() {
                Some(cipher) => Some(cipher),
                None => {
                    // Encryption is on but no session key was exchanged
                    let _ = respond_to.send(Err(TransferError::Encrypt.into()));
                    return Flow::Continue;
                }
            }
        } else {
            None
        };
        if let Err(violation) = self.machine.transfer_started() {
            let _ = respond_to.send(Err(violation.into()));
            return Flow::Continue;
        }

        self.pending_send = Some(respond_to);
        let internal_tx = self.internal_tx.clone();
        let events = self.events.clone();
        let chunk_size = self.config.chunk_size;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result =
                transfer::run_send(channel_tx, file, chunk_size, cipher, events, cancel).await;
            let _ = internal_tx.send(Internal::SendFinished(result)).await;
        });
        Flow::Continue
    }

    // === Relay events ===

    async fn handle_signal(&mut self, signal: SignalEvent) -> Flow {
        match signal {
            SignalEvent::RoomCreated { room_id } => {
                let Some(PendingRoom::Create(respond_to)) = self.pending_room.take() else {
                    return self
                        .remote_violation(self.violation("room-created"))
                        .await;
                };
                if let Err(violation) = self.machine.room_acknowledged() {
                    let _ = respond_to.send(Err(ClientError::Protocol(violation.clone())));
                    return self.remote_violation(violation).await;
                }
                self.clear_deadline();
                let _ = respond_to.send(Ok(room_id));
                Flow::Continue
            }
            SignalEvent::JoinedRoom { room_id } => {
                let Some(PendingRoom::Join(respond_to)) = self.pending_room.take() else {
                    return self.remote_violation(self.violation("joined-room")).await;
                };
                if let Err(violation) = self.machine.room_acknowledged() {
                    let _ = respond_to.send(Err(ClientError::Protocol(violation.clone())));
                    return self.remote_violation(violation).await;
                }
                self.clear_deadline();
                debug!(room = %room_id, "joined room");
                let _ = respond_to.send(Ok(()));
                Flow::Continue
            }
            SignalEvent::Error { message } => {
                if let Some(pending) = self.pending_room.take() {
                    // A room-phase rejection resolves the pending request
                    // and leaves no partial state behind
                    let error: ClientError = if message == "Room not found" {
                        RoomError::NotFound.into()
                    } else {
                        RoomError::Rejected(message).into()
                    };
                    let _ = self.machine.room_request_failed();
                    self.clear_deadline();
                    match pending {
                        PendingRoom::Create(tx) => {
                            let _ = tx.send(Err(error));
                        }
                        PendingRoom::Join(tx) => {
                            let _ = tx.send(Err(error));
                        }
                    }
                    Flow::Continue
                } else {
                    let _ = self
                        .events
                        .send(PeerEvent::Error {
                            error: RoomError::Rejected(message).into(),
                        })
                        .await;
                    Flow::Continue
                }
            }
            SignalEvent::PeerJoined {
                peer_id,
                device_info,
            } => {
                if let Err(violation) = self.machine.peer_joined() {
                    return self.remote_violation(violation).await;
                }
                let _ = self.events.try_send(PeerEvent::PeerJoined {
                    peer_id,
                    device_info: DeviceInfo::from_value(&device_info),
                });
                self.remote_peer = Some(peer_id);
                self.start_host_negotiation(peer_id).await
            }
            SignalEvent::Offer { sdp, from } => {
                if let Err(violation) = self.machine.offer_received() {
                    return self.remote_violation(violation).await;
                }
                self.remote_peer = Some(from);
                self.start_join_negotiation(from, &sdp).await
            }
            SignalEvent::Answer { sdp, from } => {
                if self.remote_peer != Some(from) {
                    return self.remote_violation(self.violation("answer")).await;
                }
                if let Err(violation) = self.machine.answer_received() {
                    return self.remote_violation(violation).await;
                }
                match self.session.as_mut() {
                    Some(session) => match session.apply_answer(&sdp) {
                        Ok(()) => {
                            self.answered = true;
                            // The transport may have finished first; the
                            // handshake is only now complete
                            match self.stashed_channel.take() {
                                Some(channel) => self.complete_open(channel).await,
                                None => Flow::Continue,
                            }
                        }
                        Err(error) => self.fail(error.into()).await,
                    },
                    None => self.remote_violation(self.violation("answer")).await,
                }
            }
            SignalEvent::IceCandidate { candidate, from } => match self.machine.state() {
                NegotiationState::Negotiating if self.remote_peer == Some(from) => {
                    if let Some(session) = self.session.as_mut() {
                        session.add_remote_candidate(&candidate);
                    }
                    Flow::Continue
                }
                NegotiationState::Connected | NegotiationState::Transferring => {
                    debug!("ignoring candidate for an already-open channel");
                    Flow::Continue
                }
                _ => self.remote_violation(self.violation("ice-candidate")).await,
            },
            SignalEvent::SessionKey { key, from } => {
                if self.remote_peer != Some(from)
                    || !matches!(
                        self.machine.state(),
                        NegotiationState::Negotiating
                            | NegotiationState::Connected
                            | NegotiationState::Transferring
                    )
                {
                    return self.remote_violation(self.violation("session-key")).await;
                }
                match ChunkCipher::from_hex(&key) {
                    Ok(cipher) => {
                        self.cipher = Some(cipher);
                        Flow::Continue
                    }
                    Err(_) => {
                        self.fail(
                            NegotiationError::MalformedPayload("unusable session key".to_string())
                                .into(),
                        )
                        .await
                    }
                }
            }
            SignalEvent::PeerLeft { peer_id } => {
                let _ = self.events.try_send(PeerEvent::PeerLeft { peer_id });
                if self.machine.state() == NegotiationState::Negotiating
                    && self.remote_peer == Some(peer_id)
                {
                    return self
                        .fail(
                            NegotiationError::Transport("peer left during negotiation".to_string())
                                .into(),
                        )
                        .await;
                }
                Flow::Continue
            }
            SignalEvent::RoomClosed { room_id } => {
                let _ = self.events.try_send(PeerEvent::RoomClosed { room_id });
                match self.machine.state() {
                    // Before the channel is up, the room was the only path
                    // to the peer
                    NegotiationState::WaitingForPeer | NegotiationState::Negotiating => {
                        self.fail(RoomError::Rejected("room closed".to_string()).into())
                            .await
                    }
                    // An established channel outlives its room
                    _ => Flow::Continue,
                }
            }
            SignalEvent::PeerDeviceInfo { device_info } => {
                let _ = self.events.try_send(PeerEvent::PeerDeviceInfo {
                    device_info: DeviceInfo::from_value(&device_info),
                });
                Flow::Continue
            }
        }
    }

    // === Negotiation ===

    async fn start_host_negotiation(&mut self, peer: Uuid) -> Flow {
        let mut session = match self.negotiator.host_session().await {
            Ok(session) => session,
            Err(error) => return self.fail(error.into()).await,
        };
        let offer = SignalRequest::Offer {
            target: peer,
            sdp: session.payload.clone(),
        };
        if self.signal(offer).await.is_err() {
            return self.fail(ConnectionError::LinkDropped.into()).await;
        }
        if self.trickle_candidates(peer, &mut session).await.is_err() {
            return self.fail(ConnectionError::LinkDropped.into()).await;
        }
        if self.config.encryption {
            let cipher = ChunkCipher::generate();
            let exchange = SignalRequest::KeyExchange {
                target: peer,
                key: cipher.key_hex(),
            };
            if self.signal(exchange).await.is_err() {
                return self.fail(ConnectionError::LinkDropped.into()).await;
            }
            self.cipher = Some(cipher);
        }
        self.answered = false;
        self.watch_open(&mut session);
        self.session = Some(session);
        self.arm_deadline(DeadlineKind::Negotiation);
        Flow::Continue
    }

    async fn start_join_negotiation(&mut self, peer: Uuid, offer: &str) -> Flow {
        let mut session = match self.negotiator.join_session(offer).await {
            Ok(session) => session,
            Err(error) => return self.fail(error.into()).await,
        };
        let answer = SignalRequest::Answer {
            target: peer,
            sdp: session.payload.clone(),
        };
        if self.signal(answer).await.is_err() {
            return self.fail(ConnectionError::LinkDropped.into()).await;
        }
        if self.trickle_candidates(peer, &mut session).await.is_err() {
            return self.fail(ConnectionError::LinkDropped.into()).await;
        }
        // Joiner role: no answer is coming back, the channel may complete
        // as soon as the transport does
        self.answered = true;
        self.watch_open(&mut session);
        self.session = Some(session);
        self.arm_deadline(DeadlineKind::Negotiation);
        Flow::Continue
    }

    async fn trickle_candidates(
        &self,
        peer: Uuid,
        session: &mut PendingSession,
    ) -> Result<(), ConnectionError> {
        for candidate in std::mem::take(&mut session.candidates) {
            self.signal(SignalRequest::IceCandidate {
                target: peer,
                candidate,
            })
            .await?;
        }
        Ok(())
    }

    /// Forward the substrate's channel-open resolution into the queue.
    fn watch_open(&self, session: &mut PendingSession) {
        let Some(open_rx) = session.take_open_rx() else {
            return;
        };
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match open_rx.await {
                Ok(result) => result,
                Err(_) => Err(NegotiationError::Transport(
                    "negotiator task ended".to_string(),
                )),
            };
            let _ = internal_tx.send(Internal::ChannelOpen(result)).await;
        });
    }

    async fn on_channel_open(&mut self, channel: DirectChannel) -> Flow {
        if !self.answered {
            // Transport beat the answer through the relay; hold the channel
            // until the handshake is actually complete
            self.stashed_channel = Some(channel);
            return Flow::Continue;
        }
        self.complete_open(channel).await
    }

    async fn complete_open(&mut self, channel: DirectChannel) -> Flow {
        if let Err(violation) = self.machine.channel_open() {
            return self.remote_violation(violation).await;
        }
        self.clear_deadline();

        let (channel_tx, mut channel_rx) = channel.into_parts();
        self.channel_tx = Some(channel_tx);

        let internal_tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = channel_rx.recv() => match maybe {
                        Some(frame) => {
                            if internal_tx.send(Internal::Frame(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = internal_tx.send(Internal::ChannelClosed).await;
                            break;
                        }
                    }
                }
            }
        });

        let _ = self.events.try_send(PeerEvent::Connected);
        Flow::Continue
    }

    // === Direct-channel frames ===

    async fn on_frame(&mut self, frame: Vec<u8>) -> Flow {
        let decoded = match transfer::decode_frame(&frame) {
            Ok(decoded) => decoded,
            Err(error) => return self.abort_receive(error).await,
        };
        match decoded {
            TransferFrame::Control(TransferControl::FileMetadata {
                name,
                size,
                mime_type,
            }) => {
                match self.machine.state() {
                    NegotiationState::Connected => {
                        let _ = self.machine.transfer_started();
                    }
                    NegotiationState::Transferring => {}
                    _ => {
                        return self.remote_violation(self.violation("file-metadata")).await;
                    }
                }
                if self.recv_session.is_some() {
                    debug!("discarding incomplete inbound transfer for new metadata");
                }
                self.recv_session = Some(FileTransferSession::new(name, size, mime_type));
                Flow::Continue
            }
            TransferFrame::Chunk { offset, data } => {
                if self.recv_session.is_none() {
                    let _ = self.events.try_send(PeerEvent::Error {
                        error: TransferError::NoSession.into(),
                    });
                    return Flow::Continue;
                }
                let plaintext = if self.config.encryption {
                    let opened = self
                        .cipher
                        .as_ref()
                        .ok_or(TransferError::Decrypt)
                        .and_then(|cipher| cipher.open(&data));
                    match opened {
                        Ok(plaintext) => plaintext,
                        Err(error) => return self.abort_receive(error).await,
                    }
                } else {
                    data
                };
                if let Some(session) = self.recv_session.as_mut() {
                    session.store_chunk(offset, plaintext);
                    let _ = self.events.try_send(PeerEvent::ReceiveProgress {
                        percent: session.progress_percent(),
                    });
                }
                Flow::Continue
            }
            TransferFrame::Control(TransferControl::TransferComplete { .. }) => {
                let Some(session) = self.recv_session.take() else {
                    let _ = self.events.try_send(PeerEvent::Error {
                        error: TransferError::NoSession.into(),
                    });
                    return Flow::Continue;
                };
                let result = session.try_assemble();
                self.settle_transfer_state();
                match result {
                    Ok(file) => {
                        let _ = self.events.send(PeerEvent::FileReceived { file }).await;
                    }
                    Err(error) => {
                        let _ = self
                            .events
                            .send(PeerEvent::Error {
                                error: error.into(),
                            })
                            .await;
                    }
                }
                Flow::Continue
            }
        }
    }

    /// Discard the inbound session and surface the error; the connection
    /// itself survives a failed transfer.
    async fn abort_receive(&mut self, error: TransferError) -> Flow {
        self.recv_session = None;
        self.settle_transfer_state();
        let _ = self
            .events
            .send(PeerEvent::Error {
                error: error.into(),
            })
            .await;
        Flow::Continue
    }

    async fn on_channel_closed(&mut self) -> Flow {
        self.channel_tx = None;
        if self.recv_session.take().is_some() {
            let _ = self
                .events
                .send(PeerEvent::Error {
                    error: TransferError::ChannelClosed.into(),
                })
                .await;
        }
        match self.machine.state() {
            NegotiationState::Connected | NegotiationState::Transferring => {
                self.fail(TransferError::ChannelClosed.into()).await
            }
            _ => Flow::Continue,
        }
    }

    async fn on_send_finished(&mut self, result: Result<(), TransferError>) -> Flow {
        let responder = self.pending_send.take();
        match result {
            Ok(()) => {
                if let Some(respond_to) = responder {
                    let _ = respond_to.send(Ok(()));
                }
            }
            Err(error) => match responder {
                Some(respond_to) => {
                    let _ = respond_to.send(Err(error.into()));
                }
                None => {
                    let _ = self
                        .events
                        .send(PeerEvent::Error {
                            error: error.into(),
                        })
                        .await;
                }
            },
        }
        self.settle_transfer_state();
        Flow::Continue
    }

    // === Deadlines, failure, teardown ===

    async fn handle_deadline(&mut self) -> Flow {
        let Some(deadline) = self.deadline.take() else {
            return Flow::Continue;
        };
        match deadline.kind {
            DeadlineKind::RoomAck => {
                let error: ClientError = RoomError::AckTimeout(self.config.ack_timeout()).into();
                let _ = self.machine.room_request_failed();
                match self.pending_room.take() {
                    Some(PendingRoom::Create(tx)) => {
                        let _ = tx.send(Err(error));
                    }
                    Some(PendingRoom::Join(tx)) => {
                        let _ = tx.send(Err(error));
                    }
                    None => {}
                }
                Flow::Continue
            }
            DeadlineKind::Negotiation => {
                self.fail(NegotiationError::Timeout(self.config.negotiation_timeout()).into())
                    .await
            }
        }
    }

    fn violation(&self, message: &'static str) -> ProtocolViolation {
        ProtocolViolation {
            message,
            state: self.machine.state().as_str(),
        }
    }

    async fn remote_violation(&mut self, violation: ProtocolViolation) -> Flow {
        warn!("rejecting out-of-sequence message: {violation}");
        self.fail(violation.into()).await
    }

    /// Every error path lands here: an unambiguous terminal state with the
    /// transport released and all pending callers answered.
    async fn fail(&mut self, error: ClientError) -> Flow {
        self.machine.fail();
        self.teardown(Some(&error));
        let _ = self.events.send(PeerEvent::Error { error }).await;
        Flow::Stop
    }

    fn teardown(&mut self, error: Option<&ClientError>) {
        self.cancel.cancel();
        self.channel_tx = None;
        self.stashed_channel = None;
        self.link = None;
        self.session = None;
        self.recv_session = None;
        self.deadline = None;

        let make_error = || error.cloned().unwrap_or(ClientError::Closed);
        match self.pending_room.take() {
            Some(PendingRoom::Create(tx)) => {
                let _ = tx.send(Err(make_error()));
            }
            Some(PendingRoom::Join(tx)) => {
                let _ = tx.send(Err(make_error()));
            }
            None => {}
        }
        if let Some(tx) = self.pending_send.take() {
            let _ = tx.send(Err(make_error()));
        }
    }

    async fn signal(&self, request: SignalRequest) -> Result<(), ConnectionError> {
        match &self.link {
            Some(link) => link.send(request).await,
            None => Err(ConnectionError::LinkDropped),
        }
    }

    fn arm_deadline(&mut self, kind: DeadlineKind) {
        let duration = match kind {
            DeadlineKind::RoomAck => self.config.ack_timeout(),
            DeadlineKind::Negotiation => self.config.negotiation_timeout(),
        };
        self.deadline = Some(Deadline {
            at: Instant::now() + duration,
            kind,
        });
    }

    fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    /// Leave `transferring` once neither direction has work in flight.
    fn settle_transfer_state(&mut self) {
        if self.machine.state() == NegotiationState::Transferring
            && self.pending_send.is_none()
            && self.recv_session.is_none()
        {
            let _ = self.machine.transfer_finished();
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
