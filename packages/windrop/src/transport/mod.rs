//! Direct Transport
//!
//! The negotiation substrate behind the handshake. The relay only ever sees
//! the opaque offer/answer/candidate strings produced here; once a session
//! is established, file bytes flow endpoint-to-endpoint through a
//! [`DirectChannel`] without relay involvement.
//!
//! Two substrates: `lan` (direct TCP with length-prefixed frames) and
//! `memory` (in-process pairing for tests and the loopback demo).

pub mod framing;
mod lan;
mod memory;

pub use lan::LanNegotiator;
pub use memory::{MemoryHub, MemoryNegotiator};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{NegotiationError, TransferError};

/// Fresh rendezvous token for one handshake.
pub(crate) fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Frames buffered per direction before the sender awaits.
pub const CHANNEL_BUFFER: usize = 64;

/// A reliable, ordered, framed pipe between the two endpoints. Exclusively
/// owned by its client; dropping it tears the session down.
#[derive(Debug)]
pub struct DirectChannel {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl DirectChannel {
    pub(crate) fn new(tx: mpsc::Sender<Vec<u8>>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { tx, rx }
    }

    /// Two directly-connected in-process endpoints.
    pub fn pair() -> (DirectChannel, DirectChannel) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_BUFFER);
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransferError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransferError::ChannelClosed)
    }

    /// Next inbound frame, or `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Sender half only, for tasks that stream without reading.
    pub fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.tx.clone()
    }

    /// Split into raw halves so sending and receiving can live in
    /// different tasks.
    pub fn into_parts(self) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        (self.tx, self.rx)
    }
}

/// A handshake in flight: holds the locally-produced payload plus the hooks
/// the client needs while the relay round trips complete.
#[derive(Debug)]
pub struct PendingSession {
    /// Offer (host role) or answer (joiner role) to ship through the relay.
    pub payload: String,
    /// Additional transport candidates to trickle after the payload.
    pub candidates: Vec<String>,
    token: String,
    candidate_tx: Option<mpsc::UnboundedSender<String>>,
    open_rx: Option<oneshot::Receiver<Result<DirectChannel, NegotiationError>>>,
}

impl PendingSession {
    pub(crate) fn new(
        payload: String,
        candidates: Vec<String>,
        token: String,
        candidate_tx: Option<mpsc::UnboundedSender<String>>,
        open_rx: oneshot::Receiver<Result<DirectChannel, NegotiationError>>,
    ) -> Self {
        Self {
            payload,
            candidates,
            token,
            candidate_tx,
            open_rx: Some(open_rx),
        }
    }

    /// Host side: verify the answer acknowledges this session.
    pub fn apply_answer(&mut self, answer: &str) -> Result<(), NegotiationError> {
        let parsed: AnswerPayload = serde_json::from_str(answer)
            .map_err(|e| NegotiationError::MalformedPayload(e.to_string()))?;
        if parsed.token != self.token {
            return Err(NegotiationError::TokenMismatch);
        }
        Ok(())
    }

    /// Feed a remote transport candidate into the connector. Unknown or
    /// late candidates are ignored by substrates that no longer need them.
    pub fn add_remote_candidate(&mut self, candidate: &str) {
        if let Some(tx) = &self.candidate_tx {
            let _ = tx.send(candidate.to_string());
        }
    }

    /// Take the channel-open future. Resolves once the direct channel
    /// reports open; the caller owns the timeout.
    pub fn take_open_rx(
        &mut self,
    ) -> Option<oneshot::Receiver<Result<DirectChannel, NegotiationError>>> {
        self.open_rx.take()
    }
}

/// Answer payload shared by both substrates: an acknowledgement of the
/// offer's rendezvous token.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct AnswerPayload {
    pub token: String,
}

/// Negotiation substrate. The client is written against this enum; the
/// relay never knows which one is in play.
#[derive(Clone)]
pub enum Negotiator {
    Lan(LanNegotiator),
    Memory(MemoryNegotiator),
}

impl Negotiator {
    /// Host role: produce an offer and start listening for the peer.
    pub async fn host_session(&self) -> Result<PendingSession, NegotiationError> {
        match self {
            Negotiator::Lan(lan) => lan.host_session().await,
            Negotiator::Memory(mem) => mem.host_session(),
        }
    }

    /// Joiner role: consume the remote offer and produce the answer.
    pub async fn join_session(&self, offer: &str) -> Result<PendingSession, NegotiationError> {
        match self {
            Negotiator::Lan(lan) => lan.join_session(offer).await,
            Negotiator::Memory(mem) => mem.join_session(offer),
        }
    }
}
