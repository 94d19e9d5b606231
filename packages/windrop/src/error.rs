//! Error types for the peer client.
//!
//! Each failure family gets its own enum so callers can match on the class
//! of failure without string inspection; `ClientError` is the umbrella the
//! public operations return.

use std::time::Duration;

/// The signaling link could not be established or was lost.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("signaling relay unreachable: {0}")]
    Unreachable(String),

    #[error("timed out connecting to signaling relay after {0:?}")]
    Timeout(Duration),

    #[error("signaling link dropped")]
    LinkDropped,
}

/// Room creation or join failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,

    #[error("timed out waiting for room acknowledgement after {0:?}")]
    AckTimeout(Duration),

    #[error("relay rejected the request: {0}")]
    Rejected(String),
}

/// The offer/answer/candidate handshake failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NegotiationError {
    #[error("malformed negotiation payload: {0}")]
    MalformedPayload(String),

    #[error("negotiation timed out after {0:?}")]
    Timeout(Duration),

    #[error("handshake token mismatch")]
    TokenMismatch,

    #[error("transport failed: {0}")]
    Transport(String),
}

/// A file transfer aborted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error("direct channel closed mid-transfer")]
    ChannelClosed,

    #[error("received {received} bytes but metadata announced {announced}")]
    SizeMismatch { received: u64, announced: u64 },

    #[error("chunk decryption failed")]
    Decrypt,

    #[error("chunk encryption failed")]
    Encrypt,

    #[error("malformed transfer frame: {0}")]
    MalformedFrame(String),

    #[error("chunk arrived before any file metadata")]
    NoSession,

    #[error("a send is already in flight on this channel")]
    SendInProgress,

    #[error("no open direct channel")]
    NotConnected,

    #[error("could not read source file: {0}")]
    Source(String),
}

/// A message arrived that is not valid in the current state. Rejected, never
/// applied, so the two state machines cannot silently desynchronize.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unexpected {message} in state {state}")]
pub struct ProtocolViolation {
    pub message: &'static str,
    pub state: &'static str,
}

/// Umbrella error returned by the public client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("client is closed")]
    Closed,
}
