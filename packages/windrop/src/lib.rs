//! windrop — relay-signaled peer-to-peer file drop.
//!
//! Two halves: a signaling [`relay`] that multiplexes transient rooms over
//! WebSocket connections, and a peer [`client`] that drives the
//! offer/answer/candidate handshake to a direct channel and streams files
//! over it in offset-tagged chunks. The relay never sees file bytes and
//! never interprets negotiation payloads.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod transport;
