//! Signaling Relay
//!
//! A pure router keyed by (room, peer): accepts persistent WebSocket
//! connections, keeps the room/peer directory, and forwards opaque
//! negotiation messages to the right pair of endpoints. Holds no disk
//! state — a restart drops every room.

mod handler;
mod rooms;
mod server;

pub use rooms::RoomDirectory;
pub use server::RelayServer;
