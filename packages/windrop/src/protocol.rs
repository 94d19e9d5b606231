//! Signaling Protocol Types
//!
//! Wire messages exchanged with the relay over the signaling WebSocket.
//! Tags and field names are kebab-case / camelCase JSON to stay compatible
//! with non-Rust peers.

use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a relay-generated room id. 26 alphanumeric characters carry
/// ~155 bits of entropy, comfortably past the unguessability floor.
pub const ROOM_ID_LEN: usize = 26;

/// Generate an unguessable room id.
pub fn generate_room_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), ROOM_ID_LEN)
}

/// Discovery partition for a room. The relay treats this as an opaque
/// partition key; it never affects routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomVisibility {
    /// Discoverable only by peers on the same network.
    IpLocal,
    #[default]
    Public,
    /// Reachable only by sharing the room id out of band.
    Secret,
}

/// Device class reported by a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Laptop,
    Phone,
    Tablet,
}

/// Caller-supplied device description. The relay never validates this — it
/// re-serializes whatever JSON the peer sent. The typed form is for clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            device_type,
            os: None,
            browser: None,
        }
    }

    /// Opaque form for the wire. Infallible: `DeviceInfo` has no
    /// non-serializable fields.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Lenient typed view of a relayed payload. Peers on other stacks may
    /// send extra or missing fields; anything unreadable collapses to the
    /// defaults rather than failing the event.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::debug!("unreadable device info payload: {e}");
            Self::default()
        })
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            device_type: DeviceType::default(),
            os: None,
            browser: None,
        }
    }
}

/// Messages sent FROM a peer TO the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalRequest {
    /// Allocate a room and bind the caller as its host
    CreateRoom {
        #[serde(default)]
        visibility: RoomVisibility,
    },
    /// Join an existing room
    JoinRoom {
        room_id: String,
        #[serde(default)]
        device_info: serde_json::Value,
    },
    /// Session offer, relayed verbatim to `target`
    Offer { target: Uuid, sdp: String },
    /// Session answer, relayed verbatim to `target`
    Answer { target: Uuid, sdp: String },
    /// Transport candidate, relayed verbatim to `target`
    IceCandidate { target: Uuid, candidate: String },
    /// Broadcast a device-info refresh to the other members of the room
    DeviceInfoUpdate { device_info: serde_json::Value },
    /// Hand a transfer session key to `target` (optional encryption path)
    KeyExchange { target: Uuid, key: String },
}

/// Messages sent FROM the relay TO a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalEvent {
    RoomCreated { room_id: String },
    JoinedRoom { room_id: String },
    Error { message: String },
    /// To the host: a peer joined its room
    PeerJoined {
        peer_id: Uuid,
        device_info: serde_json::Value,
    },
    /// To the host: a member disconnected
    PeerLeft { peer_id: Uuid },
    /// To every member: the host disconnected or the room idled out
    RoomClosed { room_id: String },
    Offer { sdp: String, from: Uuid },
    Answer { sdp: String, from: Uuid },
    IceCandidate { candidate: String, from: Uuid },
    PeerDeviceInfo { device_info: serde_json::Value },
    SessionKey { key: String, from: Uuid },
}
