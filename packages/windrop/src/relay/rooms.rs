//! Room Directory
//!
//! In-memory directory of rooms and connected peers, shared by every
//! signaling connection handler. One coarse lock over the whole directory:
//! rooms are short-lived and low-volume, so fine-grained locking buys
//! nothing here.
//!
//! All delivery is fire-and-forget: a peer whose outbound queue is full or
//! whose connection is gone simply misses the event. Nothing in here ever
//! blocks on another connection's I/O.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{RoomVisibility, SignalEvent, generate_room_id};

/// Outbound queue depth per peer connection.
pub const PEER_OUTBOUND_BUFFER: usize = 64;

pub struct RoomDirectory {
    inner: RwLock<Directory>,
}

#[derive(Default)]
struct Directory {
    rooms: HashMap<String, Room>,
    peers: HashMap<Uuid, PeerEntry>,
}

struct Room {
    #[allow(dead_code)]
    visibility: RoomVisibility,
    host: Uuid,
    members: HashSet<Uuid>,
    last_activity: Instant,
}

struct PeerEntry {
    tx: mpsc::Sender<SignalEvent>,
    /// Room this connection currently belongs to (as host or member).
    room_id: Option<String>,
}

impl PeerEntry {
    /// Fire-and-forget delivery. A full queue or vanished peer is the
    /// receiver's problem, never the sender's.
    fn deliver(&self, event: SignalEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("dropping event for unreachable peer: {e}");
        }
    }
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Directory::default()),
        }
    }

    /// Register a new connection and assign it a peer id.
    pub async fn register(&self, tx: mpsc::Sender<SignalEvent>) -> Uuid {
        let peer_id = Uuid::new_v4();
        let mut dir = self.inner.write().await;
        dir.peers.insert(peer_id, PeerEntry { tx, room_id: None });
        peer_id
    }

    /// Allocate a room with the caller as host and acknowledge it.
    pub async fn create_room(&self, peer_id: Uuid, visibility: RoomVisibility) {
        let mut dir = self.inner.write().await;
        if !dir.peers.contains_key(&peer_id) {
            return;
        }
        // A connection belongs to at most one room; hosting a new one
        // implicitly leaves (or closes) the previous one.
        dir.detach_from_room(peer_id);

        let room_id = generate_room_id();
        dir.rooms.insert(
            room_id.clone(),
            Room {
                visibility,
                host: peer_id,
                members: HashSet::new(),
                last_activity: Instant::now(),
            },
        );
        if let Some(entry) = dir.peers.get_mut(&peer_id) {
            entry.room_id = Some(room_id.clone());
            entry.deliver(SignalEvent::RoomCreated {
                room_id: room_id.clone(),
            });
        }
        info!(room = %room_id, host = %peer_id, "room created");
    }

    /// Add the caller to an existing room, acknowledging the joiner and
    /// notifying the host. An absent room is an error to the joiner only.
    pub async fn join_room(&self, peer_id: Uuid, room_id: &str, device_info: serde_json::Value) {
        let mut dir = self.inner.write().await;
        if !dir.peers.contains_key(&peer_id) {
            return;
        }

        if !dir.rooms.contains_key(room_id) {
            if let Some(entry) = dir.peers.get(&peer_id) {
                entry.deliver(SignalEvent::Error {
                    message: "Room not found".to_string(),
                });
            }
            debug!(room = %room_id, peer = %peer_id, "join rejected: no such room");
            return;
        }

        dir.detach_from_room(peer_id);

        let Some(room) = dir.rooms.get_mut(room_id) else {
            return;
        };
        room.members.insert(peer_id);
        room.last_activity = Instant::now();
        let host = room.host;

        if let Some(entry) = dir.peers.get_mut(&peer_id) {
            entry.room_id = Some(room_id.to_string());
            entry.deliver(SignalEvent::JoinedRoom {
                room_id: room_id.to_string(),
            });
        }
        if let Some(host_entry) = dir.peers.get(&host) {
            host_entry.deliver(SignalEvent::PeerJoined {
                peer_id,
                device_info,
            });
        }
        info!(room = %room_id, peer = %peer_id, "peer joined room");
    }

    /// Relay a negotiation payload to `target`, verbatim. The payload is
    /// only forwarded when sender and target share a room; anything else is
    /// logged and dropped without telling either side.
    pub async fn relay_to(&self, sender: Uuid, target: Uuid, event: SignalEvent) {
        let mut dir = self.inner.write().await;
        if !dir.same_room(sender, target) {
            warn!(%sender, %target, "dropping relay to peer outside sender's room");
            return;
        }
        if let Some(room_id) = dir.peers.get(&sender).and_then(|p| p.room_id.clone()) {
            if let Some(room) = dir.rooms.get_mut(&room_id) {
                room.last_activity = Instant::now();
            }
        }
        if let Some(entry) = dir.peers.get(&target) {
            entry.deliver(event);
        }
    }

    /// Broadcast a device-info refresh to the other joined members of the
    /// caller's room. The host learns device info from `peer-joined`, so it
    /// is not in the fanout.
    pub async fn broadcast_device_info(&self, sender: Uuid, device_info: serde_json::Value) {
        let mut dir = self.inner.write().await;
        let Some(room_id) = dir.peers.get(&sender).and_then(|p| p.room_id.clone()) else {
            debug!(peer = %sender, "device-info-update from peer outside any room");
            return;
        };
        let Some(room) = dir.rooms.get_mut(&room_id) else {
            return;
        };
        room.last_activity = Instant::now();
        let recipients: Vec<Uuid> = room
            .members
            .iter()
            .copied()
            .filter(|m| *m != sender)
            .collect();
        for member in recipients {
            if let Some(entry) = dir.peers.get(&member) {
                entry.deliver(SignalEvent::PeerDeviceInfo {
                    device_info: device_info.clone(),
                });
            }
        }
    }

    /// Remove a disconnected peer and clean up its room membership. Called
    /// synchronously from the connection handler's exit path.
    pub async fn disconnect(&self, peer_id: Uuid) {
        let mut dir = self.inner.write().await;
        dir.detach_from_room(peer_id);
        dir.peers.remove(&peer_id);
    }

    /// Close rooms with no peer activity for longer than `max_idle`,
    /// exactly as if their hosts had disconnected.
    pub async fn sweep_idle(&self, max_idle: Duration) {
        let mut dir = self.inner.write().await;
        let stale: Vec<String> = dir
            .rooms
            .iter()
            .filter(|(_, room)| room.last_activity.elapsed() > max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        for room_id in stale {
            info!(room = %room_id, "closing idle room");
            dir.close_room(&room_id);
        }
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    /// Number of registered peer connections.
    pub async fn peer_count(&self) -> usize {
        self.inner.read().await.peers.len()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// Both peers exist and share a room (as host or member).
    fn same_room(&self, a: Uuid, b: Uuid) -> bool {
        match (self.peers.get(&a), self.peers.get(&b)) {
            (Some(pa), Some(pb)) => {
                pa.room_id.is_some() && pa.room_id == pb.room_id
            }
            _ => false,
        }
    }

    /// Remove a peer from whatever room it is in. Hosts take the room down
    /// with them; members are removed and announced to the host.
    fn detach_from_room(&mut self, peer_id: Uuid) {
        let Some(room_id) = self
            .peers
            .get_mut(&peer_id)
            .and_then(|entry| entry.room_id.take())
        else {
            return;
        };
        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };

        if room.host == peer_id {
            self.close_room(&room_id);
        } else {
            let host = room.host;
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.members.remove(&peer_id);
                room.last_activity = Instant::now();
            }
            if let Some(host_entry) = self.peers.get(&host) {
                host_entry.deliver(SignalEvent::PeerLeft { peer_id });
            }
            info!(room = %room_id, peer = %peer_id, "peer left room");
        }
    }

    /// Delete a room, notifying every participant still connected.
    fn close_room(&mut self, room_id: &str) {
        let Some(room) = self.rooms.remove(room_id) else {
            return;
        };
        for participant in room.members.iter().chain(std::iter::once(&room.host)) {
            if let Some(entry) = self.peers.get_mut(participant) {
                entry.room_id = None;
                entry.deliver(SignalEvent::RoomClosed {
                    room_id: room_id.to_string(),
                });
            }
        }
        info!(room = %room_id, "room closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn peer(dir: &RoomDirectory) -> (Uuid, mpsc::Receiver<SignalEvent>) {
        let (tx, rx) = mpsc::channel(PEER_OUTBOUND_BUFFER);
        (dir.register(tx).await, rx)
    }

    fn device() -> serde_json::Value {
        serde_json::json!({"name":"test","deviceType":"laptop"})
    }

    #[tokio::test]
    async fn create_then_join_notifies_both_sides() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        let (joiner, mut joiner_rx) = peer(&dir).await;

        dir.create_room(host, RoomVisibility::Public).await;
        let room_id = match host_rx.recv().await.unwrap() {
            SignalEvent::RoomCreated { room_id } => room_id,
            other => panic!("expected room-created, got {other:?}"),
        };

        dir.join_room(joiner, &room_id, device()).await;

        match joiner_rx.recv().await.unwrap() {
            SignalEvent::JoinedRoom { room_id: r } => assert_eq!(r, room_id),
            other => panic!("expected joined-room, got {other:?}"),
        }
        match host_rx.recv().await.unwrap() {
            SignalEvent::PeerJoined { peer_id, .. } => assert_eq!(peer_id, joiner),
            other => panic!("expected peer-joined, got {other:?}"),
        }
        // Exactly one notification each
        assert!(host_rx.try_recv().is_err());
        assert!(joiner_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_missing_room_errors_joiner_only() {
        let dir = RoomDirectory::new();
        let (joiner, mut joiner_rx) = peer(&dir).await;

        dir.join_room(joiner, "nope", device()).await;

        match joiner_rx.recv().await.unwrap() {
            SignalEvent::Error { message } => assert_eq!(message, "Room not found"),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(dir.room_count().await, 0);
    }

    #[tokio::test]
    async fn relay_reaches_roommate_verbatim() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        let (joiner, mut joiner_rx) = peer(&dir).await;

        dir.create_room(host, RoomVisibility::Public).await;
        let room_id = match host_rx.recv().await.unwrap() {
            SignalEvent::RoomCreated { room_id } => room_id,
            _ => unreachable!(),
        };
        dir.join_room(joiner, &room_id, device()).await;
        let _ = host_rx.recv().await; // peer-joined
        let _ = joiner_rx.recv().await; // joined-room

        dir.relay_to(
            host,
            joiner,
            SignalEvent::Offer {
                sdp: "opaque-offer".to_string(),
                from: host,
            },
        )
        .await;

        match joiner_rx.recv().await.unwrap() {
            SignalEvent::Offer { sdp, from } => {
                assert_eq!(sdp, "opaque-offer");
                assert_eq!(from, host);
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relay_outside_room_is_dropped() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        let (stranger, mut stranger_rx) = peer(&dir).await;

        dir.create_room(host, RoomVisibility::Public).await;
        let _ = host_rx.recv().await;

        dir.relay_to(
            stranger,
            host,
            SignalEvent::Answer {
                sdp: "x".to_string(),
                from: stranger,
            },
        )
        .await;

        assert!(host_rx.try_recv().is_err());
        assert!(stranger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn host_disconnect_closes_room_for_every_member() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        dir.create_room(host, RoomVisibility::Public).await;
        let room_id = match host_rx.recv().await.unwrap() {
            SignalEvent::RoomCreated { room_id } => room_id,
            _ => unreachable!(),
        };

        let n = 3;
        let mut member_rxs = Vec::new();
        for _ in 0..n {
            let (m, mut rx) = peer(&dir).await;
            dir.join_room(m, &room_id, device()).await;
            let _ = rx.recv().await; // joined-room
            member_rxs.push(rx);
        }

        dir.disconnect(host).await;

        for rx in &mut member_rxs {
            loop {
                match rx.recv().await.unwrap() {
                    SignalEvent::RoomClosed { room_id: r } => {
                        assert_eq!(r, room_id);
                        break;
                    }
                    // device-info fanout from later joiners is fine to skip
                    SignalEvent::PeerDeviceInfo { .. } => continue,
                    other => panic!("expected room-closed, got {other:?}"),
                }
            }
            assert!(rx.try_recv().is_err(), "exactly one room-closed per member");
        }
        assert_eq!(dir.room_count().await, 0);
    }

    #[tokio::test]
    async fn member_disconnect_announces_peer_left() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        let (member, mut member_rx) = peer(&dir).await;

        dir.create_room(host, RoomVisibility::Public).await;
        let room_id = match host_rx.recv().await.unwrap() {
            SignalEvent::RoomCreated { room_id } => room_id,
            _ => unreachable!(),
        };
        dir.join_room(member, &room_id, device()).await;
        let _ = host_rx.recv().await;
        let _ = member_rx.recv().await;

        dir.disconnect(member).await;

        match host_rx.recv().await.unwrap() {
            SignalEvent::PeerLeft { peer_id } => assert_eq!(peer_id, member),
            other => panic!("expected peer-left, got {other:?}"),
        }
        assert_eq!(dir.room_count().await, 1, "room survives a member leaving");
    }

    #[tokio::test]
    async fn device_info_update_is_idempotent_fanout() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        let (a, mut a_rx) = peer(&dir).await;
        let (b, mut b_rx) = peer(&dir).await;

        dir.create_room(host, RoomVisibility::Public).await;
        let room_id = match host_rx.recv().await.unwrap() {
            SignalEvent::RoomCreated { room_id } => room_id,
            _ => unreachable!(),
        };
        dir.join_room(a, &room_id, device()).await;
        dir.join_room(b, &room_id, device()).await;
        let _ = a_rx.recv().await;
        let _ = b_rx.recv().await;

        let info = serde_json::json!({"name":"renamed","deviceType":"phone"});
        dir.broadcast_device_info(a, info.clone()).await;
        dir.broadcast_device_info(a, info.clone()).await;

        // b observes exactly the two broadcasts, nothing more
        for _ in 0..2 {
            match b_rx.recv().await.unwrap() {
                SignalEvent::PeerDeviceInfo { device_info } => assert_eq!(device_info, info),
                other => panic!("expected peer-device-info, got {other:?}"),
            }
        }
        assert!(b_rx.try_recv().is_err());
        // the sender hears nothing back
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn idle_rooms_are_swept() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        dir.create_room(host, RoomVisibility::Secret).await;
        let _ = host_rx.recv().await;
        assert_eq!(dir.room_count().await, 1);

        // Zero tolerance: everything is stale
        dir.sweep_idle(Duration::ZERO).await;

        assert_eq!(dir.room_count().await, 0);
        match host_rx.recv().await.unwrap() {
            SignalEvent::RoomClosed { .. } => {}
            other => panic!("expected room-closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_outbound_queue_never_blocks() {
        let dir = RoomDirectory::new();
        let (host, mut host_rx) = peer(&dir).await;
        dir.create_room(host, RoomVisibility::Public).await;
        let room_id = match host_rx.recv().await.unwrap() {
            SignalEvent::RoomCreated { room_id } => room_id,
            _ => unreachable!(),
        };

        // Member with a tiny queue that is never drained
        let (tx, _member_rx) = mpsc::channel(1);
        let member = dir.register(tx).await;
        dir.join_room(member, &room_id, device()).await; // joined-room fills the queue
        let _ = host_rx.recv().await; // peer-joined

        // These overflow the member's queue and must drop silently instead
        // of blocking the host's handler
        for _ in 0..10 {
            dir.relay_to(
                host,
                member,
                SignalEvent::IceCandidate {
                    candidate: "c".to_string(),
                    from: host,
                },
            )
            .await;
        }
        assert_eq!(dir.room_count().await, 1);
    }
}
