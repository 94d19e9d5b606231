//! Negotiation State Machine
//!
//! One tagged state per logical connection attempt, with guarded
//! transitions. Anything that does not fit the current state comes back as
//! a `ProtocolViolation` and is never applied, so an out-of-sequence
//! handshake message cannot desynchronize the two ends.

use crate::error::ProtocolViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// A create-room or join-room request is awaiting its acknowledgement.
    CreatingRoom,
    WaitingForPeer,
    Negotiating,
    Connected,
    Transferring,
    Closed,
    Failed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::CreatingRoom => "creating-room",
            NegotiationState::WaitingForPeer => "waiting-for-peer",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Connected => "connected",
            NegotiationState::Transferring => "transferring",
            NegotiationState::Closed => "closed",
            NegotiationState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }
}

#[derive(Debug)]
pub struct StateMachine {
    state: NegotiationState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Idle,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    fn advance(
        &mut self,
        expected: &[NegotiationState],
        next: NegotiationState,
        message: &'static str,
    ) -> Result<(), ProtocolViolation> {
        if expected.contains(&self.state) {
            self.state = next;
            Ok(())
        } else {
            Err(ProtocolViolation {
                message,
                state: self.state.as_str(),
            })
        }
    }

    /// A create-room or join-room was issued.
    pub fn room_requested(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::Idle],
            NegotiationState::CreatingRoom,
            "room request",
        )
    }

    /// The relay acknowledged with room-created / joined-room.
    pub fn room_acknowledged(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::CreatingRoom],
            NegotiationState::WaitingForPeer,
            "room acknowledgement",
        )
    }

    /// The relay rejected the request (or it timed out). Back to idle so
    /// the caller may try again; retry itself is caller policy.
    pub fn room_request_failed(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::CreatingRoom],
            NegotiationState::Idle,
            "room rejection",
        )
    }

    /// Host side: a peer joined the room.
    pub fn peer_joined(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::WaitingForPeer],
            NegotiationState::Negotiating,
            "peer-joined",
        )
    }

    /// Joiner side: the host's offer arrived.
    pub fn offer_received(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::WaitingForPeer],
            NegotiationState::Negotiating,
            "offer",
        )
    }

    /// Host side: the answer arrived. Stays in negotiating until the
    /// channel reports open.
    pub fn answer_received(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::Negotiating],
            NegotiationState::Negotiating,
            "answer",
        )
    }

    /// The direct channel reported open. First point where file bytes may
    /// flow.
    pub fn channel_open(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::Negotiating],
            NegotiationState::Connected,
            "channel open",
        )
    }

    /// A send started or inbound metadata arrived.
    pub fn transfer_started(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::Connected, NegotiationState::Transferring],
            NegotiationState::Transferring,
            "transfer start",
        )
    }

    /// The last active transfer finished (either direction).
    pub fn transfer_finished(&mut self) -> Result<(), ProtocolViolation> {
        self.advance(
            &[NegotiationState::Transferring],
            NegotiationState::Connected,
            "transfer completion",
        )
    }

    /// Reachable from any state.
    pub fn close(&mut self) {
        self.state = NegotiationState::Closed;
    }

    /// Reachable from any state.
    pub fn fail(&mut self) {
        self.state = NegotiationState::Failed;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_happy_path() {
        let mut m = StateMachine::new();
        m.room_requested().unwrap();
        m.room_acknowledged().unwrap();
        m.peer_joined().unwrap();
        m.answer_received().unwrap();
        m.channel_open().unwrap();
        m.transfer_started().unwrap();
        m.transfer_finished().unwrap();
        assert_eq!(m.state(), NegotiationState::Connected);
    }

    #[test]
    fn joiner_happy_path() {
        let mut m = StateMachine::new();
        m.room_requested().unwrap();
        m.room_acknowledged().unwrap();
        m.offer_received().unwrap();
        m.channel_open().unwrap();
        assert_eq!(m.state(), NegotiationState::Connected);
    }

    #[test]
    fn answer_outside_negotiating_is_a_violation() {
        let mut m = StateMachine::new();
        m.room_requested().unwrap();
        m.room_acknowledged().unwrap();
        let err = m.answer_received().unwrap_err();
        assert_eq!(err.state, "waiting-for-peer");
        assert_eq!(err.message, "answer");
        // The machine did not move
        assert_eq!(m.state(), NegotiationState::WaitingForPeer);
    }

    #[test]
    fn duplicate_offer_is_a_violation() {
        let mut m = StateMachine::new();
        m.room_requested().unwrap();
        m.room_acknowledged().unwrap();
        m.offer_received().unwrap();
        assert!(m.offer_received().is_err());
    }

    #[test]
    fn failed_join_returns_to_idle() {
        let mut m = StateMachine::new();
        m.room_requested().unwrap();
        m.room_request_failed().unwrap();
        assert_eq!(m.state(), NegotiationState::Idle);
        // A fresh request is allowed again
        m.room_requested().unwrap();
    }

    #[test]
    fn close_and_fail_are_reachable_from_anywhere() {
        let mut m = StateMachine::new();
        m.close();
        assert!(m.state().is_terminal());

        let mut m = StateMachine::new();
        m.room_requested().unwrap();
        m.fail();
        assert_eq!(m.state(), NegotiationState::Failed);
        assert!(m.state().is_terminal());
    }

    #[test]
    fn concurrent_send_and_receive_keep_transferring() {
        let mut m = StateMachine::new();
        m.room_requested().unwrap();
        m.room_acknowledged().unwrap();
        m.peer_joined().unwrap();
        m.channel_open().unwrap();
        m.transfer_started().unwrap();
        // Second direction starting is not a violation
        m.transfer_started().unwrap();
        assert_eq!(m.state(), NegotiationState::Transferring);
    }
}
