//! In-process substrate.
//!
//! Pairs two endpoints of the same process by offer token. Used by the
//! test suite and the loopback demo; carries the same offer/answer shape
//! as the real substrates so the client code path is identical.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::error::NegotiationError;

use super::{AnswerPayload, DirectChannel, PendingSession, new_token};

type PendingMap = HashMap<String, oneshot::Sender<Result<DirectChannel, NegotiationError>>>;

/// Explicit rendezvous point shared by the endpoints of one test or demo.
#[derive(Clone, Default)]
pub struct MemoryHub {
    pending: Arc<Mutex<PendingMap>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn negotiator(&self) -> MemoryNegotiator {
        MemoryNegotiator { hub: self.clone() }
    }
}

#[derive(Clone)]
pub struct MemoryNegotiator {
    hub: MemoryHub,
}

impl MemoryNegotiator {
    pub fn host_session(&self) -> Result<PendingSession, NegotiationError> {
        let token = new_token();
        let (open_tx, open_rx) = oneshot::channel();
        self.hub
            .pending
            .lock()
            .expect("hub lock poisoned")
            .insert(token.clone(), open_tx);

        let payload = serde_json::to_string(&AnswerPayload {
            token: token.clone(),
        })
        .map_err(|e| NegotiationError::MalformedPayload(e.to_string()))?;

        Ok(PendingSession::new(payload, Vec::new(), token, None, open_rx))
    }

    pub fn join_session(&self, offer: &str) -> Result<PendingSession, NegotiationError> {
        let parsed: AnswerPayload = serde_json::from_str(offer)
            .map_err(|e| NegotiationError::MalformedPayload(e.to_string()))?;

        let host_tx = self
            .hub
            .pending
            .lock()
            .expect("hub lock poisoned")
            .remove(&parsed.token)
            .ok_or_else(|| NegotiationError::Transport("unknown offer token".to_string()))?;

        let (host_chan, join_chan) = DirectChannel::pair();
        let _ = host_tx.send(Ok(host_chan));

        let (open_tx, open_rx) = oneshot::channel();
        let _ = open_tx.send(Ok(join_chan));

        let answer = serde_json::to_string(&AnswerPayload {
            token: parsed.token.clone(),
        })
        .map_err(|e| NegotiationError::MalformedPayload(e.to_string()))?;

        Ok(PendingSession::new(
            answer,
            Vec::new(),
            parsed.token,
            None,
            open_rx,
        ))
    }
}
