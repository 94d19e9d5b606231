//! Direct TCP substrate.
//!
//! The offer carries a rendezvous token plus the host's listening
//! addresses; ice-candidates carry any further addresses; the answer
//! acknowledges the token. The first connection that presents the right
//! token becomes the direct channel.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, tcp};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::NegotiationError;

use super::framing;
use super::{AnswerPayload, CHANNEL_BUFFER, DirectChannel, PendingSession, new_token};

/// Per-address connect attempt bound. Candidates keep arriving, so one slow
/// address must not starve the rest.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);

const HANDSHAKE_ACK: &[u8] = b"windrop-ack";

#[derive(Serialize, Deserialize)]
struct OfferPayload {
    token: String,
    addrs: Vec<SocketAddr>,
}

#[derive(Clone)]
pub struct LanNegotiator {
    bind_addr: SocketAddr,
}

impl LanNegotiator {
    /// `bind_addr` is where the host role listens; port 0 picks an
    /// ephemeral port. The bound address is what gets advertised in the
    /// offer, so bind the interface the peer can actually reach.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }

    pub async fn host_session(&self) -> Result<PendingSession, NegotiationError> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;

        let token = new_token();
        let offer = OfferPayload {
            token: token.clone(),
            addrs: vec![local],
        };
        let payload = serde_json::to_string(&offer)
            .map_err(|e| NegotiationError::MalformedPayload(e.to_string()))?;

        let (open_tx, open_rx) = oneshot::channel();
        let expected = token.clone();
        tokio::spawn(async move {
            let _ = open_tx.send(accept_peer(listener, expected).await);
        });

        Ok(PendingSession::new(payload, Vec::new(), token, None, open_rx))
    }

    pub async fn join_session(&self, offer: &str) -> Result<PendingSession, NegotiationError> {
        let parsed: OfferPayload = serde_json::from_str(offer)
            .map_err(|e| NegotiationError::MalformedPayload(e.to_string()))?;
        let answer = serde_json::to_string(&AnswerPayload {
            token: parsed.token.clone(),
        })
        .map_err(|e| NegotiationError::MalformedPayload(e.to_string()))?;

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        for addr in &parsed.addrs {
            let _ = candidate_tx.send(addr.to_string());
        }

        let (open_tx, open_rx) = oneshot::channel();
        let token = parsed.token.clone();
        tokio::spawn(async move {
            let _ = open_tx.send(connect_peer(candidate_rx, token).await);
        });

        Ok(PendingSession::new(
            answer,
            Vec::new(),
            parsed.token,
            Some(candidate_tx),
            open_rx,
        ))
    }
}

/// Host side: accept until a connection presents the rendezvous token.
async fn accept_peer(
    listener: TcpListener,
    token: String,
) -> Result<DirectChannel, NegotiationError> {
    loop {
        let (mut stream, addr) = listener
            .accept()
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;

        match framing::read_frame(&mut stream).await {
            Ok(Some(frame)) if frame == token.as_bytes() => {
                framing::write_frame(&mut stream, HANDSHAKE_ACK)
                    .await
                    .map_err(|e| NegotiationError::Transport(e.to_string()))?;
                debug!(%addr, "direct channel accepted");
                return Ok(spawn_pumps(stream));
            }
            _ => {
                warn!(%addr, "rejecting connection with bad handshake token");
            }
        }
    }
}

/// Joiner side: try candidate addresses as they arrive until one answers
/// the handshake.
async fn connect_peer(
    mut candidates: mpsc::UnboundedReceiver<String>,
    token: String,
) -> Result<DirectChannel, NegotiationError> {
    while let Some(raw) = candidates.recv().await {
        let Ok(addr) = raw.parse::<SocketAddr>() else {
            debug!(candidate = %raw, "ignoring unparseable candidate");
            continue;
        };
        let mut stream =
            match tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(%addr, "connect failed: {e}");
                    continue;
                }
                Err(_) => {
                    debug!(%addr, "connect attempt timed out");
                    continue;
                }
            };

        if framing::write_frame(&mut stream, token.as_bytes())
            .await
            .is_err()
        {
            continue;
        }
        match framing::read_frame(&mut stream).await {
            Ok(Some(ack)) if ack == HANDSHAKE_ACK => {
                debug!(%addr, "direct channel connected");
                return Ok(spawn_pumps(stream));
            }
            _ => continue,
        }
    }
    Err(NegotiationError::Transport(
        "no reachable candidate address".to_string(),
    ))
}

/// Bridge a connected stream into a [`DirectChannel`] with one pump task
/// per direction. Either side going away drops its pump, which closes the
/// channel for the owner.
fn spawn_pumps(stream: TcpStream) -> DirectChannel {
    let (read_half, write_half) = stream.into_split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_BUFFER);

    tokio::spawn(read_pump(read_half, inbound_tx));
    tokio::spawn(write_pump(write_half, outbound_rx));

    DirectChannel::new(outbound_tx, inbound_rx)
}

async fn read_pump(mut read_half: tcp::OwnedReadHalf, inbound_tx: mpsc::Sender<Vec<u8>>) {
    loop {
        match framing::read_frame(&mut read_half).await {
            Ok(Some(frame)) => {
                if inbound_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("direct channel read error: {e}");
                break;
            }
        }
    }
}

async fn write_pump(mut write_half: tcp::OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = framing::write_frame(&mut write_half, &frame).await {
            debug!("direct channel write error: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> LanNegotiator {
        LanNegotiator::new("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn offer_answer_establishes_both_channels() {
        let negotiator = loopback();
        let mut host = negotiator.host_session().await.unwrap();
        let mut joiner = negotiator.join_session(&host.payload).await.unwrap();

        host.apply_answer(&joiner.payload).unwrap();

        let host_chan = host.take_open_rx().unwrap().await.unwrap().unwrap();
        let mut join_chan = joiner.take_open_rx().unwrap().await.unwrap().unwrap();

        host_chan.send(b"over tcp".to_vec()).await.unwrap();
        assert_eq!(join_chan.recv().await.unwrap(), b"over tcp");
    }

    #[tokio::test]
    async fn wrong_token_connection_is_rejected() {
        let negotiator = loopback();
        let mut host = negotiator.host_session().await.unwrap();
        let offer: OfferPayload = serde_json::from_str(&host.payload).unwrap();
        let addr = offer.addrs[0];

        // An interloper with the wrong token gets no ack...
        let mut bad = TcpStream::connect(addr).await.unwrap();
        framing::write_frame(&mut bad, b"wrong-token").await.unwrap();

        // ...while the real joiner still gets through afterwards
        let mut joiner = negotiator.join_session(&host.payload).await.unwrap();
        let host_chan = host.take_open_rx().unwrap().await.unwrap().unwrap();
        let mut join_chan = joiner.take_open_rx().unwrap().await.unwrap().unwrap();

        host_chan.send(b"still works".to_vec()).await.unwrap();
        assert_eq!(join_chan.recv().await.unwrap(), b"still works");
    }

    #[tokio::test]
    async fn answer_with_foreign_token_is_refused() {
        let negotiator = loopback();
        let mut host = negotiator.host_session().await.unwrap();
        let forged = serde_json::to_string(&AnswerPayload {
            token: "someone-else".to_string(),
        })
        .unwrap();
        assert!(matches!(
            host.apply_answer(&forged),
            Err(NegotiationError::TokenMismatch)
        ));
    }

    #[tokio::test]
    async fn malformed_offer_is_refused() {
        let negotiator = loopback();
        let err = negotiator.join_session("not json").await.unwrap_err();
        assert!(matches!(err, NegotiationError::MalformedPayload(_)));
    }
}
