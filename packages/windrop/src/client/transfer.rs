//! Chunked File Transfer
//!
//! Direct-channel protocol: a JSON `file-metadata` control frame, then the
//! file as offset-tagged binary chunks in strictly increasing order, then a
//! `transfer-complete` control frame. The receiver reassembles by offset,
//! so chunks reordered in flight still land correctly; completion is only
//! accepted once every byte of the announced size is accounted for.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

use super::PeerEvent;
use super::crypto::ChunkCipher;

/// Frame discriminators on the direct channel.
const FRAME_CONTROL: u8 = 0;
const FRAME_CHUNK: u8 = 1;

/// Chunk header: discriminator byte plus big-endian byte offset.
const CHUNK_HEADER_LEN: usize = 1 + 8;

/// Control messages on the direct channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TransferControl {
    FileMetadata {
        name: String,
        size: u64,
        mime_type: String,
    },
    TransferComplete {
        name: String,
    },
}

/// A decoded direct-channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferFrame {
    Control(TransferControl),
    Chunk { offset: u64, data: Vec<u8> },
}

pub fn encode_control(msg: &TransferControl) -> Result<Vec<u8>, TransferError> {
    let json = serde_json::to_vec(msg).map_err(|e| TransferError::MalformedFrame(e.to_string()))?;
    let mut frame = Vec::with_capacity(1 + json.len());
    frame.push(FRAME_CONTROL);
    frame.extend_from_slice(&json);
    Ok(frame)
}

pub fn encode_chunk(offset: u64, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CHUNK_HEADER_LEN + data.len());
    frame.push(FRAME_CHUNK);
    frame.extend_from_slice(&offset.to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

pub fn decode_frame(frame: &[u8]) -> Result<TransferFrame, TransferError> {
    match frame.first() {
        Some(&FRAME_CONTROL) => {
            let msg: TransferControl = serde_json::from_slice(&frame[1..])
                .map_err(|e| TransferError::MalformedFrame(e.to_string()))?;
            Ok(TransferFrame::Control(msg))
        }
        Some(&FRAME_CHUNK) => {
            if frame.len() < CHUNK_HEADER_LEN {
                return Err(TransferError::MalformedFrame(
                    "chunk frame shorter than its header".to_string(),
                ));
            }
            let mut offset_buf = [0u8; 8];
            offset_buf.copy_from_slice(&frame[1..CHUNK_HEADER_LEN]);
            Ok(TransferFrame::Chunk {
                offset: u64::from_be_bytes(offset_buf),
                data: frame[CHUNK_HEADER_LEN..].to_vec(),
            })
        }
        Some(other) => Err(TransferError::MalformedFrame(format!(
            "unknown frame discriminator {other}"
        ))),
        None => Err(TransferError::MalformedFrame("empty frame".to_string())),
    }
}

/// What the sender announces and then streams.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A fully reassembled inbound file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Receiver-side reassembly buffer, keyed by byte offset.
#[derive(Debug)]
pub struct FileTransferSession {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    chunks: BTreeMap<u64, Vec<u8>>,
    received_bytes: u64,
}

impl FileTransferSession {
    pub fn new(name: String, size: u64, mime_type: String) -> Self {
        Self {
            name,
            size,
            mime_type,
            chunks: BTreeMap::new(),
            received_bytes: 0,
        }
    }

    /// Store a chunk at its declared offset. A retransmitted offset
    /// replaces the earlier bytes rather than double-counting them.
    pub fn store_chunk(&mut self, offset: u64, data: Vec<u8>) {
        let len = data.len() as u64;
        if let Some(prior) = self.chunks.insert(offset, data) {
            self.received_bytes -= prior.len() as u64;
        }
        self.received_bytes += len;
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Progress from total received bytes, independent of arrival order.
    pub fn progress_percent(&self) -> f64 {
        if self.size == 0 {
            100.0
        } else {
            (self.received_bytes as f64 / self.size as f64 * 100.0).min(100.0)
        }
    }

    /// Completeness check and reassembly. The offsets must tile the
    /// announced size exactly — any gap, overlap, or total mismatch is
    /// corruption and discards the transfer.
    pub fn try_assemble(self) -> Result<ReceivedFile, TransferError> {
        let mut expected = 0u64;
        for (offset, data) in &self.chunks {
            if *offset != expected {
                return Err(TransferError::SizeMismatch {
                    received: self.received_bytes,
                    announced: self.size,
                });
            }
            expected += data.len() as u64;
        }
        if expected != self.size {
            return Err(TransferError::SizeMismatch {
                received: self.received_bytes,
                announced: self.size,
            });
        }

        let mut bytes = Vec::with_capacity(self.size as usize);
        for data in self.chunks.into_values() {
            bytes.extend_from_slice(&data);
        }
        Ok(ReceivedFile {
            name: self.name,
            size: self.size,
            mime_type: self.mime_type,
            bytes,
        })
    }
}

/// Stream one file over the direct channel: metadata, chunks in strictly
/// increasing offset order, completion marker. Emits a progress event after
/// every chunk; rejects if the channel closes or the transfer is cancelled.
pub async fn run_send(
    channel: mpsc::Sender<Vec<u8>>,
    file: OutgoingFile,
    chunk_size: usize,
    cipher: Option<ChunkCipher>,
    events: mpsc::Sender<PeerEvent>,
    cancel: CancellationToken,
) -> Result<(), TransferError> {
    let size = file.bytes.len() as u64;
    let metadata = TransferControl::FileMetadata {
        name: file.name.clone(),
        size,
        mime_type: file.mime_type.clone(),
    };
    send_frame(&channel, encode_control(&metadata)?, &cancel).await?;

    let mut offset = 0u64;
    for chunk in file.bytes.chunks(chunk_size.max(1)) {
        let payload = match &cipher {
            Some(cipher) => cipher.seal(chunk)?,
            None => chunk.to_vec(),
        };
        send_frame(&channel, encode_chunk(offset, &payload), &cancel).await?;
        offset += chunk.len() as u64;

        let percent = (offset as f64 / size as f64 * 100.0).min(100.0);
        // Progress is lossy on a slow consumer
        let _ = events.try_send(PeerEvent::SendProgress { percent });
    }

    let complete = TransferControl::TransferComplete { name: file.name };
    send_frame(&channel, encode_control(&complete)?, &cancel).await?;
    Ok(())
}

async fn send_frame(
    channel: &mpsc::Sender<Vec<u8>>,
    frame: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::ChannelClosed),
        sent = channel.send(frame) => sent.map_err(|_| TransferError::ChannelClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(size: u64) -> TransferControl {
        TransferControl::FileMetadata {
            name: "report.pdf".to_string(),
            size,
            mime_type: "application/pdf".to_string(),
        }
    }

    #[test]
    fn control_frame_wire_shape() {
        let frame = encode_control(&metadata(40_000)).unwrap();
        assert_eq!(frame[0], FRAME_CONTROL);
        let json: serde_json::Value = serde_json::from_slice(&frame[1..]).unwrap();
        assert_eq!(json["type"], "file-metadata");
        assert_eq!(json["name"], "report.pdf");
        assert_eq!(json["size"], 40_000);
        assert_eq!(json["mimeType"], "application/pdf");
    }

    #[test]
    fn chunk_frame_roundtrip() {
        let frame = encode_chunk(16_384, b"abcdef");
        match decode_frame(&frame).unwrap() {
            TransferFrame::Chunk { offset, data } => {
                assert_eq!(offset, 16_384);
                assert_eq!(data, b"abcdef");
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn transfer_complete_roundtrip() {
        let msg = TransferControl::TransferComplete {
            name: "report.pdf".to_string(),
        };
        let frame = encode_control(&msg).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), TransferFrame::Control(msg));
    }

    #[test]
    fn junk_frames_are_rejected() {
        assert!(matches!(
            decode_frame(&[]),
            Err(TransferError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(&[7, 0, 0]),
            Err(TransferError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(&[FRAME_CHUNK, 0, 0, 0]), // truncated header
            Err(TransferError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(&[FRAME_CONTROL, b'{']),
            Err(TransferError::MalformedFrame(_))
        ));
    }

    #[test]
    fn reassembly_is_order_independent() {
        let payload: Vec<u8> = (0..100u8).collect();
        let mut session =
            FileTransferSession::new("f".to_string(), 100, "application/octet-stream".to_string());
        // Deliver out of order
        session.store_chunk(60, payload[60..].to_vec());
        session.store_chunk(0, payload[..30].to_vec());
        session.store_chunk(30, payload[30..60].to_vec());

        assert_eq!(session.received_bytes(), 100);
        let file = session.try_assemble().unwrap();
        assert_eq!(file.bytes, payload);
    }

    #[test]
    fn retransmitted_offset_does_not_double_count() {
        let mut session = FileTransferSession::new("f".to_string(), 10, "x".to_string());
        session.store_chunk(0, vec![1; 5]);
        session.store_chunk(0, vec![2; 5]);
        session.store_chunk(5, vec![3; 5]);
        assert_eq!(session.received_bytes(), 10);
        let file = session.try_assemble().unwrap();
        assert_eq!(file.bytes, [vec![2; 5], vec![3; 5]].concat());
    }

    #[test]
    fn short_transfer_is_a_size_mismatch() {
        let mut session = FileTransferSession::new("f".to_string(), 40_000, "x".to_string());
        session.store_chunk(0, vec![0; 16_384]);
        session.store_chunk(16_384, vec![0; 16_384]);
        // Final 7 232-byte chunk never arrives
        match session.try_assemble() {
            Err(TransferError::SizeMismatch {
                received,
                announced,
            }) => {
                assert_eq!(received, 32_768);
                assert_eq!(announced, 40_000);
            }
            other => panic!("expected size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn gap_in_offsets_is_a_size_mismatch() {
        let mut session = FileTransferSession::new("f".to_string(), 20, "x".to_string());
        session.store_chunk(0, vec![0; 10]);
        session.store_chunk(15, vec![0; 5]); // bytes 10..15 missing
        assert!(session.try_assemble().is_err());
    }

    #[test]
    fn zero_size_file_completes_with_no_chunks() {
        let session = FileTransferSession::new("empty".to_string(), 0, "x".to_string());
        assert_eq!(session.progress_percent(), 100.0);
        let file = session.try_assemble().unwrap();
        assert!(file.bytes.is_empty());
        assert_eq!(file.size, 0);
    }

    #[test]
    fn progress_tracks_received_bytes() {
        let mut session = FileTransferSession::new("f".to_string(), 200, "x".to_string());
        assert_eq!(session.progress_percent(), 0.0);
        session.store_chunk(100, vec![0; 100]); // out of order still counts
        assert_eq!(session.progress_percent(), 50.0);
        session.store_chunk(0, vec![0; 100]);
        assert_eq!(session.progress_percent(), 100.0);
    }

    #[tokio::test]
    async fn run_send_emits_expected_frames_and_progress() {
        let (tx, mut rx) = mpsc::channel(64);
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let file = OutgoingFile {
            name: "blob.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            bytes: vec![9u8; 40_000],
        };

        run_send(
            tx,
            file,
            16_384,
            None,
            events_tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        // Metadata first
        match decode_frame(&rx.recv().await.unwrap()).unwrap() {
            TransferFrame::Control(TransferControl::FileMetadata { size, .. }) => {
                assert_eq!(size, 40_000);
            }
            other => panic!("expected metadata, got {other:?}"),
        }
        // Three chunks: 16384 + 16384 + 7232, strictly increasing offsets
        let mut offsets = Vec::new();
        let mut lens = Vec::new();
        for _ in 0..3 {
            match decode_frame(&rx.recv().await.unwrap()).unwrap() {
                TransferFrame::Chunk { offset, data } => {
                    offsets.push(offset);
                    lens.push(data.len());
                }
                other => panic!("expected chunk, got {other:?}"),
            }
        }
        assert_eq!(offsets, vec![0, 16_384, 32_768]);
        assert_eq!(lens, vec![16_384, 16_384, 7_232]);
        // Completion marker last
        match decode_frame(&rx.recv().await.unwrap()).unwrap() {
            TransferFrame::Control(TransferControl::TransferComplete { name }) => {
                assert_eq!(name, "blob.bin");
            }
            other => panic!("expected transfer-complete, got {other:?}"),
        }

        // Non-decreasing progress ending at 100
        let mut last = 0.0;
        let mut count = 0;
        while let Ok(event) = events_rx.try_recv() {
            if let PeerEvent::SendProgress { percent } = event {
                assert!(percent >= last);
                last = percent;
                count += 1;
            }
        }
        assert_eq!(count, 3);
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn run_send_zero_byte_file() {
        let (tx, mut rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(8);
        let file = OutgoingFile {
            name: "empty".to_string(),
            mime_type: "text/plain".to_string(),
            bytes: Vec::new(),
        };
        run_send(tx, file, 16_384, None, events_tx, CancellationToken::new())
            .await
            .unwrap();

        // Metadata then completion, zero chunks
        assert!(matches!(
            decode_frame(&rx.recv().await.unwrap()).unwrap(),
            TransferFrame::Control(TransferControl::FileMetadata { size: 0, .. })
        ));
        assert!(matches!(
            decode_frame(&rx.recv().await.unwrap()).unwrap(),
            TransferFrame::Control(TransferControl::TransferComplete { .. })
        ));
        assert!(rx.recv().await.is_none() || rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_send_rejects_when_channel_closes() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (events_tx, _events_rx) = mpsc::channel(8);
        let file = OutgoingFile {
            name: "f".to_string(),
            mime_type: "x".to_string(),
            bytes: vec![0; 100],
        };
        let err = run_send(tx, file, 16, None, events_tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ChannelClosed));
    }

    #[tokio::test]
    async fn run_send_rejects_on_cancellation() {
        let (tx, _rx) = mpsc::channel(1); // tiny buffer so the send parks
        let (events_tx, _events_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let file = OutgoingFile {
            name: "f".to_string(),
            mime_type: "x".to_string(),
            bytes: vec![0; 1024],
        };

        let handle = tokio::spawn(run_send(tx, file, 16, None, events_tx, cancel.clone()));
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::ChannelClosed));
    }

    #[tokio::test]
    async fn encrypted_send_reassembles_after_decrypt() {
        let cipher = ChunkCipher::generate();
        let (tx, mut rx) = mpsc::channel(64);
        let (events_tx, _events_rx) = mpsc::channel(64);
        let payload: Vec<u8> = (0..255u8).cycle().take(1000).collect();
        let file = OutgoingFile {
            name: "enc.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            bytes: payload.clone(),
        };

        run_send(
            tx,
            file,
            256,
            Some(cipher.clone()),
            events_tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut session =
            FileTransferSession::new("enc.bin".to_string(), 1000, "application/octet-stream".to_string());
        while let Ok(frame) = rx.try_recv() {
            if let TransferFrame::Chunk { offset, data } = decode_frame(&frame).unwrap() {
                // Sealed payload is larger than the plaintext slice
                assert!(data.len() > 256.min(1000 - offset as usize));
                session.store_chunk(offset, cipher.open(&data).unwrap());
            }
        }
        assert_eq!(session.try_assemble().unwrap().bytes, payload);
    }
}
