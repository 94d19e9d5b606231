//! Chunk encryption with XChaCha20-Poly1305.
//!
//! Sealed format: nonce (24 bytes) || ciphertext || tag (16 bytes). The
//! session key travels out-of-band through the relay as hex; only chunk
//! payloads are sealed — control frames stay in the clear.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};

use crate::error::TransferError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct ChunkCipher {
    cipher: XChaCha20Poly1305,
    key: [u8; KEY_LEN],
}

impl ChunkCipher {
    /// Fresh random session key.
    pub fn generate() -> Self {
        let key = XChaCha20Poly1305::generate_key(&mut OsRng);
        Self {
            cipher: XChaCha20Poly1305::new(&key),
            key: key.into(),
        }
    }

    /// Rebuild from a relay-distributed hex key.
    pub fn from_hex(hex: &str) -> Result<Self, TransferError> {
        let bytes = hex_to_bytes(hex).ok_or(TransferError::Decrypt)?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| TransferError::Decrypt)?;
        Ok(Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
            key,
        })
    }

    /// Hex form for the key-exchange message.
    pub fn key_hex(&self) -> String {
        bytes_to_hex(&self.key)
    }

    /// Seal one chunk. The random 24-byte nonce is prepended.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, TransferError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| TransferError::Encrypt)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open one chunk. Any tampering, truncation, or key mismatch is a
    /// `TransferError::Decrypt`.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, TransferError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(TransferError::Decrypt);
        }
        let nonce = XNonce::from_slice(&sealed[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &sealed[NONCE_LEN..])
            .map_err(|_| TransferError::Decrypt)
    }
}

fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
