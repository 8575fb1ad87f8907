//! Authenticated stream encryption for peer sessions.
//!
//! Each session direction is an independent, stateful stream built on
//! XChaCha20-Poly1305. The encryptor generates a fresh 32-byte key and a
//! 24-byte header; both travel to the peer inside the signed handshake.
//! The header doubles as the base nonce, and the per-frame nonce is the
//! header with its trailing 8 bytes XOR-ed with a big-endian frame counter,
//! so the same (key, header) pair never seals two frames alike.
//!
//! Every frame carries a one-byte tag in front of the plaintext. `MESSAGE`
//! is ordinary data; `FINAL` announces that the remote side is closing.
//! Any other tag is rejected as a protocol violation.

use crate::error::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a stream key in bytes.
pub const KEY_BYTES: usize = 32;

/// Size of a stream header in bytes. Also the XChaCha20 nonce size.
pub const HEADER_BYTES: usize = 24;

/// Per-frame ciphertext overhead: one tag byte plus the 16-byte MAC.
pub const STREAM_ABYTES: usize = 17;

/// Frame tag prepended to every plaintext before sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamTag {
    /// An ordinary data frame.
    Message = 0x00,
    /// The sender is closing its half of the stream.
    Final = 0x03,
}

impl StreamTag {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Self::Message),
            0x03 => Ok(Self::Final),
            other => Err(Error::Crypto(format!("unknown stream tag {:#04x}", other))),
        }
    }
}

/// A 32-byte stream key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StreamKey([u8; KEY_BYTES]);

impl StreamKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Restore a key received in a handshake.
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes, for embedding into an outbound handshake.
    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamKey([REDACTED])")
    }
}

/// A 24-byte stream header, chosen by the encryptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader([u8; HEADER_BYTES]);

impl StreamHeader {
    /// Generate a fresh random header.
    pub fn generate() -> Self {
        let mut bytes = [0u8; HEADER_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Restore a header received in a handshake.
    pub fn from_bytes(bytes: [u8; HEADER_BYTES]) -> Self {
        Self(bytes)
    }

    /// Raw header bytes.
    pub fn as_bytes(&self) -> &[u8; HEADER_BYTES] {
        &self.0
    }
}

fn nonce_for(header: &StreamHeader, counter: u64) -> XNonce {
    let mut nonce = header.0;
    let ctr = counter.to_be_bytes();
    for (n, c) in nonce[HEADER_BYTES - 8..].iter_mut().zip(ctr.iter()) {
        *n ^= c;
    }
    XNonce::from(nonce)
}

/// The sending half of a stream (push mode).
pub struct EncryptStream {
    cipher: XChaCha20Poly1305,
    header: StreamHeader,
    counter: u64,
    finalized: bool,
}

impl EncryptStream {
    /// Initialize the outbound stream from a key and header.
    pub fn new(key: &StreamKey, header: StreamHeader) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            header,
            counter: 0,
            finalized: false,
        }
    }

    /// Seal one frame. Output length is `plaintext.len() + STREAM_ABYTES`.
    pub fn push(&mut self, plaintext: &[u8], tag: StreamTag) -> Result<Vec<u8>> {
        if self.finalized {
            return Err(Error::Crypto("stream already finalized".into()));
        }

        let mut framed = Vec::with_capacity(plaintext.len() + 1);
        framed.push(tag as u8);
        framed.extend_from_slice(plaintext);

        let nonce = nonce_for(&self.header, self.counter);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, framed.as_ref())
            .map_err(|_| Error::Crypto("stream encryption failed".into()))?;

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("stream counter exhausted".into()))?;

        if tag == StreamTag::Final {
            self.finalized = true;
        }

        Ok(ciphertext)
    }
}

impl std::fmt::Debug for EncryptStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptStream")
            .field("counter", &self.counter)
            .field("finalized", &self.finalized)
            .finish()
    }
}

/// The receiving half of a stream (pull mode).
pub struct DecryptStream {
    cipher: XChaCha20Poly1305,
    header: StreamHeader,
    counter: u64,
    finalized: bool,
}

impl DecryptStream {
    /// Initialize the inbound stream from the peer's key and header.
    pub fn new(key: &StreamKey, header: StreamHeader) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            header,
            counter: 0,
            finalized: false,
        }
    }

    /// Open one frame. Fails with [`Error::Crypto`] if any byte was tampered
    /// with or frames arrive out of order.
    pub fn pull(&mut self, ciphertext: &[u8]) -> Result<(Vec<u8>, StreamTag)> {
        if self.finalized {
            return Err(Error::Crypto("stream already finalized".into()));
        }
        if ciphertext.len() < STREAM_ABYTES {
            return Err(Error::Crypto("ciphertext shorter than stream overhead".into()));
        }

        let nonce = nonce_for(&self.header, self.counter);
        let framed = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| Error::Crypto("stream decryption failed".into()))?;

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("stream counter exhausted".into()))?;

        let tag = StreamTag::from_byte(framed[0])?;
        if tag == StreamTag::Final {
            self.finalized = true;
        }

        Ok((framed[1..].to_vec(), tag))
    }
}

impl std::fmt::Debug for DecryptStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptStream")
            .field("counter", &self.counter)
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_pair() -> (EncryptStream, DecryptStream) {
        let key = StreamKey::generate();
        let header = StreamHeader::generate();
        (
            EncryptStream::new(&key, header),
            DecryptStream::new(&key, header),
        )
    }

    #[test]
    fn roundtrip_single_frame() {
        let (mut tx, mut rx) = stream_pair();

        let ciphertext = tx.push(b"hello", StreamTag::Message).expect("push");
        assert_eq!(ciphertext.len(), 5 + STREAM_ABYTES);

        let (plain, tag) = rx.pull(&ciphertext).expect("pull");
        assert_eq!(plain, b"hello");
        assert_eq!(tag, StreamTag::Message);
    }

    #[test]
    fn roundtrip_many_frames() {
        let (mut tx, mut rx) = stream_pair();

        for i in 0..100u32 {
            let msg = format!("frame {}", i);
            let ct = tx.push(msg.as_bytes(), StreamTag::Message).expect("push");
            let (plain, _) = rx.pull(&ct).expect("pull");
            assert_eq!(plain, msg.as_bytes());
        }
    }

    #[test]
    fn tampered_byte_fails() {
        let (mut tx, mut rx) = stream_pair();

        let mut ct = tx.push(b"secret", StreamTag::Message).expect("push");
        ct[3] ^= 0x01;

        assert!(rx.pull(&ct).is_err());
    }

    #[test]
    fn reordered_frames_fail() {
        let (mut tx, mut rx) = stream_pair();

        let first = tx.push(b"first", StreamTag::Message).expect("push");
        let second = tx.push(b"second", StreamTag::Message).expect("push");

        // Delivering the second frame first desynchronizes the counter.
        assert!(rx.pull(&second).is_err());
        let _ = first;
    }

    #[test]
    fn final_tag_terminates_stream() {
        let (mut tx, mut rx) = stream_pair();

        let ct = tx.push(b"bye", StreamTag::Final).expect("push");
        let (_, tag) = rx.pull(&ct).expect("pull");
        assert_eq!(tag, StreamTag::Final);

        // Nothing may follow FINAL in either direction.
        assert!(tx.push(b"more", StreamTag::Message).is_err());
        assert!(rx.pull(&ct).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let key_a = StreamKey::generate();
        let key_b = StreamKey::generate();
        let header = StreamHeader::generate();

        let mut tx = EncryptStream::new(&key_a, header);
        let mut rx = DecryptStream::new(&key_b, header);

        let ct = tx.push(b"data", StreamTag::Message).expect("push");
        assert!(rx.pull(&ct).is_err());
    }

    #[test]
    fn empty_frame() {
        let (mut tx, mut rx) = stream_pair();

        let ct = tx.push(b"", StreamTag::Message).expect("push");
        assert_eq!(ct.len(), STREAM_ABYTES);

        let (plain, tag) = rx.pull(&ct).expect("pull");
        assert!(plain.is_empty());
        assert_eq!(tag, StreamTag::Message);
    }
}
