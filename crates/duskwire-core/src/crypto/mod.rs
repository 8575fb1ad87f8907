//! Cryptographic primitives for the protocol core.
//!
//! - **Ed25519**: identity proof in handshakes, message signatures
//! - **XChaCha20-Poly1305**: per-direction authenticated stream encryption
//! - **SHA-256**: file hashes, pubkey hashes, conversation hashes
//!
//! No custom constructions beyond composing these; all primitives come from
//! audited RustCrypto crates.

mod stream;

pub use stream::{
    DecryptStream, EncryptStream, StreamHeader, StreamKey, StreamTag, HEADER_BYTES, KEY_BYTES,
    STREAM_ABYTES,
};

use sha2::{Digest, Sha256};

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Generate a random 16-byte identifier (message ids, file ids).
pub fn random_id() -> [u8; 16] {
    random_bytes::<16>()
}

/// SHA-256 hash of an Ed25519 public key; the compact identity handle used
/// on the wire (`from` fields, conversation hashing).
pub fn pubkey_hash(pubkey: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pubkey);
    hasher.finalize().into()
}

/// Constant-time comparison of byte slices.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
