//! Conversations and signed messages.
//!
//! A peer-to-peer conversation is keyed by its participant pair: its wire
//! hash is the SHA-256 over the two participants' pubkey hashes in
//! lexicographic order, so both sides derive the same value independently.

mod manager;
mod message;

pub use manager::{ConversationManager, DEFAULT_CACHE_SIZE};
pub use message::{Message, MessageDirection};

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A peer-to-peer conversation between one local identity and one contact.
#[derive(Debug, Clone)]
pub struct Conversation {
    /// Conversation uuid.
    pub uuid: Uuid,
    /// The owning local identity.
    pub identity: Uuid,
    /// The participating contact.
    pub participant: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form topic.
    pub topic: String,
    /// Unix seconds of the latest activity.
    pub last_activity: i64,
    /// Deterministic wire hash of the participant pair.
    pub hash: [u8; 32],
}

/// The deterministic wire hash of a p2p conversation: SHA-256 over the two
/// participants' pubkey hashes, smaller one first.
pub fn p2p_hash(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize().into()
}
