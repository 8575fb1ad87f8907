//! Chat messages and their signatures.
//!
//! Every message is signed by the sender's identity key over its canonical
//! bytes:
//!
//! ```text
//! conversation_hash ‖ message_id ‖ composed_time(be64) ‖ encoding_name ‖ content
//! ```
//!
//! Inbound messages are never surfaced to the store until the signature
//! verifies against the contact's known public key.

use crate::crypto::random_id;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::protocol::{from_b64, to_b64, MessageEncoding, WireMessage};
use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use uuid::Uuid;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Composed locally.
    Outgoing,
    /// Received from the peer.
    Incoming,
}

/// One chat message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Owning conversation.
    pub conversation: Uuid,
    /// Direction.
    pub direction: MessageDirection,
    /// Composition time, unix seconds.
    pub composed_time: i64,
    /// Delivery time: when the peer acked (outgoing) or when it arrived
    /// (incoming).
    pub sent_received_time: Option<i64>,
    /// Declared text encoding.
    pub encoding: MessageEncoding,
    /// Message body.
    pub content: String,
    /// SHA-256 hash of the sender's pubkey.
    pub sender_hash: [u8; 32],
    /// Random wire id.
    pub message_id: [u8; 16],
    /// Wire hash of the conversation.
    pub conversation_hash: [u8; 32],
    /// Ed25519 signature over the canonical bytes.
    pub signature: [u8; 64],
}

/// The byte string a message signature covers.
pub fn canonical_bytes(
    conversation_hash: &[u8; 32],
    message_id: &[u8; 16],
    composed_time: i64,
    encoding: MessageEncoding,
    content: &str,
) -> Vec<u8> {
    let mut bytes =
        Vec::with_capacity(32 + 16 + 8 + encoding.name().len() + content.len());
    bytes.extend_from_slice(conversation_hash);
    bytes.extend_from_slice(message_id);
    bytes.extend_from_slice(&(composed_time as u64).to_be_bytes());
    bytes.extend_from_slice(encoding.name().as_bytes());
    bytes.extend_from_slice(content.as_bytes());
    bytes
}

impl Message {
    /// Compose and sign an outgoing message.
    pub fn compose(
        identity: &Identity,
        conversation: Uuid,
        conversation_hash: [u8; 32],
        content: String,
    ) -> Self {
        let encoding = if content.is_ascii() {
            MessageEncoding::UsAscii
        } else {
            MessageEncoding::Utf8
        };
        let message_id = random_id();
        let composed_time = Utc::now().timestamp();

        let signature = identity
            .sign(&canonical_bytes(
                &conversation_hash,
                &message_id,
                composed_time,
                encoding,
                &content,
            ))
            .to_bytes();

        Self {
            conversation,
            direction: MessageDirection::Outgoing,
            composed_time,
            sent_received_time: None,
            encoding,
            content,
            sender_hash: identity.pubkey_hash(),
            message_id,
            conversation_hash,
            signature,
        }
    }

    /// Verify the signature against the sender's known public key.
    pub fn verify(&self, sender: &VerifyingKey) -> Result<()> {
        let bytes = canonical_bytes(
            &self.conversation_hash,
            &self.message_id,
            self.composed_time,
            self.encoding,
            &self.content,
        );
        sender
            .verify(&bytes, &Signature::from_bytes(&self.signature))
            .map_err(|_| Error::Crypto("message signature verification failed".into()))
    }

    /// Serialize for the control channel.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            message_id: to_b64(&self.message_id),
            date: self.composed_time as u64,
            content: self.content.clone(),
            encoding: self.encoding,
            conversation: to_b64(&self.conversation_hash),
            from: to_b64(&self.sender_hash),
            signature: to_b64(&self.signature),
        }
    }

    /// Rebuild an incoming message from its wire form. The signature is not
    /// verified here; callers do that against the contact's key.
    pub fn from_wire(conversation: Uuid, wire: &WireMessage) -> Result<Self> {
        let message_id: [u8; 16] = from_b64(&wire.message_id)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Malformed("message id must be 16 bytes".into()))?;
        let conversation_hash: [u8; 32] = from_b64(&wire.conversation)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Malformed("conversation hash must be 32 bytes".into()))?;
        let sender_hash: [u8; 32] = from_b64(&wire.from)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Malformed("sender hash must be 32 bytes".into()))?;
        let signature: [u8; 64] = from_b64(&wire.signature)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Malformed("signature must be 64 bytes".into()))?;

        Ok(Self {
            conversation,
            direction: MessageDirection::Incoming,
            composed_time: wire.date as i64,
            sent_received_time: Some(Utc::now().timestamp()),
            encoding: wire.encoding,
            content: wire.content.clone(),
            sender_hash,
            message_id,
            conversation_hash,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_verify_roundtrip() {
        let identity = Identity::generate("alice");
        let message = Message::compose(
            &identity,
            Uuid::new_v4(),
            [5u8; 32],
            "hello bob".into(),
        );

        assert_eq!(message.encoding, MessageEncoding::UsAscii);
        assert!(message.verify(&identity.public_key()).is_ok());

        let other = Identity::generate("mallory");
        assert!(message.verify(&other.public_key()).is_err());
    }

    #[test]
    fn non_ascii_content_is_utf8() {
        let identity = Identity::generate("alice");
        let message =
            Message::compose(&identity, Uuid::new_v4(), [5u8; 32], "héllo".into());
        assert_eq!(message.encoding, MessageEncoding::Utf8);
        assert!(message.verify(&identity.public_key()).is_ok());
    }

    #[test]
    fn wire_roundtrip_preserves_signature() {
        let identity = Identity::generate("alice");
        let conversation = Uuid::new_v4();
        let message =
            Message::compose(&identity, conversation, [5u8; 32], "hello".into());

        let wire = message.to_wire();
        let rebuilt = Message::from_wire(conversation, &wire).expect("from wire");

        assert_eq!(rebuilt.message_id, message.message_id);
        assert_eq!(rebuilt.direction, MessageDirection::Incoming);
        assert!(rebuilt.verify(&identity.public_key()).is_ok());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let identity = Identity::generate("alice");
        let conversation = Uuid::new_v4();
        let message =
            Message::compose(&identity, conversation, [5u8; 32], "hello".into());

        let mut wire = message.to_wire();
        wire.content = "hello!".into();

        let rebuilt = Message::from_wire(conversation, &wire).expect("from wire");
        assert!(rebuilt.verify(&identity.public_key()).is_err());
    }

    #[test]
    fn canonical_bytes_layout() {
        let bytes = canonical_bytes(&[1; 32], &[2; 16], 256, MessageEncoding::Utf8, "x");
        assert_eq!(&bytes[..32], &[1u8; 32][..]);
        assert_eq!(&bytes[32..48], &[2u8; 16][..]);
        assert_eq!(&bytes[48..56], &256u64.to_be_bytes());
        assert_eq!(&bytes[56..61], b"utf-8");
        assert_eq!(&bytes[61..], b"x");
    }
}
