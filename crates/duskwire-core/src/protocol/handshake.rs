//! The protocol-opening exchange.
//!
//! `HELLO` (initiator → responder) and `OLLEH` (responder → initiator) prove
//! that each side holds the private key of a claimed identity and carry the
//! key and header parameterizing the sender's outbound encrypted stream.
//!
//! Wire layouts (fixed sizes, fields concatenated):
//!
//! ```text
//! HELLO: version(1) ‖ tx_key(32) ‖ tx_header(24) ‖ pubkey(32) ‖ signature(64)
//! OLLEH: version(1) ‖ tx_key(32) ‖ tx_header(24) ‖ signature(64)
//! ```
//!
//! Signatures are Ed25519 over the preceding fields of the same message.
//! `OLLEH` carries no pubkey: the initiator dialed a specific hidden service
//! and verifies against the contact key it loaded for it. A `HELLO` whose
//! embedded pubkey is unknown to the receiving identity is diverted into the
//! contact-request (AddMe) flow instead of opening a session.

use super::PROTOCOL_VERSION;
use crate::crypto::{StreamHeader, StreamKey, HEADER_BYTES, KEY_BYTES};
use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Size of an Ed25519 public key on the wire.
const PUBKEY_BYTES: usize = 32;

/// Size of an Ed25519 signature on the wire.
const SIGNATURE_BYTES: usize = 64;

/// Total size of a `HELLO` message.
pub const HELLO_BYTES: usize = 1 + KEY_BYTES + HEADER_BYTES + PUBKEY_BYTES + SIGNATURE_BYTES;

/// Total size of an `OLLEH` message.
pub const OLLEH_BYTES: usize = 1 + KEY_BYTES + HEADER_BYTES + SIGNATURE_BYTES;

/// A decoded, signature-verified `HELLO`.
pub struct Hello {
    /// Key for the initiator's outbound stream.
    pub tx_key: StreamKey,
    /// Header for the initiator's outbound stream.
    pub tx_header: StreamHeader,
    /// The initiator's claimed (and proven) identity key.
    pub pubkey: VerifyingKey,
}

impl Hello {
    /// Build and sign a `HELLO` announcing our outbound stream parameters.
    pub fn encode(tx_key: &StreamKey, tx_header: &StreamHeader, signer: &SigningKey) -> [u8; HELLO_BYTES] {
        let mut buf = [0u8; HELLO_BYTES];
        buf[0] = PROTOCOL_VERSION;
        buf[1..33].copy_from_slice(tx_key.as_bytes());
        buf[33..57].copy_from_slice(tx_header.as_bytes());
        buf[57..89].copy_from_slice(signer.verifying_key().as_bytes());

        let signature = signer.sign(&buf[..89]);
        buf[89..].copy_from_slice(&signature.to_bytes());
        buf
    }

    /// Decode a `HELLO` and verify its signature against the embedded pubkey.
    ///
    /// A valid signature proves possession of the claimed key; whether that
    /// key belongs to a known contact is decided by the caller.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != HELLO_BYTES {
            return Err(Error::HandshakeRejected(format!(
                "HELLO must be {} bytes, got {}",
                HELLO_BYTES,
                buf.len()
            )));
        }
        if buf[0] != PROTOCOL_VERSION {
            return Err(Error::HandshakeRejected(format!(
                "unsupported handshake version {}",
                buf[0]
            )));
        }

        let pubkey_bytes: [u8; PUBKEY_BYTES] = buf[57..89]
            .try_into()
            .map_err(|_| Error::HandshakeRejected("truncated pubkey".into()))?;
        let pubkey = VerifyingKey::from_bytes(&pubkey_bytes)
            .map_err(|_| Error::HandshakeRejected("invalid pubkey".into()))?;

        let sig_bytes: [u8; SIGNATURE_BYTES] = buf[89..]
            .try_into()
            .map_err(|_| Error::HandshakeRejected("truncated signature".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        pubkey
            .verify(&buf[..89], &signature)
            .map_err(|_| Error::HandshakeRejected("bad HELLO signature".into()))?;

        let key_bytes: [u8; KEY_BYTES] = buf[1..33]
            .try_into()
            .map_err(|_| Error::HandshakeRejected("truncated key".into()))?;
        let header_bytes: [u8; HEADER_BYTES] = buf[33..57]
            .try_into()
            .map_err(|_| Error::HandshakeRejected("truncated header".into()))?;

        Ok(Self {
            tx_key: StreamKey::from_bytes(key_bytes),
            tx_header: StreamHeader::from_bytes(header_bytes),
            pubkey,
        })
    }
}

/// A decoded, signature-verified `OLLEH`.
pub struct Olleh {
    /// Key for the responder's outbound stream.
    pub tx_key: StreamKey,
    /// Header for the responder's outbound stream.
    pub tx_header: StreamHeader,
}

impl Olleh {
    /// Build and sign an `OLLEH` answering a `HELLO`.
    pub fn encode(tx_key: &StreamKey, tx_header: &StreamHeader, signer: &SigningKey) -> [u8; OLLEH_BYTES] {
        let mut buf = [0u8; OLLEH_BYTES];
        buf[0] = PROTOCOL_VERSION;
        buf[1..33].copy_from_slice(tx_key.as_bytes());
        buf[33..57].copy_from_slice(tx_header.as_bytes());

        let signature = signer.sign(&buf[..57]);
        buf[57..].copy_from_slice(&signature.to_bytes());
        buf
    }

    /// Decode an `OLLEH` and verify its signature against the contact key
    /// loaded for the hidden service we dialed.
    pub fn decode(buf: &[u8], expected: &VerifyingKey) -> Result<Self> {
        if buf.len() != OLLEH_BYTES {
            return Err(Error::HandshakeRejected(format!(
                "OLLEH must be {} bytes, got {}",
                OLLEH_BYTES,
                buf.len()
            )));
        }
        if buf[0] != PROTOCOL_VERSION {
            return Err(Error::HandshakeRejected(format!(
                "unsupported handshake version {}",
                buf[0]
            )));
        }

        let sig_bytes: [u8; SIGNATURE_BYTES] = buf[57..]
            .try_into()
            .map_err(|_| Error::HandshakeRejected("truncated signature".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        expected
            .verify(&buf[..57], &signature)
            .map_err(|_| Error::HandshakeRejected("bad OLLEH signature".into()))?;

        let key_bytes: [u8; KEY_BYTES] = buf[1..33]
            .try_into()
            .map_err(|_| Error::HandshakeRejected("truncated key".into()))?;
        let header_bytes: [u8; HEADER_BYTES] = buf[33..57]
            .try_into()
            .map_err(|_| Error::HandshakeRejected("truncated header".into()))?;

        Ok(Self {
            tx_key: StreamKey::from_bytes(key_bytes),
            tx_header: StreamHeader::from_bytes(header_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn hello_roundtrip() {
        let signer = SigningKey::generate(&mut OsRng);
        let key = StreamKey::generate();
        let header = StreamHeader::generate();

        let wire = Hello::encode(&key, &header, &signer);
        assert_eq!(wire.len(), HELLO_BYTES);

        let hello = Hello::decode(&wire).expect("decode");
        assert_eq!(hello.tx_key.as_bytes(), key.as_bytes());
        assert_eq!(hello.tx_header, header);
        assert_eq!(hello.pubkey, signer.verifying_key());
    }

    #[test]
    fn olleh_roundtrip() {
        let signer = SigningKey::generate(&mut OsRng);
        let key = StreamKey::generate();
        let header = StreamHeader::generate();

        let wire = Olleh::encode(&key, &header, &signer);
        assert_eq!(wire.len(), OLLEH_BYTES);

        let olleh = Olleh::decode(&wire, &signer.verifying_key()).expect("decode");
        assert_eq!(olleh.tx_key.as_bytes(), key.as_bytes());
        assert_eq!(olleh.tx_header, header);
    }

    #[test]
    fn tampered_hello_is_rejected() {
        let signer = SigningKey::generate(&mut OsRng);
        let mut wire = Hello::encode(&StreamKey::generate(), &StreamHeader::generate(), &signer);

        wire[10] ^= 0x01;
        assert!(matches!(
            Hello::decode(&wire),
            Err(Error::HandshakeRejected(_))
        ));
    }

    #[test]
    fn olleh_from_wrong_identity_is_rejected() {
        let signer = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let wire = Olleh::encode(&StreamKey::generate(), &StreamHeader::generate(), &signer);

        assert!(matches!(
            Olleh::decode(&wire, &other.verifying_key()),
            Err(Error::HandshakeRejected(_))
        ));
    }

    #[test]
    fn bad_version_is_rejected() {
        let signer = SigningKey::generate(&mut OsRng);
        let mut wire = Hello::encode(&StreamKey::generate(), &StreamHeader::generate(), &signer);
        wire[0] = 0x02;

        assert!(matches!(
            Hello::decode(&wire),
            Err(Error::HandshakeRejected(_))
        ));
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(Hello::decode(&[0u8; 10]).is_err());
        let signer = SigningKey::generate(&mut OsRng);
        assert!(Olleh::decode(&[0u8; 10], &signer.verifying_key()).is_err());
    }
}
