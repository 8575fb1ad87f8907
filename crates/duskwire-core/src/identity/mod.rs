//! Local identities and the contact registry.
//!
//! An identity is a local account: a long-term Ed25519 signing keypair plus
//! the onion address of its hidden service. The keypair signs handshakes and
//! outgoing messages; contacts trust it as their root of authentication.

mod contacts;
mod onion;

pub use contacts::{Contact, ContactLookup, ContactRegistry};
pub use onion::OnionAddress;

use crate::crypto::pubkey_hash;
use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use uuid::Uuid;

/// A local account: uuid, display name, signing keypair, onion address.
pub struct Identity {
    uuid: Uuid,
    name: String,
    signing_key: SigningKey,
    onion_address: OnionAddress,
}

impl Identity {
    /// Create a fresh identity with a random keypair. The onion address is
    /// derived from the public key, so the hidden service and the signing
    /// identity are one and the same.
    pub fn generate(name: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let onion_address = OnionAddress::from_public_key(&signing_key.verifying_key());
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            signing_key,
            onion_address,
        }
    }

    /// Restore an identity from stored secret key bytes.
    pub fn restore(uuid: Uuid, name: impl Into<String>, secret: &[u8]) -> Result<Self> {
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| Error::Malformed("identity secret must be 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&secret);
        let onion_address = OnionAddress::from_public_key(&signing_key.verifying_key());
        Ok(Self {
            uuid,
            name: name.into(),
            signing_key,
            onion_address,
        })
    }

    /// The identity's uuid.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The local display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The public (verifying) key.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// SHA-256 hash of the public key, the compact wire handle.
    pub fn pubkey_hash(&self) -> [u8; 32] {
        pubkey_hash(self.signing_key.verifying_key().as_bytes())
    }

    /// The hidden-service address other peers dial.
    pub fn onion_address(&self) -> &OnionAddress {
        &self.onion_address
    }

    /// Sign arbitrary bytes with the identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Borrow the signing key for handshake construction.
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Export the secret key bytes for storage.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

/// Verify a signature against a public key.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &Signature) -> Result<()> {
    public_key
        .verify(message, signature)
        .map_err(|_| Error::Crypto("signature verification failed".into()))
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("onion_address", &self.onion_address)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_restore() {
        let identity = Identity::generate("alice");
        let secret = identity.secret_key_bytes();

        let restored =
            Identity::restore(identity.uuid(), "alice", &secret).expect("restore");

        assert_eq!(restored.public_key(), identity.public_key());
        assert_eq!(restored.onion_address(), identity.onion_address());
    }

    #[test]
    fn sign_and_verify() {
        let identity = Identity::generate("alice");
        let signature = identity.sign(b"claim");

        assert!(verify(&identity.public_key(), b"claim", &signature).is_ok());
        assert!(verify(&identity.public_key(), b"other", &signature).is_err());
    }

    #[test]
    fn pubkey_hash_matches_helper() {
        let identity = Identity::generate("alice");
        assert_eq!(
            identity.pubkey_hash(),
            crate::crypto::pubkey_hash(identity.public_key().as_bytes())
        );
    }
}
