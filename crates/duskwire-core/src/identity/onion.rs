//! Tor v3 onion addresses.
//!
//! A v3 address encodes an Ed25519 public key:
//!
//! 1. checksum = SHA3-256(".onion checksum" ‖ pubkey ‖ version)[..2]
//! 2. base32(pubkey ‖ checksum ‖ version) ‖ ".onion"
//!
//! yielding 56 base32 characters plus the suffix.

use crate::error::{Error, Result};
use ed25519_dalek::VerifyingKey;
use sha3::{Digest, Sha3_256};
use std::fmt;

const ONION_VERSION: u8 = 0x03;
const CHECKSUM_PREFIX: &[u8] = b".onion checksum";

/// A validated Tor v3 onion address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Parse and validate an address string (case-insensitive).
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into().to_lowercase();

        let hostname = s
            .strip_suffix(".onion")
            .ok_or_else(|| Error::Malformed("onion address must end with .onion".into()))?;

        if hostname.len() != 56 {
            return Err(Error::Malformed(
                "v3 onion address must be 56 characters".into(),
            ));
        }

        if base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            &hostname.to_uppercase(),
        )
        .is_none()
        {
            return Err(Error::Malformed("invalid base32 in onion address".into()));
        }

        Ok(Self(s))
    }

    /// Derive the onion address of an Ed25519 public key.
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let pubkey = public_key.as_bytes();

        let mut hasher = Sha3_256::new();
        hasher.update(CHECKSUM_PREFIX);
        hasher.update(pubkey);
        hasher.update([ONION_VERSION]);
        let checksum = hasher.finalize();

        let mut addr = [0u8; 35];
        addr[..32].copy_from_slice(pubkey);
        addr[32..34].copy_from_slice(&checksum[..2]);
        addr[34] = ONION_VERSION;

        let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &addr);
        Self(format!("{}.onion", encoded.to_lowercase()))
    }

    /// The full address, including the `.onion` suffix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hostname without the `.onion` suffix.
    pub fn hostname(&self) -> &str {
        &self.0[..56]
    }

    /// Extract and checksum-verify the embedded public key.
    pub fn extract_public_key(&self) -> Result<VerifyingKey> {
        let decoded = base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            &self.hostname().to_uppercase(),
        )
        .ok_or_else(|| Error::Malformed("invalid base32 in onion address".into()))?;

        if decoded.len() != 35 || decoded[34] != ONION_VERSION {
            return Err(Error::Malformed("not a v3 onion address".into()));
        }

        let pubkey: [u8; 32] = decoded[..32]
            .try_into()
            .map_err(|_| Error::Malformed("truncated onion pubkey".into()))?;

        let mut hasher = Sha3_256::new();
        hasher.update(CHECKSUM_PREFIX);
        hasher.update(pubkey);
        hasher.update([ONION_VERSION]);
        let expected = hasher.finalize();

        if decoded[32..34] != expected[..2] {
            return Err(Error::Malformed("onion address checksum mismatch".into()));
        }

        VerifyingKey::from_bytes(&pubkey)
            .map_err(|_| Error::Malformed("invalid onion pubkey".into()))
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddress({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn derive_and_extract() {
        let key = SigningKey::generate(&mut OsRng);
        let onion = OnionAddress::from_public_key(&key.verifying_key());

        assert!(onion.as_str().ends_with(".onion"));
        assert_eq!(onion.hostname().len(), 56);

        let extracted = onion.extract_public_key().expect("extract");
        assert_eq!(extracted, key.verifying_key());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(OnionAddress::parse("example.com").is_err());
        assert!(OnionAddress::parse("short.onion").is_err());
        assert!(OnionAddress::parse(
            "0000000000000000000000000000000000000000000000000000000<.onion"
        )
        .is_err());
    }

    #[test]
    fn parse_is_case_insensitive() {
        let key = SigningKey::generate(&mut OsRng);
        let onion = OnionAddress::from_public_key(&key.verifying_key());
        let upper = onion.as_str().to_uppercase();

        assert_eq!(OnionAddress::parse(upper).expect("parse"), onion);
    }
}
