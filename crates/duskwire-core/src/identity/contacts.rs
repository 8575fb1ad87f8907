//! Contacts and the registry handshakes consult.
//!
//! A contact is a remote peer trusted under a known public key, owned by
//! exactly one local identity. The registry answers the one question the
//! inbound handshake asks: "is this pubkey a contact of this identity?"

use super::OnionAddress;
use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// A remote peer trusted under a known public key.
#[derive(Debug, Clone)]
pub struct Contact {
    /// Contact uuid.
    pub uuid: Uuid,
    /// The owning local identity.
    pub identity: Uuid,
    /// Display name.
    pub name: String,
    /// The trust root for all authentication of this peer.
    pub pubkey: VerifyingKey,
    /// Where to dial the peer.
    pub onion_address: OnionAddress,
    /// Whether a live session currently exists.
    pub online: bool,
}

/// Lookup interface the handshake layer depends on. The application's
/// contact store implements this; [`ContactRegistry`] is the stock
/// in-memory implementation.
pub trait ContactLookup: Send + Sync {
    /// Find the contact of `identity` holding `pubkey`, if any.
    fn contact_for(&self, identity: Uuid, pubkey: &VerifyingKey) -> Option<Contact>;
}

/// In-memory contact registry, keyed by (identity, pubkey).
#[derive(Default)]
pub struct ContactRegistry {
    by_key: RwLock<HashMap<(Uuid, [u8; 32]), Contact>>,
}

impl ContactRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a contact.
    pub fn upsert(&self, contact: Contact) {
        let key = (contact.identity, *contact.pubkey.as_bytes());
        if let Ok(mut map) = self.by_key.write() {
            map.insert(key, contact);
        }
    }

    /// Remove a contact.
    pub fn remove(&self, identity: Uuid, pubkey: &VerifyingKey) {
        if let Ok(mut map) = self.by_key.write() {
            map.remove(&(identity, *pubkey.as_bytes()));
        }
    }

    /// Find a contact by its uuid.
    pub fn by_uuid(&self, uuid: Uuid) -> Option<Contact> {
        self.by_key
            .read()
            .ok()?
            .values()
            .find(|c| c.uuid == uuid)
            .cloned()
    }

    /// Update the online flag of a contact.
    pub fn set_online(&self, uuid: Uuid, online: bool) {
        if let Ok(mut map) = self.by_key.write() {
            for contact in map.values_mut() {
                if contact.uuid == uuid {
                    contact.online = online;
                }
            }
        }
    }

    /// All contacts of an identity.
    pub fn contacts_of(&self, identity: Uuid) -> Vec<Contact> {
        self.by_key
            .read()
            .map(|map| {
                map.values()
                    .filter(|c| c.identity == identity)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ContactLookup for ContactRegistry {
    fn contact_for(&self, identity: Uuid, pubkey: &VerifyingKey) -> Option<Contact> {
        self.by_key
            .read()
            .ok()?
            .get(&(identity, *pubkey.as_bytes()))
            .cloned()
    }
}
