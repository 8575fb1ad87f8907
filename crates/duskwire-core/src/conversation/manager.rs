//! The conversation manager.
//!
//! Keeps a small LRU of hot conversations in front of the store, creates
//! p2p conversations on demand, and owns the message send/receive paths:
//! signing outgoing messages and verifying inbound ones before anything is
//! persisted.

use super::message::Message;
use super::{p2p_hash, Conversation};
use crate::crypto::pubkey_hash;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::identity::{Contact, Identity};
use crate::protocol::{from_b64, WireMessage};
use crate::storage::Database;
use chrono::Utc;
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default number of conversations kept hot in memory.
pub const DEFAULT_CACHE_SIZE: usize = 3;

/// LRU-cached conversation registry plus the message pipelines.
pub struct ConversationManager {
    lru: LruCache<[u8; 32], Conversation>,
    events: EventBus,
}

impl ConversationManager {
    /// Create a manager with the given cache capacity.
    pub fn new(capacity: usize, events: EventBus) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            lru: LruCache::new(capacity),
            events,
        }
    }

    /// Fetch the conversation with this wire hash, rehydrating from the
    /// store on a cache miss.
    pub fn by_hash(&mut self, db: &Database, hash: &[u8; 32]) -> Result<Option<Conversation>> {
        if let Some(conversation) = self.lru.get(hash) {
            return Ok(Some(conversation.clone()));
        }
        match db.conversation_by_hash(hash)? {
            Some(conversation) => {
                self.lru.put(*hash, conversation.clone());
                Ok(Some(conversation))
            }
            None => Ok(None),
        }
    }

    /// Get or create the p2p conversation between `identity` and `contact`.
    pub fn get_or_create(
        &mut self,
        db: &Database,
        identity: &Identity,
        contact: &Contact,
    ) -> Result<Conversation> {
        let hash = p2p_hash(
            &identity.pubkey_hash(),
            &pubkey_hash(contact.pubkey.as_bytes()),
        );

        if let Some(conversation) = self.by_hash(db, &hash)? {
            return Ok(conversation);
        }

        let conversation = Conversation {
            uuid: Uuid::new_v4(),
            identity: identity.uuid(),
            participant: contact.uuid,
            name: contact.name.clone(),
            topic: String::new(),
            last_activity: Utc::now().timestamp(),
            hash,
        };
        db.add_conversation(&conversation)?;
        debug!(conversation = %conversation.uuid, "conversation created");
        self.events.publish(Event::ConversationAdded {
            conversation: conversation.uuid,
        });
        self.lru.put(hash, conversation.clone());
        Ok(conversation)
    }

    /// Move a conversation to the cache head and stamp its activity time.
    pub fn touch(&mut self, db: &Database, conversation: &mut Conversation) -> Result<()> {
        conversation.last_activity = Utc::now().timestamp();
        db.touch_conversation(conversation.uuid, conversation.last_activity)?;
        self.lru.put(conversation.hash, conversation.clone());
        Ok(())
    }

    /// Delete a conversation and all its messages.
    pub fn delete(&mut self, db: &Database, uuid: Uuid) -> Result<()> {
        if let Some(conversation) = db.conversation_by_uuid(uuid)? {
            self.lru.pop(&conversation.hash);
        }
        db.delete_conversation(uuid)?;
        self.events
            .publish(Event::ConversationDeleted { conversation: uuid });
        Ok(())
    }

    /// Compose, sign and persist an outgoing message for the conversation
    /// with `contact`. The caller wires it to the peer session.
    pub fn send_message(
        &mut self,
        db: &Database,
        identity: &Identity,
        contact: &Contact,
        content: String,
    ) -> Result<Message> {
        let mut conversation = self.get_or_create(db, identity, contact)?;
        let message = Message::compose(
            identity,
            conversation.uuid,
            conversation.hash,
            content,
        );

        db.add_message(&message)?;
        self.events.publish(Event::MessageAdded {
            conversation: conversation.uuid,
            message_id: message.message_id,
            outgoing: true,
        });
        self.touch(db, &mut conversation)?;
        Ok(message)
    }

    /// Validate and persist an inbound message. Drops (with an error) any
    /// message whose sender hash or signature does not match the contact.
    pub fn receive_message(
        &mut self,
        db: &Database,
        identity: &Identity,
        contact: &Contact,
        wire: &WireMessage,
    ) -> Result<Message> {
        let contact_hash = pubkey_hash(contact.pubkey.as_bytes());
        let claimed: [u8; 32] = from_b64(&wire.from)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Malformed("sender hash must be 32 bytes".into()))?;
        if claimed != contact_hash {
            return Err(Error::Crypto(
                "message sender does not match session contact".into(),
            ));
        }

        let expected_hash = p2p_hash(&identity.pubkey_hash(), &contact_hash);
        let mut conversation = self.get_or_create(db, identity, contact)?;
        if conversation.hash != expected_hash {
            return Err(Error::Malformed("conversation hash mismatch".into()));
        }

        let message = Message::from_wire(conversation.uuid, wire)?;
        if message.conversation_hash != expected_hash {
            warn!(conversation = %conversation.uuid, "message addressed to a different conversation");
            return Err(Error::Malformed(
                "message conversation hash does not match participants".into(),
            ));
        }
        message.verify(&contact.pubkey)?;

        db.add_message(&message)?;
        self.events.publish(Event::MessageAdded {
            conversation: conversation.uuid,
            message_id: message.message_id,
            outgoing: false,
        });
        self.touch(db, &mut conversation)?;
        Ok(message)
    }

    /// The peer acknowledged an outgoing message: stamp its delivery time.
    pub fn on_message_ack(&mut self, db: &Database, message_id: &[u8; 16]) -> Result<()> {
        if db.set_message_received_time(message_id, Utc::now().timestamp())? {
            self.events.publish(Event::MessageReceivedDateChanged {
                message_id: *message_id,
            });
        }
        Ok(())
    }

    /// Number of conversations currently resident.
    pub fn cached(&self) -> usize {
        self.lru.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MessageDirection;

    fn setup() -> (Database, Identity, Contact, ConversationManager) {
        let db = Database::open_in_memory().expect("db");
        let identity = Identity::generate("alice");
        let remote = Identity::generate("bob");
        let contact = Contact {
            uuid: Uuid::new_v4(),
            identity: identity.uuid(),
            name: "bob".into(),
            pubkey: remote.public_key(),
            onion_address: remote.onion_address().clone(),
            online: true,
        };
        let manager = ConversationManager::new(DEFAULT_CACHE_SIZE, EventBus::default());
        (db, identity, contact, manager)
    }

    fn contact_for(identity: &Identity, remote: &Identity, name: &str) -> Contact {
        Contact {
            uuid: Uuid::new_v4(),
            identity: identity.uuid(),
            name: name.into(),
            pubkey: remote.public_key(),
            onion_address: remote.onion_address().clone(),
            online: true,
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let (db, identity, contact, mut manager) = setup();

        let first = manager.get_or_create(&db, &identity, &contact).expect("create");
        let second = manager.get_or_create(&db, &identity, &contact).expect("get");
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(manager.cached(), 1);
    }

    #[test]
    fn lru_evicts_but_store_retains() {
        let (db, identity, _, mut manager) = setup();

        let mut hashes = Vec::new();
        for i in 0..5 {
            let remote = Identity::generate(format!("peer{}", i));
            let contact = contact_for(&identity, &remote, &format!("peer{}", i));
            let conversation = manager
                .get_or_create(&db, &identity, &contact)
                .expect("create");
            hashes.push(conversation.hash);
        }

        // Only the cache capacity stays resident.
        assert_eq!(manager.cached(), DEFAULT_CACHE_SIZE);

        // Evicted conversations rehydrate from the store.
        let cold = manager.by_hash(&db, &hashes[0]).expect("query");
        assert!(cold.is_some());
    }

    #[test]
    fn outgoing_message_is_signed_and_persisted() {
        let (db, identity, contact, mut manager) = setup();

        let message = manager
            .send_message(&db, &identity, &contact, "hello".into())
            .expect("send");

        assert_eq!(message.direction, MessageDirection::Outgoing);
        assert!(message.verify(&identity.public_key()).is_ok());
        assert!(message.sent_received_time.is_none());
    }

    #[test]
    fn inbound_verifies_against_contact_key() {
        let db = Database::open_in_memory().expect("db");
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");

        // Bob knows alice; alice composes a message for their conversation.
        let alice_contact_of_bob = contact_for(&bob, &alice, "alice");
        let shared_hash = p2p_hash(&alice.pubkey_hash(), &bob.pubkey_hash());
        let message = Message::compose(&alice, Uuid::new_v4(), shared_hash, "hi bob".into());
        let wire = message.to_wire();

        let mut manager = ConversationManager::new(DEFAULT_CACHE_SIZE, EventBus::default());
        let received = manager
            .receive_message(&db, &bob, &alice_contact_of_bob, &wire)
            .expect("receive");
        assert_eq!(received.content, "hi bob");
        assert_eq!(received.direction, MessageDirection::Incoming);
        assert!(received.sent_received_time.is_some());
    }

    #[test]
    fn forged_sender_is_dropped() {
        let db = Database::open_in_memory().expect("db");
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let mallory = Identity::generate("mallory");

        let alice_contact_of_bob = contact_for(&bob, &alice, "alice");
        let shared_hash = p2p_hash(&mallory.pubkey_hash(), &bob.pubkey_hash());

        // Mallory signs her own message but it arrives on alice's session.
        let message = Message::compose(&mallory, Uuid::new_v4(), shared_hash, "hi".into());
        let wire = message.to_wire();

        let mut manager = ConversationManager::new(DEFAULT_CACHE_SIZE, EventBus::default());
        assert!(manager
            .receive_message(&db, &bob, &alice_contact_of_bob, &wire)
            .is_err());
    }

    #[test]
    fn ack_sets_received_time_once() {
        let (db, identity, contact, mut manager) = setup();
        let message = manager
            .send_message(&db, &identity, &contact, "hello".into())
            .expect("send");

        manager
            .on_message_ack(&db, &message.message_id)
            .expect("ack");
        // Unknown ids are a quiet no-op.
        manager.on_message_ack(&db, &[0u8; 16]).expect("noop ack");
    }
}
