//! The rusqlite-backed store.

use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use crate::conversation::{Conversation, Message, MessageDirection};
use crate::error::{Error, Result};
use crate::files::{File, FileDirection, FileState};
use crate::identity::{Contact, Identity, OnionAddress};
use crate::protocol::MessageEncoding;
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::{Mutex, MutexGuard};
use std::path::Path;
use uuid::Uuid;

/// Handle to the SQLite store.
///
/// The connection sits behind a mutex so shared references to the store can
/// cross await points; callers hold the lock only for single statements.
pub struct Database {
    conn: Mutex<Connection>,
}

fn state_to_i32(state: FileState) -> i32 {
    match state {
        FileState::Created => 0,
        FileState::Hashing => 1,
        FileState::Offered => 2,
        FileState::Queued => 3,
        FileState::Transferring => 4,
        FileState::Done => 5,
        FileState::Failed => 6,
        FileState::Rejected => 7,
        FileState::Cancelled => 8,
    }
}

fn state_from_i32(value: i32) -> Result<FileState> {
    Ok(match value {
        0 => FileState::Created,
        1 => FileState::Hashing,
        2 => FileState::Offered,
        3 => FileState::Queued,
        4 => FileState::Transferring,
        5 => FileState::Done,
        6 => FileState::Failed,
        7 => FileState::Rejected,
        8 => FileState::Cancelled,
        other => return Err(Error::Storage(format!("unknown file state {}", other))),
    })
}

fn encoding_to_str(encoding: MessageEncoding) -> &'static str {
    encoding.name()
}

fn encoding_from_str(name: &str) -> Result<MessageEncoding> {
    match name {
        "us-ascii" => Ok(MessageEncoding::UsAscii),
        "utf-8" => Ok(MessageEncoding::Utf8),
        other => Err(Error::Storage(format!("unknown encoding {}", other))),
    }
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::Storage(format!("bad uuid in store: {}", e)))
}

fn blob_to_array<const N: usize>(blob: Vec<u8>, what: &str) -> Result<[u8; N]> {
    blob.try_into()
        .map_err(|_| Error::Storage(format!("{} has wrong length", what)))
}

impl Database {
    /// Open or create the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("create {}: {}", parent.display(), e)))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(CREATE_SCHEMA)?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database lock poisoned".into()))
    }

    // --- identities -------------------------------------------------------

    /// Persist an identity's keys and name.
    pub fn save_identity(&self, identity: &Identity) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO identity (uuid, name, secret_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.uuid().to_string(),
                identity.name(),
                identity.secret_key_bytes().as_slice(),
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Load all stored identities.
    pub fn load_identities(&self) -> Result<Vec<Identity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT uuid, name, secret_key FROM identity")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (uuid, name, secret) = row?;
            identities.push(Identity::restore(parse_uuid(&uuid)?, name, &secret)?);
        }
        Ok(identities)
    }

    // --- contacts ---------------------------------------------------------

    /// Persist a contact.
    pub fn add_contact(&self, contact: &Contact) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO contact
             (uuid, identity_uuid, name, pubkey, onion_address, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                contact.uuid.to_string(),
                contact.identity.to_string(),
                contact.name,
                contact.pubkey.as_bytes().as_slice(),
                contact.onion_address.as_str(),
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// All contacts belonging to an identity. The online flag is runtime
    /// state and always loads as false.
    pub fn contacts_for_identity(&self, identity: Uuid) -> Result<Vec<Contact>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT uuid, name, pubkey, onion_address FROM contact WHERE identity_uuid = ?1",
        )?;
        let rows = stmt.query_map(params![identity.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut contacts = Vec::new();
        for row in rows {
            let (uuid, name, pubkey, onion) = row?;
            let pubkey_bytes: [u8; 32] = blob_to_array(pubkey, "contact pubkey")?;
            let pubkey = VerifyingKey::from_bytes(&pubkey_bytes)
                .map_err(|_| Error::Storage("invalid contact pubkey in store".into()))?;
            contacts.push(Contact {
                uuid: parse_uuid(&uuid)?,
                identity,
                name,
                pubkey,
                onion_address: OnionAddress::parse(onion)?,
                online: false,
            });
        }
        Ok(contacts)
    }

    /// Remove a contact.
    pub fn delete_contact(&self, uuid: Uuid) -> Result<()> {
        self.lock()?.execute(
            "DELETE FROM contact WHERE uuid = ?1",
            params![uuid.to_string()],
        )?;
        Ok(())
    }

    // --- conversations ----------------------------------------------------

    /// Persist a conversation.
    pub fn add_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO conversation
             (uuid, identity_uuid, participant_uuid, name, topic, last_activity, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                conversation.uuid.to_string(),
                conversation.identity.to_string(),
                conversation.participant.to_string(),
                conversation.name,
                conversation.topic,
                conversation.last_activity,
                conversation.hash.as_slice(),
            ],
        )?;
        Ok(())
    }

    fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String, i64, Vec<u8>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn build_conversation(
        raw: (String, String, String, String, String, i64, Vec<u8>),
    ) -> Result<Conversation> {
        let (uuid, identity, participant, name, topic, last_activity, hash) = raw;
        Ok(Conversation {
            uuid: parse_uuid(&uuid)?,
            identity: parse_uuid(&identity)?,
            participant: parse_uuid(&participant)?,
            name,
            topic,
            last_activity,
            hash: blob_to_array(hash, "conversation hash")?,
        })
    }

    /// Look up a conversation by its wire hash.
    pub fn conversation_by_hash(&self, hash: &[u8; 32]) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT uuid, identity_uuid, participant_uuid, name, topic, last_activity, hash
             FROM conversation WHERE hash = ?1",
        )?;
        match stmt.query_row(params![hash.as_slice()], Self::conversation_from_row) {
            Ok(raw) => Ok(Some(Self::build_conversation(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a conversation by uuid.
    pub fn conversation_by_uuid(&self, uuid: Uuid) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT uuid, identity_uuid, participant_uuid, name, topic, last_activity, hash
             FROM conversation WHERE uuid = ?1",
        )?;
        match stmt.query_row(params![uuid.to_string()], Self::conversation_from_row) {
            Ok(raw) => Ok(Some(Self::build_conversation(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Update a conversation's last-activity stamp.
    pub fn touch_conversation(&self, uuid: Uuid, last_activity: i64) -> Result<()> {
        self.lock()?.execute(
            "UPDATE conversation SET last_activity = ?2 WHERE uuid = ?1",
            params![uuid.to_string(), last_activity],
        )?;
        Ok(())
    }

    /// Delete a conversation and its messages atomically.
    pub fn delete_conversation(&self, uuid: Uuid) -> Result<()> {
        self.lock()?.execute_batch(&format!(
            "BEGIN;
             DELETE FROM message WHERE conversation_uuid = '{uuid}';
             DELETE FROM conversation WHERE uuid = '{uuid}';
             COMMIT;",
        ))?;
        Ok(())
    }

    // --- messages ---------------------------------------------------------

    /// Persist a message.
    pub fn add_message(&self, message: &Message) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO message
             (conversation_uuid, direction, composed_time, sent_received_time,
              encoding, content, sender_hash, message_id, conversation_hash, signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.conversation.to_string(),
                matches!(message.direction, MessageDirection::Incoming) as i32,
                message.composed_time,
                message.sent_received_time,
                encoding_to_str(message.encoding),
                message.content,
                message.sender_hash.as_slice(),
                message.message_id.as_slice(),
                message.conversation_hash.as_slice(),
                message.signature.as_slice(),
            ],
        )?;
        Ok(())
    }

    /// Stamp the delivery time of a message that does not have one yet.
    /// Returns whether a row changed.
    pub fn set_message_received_time(&self, message_id: &[u8; 16], when: i64) -> Result<bool> {
        let changed = self.lock()?.execute(
            "UPDATE message SET sent_received_time = ?2
             WHERE message_id = ?1 AND sent_received_time IS NULL",
            params![message_id.as_slice(), when],
        )?;
        Ok(changed > 0)
    }

    /// Delete a message by its wire id.
    pub fn delete_message(&self, message_id: &[u8; 16]) -> Result<()> {
        self.lock()?.execute(
            "DELETE FROM message WHERE message_id = ?1",
            params![message_id.as_slice()],
        )?;
        Ok(())
    }

    /// Load the messages of a conversation, oldest first.
    pub fn messages_for_conversation(
        &self,
        conversation: Uuid,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT direction, composed_time, sent_received_time, encoding, content,
                    sender_hash, message_id, conversation_hash, signature
             FROM message WHERE conversation_uuid = ?1
             ORDER BY composed_time ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![conversation.to_string(), limit], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, Vec<u8>>(6)?,
                row.get::<_, Vec<u8>>(7)?,
                row.get::<_, Vec<u8>>(8)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (direction, composed, received, encoding, content, sender, mid, chash, sig) = row?;
            messages.push(Message {
                conversation,
                direction: if direction == 0 {
                    MessageDirection::Outgoing
                } else {
                    MessageDirection::Incoming
                },
                composed_time: composed,
                sent_received_time: received,
                encoding: encoding_from_str(&encoding)?,
                content,
                sender_hash: blob_to_array(sender, "sender hash")?,
                message_id: blob_to_array(mid, "message id")?,
                conversation_hash: blob_to_array(chash, "conversation hash")?,
                signature: blob_to_array(sig, "signature")?,
            });
        }
        Ok(messages)
    }

    // --- files ------------------------------------------------------------

    /// Persist a file record.
    pub fn add_file(&self, file: &File) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO file
             (file_id, state, direction, identity_uuid, conversation_uuid, contact_uuid,
              hash, name, path, size, file_time, created_time, ack_time, bytes_transferred)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                file.file_id.as_slice(),
                state_to_i32(file.state),
                matches!(file.direction, FileDirection::Incoming) as i32,
                file.identity.to_string(),
                file.conversation.to_string(),
                file.contact.to_string(),
                file.hash.as_ref().map(|h| h.as_slice()),
                file.name,
                file.path.to_string_lossy(),
                file.size,
                file.file_time,
                file.created_time,
                file.ack_time,
                file.bytes_transferred,
            ],
        )?;
        Ok(())
    }

    /// Load a file record by its wire id.
    pub fn load_file(&self, file_id: &[u8; 16]) -> Result<Option<File>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT state, direction, identity_uuid, conversation_uuid, contact_uuid,
                    hash, name, path, size, file_time, created_time, ack_time, bytes_transferred
             FROM file WHERE file_id = ?1",
        )?;
        let result = stmt.query_row(params![file_id.as_slice()], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, i32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<Vec<u8>>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, Option<i64>>(11)?,
                row.get::<_, i64>(12)?,
            ))
        });

        let raw = match result {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (state, direction, identity, conversation, contact, hash, name, path, size, file_time, created_time, ack_time, bytes) =
            raw;

        let mut file = File::new(
            *file_id,
            if direction == 0 {
                FileDirection::Outgoing
            } else {
                FileDirection::Incoming
            },
            parse_uuid(&conversation)?,
            parse_uuid(&contact)?,
            parse_uuid(&identity)?,
            name,
            path.into(),
            size,
            file_time,
            created_time,
        );
        file.state = state_from_i32(state)?;
        file.hash = match hash {
            Some(blob) => Some(blob_to_array(blob, "file hash")?),
            None => None,
        };
        file.ack_time = ack_time;
        file.bytes_transferred = bytes;
        Ok(Some(file))
    }

    /// Update a file's state.
    pub fn set_file_state(&self, file_id: &[u8; 16], state: FileState) -> Result<()> {
        self.lock()?.execute(
            "UPDATE file SET state = ?2 WHERE file_id = ?1",
            params![file_id.as_slice(), state_to_i32(state)],
        )?;
        Ok(())
    }

    /// Update a file's transferred-byte count.
    pub fn set_file_bytes(&self, file_id: &[u8; 16], bytes: i64) -> Result<()> {
        self.lock()?.execute(
            "UPDATE file SET bytes_transferred = ?2 WHERE file_id = ?1",
            params![file_id.as_slice(), bytes],
        )?;
        Ok(())
    }

    /// Record a file's content hash.
    pub fn set_file_hash(&self, file_id: &[u8; 16], hash: &[u8; 32]) -> Result<()> {
        self.lock()?.execute(
            "UPDATE file SET hash = ?2 WHERE file_id = ?1",
            params![file_id.as_slice(), hash.as_slice()],
        )?;
        Ok(())
    }

    /// Record a file's resolved destination path.
    pub fn set_file_path(&self, file_id: &[u8; 16], path: &Path) -> Result<()> {
        self.lock()?.execute(
            "UPDATE file SET path = ?2 WHERE file_id = ?1",
            params![file_id.as_slice(), path.to_string_lossy()],
        )?;
        Ok(())
    }

    /// Record when the peer acknowledged the transfer.
    pub fn set_file_ack_time(&self, file_id: &[u8; 16], when: i64) -> Result<()> {
        self.lock()?.execute(
            "UPDATE file SET ack_time = ?2 WHERE file_id = ?1",
            params![file_id.as_slice(), when],
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::p2p_hash;

    fn test_identity_and_contact(db: &Database) -> (Identity, Contact) {
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
        db.save_identity(&identity).expect("save identity");
        db.add_contact(&contact).expect("add contact");
        (identity, contact)
    }

    #[test]
    fn identity_roundtrip() {
        let db = Database::open_in_memory().expect("db");
        let identity = Identity::generate("alice");
        db.save_identity(&identity).expect("save");

        let loaded = db.load_identities().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uuid(), identity.uuid());
        assert_eq!(loaded[0].public_key(), identity.public_key());
    }

    #[test]
    fn contact_roundtrip_resets_online() {
        let db = Database::open_in_memory().expect("db");
        let (identity, contact) = test_identity_and_contact(&db);

        let loaded = db.contacts_for_identity(identity.uuid()).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uuid, contact.uuid);
        assert_eq!(loaded[0].pubkey, contact.pubkey);
        assert!(!loaded[0].online);
    }

    #[test]
    fn conversation_lookup_by_hash_and_uuid() {
        let db = Database::open_in_memory().expect("db");
        let (identity, contact) = test_identity_and_contact(&db);

        let conversation = Conversation {
            uuid: Uuid::new_v4(),
            identity: identity.uuid(),
            participant: contact.uuid,
            name: "bob".into(),
            topic: String::new(),
            last_activity: 42,
            hash: p2p_hash(&[1; 32], &[2; 32]),
        };
        db.add_conversation(&conversation).expect("add");

        let by_hash = db
            .conversation_by_hash(&conversation.hash)
            .expect("query")
            .expect("found");
        assert_eq!(by_hash.uuid, conversation.uuid);

        let by_uuid = db
            .conversation_by_uuid(conversation.uuid)
            .expect("query")
            .expect("found");
        assert_eq!(by_uuid.hash, conversation.hash);

        assert!(db
            .conversation_by_hash(&[9; 32])
            .expect("query")
            .is_none());
    }

    #[test]
    fn message_roundtrip_and_ack() {
        let db = Database::open_in_memory().expect("db");
        let identity = Identity::generate("alice");
        let conversation = Uuid::new_v4();

        let message = Message::compose(&identity, conversation, [7; 32], "hello".into());
        db.add_message(&message).expect("add");

        let loaded = db
            .messages_for_conversation(conversation, 10)
            .expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "hello");
        assert!(loaded[0].sent_received_time.is_none());
        assert!(loaded[0].verify(&identity.public_key()).is_ok());

        assert!(db
            .set_message_received_time(&message.message_id, 100)
            .expect("ack"));
        // Second stamp is a no-op.
        assert!(!db
            .set_message_received_time(&message.message_id, 200)
            .expect("ack again"));
    }

    #[test]
    fn file_roundtrip() {
        let db = Database::open_in_memory().expect("db");
        let mut file = File::new(
            [3; 16],
            FileDirection::Incoming,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "recv.txt".into(),
            "/tmp/recv.txt".into(),
            4,
            10,
            20,
        );
        file.state = FileState::Offered;
        file.hash = Some([8; 32]);
        db.add_file(&file).expect("add");

        db.set_file_state(&file.file_id, FileState::Transferring)
            .expect("state");
        db.set_file_bytes(&file.file_id, 4).expect("bytes");

        let loaded = db.load_file(&file.file_id).expect("load").expect("found");
        assert_eq!(loaded.state, FileState::Transferring);
        assert_eq!(loaded.bytes_transferred, 4);
        assert_eq!(loaded.hash, Some([8; 32]));
        assert_eq!(loaded.direction, FileDirection::Incoming);

        assert!(db.load_file(&[0; 16]).expect("load").is_none());
    }

    #[test]
    fn delete_conversation_removes_messages() {
        let db = Database::open_in_memory().expect("db");
        let identity = Identity::generate("alice");
        let conversation = Uuid::new_v4();
        let message = Message::compose(&identity, conversation, [7; 32], "hello".into());
        db.add_message(&message).expect("add message");

        db.delete_conversation(conversation).expect("delete");
        assert!(db
            .messages_for_conversation(conversation, 10)
            .expect("load")
            .is_empty());
    }
}
