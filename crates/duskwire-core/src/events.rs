//! The notification bus.
//!
//! The core publishes typed events; UI and persistence observers subscribe
//! by cloning receivers. Events carry ids rather than live objects so that
//! subscribers rehydrate from the store at their own pace.

use crate::files::FileState;
use crate::protocol::AckStatus;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events published by the protocol core.
#[derive(Debug, Clone)]
pub enum Event {
    /// A conversation was created.
    ConversationAdded {
        /// Conversation uuid.
        conversation: Uuid,
    },
    /// A conversation and its messages were removed.
    ConversationDeleted {
        /// Conversation uuid.
        conversation: Uuid,
    },
    /// A message was persisted (either direction).
    MessageAdded {
        /// Owning conversation.
        conversation: Uuid,
        /// Random wire id of the message.
        message_id: [u8; 16],
        /// True for messages we sent.
        outgoing: bool,
    },
    /// A message was deleted.
    MessageDeleted {
        /// Random wire id of the message.
        message_id: [u8; 16],
    },
    /// An outgoing message was acknowledged; its delivery time is now set.
    MessageReceivedDateChanged {
        /// Random wire id of the message.
        message_id: [u8; 16],
    },
    /// A file changed transfer state.
    FileStateChanged {
        /// Random wire id of the file.
        file_id: [u8; 16],
        /// New state.
        state: FileState,
        /// Human-readable reason for terminal failure states.
        reason: Option<String>,
    },
    /// Transfer progress was flushed.
    BytesTransferredChanged {
        /// Random wire id of the file.
        file_id: [u8; 16],
        /// Total bytes transferred so far.
        bytes: i64,
    },
    /// A file offer arrived and awaits an accept/reject decision.
    FileOffered {
        /// Random wire id of the file.
        file_id: [u8; 16],
        /// Offered name.
        name: String,
        /// Declared size in bytes.
        size: i64,
    },
    /// An authenticated peer connected (either direction).
    IncomingPeer {
        /// Connection uuid.
        connection: Uuid,
        /// The authenticated contact.
        contact: Uuid,
    },
    /// A peer session ended.
    PeerDisconnected {
        /// Connection uuid.
        connection: Uuid,
    },
    /// A contact request from an unknown pubkey.
    AddmeRequest {
        /// The requester's proven pubkey.
        pubkey: [u8; 32],
        /// Requester's self-chosen nickname.
        nick: String,
        /// Free-form introduction.
        message: String,
        /// Requester's onion address.
        address: String,
    },
    /// A generic acknowledgment arrived.
    ReceivedAck {
        /// Connection it arrived on.
        connection: Uuid,
        /// Subject of the ack.
        what: String,
        /// Outcome.
        status: AckStatus,
        /// Context (base64 id).
        data: String,
    },
}

/// Broadcast bus carrying [`Event`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given buffered capacity per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(Event::MessageDeleted { message_id: [9; 16] });

        match rx.recv().await.expect("recv") {
            Event::MessageDeleted { message_id } => assert_eq!(message_id, [9; 16]),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(Event::PeerDisconnected {
            connection: Uuid::new_v4(),
        });
    }
}
