//! Peer sessions.
//!
//! A session owns one connection: the socket, the two stream-cipher states,
//! the read state machine and the outgoing request counter. Its lifetime
//! equals the underlying connection's.
//!
//! Handshakes run first, in plaintext (the messages are signed). After both
//! signatures verify, each side initializes its outbound stream from the
//! key/header it generated and its inbound stream from the pair the peer
//! announced, and the session enters the encrypted chunk loop:
//!
//! ```text
//! DISABLED ──enable──► CHUNK_SIZE ──2+17 bytes──► decrypt len L
//!            CHUNK_SIZE ──want L+17──► CHUNK_DATA ──decrypt, dispatch──► CHUNK_SIZE
//! any ──close──► CLOSING (all further data discarded)
//! ```

use super::chunk::{self, Chunk};
use super::control::{AckStatus, ControlMessage};
use super::handshake::{Hello, Olleh, HELLO_BYTES, OLLEH_BYTES};
use crate::crypto::{DecryptStream, EncryptStream, StreamHeader, StreamKey, StreamTag, STREAM_ABYTES};
use crate::error::{Error, Result};
use crate::identity::{Contact, ContactLookup, Identity};
use crate::logging::safe_payload;
use crate::transport::ConnectionSocket;
use ed25519_dalek::VerifyingKey;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// The channel carrying JSON control requests. All other channels are
/// opaque binary.
pub const CONTROL_CHANNEL: u32 = 0;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialed the peer's hidden service.
    Outbound,
    /// The peer reached our hidden service.
    Inbound,
}

/// Immutable per-session parameters fixed at handshake time.
#[derive(Debug, Clone)]
pub struct ConnectData {
    /// The local identity the session belongs to.
    pub identity: Uuid,
    /// The peer's proven public key.
    pub contact_cert: VerifyingKey,
    /// Which side opened the connection.
    pub direction: Direction,
}

/// Read state machine of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InState {
    /// Encrypted stream not yet enabled.
    Disabled,
    /// Awaiting an encrypted length frame.
    ChunkSize,
    /// Awaiting an encrypted body frame of the given plaintext length.
    ChunkData(usize),
    /// Closing; all further decoded data is discarded.
    Closing,
}

/// Events a session posts to the protocol manager's reactor loop.
#[derive(Debug)]
pub enum PeerEvent {
    /// A decoded control-channel request.
    Control {
        /// Originating connection.
        connection: Uuid,
        /// The sender's request id for this chunk.
        request_id: u64,
        /// The parsed request.
        message: ControlMessage,
    },
    /// A binary chunk on a file-transfer channel.
    FileChunk {
        /// Originating connection.
        connection: Uuid,
        /// The file-transfer channel it arrived on.
        channel: u32,
        /// The sender's request id for this chunk.
        request_id: u64,
        /// Raw file bytes.
        payload: Vec<u8>,
    },
    /// The session ended. `reason` is set for error closes.
    Closed {
        /// The connection that ended.
        connection: Uuid,
        /// Human-readable failure reason, absent on clean closes.
        reason: Option<String>,
    },
}

/// Commands accepted by a running session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Send a control-channel request; replies with the assigned request id.
    SendControl {
        /// The request to serialize onto channel 0.
        message: ControlMessage,
        /// Receives the assigned request id once the frames have drained.
        reply: oneshot::Sender<Result<u64>>,
    },
    /// Send a binary chunk on a file-transfer channel; replies once the
    /// output queue has drained, which is the sender-side throttle.
    SendChunk {
        /// Target channel (nonzero).
        channel: u32,
        /// Raw payload bytes.
        payload: Vec<u8>,
        /// Receives the assigned request id once the frames have drained.
        reply: oneshot::Sender<Result<u64>>,
    },
    /// Close the session.
    Close,
}

/// Cloneable handle for talking to a running session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    connection: Uuid,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// The connection uuid this handle addresses.
    pub fn connection(&self) -> Uuid {
        self.connection
    }

    /// Send a control request, returning the assigned request id so callers
    /// can correlate a later ack.
    pub async fn send_control(&self, message: ControlMessage) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::SendControl { message, reply })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Send an acknowledgment.
    pub async fn send_ack(
        &self,
        what: &str,
        status: AckStatus,
        data: String,
        channel: Option<u32>,
    ) -> Result<u64> {
        self.send_control(ControlMessage::Ack {
            what: what.into(),
            status,
            data,
            channel,
        })
        .await
    }

    /// Send a binary chunk on a file channel. Resolves once the bytes have
    /// drained to the socket, so awaiting it paces bulk transfers.
    pub async fn send_chunk(&self, channel: u32, payload: Vec<u8>) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::SendChunk {
                channel,
                payload,
                reply,
            })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Ask the session to close. Idempotent; a dead session is fine.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Close).await;
    }
}

/// Outcome of an inbound handshake.
pub enum InboundHandshake {
    /// The initiator is a known contact; the session is established.
    Established {
        /// The ready-to-run session.
        session: PeerSession,
        /// The matched contact record.
        contact: Contact,
    },
    /// The initiator is unknown; it sent a contact request over its one-way
    /// stream. No `OLLEH` was sent and no session exists.
    ContactRequest {
        /// The requester's proven public key.
        pubkey: VerifyingKey,
        /// Self-chosen nickname.
        nick: String,
        /// Free-form introduction.
        message: String,
        /// The requester's onion address for dialing back.
        address: String,
    },
}

/// One authenticated peer connection.
pub struct PeerSession {
    connection: Uuid,
    connect_data: ConnectData,
    socket: ConnectionSocket,
    stream_in: DecryptStream,
    stream_out: EncryptStream,
    in_state: InState,
    next_request_id: u64,
}

impl PeerSession {
    /// Dial-side handshake: send `HELLO`, await and verify `OLLEH` against
    /// the contact key loaded for the hidden service we dialed.
    pub async fn connect_outbound(
        mut socket: ConnectionSocket,
        identity: &Identity,
        contact_cert: VerifyingKey,
    ) -> Result<Self> {
        let tx_key = StreamKey::generate();
        let tx_header = StreamHeader::generate();
        let stream_out = EncryptStream::new(&tx_key, tx_header);

        let hello = Hello::encode(&tx_key, &tx_header, identity.signing_key());
        socket.queue_write(&hello);
        socket.flush().await?;

        trace!(connection = %socket.uuid(), "sent HELLO, awaiting OLLEH");

        let olleh_bytes = socket.want_bytes(OLLEH_BYTES).await?;
        let olleh = Olleh::decode(&olleh_bytes, &contact_cert)?;
        let stream_in = DecryptStream::new(&olleh.tx_key, olleh.tx_header);

        debug!(connection = %socket.uuid(), "outbound handshake complete");

        Ok(Self {
            connection: socket.uuid(),
            connect_data: ConnectData {
                identity: identity.uuid(),
                contact_cert,
                direction: Direction::Outbound,
            },
            socket,
            stream_in,
            stream_out,
            in_state: InState::Disabled,
            next_request_id: 0,
        })
    }

    /// Accept-side handshake: read and verify `HELLO`, then either answer
    /// with `OLLEH` (known contact) or drain the one-way contact request
    /// (unknown pubkey) without answering.
    pub async fn accept_inbound(
        mut socket: ConnectionSocket,
        identity: &Identity,
        contacts: &dyn ContactLookup,
    ) -> Result<InboundHandshake> {
        let hello_bytes = socket.want_bytes(HELLO_BYTES).await?;
        let hello = Hello::decode(&hello_bytes)?;

        let mut stream_in = DecryptStream::new(&hello.tx_key, hello.tx_header);

        let Some(contact) = contacts.contact_for(identity.uuid(), &hello.pubkey) else {
            // Unknown initiator. Its one-way stream is still readable; the
            // only thing it may carry is a single AddMe request.
            debug!(connection = %socket.uuid(), "HELLO from unknown pubkey, reading contact request");
            let request = read_one_chunk(&mut socket, &mut stream_in).await?;
            return match ControlMessage::parse(&request.payload)? {
                Some(ControlMessage::AddMe {
                    nick,
                    message,
                    address,
                }) => Ok(InboundHandshake::ContactRequest {
                    pubkey: hello.pubkey,
                    nick,
                    message,
                    address,
                }),
                _ => Err(Error::HandshakeRejected(
                    "unknown contact sent something other than AddMe".into(),
                )),
            };
        };

        let tx_key = StreamKey::generate();
        let tx_header = StreamHeader::generate();
        let stream_out = EncryptStream::new(&tx_key, tx_header);

        let olleh = Olleh::encode(&tx_key, &tx_header, identity.signing_key());
        socket.queue_write(&olleh);
        socket.flush().await?;

        debug!(connection = %socket.uuid(), contact = %contact.uuid, "inbound handshake complete");

        Ok(InboundHandshake::Established {
            session: Self {
                connection: socket.uuid(),
                connect_data: ConnectData {
                    identity: identity.uuid(),
                    contact_cert: hello.pubkey,
                    direction: Direction::Inbound,
                },
                socket,
                stream_in,
                stream_out,
                in_state: InState::Disabled,
                next_request_id: 0,
            },
            contact,
        })
    }

    /// Dial-side contact request: send `HELLO` followed immediately by the
    /// `AddMe` chunk, without waiting for an `OLLEH` that will never come.
    pub async fn send_contact_request(
        mut socket: ConnectionSocket,
        identity: &Identity,
        nick: String,
        message: String,
    ) -> Result<()> {
        let tx_key = StreamKey::generate();
        let tx_header = StreamHeader::generate();
        let mut stream_out = EncryptStream::new(&tx_key, tx_header);

        let hello = Hello::encode(&tx_key, &tx_header, identity.signing_key());
        socket.queue_write(&hello);

        let addme = ControlMessage::AddMe {
            nick,
            message,
            address: identity.onion_address().as_str().to_string(),
        };
        let (len_frame, body_frame) =
            chunk::encode(&mut stream_out, CONTROL_CHANNEL, 1, &addme.to_bytes()?)?;
        socket.queue_write(&len_frame);
        socket.queue_write(&body_frame);
        socket.flush().await?;
        socket.shutdown().await;

        debug!(connection = %socket.uuid(), "contact request sent");
        Ok(())
    }

    /// The connection uuid.
    pub fn connection(&self) -> Uuid {
        self.connection
    }

    /// The immutable session parameters.
    pub fn connect_data(&self) -> &ConnectData {
        &self.connect_data
    }

    /// Current read state.
    pub fn in_state(&self) -> InState {
        self.in_state
    }

    /// Spawn the post-handshake chunk loop, returning its handle.
    ///
    /// `events` receives every decoded request and the final
    /// [`PeerEvent::Closed`]; `idle_keepalive` bounds silence before a
    /// keepalive ack goes out.
    pub fn spawn(
        self,
        events: mpsc::Sender<PeerEvent>,
        idle_keepalive: Duration,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let handle = SessionHandle {
            connection: self.connection,
            cmd_tx,
        };
        tokio::spawn(self.run(cmd_rx, events, idle_keepalive));
        handle
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        events: mpsc::Sender<PeerEvent>,
        idle_keepalive: Duration,
    ) {
        let connection = self.connection;
        let result = self.drive(&mut cmd_rx, &events, idle_keepalive).await;

        self.in_state = InState::Closing;
        self.socket.shutdown().await;

        let reason = match result {
            Ok(()) => None,
            Err(e) => Some(e.to_string()),
        };
        let _ = events
            .send(PeerEvent::Closed { connection, reason })
            .await;
    }

    async fn drive(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<SessionCommand>,
        events: &mpsc::Sender<PeerEvent>,
        idle_keepalive: Duration,
    ) -> Result<()> {
        enum Wake {
            Bytes(bytes::Bytes),
            Cmd(Option<SessionCommand>),
            Idle,
        }

        self.in_state = InState::ChunkSize;
        let mut last_activity = Instant::now();

        loop {
            let wanted = match self.in_state {
                InState::ChunkSize => 2 + STREAM_ABYTES,
                InState::ChunkData(len) => len + STREAM_ABYTES,
                InState::Disabled | InState::Closing => return Ok(()),
            };
            let idle_deadline = last_activity + idle_keepalive;

            let wake = tokio::select! {
                bytes = self.socket.want_bytes(wanted) => Wake::Bytes(bytes?),
                cmd = cmd_rx.recv() => Wake::Cmd(cmd),
                _ = tokio::time::sleep_until(idle_deadline) => Wake::Idle,
            };

            match wake {
                Wake::Bytes(ciphertext) => {
                    last_activity = Instant::now();
                    let (plain, tag) = self.stream_in.pull(&ciphertext)?;
                    if tag == StreamTag::Final {
                        debug!(connection = %self.connection, "peer finalized stream, closing");
                        self.in_state = InState::Closing;
                        return Ok(());
                    }

                    match self.in_state {
                        InState::ChunkSize => {
                            let len = chunk::decode_length(&plain)?;
                            trace!(connection = %self.connection, len, "want chunk data");
                            self.in_state = InState::ChunkData(len);
                        }
                        InState::ChunkData(_) => {
                            let decoded = chunk::decode_body(&plain)?;
                            self.dispatch(decoded, events).await?;
                            self.in_state = InState::ChunkSize;
                        }
                        InState::Disabled | InState::Closing => return Ok(()),
                    }
                }
                Wake::Cmd(None) | Wake::Cmd(Some(SessionCommand::Close)) => {
                    self.in_state = InState::Closing;
                    return Ok(());
                }
                Wake::Cmd(Some(SessionCommand::SendControl { message, reply })) => {
                    let result = self.send_control(&message).await;
                    let failed = result.is_err();
                    let _ = reply.send(result);
                    if failed {
                        return Err(Error::Transport("control send failed".into()));
                    }
                    last_activity = Instant::now();
                }
                Wake::Cmd(Some(SessionCommand::SendChunk {
                    channel,
                    payload,
                    reply,
                })) => {
                    let result = self.send_binary(channel, &payload).await;
                    let failed = result.is_err();
                    let _ = reply.send(result);
                    if failed {
                        return Err(Error::Transport("chunk send failed".into()));
                    }
                    last_activity = Instant::now();
                }
                Wake::Idle => {
                    trace!(connection = %self.connection, "idle, sending keepalive");
                    self.send_control(&ControlMessage::Ack {
                        what: "Keepalive".into(),
                        status: AckStatus::Ok,
                        data: String::new(),
                        channel: None,
                    })
                    .await?;
                    last_activity = Instant::now();
                }
            }
        }
    }

    async fn dispatch(&mut self, decoded: Chunk, events: &mpsc::Sender<PeerEvent>) -> Result<()> {
        if decoded.channel == CONTROL_CHANNEL {
            trace!(
                connection = %self.connection,
                id = decoded.request_id,
                payload = %safe_payload(&decoded.payload),
                "control chunk"
            );
            match ControlMessage::parse(&decoded.payload)? {
                Some(message) => {
                    events
                        .send(PeerEvent::Control {
                            connection: self.connection,
                            request_id: decoded.request_id,
                            message,
                        })
                        .await
                        .map_err(|_| Error::Transport("event channel closed".into()))?;
                }
                None => {
                    warn!(connection = %self.connection, "unrecognized control request, ignoring");
                }
            }
        } else {
            trace!(
                connection = %self.connection,
                channel = decoded.channel,
                id = decoded.request_id,
                size = decoded.payload.len(),
                "binary chunk"
            );
            events
                .send(PeerEvent::FileChunk {
                    connection: self.connection,
                    channel: decoded.channel,
                    request_id: decoded.request_id,
                    payload: decoded.payload,
                })
                .await
                .map_err(|_| Error::Transport("event channel closed".into()))?;
        }
        Ok(())
    }

    async fn send_control(&mut self, message: &ControlMessage) -> Result<u64> {
        let payload = message.to_bytes()?;
        self.send_on(CONTROL_CHANNEL, &payload).await
    }

    async fn send_binary(&mut self, channel: u32, payload: &[u8]) -> Result<u64> {
        if channel == CONTROL_CHANNEL {
            return Err(Error::Malformed(
                "binary payloads may not use the control channel".into(),
            ));
        }
        self.send_on(channel, payload).await
    }

    async fn send_on(&mut self, channel: u32, payload: &[u8]) -> Result<u64> {
        self.next_request_id += 1;
        let id = self.next_request_id;

        let (len_frame, body_frame) = chunk::encode(&mut self.stream_out, channel, id, payload)?;
        self.socket.queue_write(&len_frame);
        self.socket.queue_write(&body_frame);
        self.socket.flush().await?;

        Ok(id)
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("connection", &self.connection)
            .field("direction", &self.connect_data.direction)
            .field("in_state", &self.in_state)
            .field("next_request_id", &self.next_request_id)
            .finish()
    }
}

/// Read exactly one chunk from a one-way stream (the pre-session contact
/// request path).
async fn read_one_chunk(
    socket: &mut ConnectionSocket,
    stream_in: &mut DecryptStream,
) -> Result<Chunk> {
    let len_frame = socket.want_bytes(2 + STREAM_ABYTES).await?;
    let (len_plain, _) = stream_in.pull(&len_frame)?;
    let len = chunk::decode_length(&len_plain)?;

    let body_frame = socket.want_bytes(len + STREAM_ABYTES).await?;
    let (body_plain, _) = stream_in.pull(&body_frame)?;
    chunk::decode_body(&body_plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ContactRegistry;

    fn known_pair() -> (Identity, Identity, ContactRegistry) {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");

        let registry = ContactRegistry::new();
        registry.upsert(Contact {
            uuid: Uuid::new_v4(),
            identity: bob.uuid(),
            name: "alice".into(),
            pubkey: alice.public_key(),
            onion_address: alice.onion_address().clone(),
            online: false,
        });

        (alice, bob, registry)
    }

    #[tokio::test]
    async fn handshake_establishes_both_sides() {
        let (alice, bob, registry) = known_pair();
        let bob_pubkey = bob.public_key();
        let (a, b) = tokio::io::duplex(4096);

        let bob_task = tokio::spawn(async move {
            PeerSession::accept_inbound(ConnectionSocket::new(b), &bob, &registry).await
        });

        let alice_session = PeerSession::connect_outbound(
            ConnectionSocket::new(a),
            &alice,
            bob_pubkey,
        )
        .await
        .expect("outbound handshake");

        let inbound = bob_task.await.expect("join").expect("inbound handshake");
        let bob_session = match inbound {
            InboundHandshake::Established { session, .. } => session,
            InboundHandshake::ContactRequest { .. } => panic!("alice is a known contact"),
        };

        assert_eq!(alice_session.connect_data().direction, Direction::Outbound);
        assert_eq!(bob_session.connect_data().direction, Direction::Inbound);
        assert_eq!(
            alice_session.connect_data().contact_cert,
            bob_pubkey
        );
        assert_eq!(
            bob_session.connect_data().contact_cert,
            alice.public_key()
        );
    }

    #[tokio::test]
    async fn unknown_contact_becomes_addme() {
        let bob = Identity::generate("bob");
        let carol = Identity::generate("carol");
        let registry = ContactRegistry::new(); // carol is not in it

        let (a, b) = tokio::io::duplex(4096);

        let bob_task = tokio::spawn(async move {
            PeerSession::accept_inbound(ConnectionSocket::new(b), &bob, &registry).await
        });

        PeerSession::send_contact_request(
            ConnectionSocket::new(a),
            &carol,
            "Carol".into(),
            "hi".into(),
        )
        .await
        .expect("send contact request");

        match bob_task.await.expect("join").expect("inbound") {
            InboundHandshake::ContactRequest {
                pubkey,
                nick,
                message,
                address,
            } => {
                assert_eq!(pubkey, carol.public_key());
                assert_eq!(nick, "Carol");
                assert_eq!(message, "hi");
                assert_eq!(address, carol.onion_address().as_str());
            }
            InboundHandshake::Established { .. } => panic!("carol must be unknown"),
        }
    }

    #[tokio::test]
    async fn chunk_loop_delivers_control_messages() {
        let (alice, bob, registry) = known_pair();
        let bob_pubkey = bob.public_key();
        let (a, b) = tokio::io::duplex(16 * 1024);

        let bob_task = tokio::spawn(async move {
            PeerSession::accept_inbound(ConnectionSocket::new(b), &bob, &registry).await
        });
        let alice_session =
            PeerSession::connect_outbound(ConnectionSocket::new(a), &alice, bob_pubkey)
                .await
                .expect("outbound");
        let bob_session = match bob_task.await.expect("join").expect("inbound") {
            InboundHandshake::Established { session, .. } => session,
            InboundHandshake::ContactRequest { .. } => panic!("known contact"),
        };

        let (alice_events, _alice_rx) = mpsc::channel(8);
        let (bob_events, mut bob_rx) = mpsc::channel(8);
        let alice_handle = alice_session.spawn(alice_events, Duration::from_secs(300));
        let _bob_handle = bob_session.spawn(bob_events, Duration::from_secs(300));

        let id = alice_handle
            .send_ack("Message", AckStatus::Ok, "bWlkMQ==".into(), None)
            .await
            .expect("send ack");
        assert_eq!(id, 1);

        match bob_rx.recv().await.expect("event") {
            PeerEvent::Control {
                request_id,
                message:
                    ControlMessage::Ack {
                        what, status, data, ..
                    },
                ..
            } => {
                assert_eq!(request_id, 1);
                assert_eq!(what, "Message");
                assert_eq!(status, AckStatus::Ok);
                assert_eq!(data, "bWlkMQ==");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Request ids are strictly increasing per session direction.
        let id2 = alice_handle
            .send_ack("Message", AckStatus::Ok, "bWlkMg==".into(), None)
            .await
            .expect("send second ack");
        assert!(id2 > id);
    }

    #[tokio::test]
    async fn close_emits_closed_event() {
        let (alice, bob, registry) = known_pair();
        let bob_pubkey = bob.public_key();
        let (a, b) = tokio::io::duplex(4096);

        let bob_task = tokio::spawn(async move {
            PeerSession::accept_inbound(ConnectionSocket::new(b), &bob, &registry).await
        });
        let alice_session =
            PeerSession::connect_outbound(ConnectionSocket::new(a), &alice, bob_pubkey)
                .await
                .expect("outbound");
        let bob_session = match bob_task.await.expect("join").expect("inbound") {
            InboundHandshake::Established { session, .. } => session,
            InboundHandshake::ContactRequest { .. } => panic!("known contact"),
        };

        let (alice_events, mut alice_rx) = mpsc::channel(8);
        let (bob_events, mut bob_rx) = mpsc::channel(8);
        let alice_handle = alice_session.spawn(alice_events, Duration::from_secs(300));
        let _bob_handle = bob_session.spawn(bob_events, Duration::from_secs(300));

        alice_handle.close().await;

        match alice_rx.recv().await.expect("alice event") {
            PeerEvent::Closed { reason, .. } => assert!(reason.is_none()),
            other => panic!("unexpected event: {:?}", other),
        }

        // Bob sees the transport drop.
        match bob_rx.recv().await.expect("bob event") {
            PeerEvent::Closed { reason, .. } => assert!(reason.is_some()),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
