//! The protocol manager.
//!
//! One reactor loop owns every piece of mutable protocol state: the session
//! index, the file-transfer manager and the conversation manager. Session
//! tasks, handshake tasks, hash tasks and chunk pumps all run elsewhere and
//! post their results here as messages, so state transitions are serial and
//! never race.

use super::control::{AckStatus, ControlMessage};
use super::session::{
    Direction, InboundHandshake, PeerEvent, PeerSession, SessionHandle,
};
use super::{from_b64, to_b64};
use crate::config::ProtocolConfig;
use crate::conversation::ConversationManager;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::files::{FileTransferManager, TransferMsg};
use crate::identity::{Contact, ContactRegistry, Identity, OnionAddress};
use crate::storage::Database;
use crate::tor::{self, HiddenService, TorSocksConfig};
use crate::transport::ConnectionSocket;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Requests accepted by a running [`ProtocolManager`].
pub enum ManagerCommand {
    /// Hand over an accepted inbound socket for handshaking.
    AttachInbound {
        /// The accepted connection.
        socket: ConnectionSocket,
    },
    /// Dial a contact's hidden service and establish a session.
    ConnectContact {
        /// The contact to dial.
        contact: Uuid,
        /// Resolves with the connection uuid once established.
        reply: oneshot::Sender<Result<Uuid>>,
    },
    /// Send a contact request (AddMe) to a not-yet-trusted peer.
    SendContactRequest {
        /// The onion address to dial.
        address: OnionAddress,
        /// Our self-chosen nickname.
        nick: String,
        /// Free-form introduction.
        message: String,
        /// Resolves once the request has been written.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Compose, sign, persist and send a chat message.
    SendMessage {
        /// Recipient contact.
        contact: Uuid,
        /// Message body.
        content: String,
        /// Resolves with the message's wire id.
        reply: oneshot::Sender<Result<[u8; 16]>>,
    },
    /// Offer a local file to a contact.
    OfferFile {
        /// Recipient contact.
        contact: Uuid,
        /// Path of the file to send.
        path: PathBuf,
        /// Resolves with the file's wire id.
        reply: oneshot::Sender<Result<[u8; 16]>>,
    },
    /// Accept an offered incoming file.
    AcceptFile {
        /// The file to accept.
        file_id: [u8; 16],
        /// Resolves once the accept ack went out.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Reject an offered incoming file.
    RejectFile {
        /// The file to reject.
        file_id: [u8; 16],
        /// Resolves once the reject ack went out.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Cancel a transfer in any non-terminal state.
    CancelFile {
        /// The file to cancel.
        file_id: [u8; 16],
        /// Resolves once the state change is applied.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close one connection.
    CloseConnection {
        /// The connection to close.
        connection: Uuid,
    },
    /// Close every session and stop the reactor.
    Shutdown,
}

/// Handshake outcomes posted back by connection tasks.
enum HandshakeMsg {
    Established {
        session: PeerSession,
        contact: Contact,
    },
    ContactRequest {
        pubkey: ed25519_dalek::VerifyingKey,
        nick: String,
        message: String,
        address: String,
    },
    Failed {
        reason: String,
    },
}

struct SessionEntry {
    handle: SessionHandle,
    contact: Contact,
    initiator_pubkey: [u8; 32],
}

/// Cloneable front door to the reactor.
#[derive(Clone)]
pub struct ProtocolHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
}

impl ProtocolHandle {
    /// Hand an accepted socket to the reactor.
    pub async fn attach_inbound(&self, socket: ConnectionSocket) -> Result<()> {
        self.cmd_tx
            .send(ManagerCommand::AttachInbound { socket })
            .await
            .map_err(|_| Error::NoSession)
    }

    /// Dial a contact and wait for the session to establish.
    pub async fn connect_contact(&self, contact: Uuid) -> Result<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::ConnectContact { contact, reply })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Send a contact request to an unknown peer.
    pub async fn send_contact_request(
        &self,
        address: OnionAddress,
        nick: String,
        message: String,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::SendContactRequest {
                address,
                nick,
                message,
                reply,
            })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Compose and send a chat message; returns its wire id.
    pub async fn send_message(&self, contact: Uuid, content: String) -> Result<[u8; 16]> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::SendMessage {
                contact,
                content,
                reply,
            })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Offer a file; returns its wire id.
    pub async fn offer_file(&self, contact: Uuid, path: PathBuf) -> Result<[u8; 16]> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::OfferFile {
                contact,
                path,
                reply,
            })
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Accept an offered file.
    pub async fn accept_file(&self, file_id: [u8; 16]) -> Result<()> {
        self.file_op(file_id, |file_id, reply| ManagerCommand::AcceptFile { file_id, reply })
            .await
    }

    /// Reject an offered file.
    pub async fn reject_file(&self, file_id: [u8; 16]) -> Result<()> {
        self.file_op(file_id, |file_id, reply| ManagerCommand::RejectFile { file_id, reply })
            .await
    }

    /// Cancel a transfer.
    pub async fn cancel_file(&self, file_id: [u8; 16]) -> Result<()> {
        self.file_op(file_id, |file_id, reply| ManagerCommand::CancelFile { file_id, reply })
            .await
    }

    async fn file_op(
        &self,
        file_id: [u8; 16],
        build: impl FnOnce([u8; 16], oneshot::Sender<Result<()>>) -> ManagerCommand,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(file_id, reply))
            .await
            .map_err(|_| Error::NoSession)?;
        rx.await.map_err(|_| Error::NoSession)?
    }

    /// Close one connection.
    pub async fn close_connection(&self, connection: Uuid) {
        let _ = self
            .cmd_tx
            .send(ManagerCommand::CloseConnection { connection })
            .await;
    }

    /// Stop the reactor and close every session.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ManagerCommand::Shutdown).await;
    }

    /// Feed a hidden service's accepted streams into the reactor until the
    /// service or the reactor goes away.
    pub fn spawn_listener(&self, service: HiddenService) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            loop {
                match service.accept().await {
                    Ok(stream) => {
                        if handle
                            .attach_inbound(ConnectionSocket::new(stream))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "hidden service accept failed");
                        break;
                    }
                }
            }
        })
    }
}

/// The reactor owning all protocol state for one local identity.
pub struct ProtocolManager {
    identity: Arc<Identity>,
    contacts: Arc<ContactRegistry>,
    db: Database,
    events: EventBus,
    config: ProtocolConfig,
    socks: TorSocksConfig,
    download_dir: PathBuf,

    sessions: HashMap<Uuid, SessionEntry>,
    by_contact: HashMap<Uuid, Uuid>,
    conversations: ConversationManager,
    files: FileTransferManager,

    peer_tx: mpsc::Sender<PeerEvent>,
    handshake_tx: mpsc::Sender<HandshakeMsg>,
}

impl ProtocolManager {
    /// Build the manager and spawn its reactor loop.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        identity: Arc<Identity>,
        contacts: Arc<ContactRegistry>,
        db: Database,
        events: EventBus,
        config: ProtocolConfig,
        socks: TorSocksConfig,
        download_dir: PathBuf,
    ) -> ProtocolHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (peer_tx, peer_rx) = mpsc::channel(256);
        let (transfer_tx, transfer_rx) = mpsc::channel(64);
        let (handshake_tx, handshake_rx) = mpsc::channel(16);

        let manager = Self {
            files: FileTransferManager::new(
                transfer_tx,
                events.clone(),
                config.progress_flush_interval,
            ),
            conversations: ConversationManager::new(
                crate::conversation::DEFAULT_CACHE_SIZE,
                events.clone(),
            ),
            identity,
            contacts,
            db,
            events,
            config,
            socks,
            download_dir,
            sessions: HashMap::new(),
            by_contact: HashMap::new(),
            peer_tx,
            handshake_tx,
        };

        tokio::spawn(manager.run(cmd_rx, peer_rx, transfer_rx, handshake_rx));
        ProtocolHandle { cmd_tx }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ManagerCommand>,
        mut peer_rx: mpsc::Receiver<PeerEvent>,
        mut transfer_rx: mpsc::Receiver<TransferMsg>,
        mut handshake_rx: mpsc::Receiver<HandshakeMsg>,
    ) {
        info!(identity = %self.identity.uuid(), "protocol manager running");

        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(event) = peer_rx.recv() => self.handle_peer_event(event).await,
                Some(msg) = transfer_rx.recv() => self.handle_transfer_msg(msg).await,
                Some(msg) = handshake_rx.recv() => self.handle_handshake(msg).await,
                else => break,
            }
        }

        for entry in self.sessions.values() {
            entry.handle.close().await;
        }
        info!(identity = %self.identity.uuid(), "protocol manager stopped");
    }

    async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
        match cmd {
            ManagerCommand::AttachInbound { socket } => {
                let identity = self.identity.clone();
                let contacts = self.contacts.clone();
                let handshake_tx = self.handshake_tx.clone();
                let timeout = self.config.handshake_timeout;

                tokio::spawn(async move {
                    let result = tokio::time::timeout(
                        timeout,
                        PeerSession::accept_inbound(socket, &identity, contacts.as_ref()),
                    )
                    .await
                    .map_err(|_| Error::Timeout)
                    .and_then(|r| r);

                    let msg = match result {
                        Ok(InboundHandshake::Established { session, contact }) => {
                            HandshakeMsg::Established { session, contact }
                        }
                        Ok(InboundHandshake::ContactRequest {
                            pubkey,
                            nick,
                            message,
                            address,
                        }) => HandshakeMsg::ContactRequest {
                            pubkey,
                            nick,
                            message,
                            address,
                        },
                        Err(e) => HandshakeMsg::Failed {
                            reason: e.to_string(),
                        },
                    };
                    let _ = handshake_tx.send(msg).await;
                });
                true
            }
            ManagerCommand::ConnectContact { contact, reply } => {
                self.connect_contact(contact, reply);
                true
            }
            ManagerCommand::SendContactRequest {
                address,
                nick,
                message,
                reply,
            } => {
                let identity = self.identity.clone();
                let socks = self.socks.clone();
                let timeout = self.config.handshake_timeout;

                tokio::spawn(async move {
                    let result = async {
                        let stream = tor::dial(&socks, &address).await?;
                        tokio::time::timeout(
                            timeout,
                            PeerSession::send_contact_request(
                                ConnectionSocket::new(stream),
                                &identity,
                                nick,
                                message,
                            ),
                        )
                        .await
                        .map_err(|_| Error::Timeout)?
                    }
                    .await;
                    let _ = reply.send(result);
                });
                true
            }
            ManagerCommand::SendMessage {
                contact,
                content,
                reply,
            } => {
                let _ = reply.send(self.send_message(contact, content).await);
                true
            }
            ManagerCommand::OfferFile {
                contact,
                path,
                reply,
            } => {
                let _ = reply.send(self.offer_file(contact, path));
                true
            }
            ManagerCommand::AcceptFile { file_id, reply } => {
                let result = match self.session_for_file(&file_id) {
                    Some(handle) => self.files.accept(&self.db, &handle, file_id).await,
                    None => Err(Error::NoSession),
                };
                let _ = reply.send(result);
                true
            }
            ManagerCommand::RejectFile { file_id, reply } => {
                let handle = self.session_for_file(&file_id);
                let result = self
                    .files
                    .reject(&self.db, handle.as_ref(), file_id)
                    .await;
                let _ = reply.send(result);
                true
            }
            ManagerCommand::CancelFile { file_id, reply } => {
                let handle = self.session_for_file(&file_id);
                let result = self
                    .files
                    .cancel(&self.db, handle.as_ref(), file_id)
                    .await;
                let _ = reply.send(result);
                true
            }
            ManagerCommand::CloseConnection { connection } => {
                if let Some(entry) = self.sessions.get(&connection) {
                    entry.handle.close().await;
                }
                true
            }
            ManagerCommand::Shutdown => false,
        }
    }

    fn connect_contact(&mut self, contact: Uuid, reply: oneshot::Sender<Result<Uuid>>) {
        if let Some(connection) = self.by_contact.get(&contact) {
            let _ = reply.send(Ok(*connection));
            return;
        }
        let Some(record) = self.contacts.by_uuid(contact) else {
            let _ = reply.send(Err(Error::NotFound(format!("contact {}", contact))));
            return;
        };

        let identity = self.identity.clone();
        let socks = self.socks.clone();
        let handshake_tx = self.handshake_tx.clone();
        let handshake_timeout = self.config.handshake_timeout;
        let base_delay = self.config.retry_base_delay;
        let max_attempts = self.config.max_connect_attempts;

        tokio::spawn(async move {
            let mut last_error = Error::Timeout;
            for attempt in 0..max_attempts {
                if attempt > 0 {
                    let backoff = base_delay * (1 << (attempt - 1).min(5));
                    tokio::time::sleep(backoff).await;
                }

                let dialed = tor::dial(&socks, &record.onion_address).await;
                let stream = match dialed {
                    Ok(stream) => stream,
                    Err(e) => {
                        debug!(attempt, error = %e, "dial failed, will retry");
                        last_error = e;
                        continue;
                    }
                };

                match tokio::time::timeout(
                    handshake_timeout,
                    PeerSession::connect_outbound(
                        ConnectionSocket::new(stream),
                        &identity,
                        record.pubkey,
                    ),
                )
                .await
                .map_err(|_| Error::Timeout)
                .and_then(|r| r)
                {
                    Ok(session) => {
                        let connection = session.connection();
                        let _ = handshake_tx
                            .send(HandshakeMsg::Established {
                                session,
                                contact: record.clone(),
                            })
                            .await;
                        let _ = reply.send(Ok(connection));
                        return;
                    }
                    Err(e) if e.is_fatal() => {
                        // Crypto and handshake rejections are never retried.
                        let _ = reply.send(Err(e));
                        return;
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "handshake failed, will retry");
                        last_error = e;
                    }
                }
            }
            let _ = reply.send(Err(last_error));
        });
    }

    async fn send_message(&mut self, contact: Uuid, content: String) -> Result<[u8; 16]> {
        let record = self
            .contacts
            .by_uuid(contact)
            .ok_or_else(|| Error::NotFound(format!("contact {}", contact)))?;

        let message =
            self.conversations
                .send_message(&self.db, &self.identity, &record, content)?;
        let message_id = message.message_id;

        match self.by_contact.get(&contact).and_then(|c| self.sessions.get(c)) {
            Some(entry) => {
                let handle = entry.handle.clone();
                let wire = ControlMessage::Message(message.to_wire());
                tokio::spawn(async move {
                    if let Err(e) = handle.send_control(wire).await {
                        warn!(error = %e, "failed to send message to peer");
                    }
                });
            }
            None => {
                warn!(contact = %contact, "peer offline, message stored unsent");
            }
        }
        Ok(message_id)
    }

    fn offer_file(&mut self, contact: Uuid, path: PathBuf) -> Result<[u8; 16]> {
        let record = self
            .contacts
            .by_uuid(contact)
            .ok_or_else(|| Error::NotFound(format!("contact {}", contact)))?;
        let conversation =
            self.conversations
                .get_or_create(&self.db, &self.identity, &record)?;

        self.files.offer_outgoing(
            &self.db,
            self.identity.uuid(),
            conversation.uuid,
            contact,
            path,
        )
    }

    fn session_for_file(&self, file_id: &[u8; 16]) -> Option<SessionHandle> {
        let file = self.files.file(file_id)?;
        let connection = self.by_contact.get(&file.contact)?;
        self.sessions.get(connection).map(|e| e.handle.clone())
    }

    fn session_for_contact(&self, contact: Uuid) -> Option<SessionHandle> {
        let connection = self.by_contact.get(&contact)?;
        self.sessions.get(connection).map(|e| e.handle.clone())
    }

    async fn handle_handshake(&mut self, msg: HandshakeMsg) {
        match msg {
            HandshakeMsg::Established { session, contact } => {
                self.register_session(session, contact).await;
            }
            HandshakeMsg::ContactRequest {
                pubkey,
                nick,
                message,
                address,
            } => {
                info!(nick = %nick, "contact request received");
                self.events.publish(Event::AddmeRequest {
                    pubkey: *pubkey.as_bytes(),
                    nick,
                    message,
                    address,
                });
            }
            HandshakeMsg::Failed { reason } => {
                warn!(reason = %reason, "handshake failed");
            }
        }
    }

    async fn register_session(&mut self, session: PeerSession, contact: Contact) {
        let connection = session.connection();
        let initiator_pubkey = match session.connect_data().direction {
            Direction::Outbound => *self.identity.public_key().as_bytes(),
            Direction::Inbound => *session.connect_data().contact_cert.as_bytes(),
        };

        // Two live connections for the same pair resolve deterministically:
        // the one whose initiator pubkey is lexicographically smaller wins.
        if let Some(existing_conn) = self.by_contact.get(&contact.uuid).copied() {
            if let Some(existing) = self.sessions.get(&existing_conn) {
                if existing.initiator_pubkey <= initiator_pubkey {
                    debug!(connection = %connection, "duplicate session loses, dropping");
                    return;
                }
                debug!(connection = %existing_conn, "duplicate session superseded");
                existing.handle.close().await;
                self.sessions.remove(&existing_conn);
                self.by_contact.remove(&contact.uuid);
            }
        }

        let handle = session.spawn(self.peer_tx.clone(), self.config.idle_keepalive);
        self.sessions.insert(
            connection,
            SessionEntry {
                handle,
                contact: contact.clone(),
                initiator_pubkey,
            },
        );
        self.by_contact.insert(contact.uuid, connection);
        self.contacts.set_online(contact.uuid, true);

        info!(connection = %connection, contact = %contact.uuid, "peer session established");
        self.events.publish(Event::IncomingPeer {
            connection,
            contact: contact.uuid,
        });
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Control {
                connection,
                request_id: _,
                message,
            } => {
                if let Err(e) = self.handle_control(connection, message).await {
                    if e.is_fatal() {
                        warn!(connection = %connection, error = %e, "fatal control error, closing session");
                        if let Some(entry) = self.sessions.get(&connection) {
                            entry.handle.close().await;
                        }
                    } else {
                        warn!(connection = %connection, error = %e, "control request dropped");
                    }
                }
            }
            PeerEvent::FileChunk {
                connection,
                channel,
                request_id: _,
                payload,
            } => {
                let handle = self.sessions.get(&connection).map(|e| e.handle.clone());
                if let Err(e) = self
                    .files
                    .on_file_chunk(&self.db, handle.as_ref(), connection, channel, &payload)
                    .await
                {
                    warn!(connection = %connection, error = %e, "file chunk handling failed");
                }
            }
            PeerEvent::Closed { connection, reason } => {
                if let Some(entry) = self.sessions.remove(&connection) {
                    self.by_contact.remove(&entry.contact.uuid);
                    self.contacts.set_online(entry.contact.uuid, false);
                }
                if let Err(e) = self.files.on_session_closed(&self.db, connection).await {
                    warn!(error = %e, "failed to fail transfers of closed session");
                }
                match reason {
                    Some(reason) => info!(connection = %connection, reason = %reason, "peer disconnected"),
                    None => info!(connection = %connection, "peer disconnected"),
                }
                self.events.publish(Event::PeerDisconnected { connection });
            }
        }
    }

    async fn handle_control(&mut self, connection: Uuid, message: ControlMessage) -> Result<()> {
        let Some(entry) = self.sessions.get(&connection) else {
            return Ok(());
        };
        let contact = entry.contact.clone();
        let handle = entry.handle.clone();

        match message {
            ControlMessage::AddMe {
                nick,
                message,
                address,
            } => {
                // A re-request over an established session; surface it like
                // the pre-session flow.
                self.events.publish(Event::AddmeRequest {
                    pubkey: *contact.pubkey.as_bytes(),
                    nick,
                    message,
                    address,
                });
                Ok(())
            }
            ControlMessage::Ack {
                what,
                status,
                data,
                channel,
            } => {
                self.events.publish(Event::ReceivedAck {
                    connection,
                    what: what.clone(),
                    status,
                    data: data.clone(),
                });

                match what.as_str() {
                    "Message" => {
                        if status == AckStatus::Ok {
                            let id: [u8; 16] = from_b64(&data)?
                                .as_slice()
                                .try_into()
                                .map_err(|_| {
                                    Error::Malformed("message id must be 16 bytes".into())
                                })?;
                            self.conversations.on_message_ack(&self.db, &id)?;
                        }
                        Ok(())
                    }
                    "IncomingFile" => {
                        self.files
                            .on_peer_ack(&self.db, Some(&handle), status, &data, channel)
                            .await
                    }
                    _ => {
                        // Keepalives and future subjects need no handling.
                        Ok(())
                    }
                }
            }
            ControlMessage::Message(wire) => {
                match self
                    .conversations
                    .receive_message(&self.db, &self.identity, &contact, &wire)
                {
                    Ok(received) => {
                        let ack_data = to_b64(&received.message_id);
                        tokio::spawn(async move {
                            let _ = handle
                                .send_ack("Message", AckStatus::Ok, ack_data, None)
                                .await;
                        });
                        Ok(())
                    }
                    Err(e @ Error::Crypto(_)) => {
                        // Bad signature: drop and log, the session stays up.
                        warn!(connection = %connection, error = %e, "unverifiable message dropped");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            ControlMessage::IncomingFile {
                file_id,
                name,
                size,
                hash,
                file_time,
            } => {
                let file_id: [u8; 16] = from_b64(&file_id)?
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Malformed("file id must be 16 bytes".into()))?;
                let hash: [u8; 32] = from_b64(&hash)?
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Malformed("file hash must be 32 bytes".into()))?;

                let conversation =
                    self.conversations
                        .get_or_create(&self.db, &self.identity, &contact)?;
                let download_dir = self.download_dir.clone();
                self.files.on_offer_received(
                    &self.db,
                    self.identity.uuid(),
                    conversation.uuid,
                    contact.uuid,
                    file_id,
                    &name,
                    size,
                    hash,
                    file_time,
                    &download_dir,
                )
            }
        }
    }

    async fn handle_transfer_msg(&mut self, msg: TransferMsg) {
        let result = match msg {
            TransferMsg::OutgoingHashed { file_id, result } => {
                let handle = self
                    .files
                    .file(&file_id)
                    .and_then(|f| self.session_for_contact(f.contact));
                self.files
                    .on_outgoing_hashed(&self.db, handle.as_ref(), file_id, result)
                    .await
            }
            TransferMsg::IncomingHashed { file_id, result } => {
                let handle = self
                    .files
                    .file(&file_id)
                    .and_then(|f| self.session_for_contact(f.contact));
                self.files
                    .on_incoming_hashed(&self.db, handle.as_ref(), file_id, result)
                    .await
            }
            TransferMsg::OutgoingProgress { file_id, bytes } => {
                self.files.on_outgoing_progress(&self.db, file_id, bytes)
            }
            TransferMsg::OutgoingSent { file_id } => self.files.on_outgoing_sent(&self.db, file_id),
            TransferMsg::OutgoingFailed { file_id, reason } => {
                let handle = self
                    .files
                    .file(&file_id)
                    .and_then(|f| self.session_for_contact(f.contact));
                self.files
                    .on_outgoing_failed(&self.db, handle.as_ref(), file_id, &reason)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "transfer bookkeeping failed");
        }
    }
}

impl std::fmt::Debug for ProtocolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolManager")
            .field("identity", &self.identity.uuid())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
