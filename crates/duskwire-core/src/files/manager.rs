//! The file-transfer manager.
//!
//! Owned by the protocol manager's reactor loop; all state mutation happens
//! there. Hashing and bulk sending run in background tasks that post their
//! results back as [`TransferMsg`] events rather than touching state
//! directly.

use super::record::{find_unused_name, File, FileDirection, FileState};
use crate::crypto::{constant_time_eq, random_id};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::protocol::{from_b64, to_b64, AckStatus, ControlMessage, SessionHandle, MAX_CHUNK_PAYLOAD};
use crate::storage::Database;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Results posted back to the reactor by background transfer tasks.
#[derive(Debug)]
pub enum TransferMsg {
    /// An outgoing file finished hashing and can be offered.
    OutgoingHashed {
        /// The file.
        file_id: [u8; 16],
        /// Computed content hash, or the failure.
        result: Result<[u8; 32]>,
    },
    /// A received file finished hashing and can be verified.
    IncomingHashed {
        /// The file.
        file_id: [u8; 16],
        /// Computed content hash, or the failure.
        result: Result<[u8; 32]>,
    },
    /// The chunk pump moved more bytes.
    OutgoingProgress {
        /// The file.
        file_id: [u8; 16],
        /// Bytes sent since the last report.
        bytes: usize,
    },
    /// The chunk pump delivered the last byte and the completion ack.
    OutgoingSent {
        /// The file.
        file_id: [u8; 16],
    },
    /// The chunk pump gave up.
    OutgoingFailed {
        /// The file.
        file_id: [u8; 16],
        /// Why.
        reason: String,
    },
}

/// Per-file transfer orchestration: offers, accept/reject, channel
/// allocation, the receive path into `.part` files and hash verification.
pub struct FileTransferManager {
    files: HashMap<[u8; 16], File>,
    by_channel: HashMap<(Uuid, u32), [u8; 16]>,
    next_channel: HashMap<Uuid, u32>,
    part_handles: HashMap<[u8; 16], tokio::fs::File>,
    pumps: HashMap<[u8; 16], tokio::task::JoinHandle<()>>,
    msg_tx: mpsc::Sender<TransferMsg>,
    events: EventBus,
    flush_interval: Duration,
}

impl FileTransferManager {
    /// Create a manager posting background results to `msg_tx`.
    pub fn new(msg_tx: mpsc::Sender<TransferMsg>, events: EventBus, flush_interval: Duration) -> Self {
        Self {
            files: HashMap::new(),
            by_channel: HashMap::new(),
            next_channel: HashMap::new(),
            part_handles: HashMap::new(),
            pumps: HashMap::new(),
            msg_tx,
            events,
            flush_interval,
        }
    }

    /// Look up a live file record.
    pub fn file(&self, file_id: &[u8; 16]) -> Option<&File> {
        self.files.get(file_id)
    }

    /// Offer a local file to the conversation's peer. Hashing runs in the
    /// background; the offer goes out once the hash is known.
    pub fn offer_outgoing(
        &mut self,
        db: &Database,
        identity: Uuid,
        conversation: Uuid,
        contact: Uuid,
        path: PathBuf,
    ) -> Result<[u8; 16]> {
        let meta = std::fs::metadata(&path)
            .map_err(|e| Error::Io(format!("stat {}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Io("path has no file name".into()))?;
        let file_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut file = File::new(
            random_id(),
            FileDirection::Outgoing,
            conversation,
            contact,
            identity,
            name,
            path.clone(),
            meta.len() as i64,
            file_time,
            Utc::now().timestamp(),
        );
        file.state = FileState::Hashing;
        let file_id = file.file_id;

        db.add_file(&file)?;
        info!(file = %to_b64(&file_id), size = file.size, "offering file, hashing");
        self.events.publish(Event::FileStateChanged {
            file_id,
            state: FileState::Hashing,
            reason: None,
        });
        self.files.insert(file_id, file);

        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let result = super::hash_file(path).await;
            let _ = msg_tx
                .send(TransferMsg::OutgoingHashed { file_id, result })
                .await;
        });

        Ok(file_id)
    }

    /// Background hash finished for an outgoing file: send the offer.
    pub async fn on_outgoing_hashed(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        file_id: [u8; 16],
        result: Result<[u8; 32]>,
    ) -> Result<()> {
        let Some(file) = self.files.get_mut(&file_id) else {
            return Ok(());
        };
        if file.state != FileState::Hashing {
            // Cancelled while hashing; drop the result.
            return Ok(());
        }

        let hash = match result {
            Ok(hash) => hash,
            Err(e) => {
                let reason = e.to_string();
                return self
                    .transfer_failed(db, session, file_id, &reason, FileState::Failed)
                    .await;
            }
        };

        file.hash = Some(hash);
        db.set_file_hash(&file_id, &hash)?;
        let offer = ControlMessage::IncomingFile {
            file_id: to_b64(&file_id),
            name: file.name.clone(),
            size: file.size,
            hash: to_b64(&hash),
            file_time: file.file_time,
        };
        self.set_state(db, file_id, FileState::Offered, None)?;

        if let Some(session) = session {
            session.send_control(offer).await?;
            debug!(file = %to_b64(&file_id), "file offer sent");
        } else {
            warn!(file = %to_b64(&file_id), "peer offline, offer deferred");
        }
        Ok(())
    }

    /// A peer offered us a file. Replayed offers for a file already in a
    /// terminal state are dropped by file id.
    #[allow(clippy::too_many_arguments)]
    pub fn on_offer_received(
        &mut self,
        db: &Database,
        identity: Uuid,
        conversation: Uuid,
        contact: Uuid,
        file_id: [u8; 16],
        name: &str,
        size: i64,
        hash: [u8; 32],
        file_time: i64,
        download_dir: &Path,
    ) -> Result<()> {
        if self.files.contains_key(&file_id) || db.load_file(&file_id)?.is_some() {
            debug!(file = %to_b64(&file_id), "duplicate file offer dropped");
            return Ok(());
        }
        if size < 0 {
            return Err(Error::Malformed("negative file size in offer".into()));
        }

        // Only the final path component of the offered name is honored.
        let safe_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());

        let mut file = File::new(
            file_id,
            FileDirection::Incoming,
            conversation,
            contact,
            identity,
            safe_name.clone(),
            download_dir.join(&safe_name),
            size,
            file_time,
            Utc::now().timestamp(),
        );
        file.hash = Some(hash);
        file.state = FileState::Offered;

        db.add_file(&file)?;
        info!(file = %to_b64(&file_id), name = %safe_name, size, "file offered by peer");
        self.events.publish(Event::FileOffered {
            file_id,
            name: safe_name,
            size,
        });
        self.files.insert(file_id, file);
        Ok(())
    }

    /// Accept an offered incoming file: pick a collision-free destination,
    /// allocate a transfer channel and tell the peer to start sending.
    pub async fn accept(
        &mut self,
        db: &Database,
        session: &SessionHandle,
        file_id: [u8; 16],
    ) -> Result<()> {
        {
            let file = self
                .files
                .get(&file_id)
                .ok_or_else(|| Error::NotFound(format!("file {}", to_b64(&file_id))))?;
            if file.direction != FileDirection::Incoming || file.state != FileState::Offered {
                return Ok(());
            }
        }

        let connection = session.connection();
        let channel = {
            let next = self.next_channel.entry(connection).or_insert(0);
            *next += 1;
            *next
        };

        let resolved = {
            let file = self
                .files
                .get_mut(&file_id)
                .ok_or_else(|| Error::NotFound(format!("file {}", to_b64(&file_id))))?;
            match find_unused_name(&file.path) {
                Some(path) => {
                    file.path = path.clone();
                    file.channel = channel;
                    path
                }
                None => {
                    return self
                        .transfer_failed(
                            db,
                            Some(session),
                            file_id,
                            "no unused file name available",
                            FileState::Failed,
                        )
                        .await;
                }
            }
        };
        db.set_file_path(&file_id, &resolved)?;
        self.set_state(db, file_id, FileState::Queued, None)?;

        let part_path = {
            let file = self
                .files
                .get(&file_id)
                .ok_or_else(|| Error::NotFound(format!("file {}", to_b64(&file_id))))?;
            file.download_path()
        };
        let handle = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| Error::Io(format!("create {}: {}", part_path.display(), e)))?;
        self.part_handles.insert(file_id, handle);
        self.by_channel.insert((connection, channel), file_id);

        self.set_state(db, file_id, FileState::Transferring, None)?;
        session
            .send_ack(
                "IncomingFile",
                AckStatus::Ok,
                to_b64(&file_id),
                Some(channel),
            )
            .await?;

        info!(file = %to_b64(&file_id), channel, "file accepted, transfer started");
        Ok(())
    }

    /// Reject an offered incoming file.
    pub async fn reject(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        file_id: [u8; 16],
    ) -> Result<()> {
        let Some(file) = self.files.get(&file_id) else {
            return Err(Error::NotFound(format!("file {}", to_b64(&file_id))));
        };
        if file.direction != FileDirection::Incoming || file.state != FileState::Offered {
            return Ok(());
        }

        self.set_state(db, file_id, FileState::Rejected, None)?;
        if let Some(session) = session {
            session
                .send_ack("IncomingFile", AckStatus::Rejected, to_b64(&file_id), None)
                .await?;
        }
        info!(file = %to_b64(&file_id), "file rejected");
        Ok(())
    }

    /// Cancel a transfer. A no-op for files already failed or rejected;
    /// mid-transfer cancellation is a failure with reason "Cancelled".
    pub async fn cancel(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        file_id: [u8; 16],
    ) -> Result<()> {
        let Some(file) = self.files.get(&file_id) else {
            return Err(Error::NotFound(format!("file {}", to_b64(&file_id))));
        };

        match file.state {
            FileState::Failed | FileState::Rejected => Ok(()),
            FileState::Transferring => {
                self.transfer_failed(db, session, file_id, "Cancelled", FileState::Failed)
                    .await
            }
            _ => {
                self.release_transfer(file_id);
                self.set_state(db, file_id, FileState::Cancelled, None)?;
                if let Some(session) = session {
                    session
                        .send_ack("IncomingFile", AckStatus::Abort, to_b64(&file_id), None)
                        .await?;
                }
                debug!(file = %to_b64(&file_id), "file cancelled");
                Ok(())
            }
        }
    }

    /// An `IncomingFile` ack arrived; route it by status.
    pub async fn on_peer_ack(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        status: AckStatus,
        data: &str,
        channel: Option<u32>,
    ) -> Result<()> {
        let decoded = from_b64(data)?;
        let file_id: [u8; 16] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| Error::Malformed("file id must be 16 bytes".into()))?;

        match (status, channel) {
            (AckStatus::Ok, Some(channel)) => {
                if let Some(session) = session {
                    self.on_accepted(db, session, file_id, channel).await?;
                }
                Ok(())
            }
            (AckStatus::Ok, None) => {
                // Sender-side completion ack; record the acknowledgment time.
                if let Some(file) = self.files.get_mut(&file_id) {
                    file.ack_time = Some(Utc::now().timestamp());
                    db.set_file_ack_time(&file_id, Utc::now().timestamp())?;
                }
                Ok(())
            }
            (AckStatus::Rejected, _) => {
                if self.active_or_offered(&file_id) {
                    self.release_transfer(file_id);
                    self.set_state(db, file_id, FileState::Rejected, None)?;
                }
                Ok(())
            }
            (AckStatus::Abort, _) => {
                if self.active_or_offered(&file_id) {
                    self.release_transfer(file_id);
                    self.set_state(db, file_id, FileState::Cancelled, None)?;
                }
                Ok(())
            }
            (AckStatus::Failed, _) => {
                if self.active_or_offered(&file_id) {
                    self.release_transfer(file_id);
                    self.set_state(
                        db,
                        file_id,
                        FileState::Failed,
                        Some("peer reported failure".into()),
                    )?;
                }
                Ok(())
            }
        }
    }

    fn active_or_offered(&self, file_id: &[u8; 16]) -> bool {
        self.files
            .get(file_id)
            .map(|f| f.state.is_active() || f.state == FileState::Offered)
            .unwrap_or(false)
    }

    /// The peer accepted our offer on the given channel: start pumping.
    async fn on_accepted(
        &mut self,
        db: &Database,
        session: &SessionHandle,
        file_id: [u8; 16],
        channel: u32,
    ) -> Result<()> {
        let (path, size) = {
            let Some(file) = self.files.get_mut(&file_id) else {
                return Ok(());
            };
            if file.direction != FileDirection::Outgoing || file.state != FileState::Offered {
                return Ok(());
            }
            file.channel = channel;
            (file.path.clone(), file.size)
        };

        self.set_state(db, file_id, FileState::Transferring, None)?;
        info!(file = %to_b64(&file_id), channel, size, "peer accepted file, pumping");

        let session = session.clone();
        let msg_tx = self.msg_tx.clone();
        let pump = tokio::spawn(async move {
            let outcome = pump_file(&session, channel, &path, &msg_tx, file_id).await;
            let msg = match outcome {
                Ok(()) => TransferMsg::OutgoingSent { file_id },
                Err(e) => TransferMsg::OutgoingFailed {
                    file_id,
                    reason: e.to_string(),
                },
            };
            let _ = msg_tx.send(msg).await;
        });
        self.pumps.insert(file_id, pump);
        Ok(())
    }

    /// The pump moved more bytes; batch-flush progress.
    pub fn on_outgoing_progress(
        &mut self,
        db: &Database,
        file_id: [u8; 16],
        bytes: usize,
    ) -> Result<()> {
        let Some(file) = self.files.get_mut(&file_id) else {
            return Ok(());
        };
        if let Some(total) = file.add_bytes_transferred(bytes, self.flush_interval) {
            db.set_file_bytes(&file_id, total)?;
            self.events
                .publish(Event::BytesTransferredChanged { file_id, bytes: total });
        }
        Ok(())
    }

    /// The pump finished: the outgoing file is done.
    pub fn on_outgoing_sent(&mut self, db: &Database, file_id: [u8; 16]) -> Result<()> {
        self.pumps.remove(&file_id);
        let Some(file) = self.files.get_mut(&file_id) else {
            return Ok(());
        };
        if file.state != FileState::Transferring {
            return Ok(());
        }
        if let Some(total) = file.flush_bytes_added() {
            db.set_file_bytes(&file_id, total)?;
        }
        self.set_state(db, file_id, FileState::Done, None)?;
        info!(file = %to_b64(&file_id), "file sent");
        Ok(())
    }

    /// The pump failed mid-transfer.
    pub async fn on_outgoing_failed(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        file_id: [u8; 16],
        reason: &str,
    ) -> Result<()> {
        if self
            .files
            .get(&file_id)
            .map(|f| f.state == FileState::Transferring)
            .unwrap_or(false)
        {
            self.transfer_failed(db, session, file_id, reason, FileState::Failed)
                .await?;
        }
        Ok(())
    }

    /// A binary chunk arrived on a transfer channel.
    pub async fn on_file_chunk(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        connection: Uuid,
        channel: u32,
        payload: &[u8],
    ) -> Result<()> {
        let Some(&file_id) = self.by_channel.get(&(connection, channel)) else {
            warn!(channel, "chunk on unassigned channel ignored");
            return Ok(());
        };

        let total_now = {
            let Some(file) = self.files.get_mut(&file_id) else {
                return Ok(());
            };
            if file.state != FileState::Transferring {
                return Ok(());
            }
            file.bytes_transferred + file.pending_bytes() + payload.len() as i64
        };

        if total_now > self.files.get(&file_id).map(|f| f.size).unwrap_or(0) {
            return self
                .transfer_failed(
                    db,
                    session,
                    file_id,
                    "peer sent more bytes than offered",
                    FileState::Failed,
                )
                .await;
        }

        if let Some(handle) = self.part_handles.get_mut(&file_id) {
            if let Err(e) = handle.write_all(payload).await {
                let reason = format!("write failed: {}", e);
                return self
                    .transfer_failed(db, session, file_id, &reason, FileState::Failed)
                    .await;
            }
        } else {
            return self
                .transfer_failed(
                    db,
                    session,
                    file_id,
                    "no open download file",
                    FileState::Failed,
                )
                .await;
        }

        let complete = {
            let Some(file) = self.files.get_mut(&file_id) else {
                return Ok(());
            };
            if let Some(total) = file.add_bytes_transferred(payload.len(), self.flush_interval) {
                db.set_file_bytes(&file_id, total)?;
                self.events
                    .publish(Event::BytesTransferredChanged { file_id, bytes: total });
            }
            total_now == file.size
        };

        if complete {
            // Flush the tail, close the handle and verify in the background.
            if let Some(mut handle) = self.part_handles.remove(&file_id) {
                let _ = handle.flush().await;
            }
            if let Some(file) = self.files.get_mut(&file_id) {
                if let Some(total) = file.flush_bytes_added() {
                    db.set_file_bytes(&file_id, total)?;
                    self.events
                        .publish(Event::BytesTransferredChanged { file_id, bytes: total });
                }
            }
            self.set_state(db, file_id, FileState::Hashing, None)?;

            let part_path = self
                .files
                .get(&file_id)
                .map(|f| f.download_path())
                .ok_or_else(|| Error::NotFound(format!("file {}", to_b64(&file_id))))?;
            let msg_tx = self.msg_tx.clone();
            tokio::spawn(async move {
                let result = super::hash_file(part_path).await;
                let _ = msg_tx
                    .send(TransferMsg::IncomingHashed { file_id, result })
                    .await;
            });
        }
        Ok(())
    }

    /// Background hash of a received body finished: verify and finalize.
    pub async fn on_incoming_hashed(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        file_id: [u8; 16],
        result: Result<[u8; 32]>,
    ) -> Result<()> {
        let (declared, part_path, final_path) = {
            let Some(file) = self.files.get(&file_id) else {
                return Ok(());
            };
            if file.state != FileState::Hashing {
                // The transfer reached a terminal state meanwhile.
                return Ok(());
            }
            (
                file.hash,
                file.download_path(),
                file.path.clone(),
            )
        };

        let computed = match result {
            Ok(hash) => hash,
            Err(e) => {
                let reason = e.to_string();
                return self
                    .transfer_failed(db, session, file_id, &reason, FileState::Failed)
                    .await;
            }
        };

        let matches = declared
            .map(|d| constant_time_eq(&d, &computed))
            .unwrap_or(false);
        if !matches {
            return self
                .transfer_failed(
                    db,
                    session,
                    file_id,
                    "Hash from peer and hash from received file mismatch",
                    FileState::Failed,
                )
                .await;
        }

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let reason = format!(
                "failed to rename {} to {}: {}",
                part_path.display(),
                final_path.display(),
                e
            );
            return self
                .transfer_failed(db, session, file_id, &reason, FileState::Failed)
                .await;
        }

        self.release_transfer(file_id);
        self.set_state(db, file_id, FileState::Done, None)?;
        info!(file = %to_b64(&file_id), path = %final_path.display(), "file received and verified");
        Ok(())
    }

    /// The session carrying this connection died; fail its live transfers.
    pub async fn on_session_closed(&mut self, db: &Database, connection: Uuid) -> Result<()> {
        let affected: Vec<[u8; 16]> = self
            .by_channel
            .iter()
            .filter(|((conn, _), _)| *conn == connection)
            .map(|(_, id)| *id)
            .collect();

        for file_id in affected {
            if self
                .files
                .get(&file_id)
                .map(|f| f.state.is_active() || f.state == FileState::Hashing)
                .unwrap_or(false)
            {
                self.transfer_failed(db, None, file_id, "peer disconnected", FileState::Failed)
                    .await?;
            }
        }
        self.next_channel.remove(&connection);
        self.by_channel.retain(|(conn, _), _| *conn != connection);
        Ok(())
    }

    /// Terminal failure path shared by every non-success ending. Notifies
    /// the peer when a session is available.
    pub async fn transfer_failed(
        &mut self,
        db: &Database,
        session: Option<&SessionHandle>,
        file_id: [u8; 16],
        reason: &str,
        state: FileState,
    ) -> Result<()> {
        {
            let Some(file) = self.files.get(&file_id) else {
                return Ok(());
            };
            if file.state == state {
                return Ok(());
            }
        }

        warn!(file = %to_b64(&file_id), reason, "transfer failed");
        self.release_transfer(file_id);
        self.set_state(db, file_id, state, Some(reason.to_string()))?;

        if let Some(session) = session {
            let status = match state {
                FileState::Rejected => AckStatus::Rejected,
                FileState::Cancelled => AckStatus::Abort,
                _ => AckStatus::Failed,
            };
            session
                .send_ack("IncomingFile", status, to_b64(&file_id), None)
                .await?;
        }
        Ok(())
    }

    fn release_transfer(&mut self, file_id: [u8; 16]) {
        if let Some(pump) = self.pumps.remove(&file_id) {
            pump.abort();
        }
        self.part_handles.remove(&file_id);
        if let Some(file) = self.files.get(&file_id) {
            let channel = file.channel;
            self.by_channel
                .retain(|(_, ch), id| !(*id == file_id && *ch == channel));
        }
    }

    fn set_state(
        &mut self,
        db: &Database,
        file_id: [u8; 16],
        state: FileState,
        reason: Option<String>,
    ) -> Result<()> {
        let Some(file) = self.files.get_mut(&file_id) else {
            return Ok(());
        };
        if let Some(total) = file.flush_bytes_added() {
            db.set_file_bytes(&file_id, total)?;
            self.events
                .publish(Event::BytesTransferredChanged { file_id, bytes: total });
        }
        file.state = state;
        db.set_file_state(&file_id, state)?;
        self.events.publish(Event::FileStateChanged {
            file_id,
            state,
            reason,
        });
        Ok(())
    }
}

/// Read the file and push it chunk by chunk, pacing on output drain.
async fn pump_file(
    session: &SessionHandle,
    channel: u32,
    path: &Path,
    msg_tx: &mpsc::Sender<TransferMsg>,
    file_id: [u8; 16],
) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::Io(format!("open {}: {}", path.display(), e)))?;
    let mut buffer = vec![0u8; MAX_CHUNK_PAYLOAD];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| Error::Io(format!("read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }

        // send_chunk resolves when the frames have drained, which is the
        // backpressure that keeps the output queue bounded.
        session.send_chunk(channel, buffer[..n].to_vec()).await?;
        let _ = msg_tx
            .send(TransferMsg::OutgoingProgress { file_id, bytes: n })
            .await;
    }

    session
        .send_ack("IncomingFile", AckStatus::Ok, to_b64(&file_id), None)
        .await?;
    Ok(())
}
