//! The file record and its transfer-state bookkeeping.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Transfer state of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Created locally, not yet hashed or offered.
    Created,
    /// Content hash being computed in the background.
    Hashing,
    /// Offered to (or by) the peer, awaiting a decision.
    Offered,
    /// Accepted and queued for transfer.
    Queued,
    /// Bytes moving on a dedicated channel.
    Transferring,
    /// Completed and verified.
    Done,
    /// Terminal failure; see the accompanying reason.
    Failed,
    /// Declined by the recipient.
    Rejected,
    /// Cancelled before completion.
    Cancelled,
}

impl FileState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileState::Done | FileState::Failed | FileState::Rejected | FileState::Cancelled
        )
    }

    /// States in which a transfer is underway or imminent.
    pub fn is_active(&self) -> bool {
        matches!(self, FileState::Queued | FileState::Transferring)
    }
}

/// Which way the file is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDirection {
    /// We offered it.
    Outgoing,
    /// The peer offered it.
    Incoming,
}

/// One file transfer, shared between the reactor, the store and any
/// background hash task that needs to keep it alive.
#[derive(Debug, Clone)]
pub struct File {
    /// Random wire id identifying the transfer to both peers.
    pub file_id: [u8; 16],
    /// Direction of the transfer.
    pub direction: FileDirection,
    /// Owning conversation.
    pub conversation: Uuid,
    /// The peer contact.
    pub contact: Uuid,
    /// The owning local identity.
    pub identity: Uuid,
    /// File name as offered (no path components).
    pub name: String,
    /// Local path: source for outgoing, destination for incoming.
    pub path: PathBuf,
    /// Size in bytes as declared in the offer.
    pub size: i64,
    /// SHA-256 of the content; set after hashing (outgoing) or from the
    /// offer (incoming).
    pub hash: Option<[u8; 32]>,
    /// File modification time, unix seconds.
    pub file_time: i64,
    /// Record creation time, unix seconds.
    pub created_time: i64,
    /// When the peer last acknowledged this transfer, unix seconds.
    pub ack_time: Option<i64>,
    /// Bytes moved so far; flushed to the store in batches.
    pub bytes_transferred: i64,
    /// Current state.
    pub state: FileState,
    /// Transfer channel while TRANSFERRING; 0 when unassigned.
    pub channel: u32,

    bytes_added: i64,
    next_flush: Option<Instant>,
}

impl File {
    /// Create a fresh record in [`FileState::Created`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: [u8; 16],
        direction: FileDirection,
        conversation: Uuid,
        contact: Uuid,
        identity: Uuid,
        name: String,
        path: PathBuf,
        size: i64,
        file_time: i64,
        created_time: i64,
    ) -> Self {
        Self {
            file_id,
            direction,
            conversation,
            contact,
            identity,
            name,
            path,
            size,
            hash: None,
            file_time,
            created_time,
            ack_time: None,
            bytes_transferred: 0,
            state: FileState::Created,
            channel: 0,
            bytes_added: 0,
            next_flush: None,
        }
    }

    /// The temporary path incoming bodies are written to.
    pub fn download_path(&self) -> PathBuf {
        let mut p = self.path.as_os_str().to_owned();
        p.push(".part");
        PathBuf::from(p)
    }

    /// Fraction of the transfer completed, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.size <= 0 {
            return 0.0;
        }
        self.bytes_transferred as f32 / self.size as f32
    }

    /// Account freshly moved bytes.
    ///
    /// While TRANSFERRING, accumulated bytes are surfaced no more often than
    /// `flush_interval`; outside that state every addition flushes at once.
    /// Returns the new total when a flush is due.
    pub fn add_bytes_transferred(
        &mut self,
        bytes: usize,
        flush_interval: Duration,
    ) -> Option<i64> {
        self.bytes_added += bytes as i64;

        if self.state == FileState::Transferring {
            match self.next_flush {
                None => {
                    self.next_flush = Some(Instant::now() + flush_interval);
                    None
                }
                Some(at) if Instant::now() >= at => self.flush_bytes_added(),
                Some(_) => None,
            }
        } else {
            self.flush_bytes_added()
        }
    }

    /// Fold pending additions into the running total. Returns the new total
    /// if anything was pending. Always called on state changes.
    pub fn flush_bytes_added(&mut self) -> Option<i64> {
        if self.bytes_added == 0 {
            return None;
        }
        self.bytes_transferred += self.bytes_added;
        self.bytes_added = 0;
        self.next_flush = None;
        Some(self.bytes_transferred)
    }

    /// Bytes accounted but not yet flushed.
    pub fn pending_bytes(&self) -> i64 {
        self.bytes_added
    }
}

/// Resolve a collision-free variant of `path`: the path itself if unused,
/// then `name(1).ext`, `name(2).ext`, … up to `name(500).ext`.
pub fn find_unused_name(path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return Some(path.to_path_buf());
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for i in 1..=500 {
        let candidate = parent.join(format!("{}({}){}", stem, i, suffix));
        if !candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_file(state: FileState) -> File {
        let mut file = File::new(
            [1; 16],
            FileDirection::Incoming,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "recv.txt".into(),
            PathBuf::from("/tmp/recv.txt"),
            100,
            0,
            0,
        );
        file.state = state;
        file
    }

    #[test]
    fn download_path_appends_part() {
        let file = test_file(FileState::Offered);
        assert_eq!(file.download_path(), PathBuf::from("/tmp/recv.txt.part"));
    }

    #[test]
    fn progress_is_bounded() {
        let mut file = test_file(FileState::Transferring);
        assert_eq!(file.progress(), 0.0);
        file.bytes_transferred = 50;
        assert_eq!(file.progress(), 0.5);
    }

    #[test]
    fn transferring_batches_flushes() {
        let mut file = test_file(FileState::Transferring);
        let interval = Duration::from_millis(700);

        // First addition arms the timer without flushing.
        assert_eq!(file.add_bytes_transferred(10, interval), None);
        assert_eq!(file.bytes_transferred, 0);
        assert_eq!(file.pending_bytes(), 10);

        // Within the window nothing flushes either.
        assert_eq!(file.add_bytes_transferred(10, interval), None);

        // A state change always flushes.
        assert_eq!(file.flush_bytes_added(), Some(20));
        assert_eq!(file.pending_bytes(), 0);
    }

    #[test]
    fn non_transferring_flushes_immediately() {
        let mut file = test_file(FileState::Hashing);
        assert_eq!(
            file.add_bytes_transferred(10, Duration::from_millis(700)),
            Some(10)
        );
    }

    #[test]
    fn zero_interval_flushes_while_transferring() {
        let mut file = test_file(FileState::Transferring);
        // Arm with a zero window, then the next addition flushes.
        assert_eq!(file.add_bytes_transferred(5, Duration::ZERO), None);
        assert_eq!(file.add_bytes_transferred(5, Duration::ZERO), Some(10));
    }

    #[test]
    fn terminal_and_active_states() {
        assert!(FileState::Done.is_terminal());
        assert!(FileState::Rejected.is_terminal());
        assert!(!FileState::Offered.is_terminal());
        assert!(FileState::Transferring.is_active());
        assert!(!FileState::Done.is_active());
    }

    #[test]
    fn unused_name_numbering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("photo.jpg");

        // Free path resolves to itself.
        assert_eq!(find_unused_name(&base), Some(base.clone()));

        std::fs::write(&base, b"x").expect("write");
        assert_eq!(
            find_unused_name(&base),
            Some(dir.path().join("photo(1).jpg"))
        );

        std::fs::write(dir.path().join("photo(1).jpg"), b"x").expect("write");
        assert_eq!(
            find_unused_name(&base),
            Some(dir.path().join("photo(2).jpg"))
        );
    }
}
