//! Error types for the Duskwire protocol core.
//!
//! Crypto and handshake failures are fatal to a session and never retried.
//! Transient socket errors on outbound connections are retried with backoff
//! by the protocol manager.

use thiserror::Error;

/// Core error type for protocol operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket closed unexpectedly or an I/O buffer limit was exceeded.
    #[error("transport error: {0}")]
    Transport(String),

    /// Stream decryption/authentication failure or an unknown cipher tag.
    /// The session is closed immediately; no further bytes are emitted.
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// Handshake rejected: bad version, bad signature or wrong length.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A HELLO carried a pubkey that is not in the contact set for the
    /// receiving identity. Diverted to the AddMe flow by the caller.
    #[error("unknown contact")]
    UnknownContact,

    /// Malformed control-channel payload or version mismatch inside a frame.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Expected record absent from the store. Never retried automatically.
    #[error("not found: {0}")]
    NotFound(String),

    /// File open/rename/write failure during a transfer.
    #[error("i/o error: {0}")]
    Io(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Tor connection, SOCKS or ControlPort error.
    #[error("tor error: {0}")]
    Tor(String),

    /// No live session for the requested contact.
    #[error("no active session")]
    NoSession,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is fatal to the session it occurred on.
    /// Fatal errors close the connection and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Crypto(_)
                | Error::HandshakeRejected(_)
                | Error::Malformed(_)
                | Error::Transport(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(Error::Crypto("bad tag".into()).is_fatal());
        assert!(Error::HandshakeRejected("bad signature".into()).is_fatal());
        assert!(!Error::NotFound("file 42".into()).is_fatal());
        assert!(!Error::Timeout.is_fatal());
    }
}
