//! Wire protocol: handshakes, encrypted chunk framing, control messages,
//! peer sessions and the protocol manager.
//!
//! Byte order is big-endian throughout. The version byte is `0x01` in both
//! handshake messages and chunk headers.
//!
//! ## Session lifecycle
//!
//! ```text
//! dial/accept ──► handshake (HELLO / OLLEH) ──► encrypted chunk loop
//!                       │
//!                       └── unknown pubkey ──► AddMe flow, then close
//! ```

mod chunk;
mod control;
mod handshake;
mod manager;
mod session;

pub use chunk::{Chunk, CHUNK_HEADER_BYTES, MAX_CHUNK_PAYLOAD};
pub use control::{from_b64, to_b64, AckStatus, ControlMessage, MessageEncoding, WireMessage};
pub use handshake::{Hello, Olleh, HELLO_BYTES, OLLEH_BYTES};
pub use manager::{ManagerCommand, ProtocolHandle, ProtocolManager};
pub use session::{
    ConnectData, Direction, InState, InboundHandshake, PeerEvent, PeerSession, SessionCommand,
    SessionHandle, CONTROL_CHANNEL,
};

use crate::error::{Error, Result};

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Validate a version byte from a handshake or chunk header.
pub fn validate_version(version: u8) -> Result<()> {
    if version != PROTOCOL_VERSION {
        return Err(Error::Malformed(format!(
            "unsupported protocol version: {}",
            version
        )));
    }
    Ok(())
}
