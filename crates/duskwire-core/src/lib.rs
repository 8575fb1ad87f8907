//! # Duskwire Core Library
//!
//! The peer-to-peer protocol engine of a Tor-routed, end-to-end encrypted
//! chat and file-transfer application. Two users, each identified by an
//! onion service and a long-term Ed25519 signing identity, connect directly
//! over Tor, prove their identities to each other, and exchange framed,
//! stream-encrypted messages: contact requests, acknowledgments, chat
//! messages, and file offers/transfers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                Application                   │
//! ├──────────────────────────────────────────────┤
//! │ conversation │    files    │     storage     │
//! ├──────────────────────────────────────────────┤
//! │           protocol (sessions, wire)          │
//! ├──────────────────────────────────────────────┤
//! │  transport  │   crypto   │  identity │  tor  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Core Guarantees
//!
//! - Both directions of every session are independently stream-encrypted
//!   (XChaCha20-Poly1305) under keys exchanged inside signed handshakes
//! - No inbound chat message is surfaced until its signature verifies
//!   against the contact's known public key
//! - No incoming file reaches its final path until its content hash matches
//!   the hash declared in the offer
//! - All connections traverse Tor; there is no clearnet fallback

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod conversation;
pub mod crypto;
pub mod error;
pub mod events;
pub mod files;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod storage;
pub mod tor;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version, used in handshakes and chunk headers
pub const PROTOCOL_VERSION: u8 = 1;
