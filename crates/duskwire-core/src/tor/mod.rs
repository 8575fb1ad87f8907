//! Tor plumbing: SOCKS5 dialing, ControlPort hidden-service registration
//! and the accept side of a hidden service.
//!
//! The protocol core consumes three operations: create a hidden service for
//! an identity, listen for streams Tor forwards to it, and dial a remote
//! `.onion`. Everything here talks to a local Tor daemon; there is no
//! clearnet path.

mod connection;
mod controller;
mod service;

pub use connection::{dial, TorSocksConfig};
pub use controller::{ControlInfo, TorAuth, TorController};
pub use service::{HiddenService, HiddenServiceConfig};

/// Default SOCKS5 proxy port of a local Tor daemon.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Default ControlPort of a local Tor daemon.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Virtual port the protocol exposes on its hidden services.
pub const DEFAULT_SERVICE_PORT: u16 = 29783;

/// Timeout for building a circuit to a hidden service (seconds).
pub const CIRCUIT_TIMEOUT_SECS: u64 = 120;
