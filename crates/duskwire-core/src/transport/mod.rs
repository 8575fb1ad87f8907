//! Framed byte transport over reliable stream sockets.
//!
//! The protocol reads in exact-length pulls: a session declares how many
//! bytes it needs next (a ciphertext frame), and the socket delivers exactly
//! that many, buffering any surplus for the following pull. Writes are
//! queued and flushed explicitly so that higher layers can throttle bulk
//! traffic on drain.

mod socket;

pub use socket::{ConnectionSocket, IoStream, MAX_IN_BUFFER};
