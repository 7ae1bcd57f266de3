//! Wire layer: envelope encoding and the channel transport
//!
//! Frames are length-prefixed over a local socket (Unix domain socket on
//! Unix, named pipe on Windows). Each frame body is an envelope: JSON,
//! deflate-compressed, base64-encoded. The envelope survives being embedded
//! in log lines and crash reports, which is why it stays printable.

pub mod client;
pub mod envelope;
pub mod transport;

pub use client::{Liveness, WireClient};
pub use envelope::{pack, unpack, WrappedValue};
