//! objpilot: drive and interrogate a foreign process's object graph over a
//! local IPC channel.
//!
//! The crate is a small distributed-object protocol in three parts:
//!
//! - [`expr`]: portable expression trees, built and validated locally,
//!   evaluated on the responder against its live object graph.
//! - [`wire`] and [`protocol`]: a command/response RPC over a local socket,
//!   one outstanding request per channel, with in-band sentinels for
//!   pending, unserializable and stale outcomes.
//! - [`mirror`]: the driver-side registry of remote-object handles, with
//!   attribute-based reconciliation when the remote side's ids shift.
//!
//! [`driver::Driver`] ties the parts together behind a synchronous-looking
//! API; [`protocol::Responder`] is the other end of the channel, generic
//! over a [`protocol::CommandHost`] that executes the actual commands.

pub mod common;
pub mod driver;
pub mod expr;
pub mod mirror;
pub mod protocol;
pub mod supervisor;
pub mod wire;

pub use common::{Config, Error, Result};
pub use driver::{Bootstrap, Driver};
pub use mirror::Handle;
