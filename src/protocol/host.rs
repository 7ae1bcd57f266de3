//! The seam between the protocol and the domain
//!
//! The dispatch loop does not interpret commands; it only needs to execute
//! them and to know whether the remote context is currently wedged in a
//! nested modal state. Everything domain-specific lives behind this trait.

use async_trait::async_trait;

use crate::common::Result;

use super::{Request, Response};

/// Executes commands against the remote environment.
///
/// Implementations own the environment's single logical execution context;
/// the dispatch loop guarantees `execute` is never entered concurrently.
#[async_trait]
pub trait CommandHost: Send + Sync + 'static {
    /// Execute one command to completion.
    ///
    /// Domain failures the caller's code caused should come back as
    /// `Ok(Response::Error { .. })` or an `Err`; both reach the driver as a
    /// hard remote error. Stale targets reply with the stale sentinel.
    async fn execute(&self, request: &Request) -> Result<Response>;

    /// Whether the remote context has entered a nested modal state that
    /// would block command execution indefinitely
    fn in_modal_state(&self) -> bool {
        false
    }
}
