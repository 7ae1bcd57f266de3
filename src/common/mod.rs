//! Common utilities shared between driver and responder
//!
//! - `error`: error types and Result alias
//! - `config`: configuration file handling
//! - `logging`: tracing setup
//! - `paths`: channel sockets, crash logs, config locations

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::Config;
pub use error::{Error, Result};
