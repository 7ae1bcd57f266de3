//! Error types for the object-graph driver
//!
//! The taxonomy matters: callers must be able to tell "your code threw"
//! apart from "the protocol failed" and "your target no longer exists".

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the driver and responder
#[derive(Error, Debug)]
pub enum Error {
    // === Build-time errors (local only, never touch the wire) ===
    #[error("Captured value '{name}' of type {type_name} is not serializable: {reason}")]
    UnserializableCapture {
        name: String,
        type_name: String,
        reason: String,
    },

    #[error("Expression would block on an async computation: {0}. Use an awaited call at the lambda root instead")]
    WouldBlockOnAsync(String),

    #[error("Malformed expression: {0}")]
    MalformedExpression(String),

    // === Resolution errors (permanent, never retried) ===
    #[error("Cannot resolve type '{type_name}' in assembly '{assembly}'. The two sides may be running different versions")]
    UnresolvedType { assembly: String, type_name: String },

    #[error("Cannot resolve member '{name}' with signature '{signature}' on type '{declaring}'")]
    UnresolvedMember {
        declaring: String,
        name: String,
        signature: String,
    },

    // === Transient transport errors (retried with bounded backoff) ===
    #[error("Failed to connect to channel '{channel}' within {timeout_ms}ms")]
    ConnectTimeout { channel: String, timeout_ms: u64 },

    #[error("Request timed out after {0}ms")]
    RequestTimeout(u64),

    #[error("Channel disconnected: {0}")]
    Disconnected(String),

    #[error("Failed to read a response from the responder. This is usually caused by the responder crashing")]
    NoResponseData,

    // === Liveness errors (distinguished, never retried) ===
    #[error("Responder exited abnormally with code {exit_code}{}", crash_log.as_deref().map(|log| format!(". Last unhandled error:\n{log}")).unwrap_or_default())]
    ResponderCrashed {
        exit_code: i32,
        crash_log: Option<String>,
    },

    #[error("Responder has exited")]
    ResponderExited,

    // === Translated protocol sentinels ===
    #[error("Invoke did not complete within {0}ms (responder reported a pending result)")]
    InvokeTimeout(u64),

    #[error("The result exists on the responder but is not serializable over the wire. Return a smaller projection instead")]
    UnserializableResult,

    #[error("Handle is no longer valid: the remote object vanished and no replacement could be reconciled")]
    HandleNoLongerValid,

    // === Remote execution errors (the executed code itself threw) ===
    #[error("The responder reported an error:\n{0}")]
    Remote(String),

    // === Lookup errors ===
    #[error("No remote object matched the criteria within {0}ms")]
    LookupTimeout(u64),

    // === Configuration errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO / serialization ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Aggregated retry failure ===
    #[error("Operation failed after {attempts} attempts. Last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    // === Internal errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the supervisor must short-circuit instead of retrying.
    ///
    /// Everything build-time, resolution, liveness or remote is permanent:
    /// retrying would re-run user code or mask a version mismatch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnserializableCapture { .. }
                | Error::WouldBlockOnAsync(_)
                | Error::MalformedExpression(_)
                | Error::UnresolvedType { .. }
                | Error::UnresolvedMember { .. }
                | Error::ResponderCrashed { .. }
                | Error::HandleNoLongerValid
                | Error::Remote(_)
        )
    }

    /// Create an unserializable-capture error from a serde failure
    pub fn unserializable_capture(name: &str, type_name: &str, err: serde_json::Error) -> Self {
        Self::UnserializableCapture {
            name: name.to_string(),
            type_name: type_name.to_string(),
            reason: err.to_string(),
        }
    }

    /// Create an unresolved-member error
    pub fn unresolved_member(declaring: &str, name: &str, signature: &str) -> Self {
        Self::UnresolvedMember {
            declaring: declaring.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_short_circuit() {
        assert!(Error::Remote("boom".into()).is_fatal());
        assert!(Error::HandleNoLongerValid.is_fatal());
        assert!(Error::ResponderCrashed {
            exit_code: 3,
            crash_log: None
        }
        .is_fatal());
        assert!(!Error::RequestTimeout(10_000).is_fatal());
        assert!(!Error::Disconnected("pipe closed".into()).is_fatal());
    }

    #[test]
    fn crash_error_includes_log_when_present() {
        let e = Error::ResponderCrashed {
            exit_code: 134,
            crash_log: Some("stack overflow".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("134"));
        assert!(msg.contains("stack overflow"));
    }
}
