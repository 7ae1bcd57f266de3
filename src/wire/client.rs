//! Driver-side channel client
//!
//! Owns one stream to the responder and classifies every failure before the
//! retry layer sees it: a broken pipe while the responder still runs is
//! transient, the same break after an abnormal exit is a crash, and a crash
//! gets its log read from the side channel before being reported.

use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};

use crate::common::config::{RetryConfig, Timeouts};
use crate::common::{paths, Error, Result};
use crate::supervisor;

use super::transport::{self, Stream};

/// How long to wait for the crash-log side channel to appear after an
/// abnormal exit is observed. The responder's panic hook writes it on its
/// way down, so it can lag the exit code slightly.
const CRASH_LOG_WAIT: Duration = Duration::from_millis(500);
const CRASH_LOG_POLL: Duration = Duration::from_millis(100);

/// Smallest slice of the connect budget a single attempt gets
const MIN_CONNECT_SLICE: Duration = Duration::from_millis(100);

/// Probes whether the responder process is still alive.
///
/// `None` while running; `Some(code)` once it has exited.
pub trait Liveness: Send {
    fn exit_code(&mut self) -> Option<i32>;
}

impl<F> Liveness for F
where
    F: FnMut() -> Option<i32> + Send,
{
    fn exit_code(&mut self) -> Option<i32> {
        self()
    }
}

/// One connected channel to a responder
pub struct WireClient {
    channel_id: String,
    reader: ReadHalf<Stream>,
    writer: WriteHalf<Stream>,
    timeouts: Timeouts,
    liveness: Box<dyn Liveness>,
}

impl std::fmt::Debug for WireClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireClient")
            .field("channel_id", &self.channel_id)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl WireClient {
    /// Connect to a responder's channel, retrying while it boots.
    ///
    /// `on_retry` runs after each failed attempt; the driver uses it to
    /// re-kick a responder whose bootstrap raced the connect.
    pub async fn connect(
        channel_id: &str,
        timeouts: Timeouts,
        retry: &RetryConfig,
        liveness: Box<dyn Liveness>,
        mut on_retry: impl FnMut(u32),
    ) -> Result<Self> {
        let attempts = retry.connect_attempts.max(1);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeouts.connect_ms);

        for attempt in 0..attempts {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            // Spread what is left of the budget over the remaining attempts;
            // the backoff pauses below are charged against the same deadline.
            let slice = (remaining / (attempts - attempt))
                .max(MIN_CONNECT_SLICE)
                .min(remaining);
            match tokio::time::timeout(slice, transport::connect(channel_id)).await {
                Ok(Ok(stream)) => {
                    tracing::debug!(channel_id, attempt, "channel connected");
                    let (reader, writer) = tokio::io::split(stream);
                    return Ok(Self {
                        channel_id: channel_id.to_string(),
                        reader,
                        writer,
                        timeouts,
                        liveness,
                    });
                }
                Ok(Err(e)) => {
                    tracing::trace!(channel_id, attempt, error = %e, "connect attempt failed");
                }
                Err(_) => {
                    tracing::trace!(channel_id, attempt, "connect attempt timed out");
                }
            }
            on_retry(attempt);
            let pause = supervisor::backoff_delay(attempt as usize)
                .min(deadline.saturating_duration_since(tokio::time::Instant::now()));
            tokio::time::sleep(pause).await;
        }

        Err(Error::ConnectTimeout {
            channel: channel_id.to_string(),
            timeout_ms: timeouts.connect_ms,
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Re-establish the stream after a transient disconnect
    pub async fn reconnect(&mut self) -> Result<()> {
        let step = Duration::from_millis(self.timeouts.step_ms);
        let stream = tokio::time::timeout(step, transport::connect(&self.channel_id))
            .await
            .map_err(|_| Error::RequestTimeout(self.timeouts.step_ms))?
            .map_err(|e| Error::Disconnected(e.to_string()))?;
        let (reader, writer) = tokio::io::split(stream);
        self.reader = reader;
        self.writer = writer;
        Ok(())
    }

    /// Send one envelope and wait for the reply envelope.
    ///
    /// Each wire step gets its own timeout so a wedged responder surfaces
    /// as `RequestTimeout` rather than hanging the driver.
    pub async fn request(&mut self, envelope: &str) -> Result<String> {
        let step = Duration::from_millis(self.timeouts.step_ms);

        match tokio::time::timeout(
            step,
            transport::send_frame(&mut self.writer, envelope.as_bytes()),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.classify_send_failure(e).await),
            Err(_) => return Err(Error::RequestTimeout(self.timeouts.step_ms)),
        }

        let reply = match tokio::time::timeout(step, transport::recv_frame(&mut self.reader)).await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(self.classify_recv_failure(e).await),
            Err(_) => return Err(Error::RequestTimeout(self.timeouts.step_ms)),
        };

        String::from_utf8(reply).map_err(|_| Error::NoResponseData)
    }

    async fn classify_send_failure(&mut self, cause: std::io::Error) -> Error {
        match self.liveness.exit_code() {
            None => Error::Disconnected(cause.to_string()),
            Some(code) => exit_error(&self.channel_id, code).await,
        }
    }

    async fn classify_recv_failure(&mut self, cause: std::io::Error) -> Error {
        match self.liveness.exit_code() {
            // Still running but the reply never came; usually the responder
            // dropped the connection mid-request.
            None => {
                tracing::debug!(channel_id = %self.channel_id, error = %cause, "no response data");
                Error::NoResponseData
            }
            Some(code) => exit_error(&self.channel_id, code).await,
        }
    }
}

/// Turn an observed exit code into the right error, reading the crash-log
/// side channel for abnormal exits.
pub async fn exit_error(channel_id: &str, exit_code: i32) -> Error {
    if exit_code == 0 {
        return Error::ResponderExited;
    }

    let log_path = paths::crash_log_path(channel_id);
    let appeared = supervisor::wait_until(|| log_path.exists(), CRASH_LOG_WAIT, CRASH_LOG_POLL).await;
    let crash_log = if appeared {
        std::fs::read_to_string(&log_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    } else {
        None
    };

    Error::ResponderCrashed {
        exit_code,
        crash_log,
    }
}
