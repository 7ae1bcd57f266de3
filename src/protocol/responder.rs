//! Responder dispatch loop
//!
//! One loop serves one channel. Each command takes the command mutex for its
//! entire logical lifetime: execution races a nested-modal watchdog, and if
//! the watchdog wins on a kind that must not hang, a pending sentinel goes
//! out immediately while execution keeps running. The response slot is
//! first-write-wins, so a late real completion after a pending reply is
//! suppressed rather than corrupting the next exchange.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::Notify;

use crate::common::{paths, Error, Result};
use crate::wire::{self, transport};

use super::{CommandHost, Request, Response};

/// How often the watchdog probes for a nested modal state while a
/// hang-intolerant command executes
const MODAL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// First-write-wins response holder for one command.
///
/// Both the executing task and the modal watchdog may try to produce the
/// reply; exactly one write sticks and later writes report suppression.
pub struct ResponseSlot {
    response: Mutex<Option<Response>>,
    written: Notify,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(None),
            written: Notify::new(),
        }
    }

    /// Store a response unless one is already present. Returns whether this
    /// write won.
    pub fn write(&self, response: Response) -> bool {
        let mut slot = self.response.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(response);
        drop(slot);
        self.written.notify_waiters();
        true
    }

    pub fn has_responded(&self) -> bool {
        self.response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn get(&self) -> Option<Response> {
        self.response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait until some response has been written, then return it
    pub async fn wait(&self) -> Response {
        loop {
            let notified = self.written.notified();
            if let Some(r) = self.get() {
                return r;
            }
            notified.await;
        }
    }
}

impl Default for ResponseSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Route unhandled panics to the channel's crash-log side channel so the
/// driver can report them alongside the abnormal exit code.
pub fn install_crash_hook(channel_id: &str) {
    let path = paths::crash_log_path(channel_id);
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let location = info
            .location()
            .map(|l| format!(" at {}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let _ = paths::ensure_channel_dir();
        let _ = std::fs::write(&path, format!("{payload}{location}\n"));
        default_hook(info);
    }));
}

/// The responder side of one channel
pub struct Responder<H> {
    channel_id: String,
    host: Arc<H>,
    command_lock: tokio::sync::Mutex<()>,
}

impl<H: CommandHost> Responder<H> {
    pub fn new(channel_id: impl Into<String>, host: Arc<H>) -> Self {
        Self {
            channel_id: channel_id.into(),
            host,
            command_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Listen on the channel and serve connections until the listener fails.
    ///
    /// A dropped connection is not fatal: the driver reconnects and the
    /// accept loop picks the new stream up.
    pub async fn serve(&self) -> Result<()> {
        use interprocess::local_socket::traits::tokio::Listener as _;

        let listener = transport::create_listener(&self.channel_id).await?;
        tracing::info!(channel_id = %self.channel_id, "responder listening");

        loop {
            let stream = listener.accept().await?;
            tracing::debug!(channel_id = %self.channel_id, "driver connected");
            if let Err(e) = self.serve_connection(stream).await {
                tracing::debug!(channel_id = %self.channel_id, error = %e, "connection ended");
            }
        }
    }

    async fn serve_connection(&self, stream: transport::Stream) -> Result<()> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        loop {
            let frame = transport::recv_frame(&mut reader).await?;
            let envelope = String::from_utf8(frame)
                .map_err(|_| Error::Internal("request frame is not utf-8".into()))?;

            let request: Request = match wire::unpack(&envelope) {
                Ok(r) => r,
                Err(e) => {
                    // A malformed request gets an error reply, not a dead
                    // channel.
                    tracing::warn!(error = %e, "malformed request envelope");
                    let reply = wire::pack(&Response::error(e))?;
                    transport::send_frame(&mut writer, reply.as_bytes()).await?;
                    continue;
                }
            };

            self.dispatch(request, &mut writer).await?;
        }
    }

    /// Run one command to full resolution.
    ///
    /// Holds the command mutex until execution actually finishes, even when
    /// an interim pending reply has already gone out.
    async fn dispatch<W: AsyncWrite + Unpin>(&self, request: Request, writer: &mut W) -> Result<()> {
        let _guard = self.command_lock.lock().await;

        let kind = request.kind();
        let must_not_hang = request.must_not_hang();
        tracing::debug!(kind, "dispatching command");

        let slot = Arc::new(ResponseSlot::new());
        let mut exec = {
            let slot = Arc::clone(&slot);
            let host = Arc::clone(&self.host);
            tokio::spawn(async move {
                let response = match host.execute(&request).await {
                    Ok(r) => r,
                    Err(e) => Response::error(e),
                };
                if !slot.write(response) {
                    tracing::debug!(kind, "late completion suppressed, pending reply already sent");
                }
            })
        };

        if must_not_hang {
            loop {
                if slot.has_responded() || exec.is_finished() {
                    break;
                }
                if self.host.in_modal_state() {
                    if slot.write(Response::pending()) {
                        tracing::debug!(kind, "modal state detected, replying pending");
                    }
                    break;
                }
                tokio::time::sleep(MODAL_POLL_INTERVAL).await;
            }
        }

        let mut joined = false;
        if !slot.has_responded() {
            // Hang-tolerant command: the reply is whatever execution yields.
            if let Err(e) = (&mut exec).await {
                tracing::error!(kind, error = %e, "command execution panicked");
                slot.write(Response::error(Error::Internal(
                    "command execution panicked".into(),
                )));
            }
            joined = true;
        }

        let reply = slot
            .get()
            .unwrap_or_else(|| Response::error(Error::Internal("command produced no response".into())));
        let envelope = wire::pack(&reply)?;
        transport::send_frame(writer, envelope.as_bytes()).await?;

        // The logical command is only over when execution resolves; the
        // next request waits behind the mutex until then.
        if !joined {
            if let Err(e) = exec.await {
                tracing::error!(kind, error = %e, "command execution panicked");
            }
        }
        Ok(())
    }
}
