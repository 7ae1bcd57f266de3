//! Cross-platform channel and configuration paths
//!
//! Unix/macOS: Unix domain sockets at $XDG_RUNTIME_DIR or /tmp
//! Windows: named pipes in the \\.\pipe\ namespace (handled by interprocess)

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// Name used for runtime and config directories
const APP_NAME: &str = "objpilot";

static CHANNEL_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a fresh channel id for a responder process.
///
/// The id names both the socket and the crash-log side channel, so it must
/// be unique per driver session even when the same process is re-driven.
pub fn new_channel_id(responder_pid: u32) -> String {
    let nonce = CHANNEL_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("pid-{responder_pid}-{nanos:x}{nonce:x}")
}

/// Directory holding channel sockets and crash logs
#[cfg(unix)]
pub fn channel_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME);
    }

    // Fallback to /tmp with uid for security
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

#[cfg(windows)]
pub fn channel_dir() -> PathBuf {
    // Crash logs still need a real directory; pipes live in the namespace.
    std::env::temp_dir().join(APP_NAME)
}

/// Get the socket path for a channel id
#[cfg(unix)]
pub fn socket_path(channel_id: &str) -> PathBuf {
    channel_dir().join(format!("{channel_id}.sock"))
}

/// Get the socket name suitable for the interprocess local socket API
#[cfg(unix)]
pub fn socket_name(channel_id: &str) -> String {
    socket_path(channel_id).to_string_lossy().into_owned()
}

#[cfg(windows)]
pub fn socket_name(channel_id: &str) -> String {
    format!("{}-{}", APP_NAME, channel_id)
}

/// Path of the crash-log side channel for a channel id.
///
/// The responder's unhandled-error hook writes here; the driver reads it
/// when it observes an abnormal exit.
pub fn crash_log_path(channel_id: &str) -> PathBuf {
    channel_dir().join(format!("{channel_id}-crash.log"))
}

/// Ensure the channel directory exists with proper permissions
pub fn ensure_channel_dir() -> io::Result<PathBuf> {
    let dir = channel_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(dir)
}

/// Remove the socket file for a channel if it exists (for cleanup)
#[cfg(unix)]
pub fn remove_socket(channel_id: &str) -> io::Result<()> {
    let path = socket_path(channel_id);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket(_channel_id: &str) -> io::Result<()> {
    // Named pipes are automatically cleaned up on Windows
    Ok(())
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}
