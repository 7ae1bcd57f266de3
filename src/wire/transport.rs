//! Cross-platform channel transport
//!
//! Abstracts Unix domain sockets (Unix/macOS) and named pipes (Windows)
//! using the interprocess crate. Frames are u32-LE length-prefixed.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::paths;

/// Maximum frame size (10 MB). Tree dumps are the largest frames; anything
/// beyond this is a protocol error, not a big tree.
const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

pub use platform::Stream;

/// Create a listener for the given channel. Called by the responder before
/// the driver's first connect attempt.
pub async fn create_listener(channel_id: &str) -> io::Result<Listener> {
    paths::ensure_channel_dir()?;
    paths::remove_socket(channel_id)?;

    let name = paths::socket_name(channel_id);

    #[cfg(unix)]
    let listener = {
        let name = name.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let name = name.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    // The channel carries arbitrary code execution; owner-only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = paths::socket_path(channel_id);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Connect to a channel by id
pub async fn connect(channel_id: &str) -> io::Result<Stream> {
    let name = paths::socket_name(channel_id);

    #[cfg(unix)]
    let stream = {
        let name = name.to_fs_name::<GenericFilePath>()?;
        Stream::connect(name).await?
    };

    #[cfg(windows)]
    let stream = {
        let name = name.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(name).await?
    };

    Ok(stream)
}

/// Send a length-prefixed frame
pub async fn send_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes", data.len()),
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed frame
pub async fn recv_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Whether the channel socket exists yet
pub fn channel_exists(channel_id: &str) -> bool {
    #[cfg(unix)]
    {
        paths::socket_path(channel_id).exists()
    }

    #[cfg(windows)]
    {
        // Named pipes have no cheap existence check; connect and see.
        let _ = channel_id;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        send_frame(&mut a, b"hello").await.unwrap();
        send_frame(&mut a, &[]).await.unwrap();
        assert_eq!(recv_frame(&mut b).await.unwrap(), b"hello");
        assert_eq!(recv_frame(&mut b).await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_sending() {
        let (mut a, _b) = tokio::io::duplex(1024);
        let huge = vec![0u8; MAX_FRAME_SIZE as usize + 1];
        let err = send_frame(&mut a, &huge).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_on_receive() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let bad_len = (MAX_FRAME_SIZE + 1).to_le_bytes();
        a.write_all(&bad_len).await.unwrap();
        let err = recv_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
