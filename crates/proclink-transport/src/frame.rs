//! Length-prefixed message framing.
//!
//! Frames are a 4-byte little-endian length followed by the body, so a
//! streaming reader can find frame boundaries without schema knowledge.

use proclink_core::{LinkError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sanity cap on a single frame body (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Reads length-prefixed frames off any async byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one complete frame body.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_bytes = [0u8; 4];
        self.inner
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| LinkError::Transport(format!("read length failed: {e}")))?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            return Err(LinkError::Transport(format!(
                "frame too large: {len} bytes"
            )));
        }

        let mut data = vec![0u8; len];
        self.inner
            .read_exact(&mut data)
            .await
            .map_err(|e| LinkError::Transport(format!("read frame failed: {e}")))?;

        Ok(data)
    }
}

/// Writes length-prefixed frames onto any async byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame: length prefix, body, flush.
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        let len = (data.len() as u32).to_le_bytes();
        self.inner
            .write_all(&len)
            .await
            .map_err(|e| LinkError::Transport(format!("write length failed: {e}")))?;
        self.inner
            .write_all(data)
            .await
            .map_err(|e| LinkError::Transport(format!("write frame failed: {e}")))?;
        self.inner
            .flush()
            .await
            .map_err(|e| LinkError::Transport(format!("flush failed: {e}")))?;
        Ok(())
    }

    /// Shut the write side down, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| LinkError::Transport(format!("shutdown failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_frame(b"hello").await.unwrap();
        writer.write_frame(b"").await.unwrap();
        writer.write_frame(b"world").await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), b"hello");
        assert_eq!(reader.read_frame().await.unwrap(), b"");
        assert_eq!(reader.read_frame().await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        // A length prefix claiming far more than the cap
        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        client.write_all(&len).await.unwrap();

        assert!(matches!(
            reader.read_frame().await,
            Err(LinkError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_a_transport_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        // Announce 10 bytes, deliver 3, then hang up
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(matches!(
            reader.read_frame().await,
            Err(LinkError::Transport(_))
        ));
    }
}
