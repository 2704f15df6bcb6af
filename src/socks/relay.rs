//! Bidirectional byte relay
//!
//! Two independent copy loops, one per direction. When a loop sees end of
//! stream or an error on its source it shuts down (half-closes) its
//! destination, so the peer observes a graceful end instead of a reset.
//! The relay returns once both directions are finished.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the first stream to the second
    pub a_to_b: u64,
    /// Bytes copied from the second stream to the first
    pub b_to_a: u64,
}

/// Relay data bidirectionally between two streams
///
/// Relay errors are logged and never propagated: by the time a relay runs the
/// request has already been answered.
pub async fn relay<A, B>(a: A, b: B) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let (a_to_b, b_to_a) = tokio::join!(
        pump(&mut a_read, &mut b_write, "A->B"),
        pump(&mut b_read, &mut a_write, "B->A"),
    );

    RelayStats { a_to_b, b_to_a }
}

/// Copy one direction, then end the destination
async fn pump<R, W>(reader: &mut R, writer: &mut W, direction: &str) -> u64
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = match copy_counted(reader, writer).await {
        (bytes, Ok(())) => {
            debug!("{} finished: {} bytes", direction, bytes);
            bytes
        }
        (bytes, Err(e)) => {
            debug!("{} error after {} bytes: {}", direction, bytes, e);
            bytes
        }
    };

    if let Err(e) = writer.shutdown().await {
        debug!("{} shutdown error: {}", direction, e);
    }

    copied
}

/// Like `tokio::io::copy`, but reports the byte count on failure too
async fn copy_counted<R, W>(reader: &mut R, writer: &mut W) -> (u64, io::Result<()>)
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; crate::helper::DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return (total, Err(e)),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return (total, Err(e));
        }
        if let Err(e) = writer.flush().await {
            return (total, Err(e));
        }
        total += n as u64;
    }
    (total, Ok(()))
}
