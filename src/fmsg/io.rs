// Timed socket helpers and bounded-buffer streaming copies

use crate::fmsg::error::{FmsgError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Buffer size for body streaming
pub const COPY_CHUNK: usize = 16 * 1024;

/// Run an I/O future under a deadline, mapping expiry to `Timeout`
pub async fn timed<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(FmsgError::Timeout(what.to_string())),
    }
}

/// Copy exactly `len` bytes from `reader` to `writer` through a fixed buffer.
///
/// Each read and each write is bounded by its own timeout. A reader that
/// ends early fails with `Decode`.
pub async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK.min(len as usize).max(1)];
    let mut remaining = len;

    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = timed(read_timeout, "reading body", reader.read(&mut buf[..want])).await?;
        if n == 0 {
            return Err(FmsgError::decode(format!(
                "body ended after {} of {} bytes",
                len - remaining,
                len
            )));
        }
        timed(write_timeout, "writing body", writer.write_all(&buf[..n])).await?;
        remaining -= n as u64;
    }

    timed(write_timeout, "flushing body", writer.flush()).await?;
    Ok(len)
}

/// Read until `buf` is full or the peer closes, returning the byte count.
///
/// An error after some bytes arrived (a reset following the peer's
/// answer) ends the read with what was received.
pub async fn read_up_to<R>(reader: &mut R, buf: &mut [u8], limit: Duration) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match timed(limit, "reading response", reader.read(&mut buf[filled..])).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) if filled > 0 => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
