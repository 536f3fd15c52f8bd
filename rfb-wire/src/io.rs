//! Buffered typed I/O over the RFB byte stream.
//!
//! [`RfbInStream`] and [`RfbOutStream`] wrap the halves of an async duplex
//! and expose typed big-endian reads and writes. Data is staged through a
//! [`BytesMut`] buffer so small protocol fields do not each cost a syscall.
//! Writes only reach the peer on [`RfbOutStream::flush`], which is how the
//! multiplexer keeps each outbound message atomic on the wire.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const DEFAULT_BUFFER: usize = 8192;

/// The read half of a connection, with typed big-endian accessors.
pub struct RfbInStream<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> RfbInStream<R> {
    /// Wrap a reader with the default 8 KiB buffer.
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_BUFFER)
    }

    /// Wrap a reader with a specific initial buffer capacity.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Fill the buffer until at least `n` bytes are available.
    ///
    /// EOF before `n` bytes surfaces as `UnexpectedEof`; the protocol never
    /// allows a message to end mid-field.
    async fn ensure_bytes(&mut self, n: usize) -> std::io::Result<()> {
        while self.buffer.len() < n {
            let read = self.reader.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, got {}", n, self.buffer.len()),
                ));
            }
        }
        Ok(())
    }

    /// Read a single byte.
    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        self.ensure_bytes(1).await?;
        Ok(self.buffer.get_u8())
    }

    /// Read a big-endian `u16`.
    pub async fn read_u16(&mut self) -> std::io::Result<u16> {
        self.ensure_bytes(2).await?;
        Ok(self.buffer.get_u16())
    }

    /// Read a big-endian `u32`.
    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        self.ensure_bytes(4).await?;
        Ok(self.buffer.get_u32())
    }

    /// Read a big-endian `i32` (encoding tags are signed).
    pub async fn read_i32(&mut self) -> std::io::Result<i32> {
        self.ensure_bytes(4).await?;
        Ok(self.buffer.get_i32())
    }

    /// Read exactly `buf.len()` bytes.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.ensure_bytes(buf.len()).await?;
        self.buffer.copy_to_slice(buf);
        Ok(())
    }

    /// Discard `n` bytes the protocol requires but ignores (padding).
    pub async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        self.ensure_bytes(n).await?;
        self.buffer.advance(n);
        Ok(())
    }

    /// Bytes currently buffered and readable without I/O.
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Unwrap back into the reader this stream was built over.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// The write half of a connection, with typed big-endian accessors.
///
/// Writes are staged in memory; nothing reaches the peer until
/// [`flush`](Self::flush) is called.
pub struct RfbOutStream<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> RfbOutStream<W> {
    /// Wrap a writer with the default 8 KiB buffer.
    pub fn new(writer: W) -> Self {
        Self::with_capacity(writer, DEFAULT_BUFFER)
    }

    /// Wrap a writer with a specific initial buffer capacity.
    pub fn with_capacity(writer: W, capacity: usize) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Buffer a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    /// Buffer a big-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    /// Buffer a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    /// Buffer a big-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32(value);
    }

    /// Buffer a byte slice.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write all buffered data to the peer and flush the writer.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        self.writer.flush().await
    }

    /// Bytes currently staged and awaiting flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Unwrap back into the writer this stream was built over.
    ///
    /// Unflushed data is dropped.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
