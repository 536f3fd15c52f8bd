//! Messages flowing from server to client.
//!
//! Each message's `write_to` emits the leading type byte; `read_from` assumes
//! the multiplexer has already consumed it to dispatch.

use super::types::{read_pixel_format, write_pixel_format};
use crate::error::Result;
use crate::io::{RfbInStream, RfbOutStream};
use bytes::Bytes;
use rfb_pixels::PixelFormat;
use tokio::io::{AsyncRead, AsyncWrite};

/// ServerInit: framebuffer dimensions, pixel format and desktop name,
/// sent by the server to complete the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    /// Read a ServerInit message.
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        let width = stream.read_u16().await?;
        let height = stream.read_u16().await?;
        let pixel_format = read_pixel_format(stream).await?;
        let name_len = stream.read_u32().await? as usize;
        let mut name_bytes = vec![0u8; name_len];
        stream.read_bytes(&mut name_bytes).await?;
        // Desktop names are Latin-1 on the wire; lossy conversion keeps
        // non-UTF-8 servers connectable.
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        Ok(Self {
            width,
            height,
            pixel_format,
            name,
        })
    }

    /// Write a ServerInit message.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u16(self.width);
        stream.write_u16(self.height);
        write_pixel_format(stream, &self.pixel_format);
        stream.write_u32(self.name.len() as u32);
        stream.write_bytes(self.name.as_bytes());
    }
}

/// FramebufferUpdate framing: padding byte plus the rectangle count.
///
/// Rectangles are *not* read here. Each rectangle header is followed by an
/// encoding-specific payload, so the multiplexer must alternate header reads
/// with codec dispatch; slurping all headers up front would desynchronize
/// the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateHeader {
    pub rectangles: u16,
}

impl FramebufferUpdateHeader {
    /// Read the update header (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        stream.skip(1).await?;
        let rectangles = stream.read_u16().await?;
        Ok(Self { rectangles })
    }

    /// Write the update header including the type byte. Rectangle headers
    /// and payloads follow separately.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(0);
        stream.write_u8(0);
        stream.write_u16(self.rectangles);
    }
}

/// SetColorMapEntries: palette update for non-true-color sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetColorMapEntries {
    pub first_color: u16,
    pub colors: Vec<[u16; 3]>,
}

impl SetColorMapEntries {
    /// Read a SetColorMapEntries message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        stream.skip(1).await?;
        let first_color = stream.read_u16().await?;
        let count = stream.read_u16().await? as usize;

        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            colors.push([
                stream.read_u16().await?,
                stream.read_u16().await?,
                stream.read_u16().await?,
            ]);
        }

        Ok(Self {
            first_color,
            colors,
        })
    }

    /// Write a SetColorMapEntries message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(1);
        stream.write_u8(0);
        stream.write_u16(self.first_color);
        stream.write_u16(self.colors.len() as u16);
        for [r, g, b] in &self.colors {
            stream.write_u16(*r);
            stream.write_u16(*g);
            stream.write_u16(*b);
        }
    }
}

/// Bell: audible notification, no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bell;

impl Bell {
    /// Write a Bell message.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(2);
    }
}

/// ServerCutText: clipboard bytes from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCutText {
    pub text: Bytes,
}

impl ServerCutText {
    /// Read a ServerCutText message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        stream.skip(3).await?;
        let len = stream.read_u32().await? as usize;
        let mut text = vec![0u8; len];
        stream.read_bytes(&mut text).await?;
        Ok(Self {
            text: Bytes::from(text),
        })
    }

    /// Write a ServerCutText message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(3);
        stream.write_bytes(&[0, 0, 0]);
        stream.write_u32(self.text.len() as u32);
        stream.write_bytes(&self.text);
    }
}
