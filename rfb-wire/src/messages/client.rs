//! Messages flowing from client to server.
//!
//! Both directions are implemented: the client half of the engine writes
//! these, the server half parses them. `write_to` emits the leading type
//! byte; `read_from` assumes the dispatcher already consumed it.

use super::types::{read_pixel_format, write_pixel_format};
use crate::error::{Result, RfbError};
use crate::io::{RfbInStream, RfbOutStream};
use bytes::Bytes;
use rfb_pixels::PixelFormat;
use tokio::io::{AsyncRead, AsyncWrite};

/// ClientInit: one byte, whether the session should be shared with other
/// clients or take exclusive control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInit {
    pub shared: bool,
}

impl ClientInit {
    /// Read a ClientInit message.
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        let flag = stream.read_u8().await?;
        if flag > 1 {
            return Err(RfbError::protocol(format!(
                "shared flag must be 0 or 1, got {}",
                flag
            )));
        }
        Ok(Self { shared: flag == 1 })
    }

    /// Write a ClientInit message.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(self.shared as u8);
    }
}

/// SetPixelFormat: the format the client wants updates delivered in.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPixelFormat {
    pub pixel_format: PixelFormat,
}

impl SetPixelFormat {
    /// Read a SetPixelFormat message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        stream.skip(3).await?;
        let pixel_format = read_pixel_format(stream).await?;
        Ok(Self { pixel_format })
    }

    /// Write a SetPixelFormat message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(0);
        stream.write_bytes(&[0, 0, 0]);
        write_pixel_format(stream, &self.pixel_format);
    }
}

/// SetEncodings: encoding tags the client accepts, in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEncodings {
    pub encodings: Vec<i32>,
}

impl SetEncodings {
    /// Read a SetEncodings message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        stream.skip(1).await?;
        let count = stream.read_u16().await? as usize;
        let mut encodings = Vec::with_capacity(count);
        for _ in 0..count {
            encodings.push(stream.read_i32().await?);
        }
        Ok(Self { encodings })
    }

    /// Write a SetEncodings message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(2);
        stream.write_u8(0);
        stream.write_u16(self.encodings.len() as u16);
        for encoding in &self.encodings {
            stream.write_i32(*encoding);
        }
    }
}

/// FramebufferUpdateRequest: ask the server for (incremental) updates of a
/// region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateRequest {
    pub incremental: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl FramebufferUpdateRequest {
    /// Read a FramebufferUpdateRequest message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        Ok(Self {
            incremental: stream.read_u8().await? != 0,
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
        })
    }

    /// Write a FramebufferUpdateRequest message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(3);
        stream.write_u8(self.incremental as u8);
        stream.write_u16(self.x);
        stream.write_u16(self.y);
        stream.write_u16(self.width);
        stream.write_u16(self.height);
    }
}

/// KeyEvent: a key press or release, identified by X11 keysym.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub down: bool,
    pub key: u32,
}

impl KeyEvent {
    /// Read a KeyEvent message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        let down = stream.read_u8().await? != 0;
        stream.skip(2).await?;
        let key = stream.read_u32().await?;
        Ok(Self { down, key })
    }

    /// Write a KeyEvent message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(4);
        stream.write_u8(self.down as u8);
        stream.write_bytes(&[0, 0]);
        stream.write_u32(self.key);
    }
}

/// PointerEvent: pointer position and button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub buttons: u8,
    pub x: u16,
    pub y: u16,
}

impl PointerEvent {
    /// Read a PointerEvent message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        Ok(Self {
            buttons: stream.read_u8().await?,
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
        })
    }

    /// Write a PointerEvent message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(5);
        stream.write_u8(self.buttons);
        stream.write_u16(self.x);
        stream.write_u16(self.y);
    }
}

/// ClientCutText: clipboard bytes from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCutText {
    pub text: Bytes,
}

impl ClientCutText {
    /// Read a ClientCutText message (after the type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        stream.skip(3).await?;
        let len = stream.read_u32().await? as usize;
        let mut text = vec![0u8; len];
        stream.read_bytes(&mut text).await?;
        Ok(Self {
            text: Bytes::from(text),
        })
    }

    /// Write a ClientCutText message including the type byte.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(6);
        stream.write_bytes(&[0, 0, 0]);
        stream.write_u32(self.text.len() as u32);
        stream.write_bytes(&self.text);
    }
}
