//! Core wire types: pixel format framing, rectangle headers, encoding tags.

use crate::error::{Result, RfbError};
use crate::io::{RfbInStream, RfbOutStream};
use rfb_core::Rect;
use rfb_pixels::PixelFormat;
use tokio::io::{AsyncRead, AsyncWrite};

/// Raw encoding: uncompressed pixel data.
pub const ENCODING_RAW: i32 = 0;

/// CopyRect encoding: copy a rectangle from elsewhere in the framebuffer.
pub const ENCODING_COPY_RECT: i32 = 1;

/// Hextile encoding: 16x16 tiles with per-tile sub-encodings.
pub const ENCODING_HEXTILE: i32 = 5;

/// Tight encoding: fill/JPEG/zlib with optional filters.
pub const ENCODING_TIGHT: i32 = 7;

/// ZRLE encoding: zlib-wrapped run-length encoding in 64x64 tiles.
pub const ENCODING_ZRLE: i32 = 16;

/// Pseudo-encoding: rich cursor shape (pixels plus 1-bit mask).
pub const ENCODING_CURSOR: i32 = -239;

/// Pseudo-encoding: cursor position report.
pub const ENCODING_POINTER_POS: i32 = -232;

/// Pseudo-encoding: desktop size change.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Read a 16-byte pixel format block.
///
/// The three trailing padding bytes are required by the framing but carry no
/// information; they are skipped, not validated.
pub async fn read_pixel_format<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
) -> Result<PixelFormat> {
    let bits_per_pixel = stream.read_u8().await?;
    let depth = stream.read_u8().await?;
    let big_endian = stream.read_u8().await?;
    let true_color = stream.read_u8().await?;

    if big_endian > 1 || true_color > 1 {
        return Err(RfbError::protocol(format!(
            "pixel format flags must be 0 or 1 (big_endian={}, true_color={})",
            big_endian, true_color
        )));
    }

    let red_max = stream.read_u16().await?;
    let green_max = stream.read_u16().await?;
    let blue_max = stream.read_u16().await?;
    let red_shift = stream.read_u8().await?;
    let green_shift = stream.read_u8().await?;
    let blue_shift = stream.read_u8().await?;
    stream.skip(3).await?;

    Ok(PixelFormat {
        bits_per_pixel,
        depth,
        big_endian: big_endian == 1,
        true_color: true_color == 1,
        red_max,
        green_max,
        blue_max,
        red_shift,
        green_shift,
        blue_shift,
    })
}

/// Write a 16-byte pixel format block.
pub fn write_pixel_format<W: AsyncWrite + Unpin>(stream: &mut RfbOutStream<W>, pf: &PixelFormat) {
    stream.write_u8(pf.bits_per_pixel);
    stream.write_u8(pf.depth);
    stream.write_u8(pf.big_endian as u8);
    stream.write_u8(pf.true_color as u8);
    stream.write_u16(pf.red_max);
    stream.write_u16(pf.green_max);
    stream.write_u16(pf.blue_max);
    stream.write_u8(pf.red_shift);
    stream.write_u8(pf.green_shift);
    stream.write_u8(pf.blue_shift);
    stream.write_bytes(&[0, 0, 0]);
}

/// Rectangle header inside a framebuffer update.
///
/// Positive encoding tags select a pixel codec; negative tags are
/// pseudo-encodings whose payload carries metadata instead of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl Rectangle {
    /// Read the 12-byte rectangle header. The encoding-specific payload
    /// follows on the stream and is consumed by the dispatched codec.
    pub async fn read_from<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<Self> {
        Ok(Self {
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
            encoding: stream.read_i32().await?,
        })
    }

    /// Write the 12-byte rectangle header.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u16(self.x);
        stream.write_u16(self.y);
        stream.write_u16(self.width);
        stream.write_u16(self.height);
        stream.write_i32(self.encoding);
    }

    /// Whether the tag denotes a pseudo-encoding.
    pub fn is_pseudo(&self) -> bool {
        self.encoding < 0
    }

    /// The covered region as a canvas rectangle.
    pub fn to_rect(&self) -> Rect {
        Rect::new(
            self.x as i32,
            self.y as i32,
            self.width as u32,
            self.height as u32,
        )
    }
}
