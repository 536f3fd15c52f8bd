//! Pseudo-encodings: metadata rectangles that never touch the canvas.
//!
//! Negative encoding tags reuse the rectangle header to carry cursor and
//! desktop-size information. Cursor position and desktop size have no
//! payload at all (the header fields *are* the data); the cursor-shape
//! payload is a full pixel image plus a 1-bit transparency mask with each
//! mask row padded to whole bytes.

use crate::pixels::{read_pixel, DecodeContext};
use rfb_wire::messages::Rectangle;
use rfb_wire::{Result, RfbInStream};
use tokio::io::AsyncRead;

/// A decoded client-side cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorShape {
    pub width: u16,
    pub height: u16,
    /// Hotspot within the image, from the rectangle origin.
    pub hotspot: (u16, u16),
    /// RGBA cursor image, row-major.
    pub pixels: Vec<u8>,
    /// 1-bit transparency mask, each row padded to whole bytes; a set bit
    /// means the pixel is visible.
    pub mask: Vec<u8>,
}

/// Decoder for the rich-cursor pseudo-encoding.
#[derive(Debug, Default)]
pub struct CursorDecoder;

impl CursorDecoder {
    pub async fn decode<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        ctx: &DecodeContext<'_>,
    ) -> Result<CursorShape> {
        let width = rect.width;
        let height = rect.height;
        let count = width as usize * height as usize;

        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&read_pixel(stream, ctx).await?);
        }

        let mask_row = (width as usize).div_ceil(8);
        let mut mask = vec![0u8; mask_row * height as usize];
        stream.read_bytes(&mut mask).await?;

        Ok(CursorShape {
            width,
            height,
            hotspot: (rect.x, rect.y),
            pixels,
            mask,
        })
    }
}
