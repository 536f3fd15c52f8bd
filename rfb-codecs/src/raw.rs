//! Raw encoding: uncompressed pixels in the negotiated wire format.
//!
//! The payload is exactly `width * height * bytes_per_pixel` bytes, row
//! major. No state is carried between rectangles.

use crate::pixels::{rgba_from_value, DecodeContext};
use rfb_pixels::Canvas;
use rfb_wire::messages::Rectangle;
use rfb_wire::{RfbError, RfbInStream, Result};
use tokio::io::AsyncRead;

/// Decoder for the raw encoding.
#[derive(Debug, Default)]
pub struct RawDecoder;

impl RawDecoder {
    pub async fn decode<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        ctx: &DecodeContext<'_>,
        canvas: &mut Canvas,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let width = rect.width as usize;
        let height = rect.height as usize;
        let bpp = ctx.pixel_format.bytes_per_pixel() as usize;

        let mut wire = vec![0u8; width * height * bpp];
        stream.read_bytes(&mut wire).await?;

        let mut rgba = Vec::with_capacity(width * height * 4);
        for pixel in wire.chunks_exact(bpp) {
            rgba.extend_from_slice(&rgba_from_value(ctx.pixel_format.assemble(pixel), ctx)?);
        }

        canvas
            .image_rect(rect.to_rect(), &rgba, 0)
            .map_err(|e| RfbError::protocol(e.to_string()))
    }
}
