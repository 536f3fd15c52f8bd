//! CopyRect encoding: move a rectangle within the existing framebuffer.
//!
//! Only four payload bytes travel (the source position); the rectangle
//! header names the destination. Overlapping source and destination are
//! legal and resolved by the canvas's direction-aware copy.

use crate::pixels::DecodeContext;
use rfb_core::{Point, Rect};
use rfb_pixels::Canvas;
use rfb_wire::messages::Rectangle;
use rfb_wire::{RfbError, RfbInStream, Result};
use tokio::io::AsyncRead;

/// Decoder for CopyRect.
#[derive(Debug, Default)]
pub struct CopyRectDecoder;

impl CopyRectDecoder {
    pub async fn decode<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        _ctx: &DecodeContext<'_>,
        canvas: &mut Canvas,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            // Source position still travels for a degenerate rectangle.
            stream.skip(4).await?;
            return Ok(());
        }

        let src_x = stream.read_u16().await?;
        let src_y = stream.read_u16().await?;

        let src = Rect::new(
            src_x as i32,
            src_y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        let dest = rect.to_rect();
        if !canvas.bounds().contains_rect(&src) || !canvas.bounds().contains_rect(&dest) {
            return Err(RfbError::protocol(format!(
                "CopyRect outside canvas: src=({}, {}) dest=({}, {}) size {}x{} canvas {}x{}",
                src_x,
                src_y,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                canvas.width(),
                canvas.height()
            )));
        }

        canvas
            .copy_rect(src, Point::new(dest.x, dest.y))
            .map_err(|e| RfbError::protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_pixels::{Colormap, PixelFormat};
    use std::io::Cursor;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    fn decode_ctx<'a>(pf: &'a PixelFormat, map: &'a Colormap) -> DecodeContext<'a> {
        DecodeContext {
            pixel_format: pf,
            colormap: map,
        }
    }

    #[tokio::test]
    async fn copies_row_to_row() {
        let pf = PixelFormat::rgb888();
        let map = Colormap::new();
        let mut canvas = Canvas::new(2, 2);
        canvas.set_pixel(0, 0, RED).unwrap();
        canvas.set_pixel(1, 0, GREEN).unwrap();

        // src = (0, 0), dest rect = (0, 1, 2, 1)
        let mut stream = RfbInStream::new(Cursor::new(vec![0, 0, 0, 0]));
        let rect = Rectangle {
            x: 0,
            y: 1,
            width: 2,
            height: 1,
            encoding: 1,
        };
        CopyRectDecoder
            .decode(&mut stream, &rect, &decode_ctx(&pf, &map), &mut canvas)
            .await
            .unwrap();

        assert_eq!(canvas.pixel(0, 1), Some(RED));
        assert_eq!(canvas.pixel(1, 1), Some(GREEN));
    }

    #[tokio::test]
    async fn source_out_of_bounds_is_protocol_violation() {
        let pf = PixelFormat::rgb888();
        let map = Colormap::new();
        let mut canvas = Canvas::new(4, 4);

        // src = (3, 3) with a 2x2 rect runs off the canvas.
        let mut stream = RfbInStream::new(Cursor::new(vec![0, 3, 0, 3]));
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            encoding: 1,
        };
        let err = CopyRectDecoder
            .decode(&mut stream, &rect, &decode_ctx(&pf, &map), &mut canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[tokio::test]
    async fn destination_out_of_bounds_is_protocol_violation() {
        let pf = PixelFormat::rgb888();
        let map = Colormap::new();
        let mut canvas = Canvas::new(4, 4);

        let mut stream = RfbInStream::new(Cursor::new(vec![0, 0, 0, 0]));
        let rect = Rectangle {
            x: 3,
            y: 3,
            width: 2,
            height: 2,
            encoding: 1,
        };
        let err = CopyRectDecoder
            .decode(&mut stream, &rect, &decode_ctx(&pf, &map), &mut canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[tokio::test]
    async fn empty_rect_still_consumes_source_position() {
        let pf = PixelFormat::rgb888();
        let map = Colormap::new();
        let mut canvas = Canvas::new(2, 2);

        let mut stream = RfbInStream::new(Cursor::new(vec![0, 1, 0, 1, 0xEE]));
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            encoding: 1,
        };
        CopyRectDecoder
            .decode(&mut stream, &rect, &decode_ctx(&pf, &map), &mut canvas)
            .await
            .unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), 0xEE);
    }
}
