//! The reader-side framebuffer: canvas, colormap and codec registry.
//!
//! Owned exclusively by the reader task. A framebuffer update is applied
//! rectangle by rectangle; desktop-size changes resize the canvas strictly
//! between rectangles. Nothing here is published to the application: the
//! event loop snapshots the canvas into the shared frame handle only after
//! an update completes, so consumers never observe a half-applied frame.

use rfb_codecs::{DecodeContext, DecodedRect, DecoderRegistry};
use rfb_core::Rect;
use rfb_pixels::{Canvas, Colormap, PixelFormat};
use rfb_wire::messages::{FramebufferUpdateHeader, Rectangle};
use rfb_wire::{Result, RfbError, RfbInStream};
use tokio::io::AsyncRead;

/// Everything one completed framebuffer update produced.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Canvas regions that changed.
    pub damage: Vec<Rect>,
    /// Non-pixel results (cursor updates, resizes) in wire order.
    pub side_effects: Vec<DecodedRect>,
}

/// Decoding state for one connection.
pub struct Framebuffer {
    canvas: Canvas,
    pixel_format: PixelFormat,
    colormap: Colormap,
    registry: DecoderRegistry,
}

impl Framebuffer {
    /// Create the framebuffer after ServerInit.
    pub fn new(width: u16, height: u16, pixel_format: PixelFormat, encodings: &[i32]) -> Self {
        Self {
            canvas: Canvas::new(width as u32, height as u32),
            pixel_format,
            colormap: Colormap::new(),
            registry: DecoderRegistry::new(encodings),
        }
    }

    /// The canvas in its current state.
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Current dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.canvas.width(), self.canvas.height())
    }

    /// Install colormap entries from SetColorMapEntries.
    pub fn set_colormap_entries(&mut self, first: u16, colors: &[[u16; 3]]) -> Result<()> {
        self.colormap
            .set_entries(first, colors)
            .map_err(|e| RfbError::protocol(e.to_string()))
    }

    /// Apply one complete FramebufferUpdate from the stream.
    ///
    /// All rectangles are decoded before this returns; an error part-way
    /// leaves the working canvas dirty, which is fine because the caller
    /// never publishes it on failure.
    pub async fn apply_update<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
    ) -> Result<UpdateOutcome> {
        let header = FramebufferUpdateHeader::read_from(stream).await?;
        let mut outcome = UpdateOutcome::default();

        for _ in 0..header.rectangles {
            let rect = Rectangle::read_from(stream).await?;
            tracing::trace!(
                x = rect.x,
                y = rect.y,
                w = rect.width,
                h = rect.height,
                encoding = rect.encoding,
                "decoding rectangle"
            );

            let ctx = DecodeContext {
                pixel_format: &self.pixel_format,
                colormap: &self.colormap,
            };
            let decoded = self
                .registry
                .decode_rect(stream, &rect, &ctx, &mut self.canvas)
                .await?;

            match decoded {
                DecodedRect::Framebuffer => outcome.damage.push(rect.to_rect()),
                DecodedRect::DesktopSize { width, height } => {
                    // Rectangle boundary: safe to resize here, never inside
                    // a codec.
                    self.canvas.resize(width as u32, height as u32);
                    outcome.side_effects.push(decoded);
                }
                other => outcome.side_effects.push(other),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_wire::messages::{ENCODING_DESKTOP_SIZE, ENCODING_RAW};
    use std::io::Cursor;

    /// Update bytes without the leading message-type byte (the mux
    /// consumes it before handing the stream over).
    fn update_bytes(rects: &[(Rectangle, Vec<u8>)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(0); // padding
        buf.extend_from_slice(&(rects.len() as u16).to_be_bytes());
        for (rect, payload) in rects {
            buf.extend_from_slice(&rect.x.to_be_bytes());
            buf.extend_from_slice(&rect.y.to_be_bytes());
            buf.extend_from_slice(&rect.width.to_be_bytes());
            buf.extend_from_slice(&rect.height.to_be_bytes());
            buf.extend_from_slice(&rect.encoding.to_be_bytes());
            buf.extend_from_slice(payload);
        }
        buf
    }

    #[tokio::test]
    async fn raw_update_reports_damage() {
        let mut fb = Framebuffer::new(2, 2, PixelFormat::rgb888(), &[ENCODING_RAW]);

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 1,
            encoding: ENCODING_RAW,
        };
        let payload = vec![
            0x00, 0x00, 0xFF, 0x00, // red
            0x00, 0xFF, 0x00, 0x00, // green
        ];
        let data = update_bytes(&[(rect, payload)]);

        let outcome = fb
            .apply_update(&mut RfbInStream::new(Cursor::new(data)))
            .await
            .unwrap();
        assert_eq!(outcome.damage, vec![Rect::new(0, 0, 2, 1)]);
        assert!(outcome.side_effects.is_empty());
        assert_eq!(fb.canvas().pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(fb.canvas().pixel(1, 0), Some([0, 255, 0, 255]));
    }

    #[tokio::test]
    async fn desktop_resize_between_rectangles() {
        let mut fb = Framebuffer::new(2, 2, PixelFormat::rgb888(), &[ENCODING_RAW]);

        let resize = Rectangle {
            x: 0,
            y: 0,
            width: 4,
            height: 3,
            encoding: ENCODING_DESKTOP_SIZE,
        };
        // A raw rectangle that only fits the *new* size proves the resize
        // happened before the following rectangle.
        let raw = Rectangle {
            x: 3,
            y: 2,
            width: 1,
            height: 1,
            encoding: ENCODING_RAW,
        };
        let data = update_bytes(&[
            (resize, vec![]),
            (raw, vec![0x00, 0x00, 0xFF, 0x00]),
        ]);

        let outcome = fb
            .apply_update(&mut RfbInStream::new(Cursor::new(data)))
            .await
            .unwrap();
        assert_eq!(fb.dimensions(), (4, 3));
        assert_eq!(outcome.damage, vec![Rect::new(3, 2, 1, 1)]);
        assert_eq!(
            outcome.side_effects,
            vec![DecodedRect::DesktopSize {
                width: 4,
                height: 3
            }]
        );
        assert_eq!(fb.canvas().pixel(3, 2), Some([255, 0, 0, 255]));
    }

    #[tokio::test]
    async fn unknown_encoding_fails_the_update() {
        let mut fb = Framebuffer::new(2, 2, PixelFormat::rgb888(), &[ENCODING_RAW]);

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            encoding: 42,
        };
        let data = update_bytes(&[(rect, vec![])]);

        let err = fb
            .apply_update(&mut RfbInStream::new(Cursor::new(data)))
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[tokio::test]
    async fn colormap_entries_flow_into_decoding() {
        let mut pf = PixelFormat::rgb888();
        pf.bits_per_pixel = 8;
        pf.depth = 8;
        pf.true_color = false;
        let mut fb = Framebuffer::new(1, 1, pf, &[ENCODING_RAW]);
        fb.set_colormap_entries(7, &[[0xFFFF, 0, 0]]).unwrap();

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            encoding: ENCODING_RAW,
        };
        let data = update_bytes(&[(rect, vec![7u8])]);

        fb.apply_update(&mut RfbInStream::new(Cursor::new(data)))
            .await
            .unwrap();
        assert_eq!(fb.canvas().pixel(0, 0), Some([255, 0, 0, 255]));
    }

    #[tokio::test]
    async fn colormap_overflow_is_protocol_violation() {
        let mut fb = Framebuffer::new(1, 1, PixelFormat::rgb888(), &[ENCODING_RAW]);
        let err = fb
            .set_colormap_entries(255, &[[0; 3], [0; 3]])
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }
}
