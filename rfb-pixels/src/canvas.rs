//! The framebuffer canvas decoded rectangle updates are written into.
//!
//! The canvas is a row-major RGBA8888 grid with stride equal to width. It is
//! owned by the connection's reader task for the lifetime of a session and
//! written under a single-writer discipline; no interior locking lives here.

use anyhow::{anyhow, Result};
use rfb_core::{Point, Rect};

/// Opaque black, the fill color for freshly allocated or revealed area.
const BLACK: [u8; 4] = [0, 0, 0, 0xFF];

/// A mutable RGBA pixel grid with fast row addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    /// Row-major RGBA data, stride == width.
    data: Vec<u8>,
}

impl Canvas {
    /// Create a canvas of the given size, filled with opaque black.
    pub fn new(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * 4];
        for px in data.chunks_exact_mut(4) {
            px.copy_from_slice(&BLACK);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Canvas width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The full canvas as a rectangle at the origin.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Raw RGBA data, row-major with stride equal to width.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read one pixel. `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let off = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ])
    }

    /// Write one pixel.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(anyhow!(
                "pixel ({}, {}) outside canvas {}x{}",
                x,
                y,
                self.width,
                self.height
            ));
        }
        let off = (y as usize * self.width as usize + x as usize) * 4;
        self.data[off..off + 4].copy_from_slice(&rgba);
        Ok(())
    }

    fn validate_rect(&self, rect: Rect) -> Result<()> {
        if rect.x < 0 || rect.y < 0 || !self.bounds().contains_rect(&rect) {
            return Err(anyhow!(
                "rectangle {:?} outside canvas {}x{}",
                rect,
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    /// Fill a rectangle with a solid color.
    pub fn fill_rect(&mut self, rect: Rect, rgba: [u8; 4]) -> Result<()> {
        self.validate_rect(rect)?;
        let stride = self.width as usize;
        for y in 0..rect.height as usize {
            let row = ((rect.y as usize + y) * stride + rect.x as usize) * 4;
            for x in 0..rect.width as usize {
                let off = row + x * 4;
                self.data[off..off + 4].copy_from_slice(&rgba);
            }
        }
        Ok(())
    }

    /// Copy RGBA image data into a rectangle.
    ///
    /// `stride` is the source stride in pixels; 0 means tightly packed.
    pub fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()> {
        self.validate_rect(dest)?;
        if dest.is_empty() {
            return Ok(());
        }
        let src_stride = if stride == 0 {
            dest.width as usize
        } else {
            stride
        };
        let row_bytes = dest.width as usize * 4;
        let needed = src_stride * 4 * (dest.height as usize).saturating_sub(1) + row_bytes;
        if pixels.len() < needed {
            return Err(anyhow!(
                "insufficient source data: got {} bytes, need {}",
                pixels.len(),
                needed
            ));
        }

        let dst_stride = self.width as usize;
        for y in 0..dest.height as usize {
            let dst = ((dest.y as usize + y) * dst_stride + dest.x as usize) * 4;
            let src = y * src_stride * 4;
            self.data[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
        Ok(())
    }

    /// Copy a rectangle within the canvas to a new origin.
    ///
    /// Source and destination may overlap. Rows are walked bottom-up when the
    /// destination is below the source so a pixel is never read after it has
    /// been overwritten; within a row `copy_within` already has memmove
    /// semantics, covering the horizontal-overlap case.
    pub fn copy_rect(&mut self, src: Rect, dst: Point) -> Result<()> {
        let dest = Rect::new(dst.x, dst.y, src.width, src.height);
        self.validate_rect(src)?;
        self.validate_rect(dest)?;

        let stride = self.width as usize;
        let row_bytes = src.width as usize * 4;
        let row_range = |rect: &Rect, y: usize| {
            let start = ((rect.y as usize + y) * stride + rect.x as usize) * 4;
            start..start + row_bytes
        };

        if dst.y > src.y {
            for y in (0..src.height as usize).rev() {
                let from = row_range(&src, y);
                let to = row_range(&dest, y).start;
                self.data.copy_within(from, to);
            }
        } else {
            for y in 0..src.height as usize {
                let from = row_range(&src, y);
                let to = row_range(&dest, y).start;
                self.data.copy_within(from, to);
            }
        }
        Ok(())
    }

    /// Resize the canvas, preserving top-left content.
    ///
    /// Area revealed by growth is filled with opaque black.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        let mut new = Canvas::new(width, height);
        let copy_w = self.width.min(width) as usize;
        let copy_h = self.height.min(height) as usize;
        let old_stride = self.width as usize * 4;
        let new_stride = width as usize * 4;
        for y in 0..copy_h {
            let src = y * old_stride;
            let dst = y * new_stride;
            new.data[dst..dst + copy_w * 4].copy_from_slice(&self.data[src..src + copy_w * 4]);
        }
        *self = new;
    }
}
