//! Pixel readers shared by the codecs.
//!
//! A decoded pixel is always canonical RGBA. True-color formats extract and
//! scale channels per the negotiated [`PixelFormat`]; colormap formats index
//! the session [`Colormap`]. The Tight and ZRLE compact 3-byte forms
//! (TPIXEL/CPIXEL) are handled here as well so the codecs stay byte-layout
//! agnostic.

use rfb_pixels::{Colormap, PixelFormat};
use rfb_wire::{RfbError, RfbInStream, Result};
use tokio::io::AsyncRead;

/// Per-connection context a codec decodes against.
///
/// Borrowed from the connection for the duration of one rectangle.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub pixel_format: &'a PixelFormat,
    pub colormap: &'a Colormap,
}

/// Convert an assembled pixel value to RGBA under the context's format.
pub fn rgba_from_value(value: u32, ctx: &DecodeContext<'_>) -> Result<[u8; 4]> {
    if ctx.pixel_format.true_color {
        return Ok(ctx.pixel_format.rgba_from_value(value));
    }
    if ctx.colormap.is_empty() {
        return Err(RfbError::unsupported(
            "colormap pixel format but no colormap entries were set",
        ));
    }
    let index = u16::try_from(value)
        .map_err(|_| RfbError::protocol(format!("colormap index {} out of range", value)))?;
    ctx.colormap
        .lookup(index)
        .ok_or_else(|| RfbError::protocol(format!("colormap index {} was never defined", index)))
}

/// Read one pixel in the generic wire form (`bytes_per_pixel` bytes in the
/// negotiated byte order) and convert to RGBA.
pub async fn read_pixel<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    ctx: &DecodeContext<'_>,
) -> Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    let bpp = ctx.pixel_format.bytes_per_pixel() as usize;
    stream.read_bytes(&mut buf[..bpp]).await?;
    rgba_from_value(ctx.pixel_format.assemble(&buf[..bpp]), ctx)
}

/// Read one pixel in the Tight form: three literal R, G, B bytes when the
/// format qualifies for the compact 24-bit shortcut, the generic form
/// otherwise.
pub async fn read_tight_pixel<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    ctx: &DecodeContext<'_>,
) -> Result<[u8; 4]> {
    if ctx.pixel_format.is_compact_24() {
        let mut rgb = [0u8; 3];
        stream.read_bytes(&mut rgb).await?;
        Ok([rgb[0], rgb[1], rgb[2], 0xFF])
    } else {
        read_pixel(stream, ctx).await
    }
}

/// In-memory cursor over decompressed codec data (ZRLE tiles).
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            return Err(RfbError::protocol("tile data ended short of 1 byte"));
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_exact(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count > self.data.len() {
            return Err(RfbError::protocol(format!(
                "tile data ended short: need {} bytes, have {}",
                count,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }
}

/// Read one CPIXEL from decompressed ZRLE data.
///
/// Under the compact 24-bit condition only the three significant bytes of
/// the pixel value travel: the low three for little-endian formats, the
/// high three for big-endian.
pub fn read_cpixel(cursor: &mut ByteCursor<'_>, ctx: &DecodeContext<'_>) -> Result<[u8; 4]> {
    let pf = ctx.pixel_format;
    let value = if pf.is_compact_24() {
        let b = cursor.read_exact(3)?;
        if pf.big_endian {
            (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
        } else {
            b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16
        }
    } else {
        let bpp = pf.bytes_per_pixel() as usize;
        pf.assemble(cursor.read_exact(bpp)?)
    };
    rgba_from_value(value, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ctx<'a>(pf: &'a PixelFormat, map: &'a Colormap) -> DecodeContext<'a> {
        DecodeContext {
            pixel_format: pf,
            colormap: map,
        }
    }

    #[tokio::test]
    async fn generic_pixel_little_endian_rgb888() {
        let pf = PixelFormat::rgb888();
        let map = Colormap::new();
        // Value 0x00112233 little-endian on the wire.
        let mut stream = RfbInStream::new(Cursor::new(vec![0x33, 0x22, 0x11, 0x00]));
        let rgba = read_pixel(&mut stream, &ctx(&pf, &map)).await.unwrap();
        assert_eq!(rgba, [0x11, 0x22, 0x33, 0xFF]);
    }

    #[tokio::test]
    async fn generic_pixel_rgb565_scales() {
        let pf = PixelFormat::rgb565();
        let map = Colormap::new();
        // 0xFFFF = white in RGB565, little-endian.
        let mut stream = RfbInStream::new(Cursor::new(vec![0xFF, 0xFF]));
        let rgba = read_pixel(&mut stream, &ctx(&pf, &map)).await.unwrap();
        assert_eq!(rgba, [255, 255, 255, 255]);
    }

    #[tokio::test]
    async fn tight_pixel_compact_reads_three_bytes() {
        let pf = PixelFormat::rgb888();
        let map = Colormap::new();
        let mut stream = RfbInStream::new(Cursor::new(vec![0x12, 0x34, 0x56, 0xAA]));
        let rgba = read_tight_pixel(&mut stream, &ctx(&pf, &map)).await.unwrap();
        assert_eq!(rgba, [0x12, 0x34, 0x56, 0xFF]);
        // The fourth byte must still be on the stream.
        assert_eq!(stream.read_u8().await.unwrap(), 0xAA);
    }

    #[tokio::test]
    async fn tight_pixel_non_compact_falls_back() {
        let pf = PixelFormat::rgb565();
        let map = Colormap::new();
        let mut stream = RfbInStream::new(Cursor::new(vec![0x00, 0xF8])); // red in 565 LE
        let rgba = read_tight_pixel(&mut stream, &ctx(&pf, &map)).await.unwrap();
        assert_eq!(rgba, [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn colormap_pixel_lookup() {
        let mut pf = PixelFormat::rgb888();
        pf.bits_per_pixel = 8;
        pf.depth = 8;
        pf.true_color = false;

        let mut map = Colormap::new();
        map.set_entries(5, &[[0xFFFF, 0x8000, 0]]).unwrap();

        let mut stream = RfbInStream::new(Cursor::new(vec![5u8]));
        let rgba = read_pixel(&mut stream, &ctx(&pf, &map)).await.unwrap();
        assert_eq!(rgba, [0xFF, 0x80, 0x00, 0xFF]);
    }

    #[tokio::test]
    async fn colormap_empty_is_unsupported() {
        let mut pf = PixelFormat::rgb888();
        pf.bits_per_pixel = 8;
        pf.depth = 8;
        pf.true_color = false;
        let map = Colormap::new();

        let mut stream = RfbInStream::new(Cursor::new(vec![5u8]));
        let err = read_pixel(&mut stream, &ctx(&pf, &map)).await.unwrap_err();
        assert!(matches!(err, RfbError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn colormap_undefined_index_is_protocol_violation() {
        let mut pf = PixelFormat::rgb888();
        pf.bits_per_pixel = 8;
        pf.depth = 8;
        pf.true_color = false;
        let mut map = Colormap::new();
        map.set_entries(0, &[[1, 2, 3]]).unwrap();

        let mut stream = RfbInStream::new(Cursor::new(vec![9u8]));
        let err = read_pixel(&mut stream, &ctx(&pf, &map)).await.unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[test]
    fn cpixel_little_and_big_endian() {
        let map = Colormap::new();

        let le = PixelFormat::rgb888();
        let mut cursor = ByteCursor::new(&[0x33, 0x22, 0x11]);
        let rgba = read_cpixel(&mut cursor, &ctx(&le, &map)).unwrap();
        assert_eq!(rgba, [0x11, 0x22, 0x33, 0xFF]);

        let mut be = PixelFormat::rgb888();
        be.big_endian = true;
        let mut cursor = ByteCursor::new(&[0x11, 0x22, 0x33]);
        let rgba = read_cpixel(&mut cursor, &ctx(&be, &map)).unwrap();
        assert_eq!(rgba, [0x11, 0x22, 0x33, 0xFF]);
    }

    #[test]
    fn cursor_eof_reports_protocol_error() {
        let mut cursor = ByteCursor::new(&[1, 2]);
        assert!(cursor.read_exact(3).is_err());
        cursor.read_exact(2).unwrap();
        assert!(cursor.read_u8().is_err());
    }
}
