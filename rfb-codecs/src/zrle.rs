//! ZRLE encoding: zlib-wrapped run-length encoding in 64x64 tiles.
//!
//! Each rectangle carries a `u32` length and that many bytes belonging to
//! one continuous zlib stream whose history spans the whole session; only
//! the first rectangle contains a zlib header. The inflated data is tiles in
//! row-major order, each opened by a sub-encoding byte:
//!
//! - `0`: raw CPIXELs
//! - `1`: solid fill, one CPIXEL
//! - `2..=16`: packed palette at 1, 2 or 4 bits per pixel
//! - `17..=127`: reserved
//! - `128`: plain RLE of `(CPIXEL, run)` pairs
//! - `129`: reserved
//! - `130..=255`: palette RLE with `sub - 128` entries
//!
//! A run length is `1 +` the sum of bytes read until one is not `0xFF`.
//! Runs may never overrun the tile.

use crate::pixels::{read_cpixel, ByteCursor, DecodeContext};
use flate2::{Decompress, FlushDecompress};
use rfb_core::Rect;
use rfb_pixels::Canvas;
use rfb_wire::messages::Rectangle;
use rfb_wire::{RfbError, RfbInStream, Result};
use tokio::io::AsyncRead;

/// ZRLE tile edge; rectangle edge tiles are clipped.
const TILE_SIZE: u16 = 64;

/// Decoder for ZRLE. Owns the session-long zlib stream.
pub struct ZrleDecoder {
    inflater: Decompress,
}

impl Default for ZrleDecoder {
    fn default() -> Self {
        Self {
            inflater: Decompress::new(true),
        }
    }
}

impl ZrleDecoder {
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

        let compressed_len = stream.read_u32().await? as usize;
        let mut compressed = vec![0u8; compressed_len];
        stream.read_bytes(&mut compressed).await?;

        let data = self.inflate(&compressed)?;
        tracing::debug!(
            compressed = compressed_len,
            inflated = data.len(),
            "zrle: rectangle payload"
        );

        let mut cursor = ByteCursor::new(&data);
        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = TILE_SIZE.min(rect.height - ty);
            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = TILE_SIZE.min(rect.width - tx);
                let tile = Rect::new(
                    rect.x as i32 + tx as i32,
                    rect.y as i32 + ty as i32,
                    tile_w as u32,
                    tile_h as u32,
                );
                decode_tile(&mut cursor, tile, ctx, canvas)?;
                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        if cursor.remaining() > 0 {
            return Err(RfbError::protocol(format!(
                "zrle: {} trailing bytes after the last tile",
                cursor.remaining()
            )));
        }
        Ok(())
    }

    /// Feed one rectangle's bytes to the persistent inflater.
    fn inflate(&mut self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut in_pos = 0;

        while in_pos < compressed.len() {
            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(&compressed[in_pos..], &mut chunk, FlushDecompress::Sync)
                .map_err(|e| RfbError::decompression(format!("zrle: zlib: {}", e)))?;

            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            in_pos += consumed;
            out.extend_from_slice(&chunk[..produced]);

            match status {
                flate2::Status::StreamEnd => break,
                _ if consumed == 0 && produced == 0 => {
                    return Err(RfbError::decompression(
                        "zrle: zlib made no progress on rectangle data",
                    ))
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Run length: `1 +` the sum of bytes up to and including the first
/// non-0xFF byte.
fn read_run_length(cursor: &mut ByteCursor<'_>) -> Result<usize> {
    let mut length = 1usize;
    loop {
        let byte = cursor.read_u8()?;
        length += byte as usize;
        if byte != 0xFF {
            return Ok(length);
        }
    }
}

fn read_palette(
    cursor: &mut ByteCursor<'_>,
    size: usize,
    ctx: &DecodeContext<'_>,
) -> Result<Vec<[u8; 4]>> {
    let mut palette = Vec::with_capacity(size);
    for _ in 0..size {
        palette.push(read_cpixel(cursor, ctx)?);
    }
    Ok(palette)
}

fn blit_tile(tile: Rect, rgba: &[u8], canvas: &mut Canvas) -> Result<()> {
    canvas
        .image_rect(tile, rgba, 0)
        .map_err(|e| RfbError::protocol(e.to_string()))
}

fn decode_tile(
    cursor: &mut ByteCursor<'_>,
    tile: Rect,
    ctx: &DecodeContext<'_>,
    canvas: &mut Canvas,
) -> Result<()> {
    let area = tile.width as usize * tile.height as usize;
    let sub = cursor.read_u8()?;

    match sub {
        0 => {
            let mut rgba = Vec::with_capacity(area * 4);
            for _ in 0..area {
                rgba.extend_from_slice(&read_cpixel(cursor, ctx)?);
            }
            blit_tile(tile, &rgba, canvas)
        }
        1 => {
            let color = read_cpixel(cursor, ctx)?;
            canvas
                .fill_rect(tile, color)
                .map_err(|e| RfbError::protocol(e.to_string()))
        }
        2..=16 => {
            let size = sub as usize;
            let palette = read_palette(cursor, size, ctx)?;
            let bits = match size {
                2 => 1,
                3..=4 => 2,
                _ => 4,
            };

            let width = tile.width as usize;
            let mut rgba = Vec::with_capacity(area * 4);
            for _ in 0..tile.height {
                let row_bytes = (width * bits).div_ceil(8);
                let row = cursor.read_exact(row_bytes)?;
                let mut bit_pos = 0usize;
                for _ in 0..width {
                    let byte = row[bit_pos / 8];
                    let shift = 8 - bits - (bit_pos % 8);
                    let index = ((byte >> shift) & ((1 << bits) - 1)) as usize;
                    if index >= size {
                        return Err(RfbError::protocol(format!(
                            "zrle: packed palette index {} out of range ({} entries)",
                            index, size
                        )));
                    }
                    rgba.extend_from_slice(&palette[index]);
                    bit_pos += bits;
                }
            }
            blit_tile(tile, &rgba, canvas)
        }
        128 => {
            let mut rgba = Vec::with_capacity(area * 4);
            let mut count = 0usize;
            while count < area {
                let color = read_cpixel(cursor, ctx)?;
                let run = read_run_length(cursor)?;
                if count + run > area {
                    return Err(RfbError::protocol(format!(
                        "zrle: RLE run of {} overruns tile ({} of {} pixels already filled)",
                        run, count, area
                    )));
                }
                for _ in 0..run {
                    rgba.extend_from_slice(&color);
                }
                count += run;
            }
            blit_tile(tile, &rgba, canvas)
        }
        130..=255 => {
            let size = (sub - 128) as usize;
            let palette = read_palette(cursor, size, ctx)?;

            let mut rgba = Vec::with_capacity(area * 4);
            let mut count = 0usize;
            while count < area {
                let code = cursor.read_u8()?;
                let (index, run) = if code & 0x80 == 0 {
                    (code as usize, 1)
                } else {
                    ((code & 0x7F) as usize, read_run_length(cursor)?)
                };
                if index >= size {
                    return Err(RfbError::protocol(format!(
                        "zrle: palette RLE index {} out of range ({} entries)",
                        index, size
                    )));
                }
                if count + run > area {
                    return Err(RfbError::protocol(format!(
                        "zrle: palette RLE run of {} overruns tile area {}",
                        run, area
                    )));
                }
                for _ in 0..run {
                    rgba.extend_from_slice(&palette[index]);
                }
                count += run;
            }
            blit_tile(tile, &rgba, canvas)
        }
        // 17..=127 and 129 carry no meaning in ZRLE.
        other => Err(RfbError::protocol(format!(
            "zrle: reserved sub-encoding {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use rfb_pixels::{Colormap, PixelFormat};
    use std::io::{Cursor, Write};

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn decode_ctx<'a>(pf: &'a PixelFormat, map: &'a Colormap) -> DecodeContext<'a> {
        DecodeContext {
            pixel_format: pf,
            colormap: map,
        }
    }

    /// CPIXEL for little-endian rgb888: low three value bytes, B,G,R order.
    fn cpixel(r: u8, g: u8, b: u8) -> [u8; 3] {
        [b, g, r]
    }

    fn frame(tile_data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(tile_data).unwrap();
        let compressed = enc.finish().unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        out.extend_from_slice(&compressed);
        out
    }

    async fn decode(
        decoder: &mut ZrleDecoder,
        data: Vec<u8>,
        rect: Rectangle,
        canvas: &mut Canvas,
    ) -> Result<()> {
        let pf = PixelFormat::rgb888();
        let map = Colormap::new();
        let mut stream = RfbInStream::new(Cursor::new(data));
        decoder
            .decode(&mut stream, &rect, &decode_ctx(&pf, &map), canvas)
            .await
    }

    fn rect(w: u16, h: u16) -> Rectangle {
        Rectangle {
            x: 0,
            y: 0,
            width: w,
            height: h,
            encoding: 16,
        }
    }

    #[tokio::test]
    async fn solid_tile() {
        let mut canvas = Canvas::new(3, 3);
        let mut tile = vec![1u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));

        ZrleDecoder::default()
            .decode(
                &mut RfbInStream::new(Cursor::new(frame(&tile))),
                &rect(3, 3),
                &decode_ctx(&PixelFormat::rgb888(), &Colormap::new()),
                &mut canvas,
            )
            .await
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(2, 2), Some(RED));
    }

    #[tokio::test]
    async fn raw_tile() {
        let mut canvas = Canvas::new(2, 2);
        let mut tile = vec![0u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));
        tile.extend_from_slice(&cpixel(0, 255, 0));
        tile.extend_from_slice(&cpixel(0, 0, 255));
        tile.extend_from_slice(&cpixel(9, 9, 9));

        let mut decoder = ZrleDecoder::default();
        decode(&mut decoder, frame(&tile), rect(2, 2), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(1, 0), Some([0, 255, 0, 255]));
        assert_eq!(canvas.pixel(0, 1), Some(BLUE));
        assert_eq!(canvas.pixel(1, 1), Some([9, 9, 9, 255]));
    }

    #[tokio::test]
    async fn plain_rle_runs() {
        // 3x3 tile: run of 5 red then 4 blue.
        let mut canvas = Canvas::new(3, 3);
        let mut tile = vec![128u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));
        tile.push(4); // 1 + 4 = 5
        tile.extend_from_slice(&cpixel(0, 0, 255));
        tile.push(3); // 1 + 3 = 4

        let mut decoder = ZrleDecoder::default();
        decode(&mut decoder, frame(&tile), rect(3, 3), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.pixel(1, 1), Some(RED)); // 5th pixel
        assert_eq!(canvas.pixel(2, 1), Some(BLUE)); // 6th pixel
        assert_eq!(canvas.pixel(2, 2), Some(BLUE));
    }

    #[tokio::test]
    async fn run_length_arithmetic() {
        // [0xFF, 0xFF, 0x02] = 1 + 255 + 255 + 2 = 513
        let data = [0xFF, 0xFF, 0x02];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(read_run_length(&mut cursor).unwrap(), 513);

        let data = [0x00];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(read_run_length(&mut cursor).unwrap(), 1);
    }

    #[tokio::test]
    async fn rle_run_overrunning_tile_is_rejected() {
        // Full 64x64 tile (area 4096); a run of 1 + 17*255 + 0 = 4336.
        let mut canvas = Canvas::new(64, 64);
        let mut tile = vec![128u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));
        tile.extend_from_slice(&[0xFF; 17]);
        tile.push(0x00);

        let mut decoder = ZrleDecoder::default();
        let err = decode(&mut decoder, frame(&tile), rect(64, 64), &mut canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[tokio::test]
    async fn packed_palette_two_colors() {
        // 8x1 tile, palette [red, blue], bits 10100101.
        let mut canvas = Canvas::new(8, 1);
        let mut tile = vec![2u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));
        tile.extend_from_slice(&cpixel(0, 0, 255));
        tile.push(0xA5);

        let mut decoder = ZrleDecoder::default();
        decode(&mut decoder, frame(&tile), rect(8, 1), &mut canvas)
            .await
            .unwrap();
        let expect = [BLUE, RED, BLUE, RED, RED, BLUE, RED, BLUE];
        for (x, want) in expect.iter().enumerate() {
            assert_eq!(canvas.pixel(x as u32, 0), Some(*want), "pixel {}", x);
        }
    }

    #[tokio::test]
    async fn packed_palette_four_colors_two_bits() {
        // 4x1 tile, 4 colors, indices 0,1,2,3 = 0b00_01_10_11.
        let mut canvas = Canvas::new(4, 1);
        let mut tile = vec![4u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));
        tile.extend_from_slice(&cpixel(0, 255, 0));
        tile.extend_from_slice(&cpixel(0, 0, 255));
        tile.extend_from_slice(&cpixel(255, 255, 255));
        tile.push(0x1B);

        let mut decoder = ZrleDecoder::default();
        decode(&mut decoder, frame(&tile), rect(4, 1), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(1, 0), Some([0, 255, 0, 255]));
        assert_eq!(canvas.pixel(2, 0), Some(BLUE));
        assert_eq!(canvas.pixel(3, 0), Some([255, 255, 255, 255]));
    }

    #[tokio::test]
    async fn palette_rle() {
        // 6x1 tile, palette [red, blue]: red x1, blue x4, red x1.
        let mut canvas = Canvas::new(6, 1);
        let mut tile = vec![130u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));
        tile.extend_from_slice(&cpixel(0, 0, 255));
        tile.push(0); // red, single
        tile.push(0x81); // blue, run follows
        tile.push(3); // 1 + 3 = 4
        tile.push(0); // red, single

        let mut decoder = ZrleDecoder::default();
        decode(&mut decoder, frame(&tile), rect(6, 1), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(1, 0), Some(BLUE));
        assert_eq!(canvas.pixel(4, 0), Some(BLUE));
        assert_eq!(canvas.pixel(5, 0), Some(RED));
    }

    #[tokio::test]
    async fn reserved_subencodings_rejected() {
        for sub in [17u8, 64, 127, 129] {
            let mut canvas = Canvas::new(1, 1);
            let mut decoder = ZrleDecoder::default();
            let err = decode(&mut decoder, frame(&[sub]), rect(1, 1), &mut canvas)
                .await
                .unwrap_err();
            assert!(matches!(err, RfbError::Protocol(_)), "sub {}", sub);
        }
    }

    #[tokio::test]
    async fn multiple_tiles_row_major() {
        // 128x1: two 64x1 tiles, solid red then solid blue.
        let mut canvas = Canvas::new(128, 1);
        let mut tiles = vec![1u8];
        tiles.extend_from_slice(&cpixel(255, 0, 0));
        tiles.push(1);
        tiles.extend_from_slice(&cpixel(0, 0, 255));

        let mut decoder = ZrleDecoder::default();
        decode(&mut decoder, frame(&tiles), rect(128, 1), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.pixel(63, 0), Some(RED));
        assert_eq!(canvas.pixel(64, 0), Some(BLUE));
    }

    #[tokio::test]
    async fn zlib_stream_persists_across_rectangles() {
        // Two rectangles share one zlib stream; the second chunk has no
        // zlib header and only inflates against the first one's state.
        let mut tile_red = vec![1u8];
        tile_red.extend_from_slice(&cpixel(255, 0, 0));
        let mut tile_blue = vec![1u8];
        tile_blue.extend_from_slice(&cpixel(0, 0, 255));

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&tile_red).unwrap();
        enc.flush().unwrap();
        let first_len = enc.get_ref().len();
        enc.write_all(&tile_blue).unwrap();
        let all = enc.flush_finish().unwrap();

        let chunk1 = &all[..first_len];
        let chunk2 = &all[first_len..];

        let wrap = |chunk: &[u8]| {
            let mut out = Vec::new();
            out.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            out.extend_from_slice(chunk);
            out
        };

        let mut canvas = Canvas::new(2, 2);
        let mut decoder = ZrleDecoder::default();
        decode(&mut decoder, wrap(chunk1), rect(2, 2), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), Some(RED));

        decode(&mut decoder, wrap(chunk2), rect(2, 2), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), Some(BLUE));
    }

    #[tokio::test]
    async fn trailing_bytes_are_a_protocol_violation() {
        let mut canvas = Canvas::new(1, 1);
        let mut tile = vec![1u8];
        tile.extend_from_slice(&cpixel(255, 0, 0));
        tile.push(0xEE); // junk after the last tile

        let mut decoder = ZrleDecoder::default();
        let err = decode(&mut decoder, frame(&tile), rect(1, 1), &mut canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }
}
