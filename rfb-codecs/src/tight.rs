//! Tight encoding: fill, JPEG, and zlib-compressed basic modes with
//! copy/palette/gradient filters.
//!
//! Every rectangle opens with a compression-control byte `ccb`:
//!
//! - bits 0..3: reset decompression stream 0..3 before decoding
//! - bits 4..7: operation. `0x8` fill, `0x9` JPEG, `0xA` Tight-PNG
//!   (not implemented here), low values basic compression where bits 4..5
//!   select the zlib stream and bit 6 announces an explicit filter byte.
//!
//! Basic-mode payloads shorter than 12 bytes travel literally; longer ones
//! are a compact length followed by zlib data that must inflate to exactly
//! the expected count. The four zlib streams keep their sliding-window
//! history across rectangles until the wire resets them.

use crate::pixels::{read_tight_pixel, rgba_from_value, DecodeContext};
use flate2::{Decompress, FlushDecompress};
use rfb_pixels::Canvas;
use rfb_wire::messages::Rectangle;
use rfb_wire::{RfbError, RfbInStream, RfbOutStream, Result};
use tokio::io::{AsyncRead, AsyncWrite};

const OP_FILL: u8 = 0x08;
const OP_JPEG: u8 = 0x09;
const OP_PNG: u8 = 0x0A;

const EXPLICIT_FILTER: u8 = 0x40;
const FILTER_COPY: u8 = 0;
const FILTER_PALETTE: u8 = 1;
const FILTER_GRADIENT: u8 = 2;

/// Payloads below this size are never zlib-compressed.
const MIN_BYTES_TO_COMPRESS: usize = 12;

/// Compact lengths are only defined up to ~4 MB.
const MAX_COMPACT_LENGTH: usize = 1 << 22;

/// Read a Tight compact length: 1-3 bytes of little-endian 7-bit groups
/// with a continuation bit in the MSB; the third byte carries 8 bits.
pub async fn read_compact_length<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
) -> Result<usize> {
    let b0 = stream.read_u8().await?;
    let mut len = (b0 & 0x7F) as usize;
    if b0 & 0x80 == 0 {
        return Ok(len);
    }
    let b1 = stream.read_u8().await?;
    len |= ((b1 & 0x7F) as usize) << 7;
    if b1 & 0x80 == 0 {
        return Ok(len);
    }
    let b2 = stream.read_u8().await?;
    len |= (b2 as usize) << 14;
    Ok(len)
}

/// Write a Tight compact length. Values must stay below 2^22.
pub fn write_compact_length<W: AsyncWrite + Unpin>(stream: &mut RfbOutStream<W>, mut len: usize) {
    debug_assert!(len < MAX_COMPACT_LENGTH);
    if len < 0x80 {
        stream.write_u8(len as u8);
        return;
    }
    stream.write_u8((len & 0x7F) as u8 | 0x80);
    len >>= 7;
    if len < 0x80 {
        stream.write_u8(len as u8);
        return;
    }
    stream.write_u8((len & 0x7F) as u8 | 0x80);
    stream.write_u8((len >> 7) as u8);
}

/// Decoder for Tight. Owns the four persistent zlib streams.
pub struct TightDecoder {
    streams: [Option<Decompress>; 4],
}

impl Default for TightDecoder {
    fn default() -> Self {
        Self {
            streams: [None, None, None, None],
        }
    }
}

impl TightDecoder {
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

        let ccb = stream.read_u8().await?;
        for i in 0..4 {
            if ccb & (1 << i) != 0 {
                tracing::debug!(stream = i, "tight: zlib stream reset requested");
                self.streams[i] = None;
            }
        }

        let op = ccb >> 4;
        match op {
            OP_FILL => self.decode_fill(stream, rect, ctx, canvas).await,
            OP_JPEG => self.decode_jpeg(stream, rect, ctx, canvas).await,
            OP_PNG => Err(RfbError::unsupported(
                "Tight-PNG sub-encoding not implemented",
            )),
            op if op > OP_JPEG => Err(RfbError::protocol(format!(
                "invalid tight operation {:#x} (ccb={:#04x})",
                op, ccb
            ))),
            _ => self.decode_basic(stream, rect, ctx, canvas, ccb).await,
        }
    }

    /// Fill: one TPIXEL paints the whole rectangle.
    async fn decode_fill<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        ctx: &DecodeContext<'_>,
        canvas: &mut Canvas,
    ) -> Result<()> {
        let rgba = read_tight_pixel(stream, ctx).await?;
        canvas
            .fill_rect(rect.to_rect(), rgba)
            .map_err(|e| RfbError::protocol(e.to_string()))
    }

    /// JPEG: compact length plus that many JPEG bytes, decoded to RGB.
    async fn decode_jpeg<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        _ctx: &DecodeContext<'_>,
        canvas: &mut Canvas,
    ) -> Result<()> {
        let len = read_compact_length(stream).await?;
        let mut jpeg = vec![0u8; len];
        stream.read_bytes(&mut jpeg).await?;

        let mut decoder = jpeg_decoder::Decoder::new(std::io::Cursor::new(&jpeg));
        let pixels = decoder
            .decode()
            .map_err(|e| RfbError::protocol(format!("tight: JPEG decode failed: {}", e)))?;
        let info = decoder
            .info()
            .ok_or_else(|| RfbError::protocol("tight: JPEG decoder reported no metadata"))?;

        if info.width != rect.width || info.height != rect.height {
            return Err(RfbError::protocol(format!(
                "tight: JPEG is {}x{} but rectangle is {}x{}",
                info.width, info.height, rect.width, rect.height
            )));
        }
        if info.pixel_format != jpeg_decoder::PixelFormat::RGB24 {
            return Err(RfbError::unsupported(format!(
                "tight: JPEG pixel format {:?}",
                info.pixel_format
            )));
        }

        let mut rgba = Vec::with_capacity(pixels.len() / 3 * 4);
        for rgb in pixels.chunks_exact(3) {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 0xFF]);
        }
        canvas
            .image_rect(rect.to_rect(), &rgba, 0)
            .map_err(|e| RfbError::protocol(e.to_string()))
    }

    /// Basic compression: optional filter, then literal or zlib payload.
    async fn decode_basic<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        ctx: &DecodeContext<'_>,
        canvas: &mut Canvas,
        ccb: u8,
    ) -> Result<()> {
        let stream_id = ((ccb >> 4) & 0x3) as usize;
        let filter = if ccb & EXPLICIT_FILTER != 0 {
            stream.read_u8().await?
        } else {
            FILTER_COPY
        };

        let width = rect.width as usize;
        let height = rect.height as usize;
        let tpx = ctx.pixel_format.tight_bytes_per_pixel() as usize;

        match filter {
            FILTER_COPY => {
                let data = self
                    .read_payload(stream, stream_id, width * height * tpx)
                    .await?;
                let rgba = pixels_to_rgba(&data, tpx, ctx)?;
                canvas
                    .image_rect(rect.to_rect(), &rgba, 0)
                    .map_err(|e| RfbError::protocol(e.to_string()))
            }
            FILTER_PALETTE => {
                let count = stream.read_u8().await? as usize + 1;
                if count < 2 {
                    return Err(RfbError::protocol("tight: palette of fewer than 2 colors"));
                }
                let mut palette_wire = vec![0u8; count * tpx];
                stream.read_bytes(&mut palette_wire).await?;
                let palette: Vec<[u8; 4]> = pixels_to_rgba(&palette_wire, tpx, ctx)?
                    .chunks_exact(4)
                    .map(|c| [c[0], c[1], c[2], c[3]])
                    .collect();

                let row_stride = if count == 2 { width.div_ceil(8) } else { width };
                let data = self
                    .read_payload(stream, stream_id, row_stride * height)
                    .await?;

                let mut rgba = Vec::with_capacity(width * height * 4);
                for y in 0..height {
                    let row = &data[y * row_stride..(y + 1) * row_stride];
                    for x in 0..width {
                        let index = if count == 2 {
                            ((row[x / 8] >> (7 - x % 8)) & 1) as usize
                        } else {
                            row[x] as usize
                        };
                        if index >= count {
                            return Err(RfbError::protocol(format!(
                                "tight: palette index {} out of range ({} colors)",
                                index, count
                            )));
                        }
                        rgba.extend_from_slice(&palette[index]);
                    }
                }
                canvas
                    .image_rect(rect.to_rect(), &rgba, 0)
                    .map_err(|e| RfbError::protocol(e.to_string()))
            }
            FILTER_GRADIENT => {
                if !ctx.pixel_format.is_compact_24() {
                    return Err(RfbError::unsupported(
                        "tight: gradient filter outside the compact 24-bit format",
                    ));
                }
                let data = self
                    .read_payload(stream, stream_id, width * height * 3)
                    .await?;
                let rgba = apply_gradient(&data, width, height);
                canvas
                    .image_rect(rect.to_rect(), &rgba, 0)
                    .map_err(|e| RfbError::protocol(e.to_string()))
            }
            other => Err(RfbError::protocol(format!(
                "tight: unknown filter id {}",
                other
            ))),
        }
    }

    /// Read a basic-mode payload: literal when below the compression
    /// threshold, otherwise compact length plus zlib data.
    async fn read_payload<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        stream_id: usize,
        size: usize,
    ) -> Result<Vec<u8>> {
        if size < MIN_BYTES_TO_COMPRESS {
            let mut data = vec![0u8; size];
            stream.read_bytes(&mut data).await?;
            return Ok(data);
        }

        let compressed_len = read_compact_length(stream).await?;
        let mut compressed = vec![0u8; compressed_len];
        stream.read_bytes(&mut compressed).await?;
        self.decompress(stream_id, &compressed, size)
    }

    /// Inflate on the persistent stream, insisting on an exact output count.
    fn decompress(&mut self, stream_id: usize, input: &[u8], expected: usize) -> Result<Vec<u8>> {
        let inflater = self.streams[stream_id].get_or_insert_with(|| Decompress::new(true));

        let mut out = vec![0u8; expected];
        let mut in_pos = 0;
        let mut out_pos = 0;
        while in_pos < input.len() && out_pos < expected {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress(&input[in_pos..], &mut out[out_pos..], FlushDecompress::Sync)
                .map_err(|e| {
                    RfbError::decompression(format!("tight: zlib stream {}: {}", stream_id, e))
                })?;
            in_pos += (inflater.total_in() - before_in) as usize;
            out_pos += (inflater.total_out() - before_out) as usize;

            match status {
                flate2::Status::StreamEnd => break,
                _ if inflater.total_in() == before_in && inflater.total_out() == before_out => {
                    break
                }
                _ => {}
            }
        }

        if out_pos != expected {
            return Err(RfbError::decompression(format!(
                "tight: zlib stream {} produced {} bytes, expected {}",
                stream_id, out_pos, expected
            )));
        }
        Ok(out)
    }
}

/// Convert wire pixels (TPIXEL or generic form) to an RGBA buffer.
fn pixels_to_rgba(data: &[u8], tpx: usize, ctx: &DecodeContext<'_>) -> Result<Vec<u8>> {
    let mut rgba = Vec::with_capacity(data.len() / tpx * 4);
    if tpx == 3 {
        for rgb in data.chunks_exact(3) {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 0xFF]);
        }
    } else {
        for pixel in data.chunks_exact(tpx) {
            rgba.extend_from_slice(&rgba_from_value(ctx.pixel_format.assemble(pixel), ctx)?);
        }
    }
    Ok(rgba)
}

/// Undo the gradient predictor over RGB residuals.
///
/// `predicted = clamp(above + left - upper_left, 0, 255)` per channel, with
/// implicit zeros above row 0 and left of column 0; the actual value is the
/// prediction plus the residual mod 256.
fn apply_gradient(residuals: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut prev_row = vec![0u8; width * 3];
    let mut this_row = vec![0u8; width * 3];
    let mut rgba = Vec::with_capacity(width * height * 4);

    for y in 0..height {
        for x in 0..width {
            for c in 0..3 {
                let left = if x > 0 {
                    this_row[(x - 1) * 3 + c] as i16
                } else {
                    0
                };
                let above = prev_row[x * 3 + c] as i16;
                let upper_left = if x > 0 {
                    prev_row[(x - 1) * 3 + c] as i16
                } else {
                    0
                };
                let predicted = (above + left - upper_left).clamp(0, 255) as u8;
                this_row[x * 3 + c] = predicted.wrapping_add(residuals[(y * width + x) * 3 + c]);
            }
            rgba.extend_from_slice(&[
                this_row[x * 3],
                this_row[x * 3 + 1],
                this_row[x * 3 + 2],
                0xFF,
            ]);
        }
        std::mem::swap(&mut prev_row, &mut this_row);
    }
    rgba
}
