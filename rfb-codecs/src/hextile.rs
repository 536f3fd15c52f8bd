//! Hextile encoding: 16x16 tiles with per-tile sub-encodings.
//!
//! The rectangle is walked in 16x16 tiles, row-major, with edge tiles
//! clipped. Each tile opens with a mask byte:
//!
//! - `RAW` (0x01): the tile is uncompressed pixels; all other bits ignored
//! - `BACKGROUND_SPECIFIED` (0x02): a new background pixel follows
//! - `FOREGROUND_SPECIFIED` (0x04): a new foreground pixel follows
//! - `ANY_SUBRECTS` (0x08): a count byte plus that many sub-rectangles
//! - `SUBRECTS_COLOURED` (0x10): each sub-rectangle carries its own pixel
//!
//! Sub-rectangle geometry packs into two bytes: `x << 4 | y` and
//! `(w - 1) << 4 | (h - 1)`. Background and foreground persist across tiles
//! within a single rectangle only.

use crate::pixels::{read_pixel, DecodeContext};
use rfb_core::Rect;
use rfb_pixels::Canvas;
use rfb_wire::messages::Rectangle;
use rfb_wire::{RfbError, RfbInStream, Result};
use tokio::io::AsyncRead;

const RAW: u8 = 1 << 0;
const BACKGROUND_SPECIFIED: u8 = 1 << 1;
const FOREGROUND_SPECIFIED: u8 = 1 << 2;
const ANY_SUBRECTS: u8 = 1 << 3;
const SUBRECTS_COLOURED: u8 = 1 << 4;

/// Hextile tile edge; rectangle edge tiles may be smaller.
const TILE_SIZE: u16 = 16;

/// Decoder for Hextile.
#[derive(Debug, Default)]
pub struct HextileDecoder;

impl HextileDecoder {
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

        // Background/foreground carry across tiles of this rectangle only.
        let mut background: Option<[u8; 4]> = None;
        let mut foreground: Option<[u8; 4]> = None;

        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = TILE_SIZE.min(rect.height - ty);
            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = TILE_SIZE.min(rect.width - tx);
                let abs_x = rect.x as i32 + tx as i32;
                let abs_y = rect.y as i32 + ty as i32;

                let mask = stream.read_u8().await?;

                if mask & RAW != 0 {
                    decode_raw_tile(
                        stream,
                        ctx,
                        canvas,
                        Rect::new(abs_x, abs_y, tile_w as u32, tile_h as u32),
                    )
                    .await?;
                    tx += TILE_SIZE;
                    continue;
                }

                if mask & BACKGROUND_SPECIFIED != 0 {
                    background = Some(read_pixel(stream, ctx).await?);
                }
                let bg = background.ok_or_else(|| {
                    RfbError::protocol(format!(
                        "hextile tile at ({}, {}) needs a background but none was ever sent",
                        tx, ty
                    ))
                })?;

                canvas
                    .fill_rect(Rect::new(abs_x, abs_y, tile_w as u32, tile_h as u32), bg)
                    .map_err(|e| RfbError::protocol(e.to_string()))?;

                if mask & FOREGROUND_SPECIFIED != 0 {
                    foreground = Some(read_pixel(stream, ctx).await?);
                }

                if mask & ANY_SUBRECTS != 0 {
                    let count = stream.read_u8().await?;
                    let coloured = mask & SUBRECTS_COLOURED != 0;

                    if count > 0 && !coloured && foreground.is_none() {
                        return Err(RfbError::protocol(format!(
                            "hextile tile at ({}, {}) has plain subrects but no foreground",
                            tx, ty
                        )));
                    }

                    for _ in 0..count {
                        let color = if coloured {
                            read_pixel(stream, ctx).await?
                        } else {
                            foreground.unwrap()
                        };

                        let xy = stream.read_u8().await?;
                        let wh = stream.read_u8().await?;
                        let sx = (xy >> 4) as u16;
                        let sy = (xy & 0x0F) as u16;
                        let sw = ((wh >> 4) as u16) + 1;
                        let sh = ((wh & 0x0F) as u16) + 1;

                        if sx + sw > tile_w || sy + sh > tile_h {
                            return Err(RfbError::protocol(format!(
                                "hextile subrect {}x{}+{}+{} outside {}x{} tile at ({}, {})",
                                sw, sh, sx, sy, tile_w, tile_h, tx, ty
                            )));
                        }

                        canvas
                            .fill_rect(
                                Rect::new(
                                    abs_x + sx as i32,
                                    abs_y + sy as i32,
                                    sw as u32,
                                    sh as u32,
                                ),
                                color,
                            )
                            .map_err(|e| RfbError::protocol(e.to_string()))?;
                    }
                }

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        Ok(())
    }
}

/// A RAW tile: tile_w * tile_h wire pixels, row-major.
async fn decode_raw_tile<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    ctx: &DecodeContext<'_>,
    canvas: &mut Canvas,
    tile: Rect,
) -> Result<()> {
    let count = tile.width as usize * tile.height as usize;
    let mut rgba = Vec::with_capacity(count * 4);
    for _ in 0..count {
        rgba.extend_from_slice(&read_pixel(stream, ctx).await?);
    }
    canvas
        .image_rect(tile, &rgba, 0)
        .map_err(|e| RfbError::protocol(e.to_string()))
}
