//! Property tests for wire framing.
//!
//! The parsers must survive arbitrary fragmentation of the byte stream (real
//! networks split reads anywhere) and pixel conversion must round-trip for
//! every representable color.

use super::server::ServerInit;
use super::types::{read_pixel_format, write_pixel_format, Rectangle};
use crate::io::{RfbInStream, RfbOutStream};
use proptest::prelude::*;
use rfb_pixels::PixelFormat;

/// A reader that forces a split at one byte boundary, simulating
/// fragmentation of a TCP stream.
struct FragmentingReader {
    data: Vec<u8>,
    pos: usize,
    boundary: usize,
}

impl FragmentingReader {
    fn new(data: Vec<u8>, boundary: usize) -> Self {
        let boundary = boundary.min(data.len());
        Self {
            data,
            pos: 0,
            boundary,
        }
    }
}

impl tokio::io::AsyncRead for FragmentingReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.pos >= self.data.len() {
            return std::task::Poll::Ready(Ok(()));
        }
        let available = if self.pos < self.boundary {
            (self.boundary - self.pos).min(buf.remaining())
        } else {
            (self.data.len() - self.pos).min(buf.remaining())
        };
        if available == 0 {
            return std::task::Poll::Ready(Ok(()));
        }
        let pos = self.pos;
        buf.put_slice(&self.data[pos..pos + available]);
        self.pos += available;
        std::task::Poll::Ready(Ok(()))
    }
}

fn arbitrary_pixel_format() -> impl Strategy<Value = PixelFormat> {
    prop::sample::select(vec![
        PixelFormat::rgb888(),
        PixelFormat::rgb565(),
        PixelFormat {
            big_endian: true,
            ..PixelFormat::rgb888()
        },
        PixelFormat {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_color: true,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        },
    ])
}

proptest! {
    /// Pixel round-trip: every RGBA color representable in the format
    /// survives encode/decode unchanged.
    #[test]
    fn pixel_round_trip(pf in arbitrary_pixel_format(), r in 0u16..=255, g in 0u16..=255, b in 0u16..=255) {
        // Quantize to what the format can represent, then the quantized
        // color must be a fixed point.
        let quantized = pf.decode_rgba(&pf.encode_rgba([r as u8, g as u8, b as u8, 0xFF]));
        let again = pf.decode_rgba(&pf.encode_rgba(quantized));
        prop_assert_eq!(quantized, again);
    }

    /// ServerInit parses identically regardless of where the stream
    /// fragments.
    #[test]
    fn server_init_survives_fragmentation(
        width in 1u16..=7680,
        height in 1u16..=4320,
        pf in arbitrary_pixel_format(),
        name in "[a-zA-Z0-9 ]{0,64}",
        split in 0usize..64,
    ) {
        let init = ServerInit { width, height, pixel_format: pf, name };

        let mut buf = Vec::new();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let mut out = RfbOutStream::new(&mut buf);
            init.write_to(&mut out);
            out.flush().await.unwrap();
        });

        let reader = FragmentingReader::new(buf, split);
        let parsed = rt.block_on(async {
            let mut inp = RfbInStream::new(reader);
            ServerInit::read_from(&mut inp).await.unwrap()
        });
        prop_assert_eq!(parsed, init);
    }

    /// Rectangle headers and pixel format blocks round-trip byte-exactly.
    #[test]
    fn rectangle_and_format_round_trip(
        x in 0u16..=4096, y in 0u16..=4096,
        w in 0u16..=2048, h in 0u16..=2048,
        enc in prop::sample::select(vec![0i32, 1, 5, 7, 16, -223, -232, -239]),
        pf in arbitrary_pixel_format(),
    ) {
        let rect = Rectangle { x, y, width: w, height: h, encoding: enc };

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (parsed_rect, parsed_pf) = rt.block_on(async {
            let mut buf = Vec::new();
            let mut out = RfbOutStream::new(&mut buf);
            rect.write_to(&mut out);
            write_pixel_format(&mut out, &pf);
            out.flush().await.unwrap();

            let mut inp = RfbInStream::new(std::io::Cursor::new(buf));
            let r = Rectangle::read_from(&mut inp).await.unwrap();
            let f = read_pixel_format(&mut inp).await.unwrap();
            (r, f)
        });
        prop_assert_eq!(parsed_rect, rect);
        prop_assert_eq!(parsed_pf, pf);
    }
}
