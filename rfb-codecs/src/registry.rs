//! The codec registry: encoding tag to decoder dispatch.
//!
//! Codecs are a tagged union so that stateful variants (Tight, ZRLE) own
//! their decompressors outright and are borrowed mutably per rectangle; the
//! registry holds one instance of each negotiated codec for the lifetime of
//! the connection. Pseudo-encodings report their metadata through
//! [`DecodedRect`] rather than writing pixels.

use crate::copyrect::CopyRectDecoder;
use crate::hextile::HextileDecoder;
use crate::pixels::DecodeContext;
use crate::pseudo::{CursorDecoder, CursorShape};
use crate::raw::RawDecoder;
use crate::tight::TightDecoder;
use crate::zrle::ZrleDecoder;
use rfb_pixels::Canvas;
use rfb_wire::messages::{
    Rectangle, ENCODING_COPY_RECT, ENCODING_CURSOR, ENCODING_DESKTOP_SIZE, ENCODING_HEXTILE,
    ENCODING_POINTER_POS, ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE,
};
use rfb_wire::{RfbError, RfbInStream, Result};
use std::collections::HashMap;
use tokio::io::AsyncRead;

/// Outcome of decoding one rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRect {
    /// Pixels were written to the canvas.
    Framebuffer,
    /// A new client-side cursor image.
    CursorShape(CursorShape),
    /// The server moved the pointer.
    CursorPosition { x: u16, y: u16 },
    /// The framebuffer changed size; the caller resizes the canvas between
    /// rectangles.
    DesktopSize { width: u16, height: u16 },
}

/// One decoder, tagged by the encoding it handles.
pub enum Codec {
    Raw(RawDecoder),
    CopyRect(CopyRectDecoder),
    Hextile(HextileDecoder),
    Tight(TightDecoder),
    Zrle(ZrleDecoder),
    Cursor(CursorDecoder),
    PointerPosition,
    DesktopSize,
}

impl Codec {
    /// Instantiate the codec for an encoding tag, if this engine has one.
    pub fn for_encoding(tag: i32) -> Option<Self> {
        match tag {
            ENCODING_RAW => Some(Self::Raw(RawDecoder)),
            ENCODING_COPY_RECT => Some(Self::CopyRect(CopyRectDecoder)),
            ENCODING_HEXTILE => Some(Self::Hextile(HextileDecoder)),
            ENCODING_TIGHT => Some(Self::Tight(TightDecoder::default())),
            ENCODING_ZRLE => Some(Self::Zrle(ZrleDecoder::default())),
            ENCODING_CURSOR => Some(Self::Cursor(CursorDecoder)),
            ENCODING_POINTER_POS => Some(Self::PointerPosition),
            ENCODING_DESKTOP_SIZE => Some(Self::DesktopSize),
            _ => None,
        }
    }

    /// The tag this codec decodes.
    pub fn encoding_type(&self) -> i32 {
        match self {
            Self::Raw(_) => ENCODING_RAW,
            Self::CopyRect(_) => ENCODING_COPY_RECT,
            Self::Hextile(_) => ENCODING_HEXTILE,
            Self::Tight(_) => ENCODING_TIGHT,
            Self::Zrle(_) => ENCODING_ZRLE,
            Self::Cursor(_) => ENCODING_CURSOR,
            Self::PointerPosition => ENCODING_POINTER_POS,
            Self::DesktopSize => ENCODING_DESKTOP_SIZE,
        }
    }

    /// Whether the codec can run against the connection's current formats.
    ///
    /// Tight converts through RGB internally and so requires a true-color
    /// format; everything else also handles colormap sessions.
    pub fn supported(&self, ctx: &DecodeContext<'_>) -> bool {
        match self {
            Self::Tight(_) => ctx.pixel_format.true_color,
            _ => true,
        }
    }

    /// Decode one rectangle payload.
    pub async fn decode<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        ctx: &DecodeContext<'_>,
        canvas: &mut Canvas,
    ) -> Result<DecodedRect> {
        match self {
            Self::Raw(d) => d
                .decode(stream, rect, ctx, canvas)
                .await
                .map(|_| DecodedRect::Framebuffer),
            Self::CopyRect(d) => d
                .decode(stream, rect, ctx, canvas)
                .await
                .map(|_| DecodedRect::Framebuffer),
            Self::Hextile(d) => d
                .decode(stream, rect, ctx, canvas)
                .await
                .map(|_| DecodedRect::Framebuffer),
            Self::Tight(d) => d
                .decode(stream, rect, ctx, canvas)
                .await
                .map(|_| DecodedRect::Framebuffer),
            Self::Zrle(d) => d
                .decode(stream, rect, ctx, canvas)
                .await
                .map(|_| DecodedRect::Framebuffer),
            Self::Cursor(d) => d
                .decode(stream, rect, ctx)
                .await
                .map(DecodedRect::CursorShape),
            Self::PointerPosition => Ok(DecodedRect::CursorPosition {
                x: rect.x,
                y: rect.y,
            }),
            Self::DesktopSize => Ok(DecodedRect::DesktopSize {
                width: rect.width,
                height: rect.height,
            }),
        }
    }
}

/// Per-connection codec set keyed by encoding tag.
pub struct DecoderRegistry {
    codecs: HashMap<i32, Codec>,
}

impl DecoderRegistry {
    /// Build the registry for a negotiated encoding list. The pseudo
    /// encodings are always present; tags this engine has no codec for are
    /// skipped (the server never sends what the client did not advertise).
    pub fn new(encodings: &[i32]) -> Self {
        let mut codecs = HashMap::new();
        for &tag in encodings {
            if let Some(codec) = Codec::for_encoding(tag) {
                codecs.insert(tag, codec);
            } else {
                tracing::warn!(tag, "no decoder for negotiated encoding, skipping");
            }
        }
        for tag in [ENCODING_CURSOR, ENCODING_POINTER_POS, ENCODING_DESKTOP_SIZE] {
            codecs
                .entry(tag)
                .or_insert_with(|| Codec::for_encoding(tag).unwrap());
        }
        Self { codecs }
    }

    /// Number of registered codecs.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Whether the registry holds no codecs at all.
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Dispatch one rectangle to its codec.
    ///
    /// A tag with no registered codec is a protocol violation: the payload
    /// length is unknowable, so the stream is unrecoverable.
    pub async fn decode_rect<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        ctx: &DecodeContext<'_>,
        canvas: &mut Canvas,
    ) -> Result<DecodedRect> {
        let codec = self.codecs.get_mut(&rect.encoding).ok_or_else(|| {
            RfbError::protocol(format!(
                "server sent rectangle with unnegotiated encoding {}",
                rect.encoding
            ))
        })?;
        if !codec.supported(ctx) {
            return Err(RfbError::unsupported(format!(
                "encoding {} cannot decode the current pixel format",
                rect.encoding
            )));
        }
        codec.decode(stream, rect, ctx, canvas).await
    }
}
