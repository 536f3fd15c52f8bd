//! Rectangle decoders for the RFB protocol.
//!
//! Each framebuffer update rectangle names an encoding; this crate holds one
//! decoder per supported encoding plus the registry that dispatches on the
//! tag. Decoders read exactly the bytes their encoding defines from the
//! connection stream, convert pixels to RGBA, and write them into the
//! session's [`Canvas`](rfb_pixels::Canvas).
//!
//! Codecs are a tagged union ([`registry::Codec`]) rather than trait
//! objects: the Tight and ZRLE variants own their persistent zlib
//! decompressors directly and borrow them mutably per decode call, so no
//! interior locking is needed. Pseudo-encodings (negative tags) return
//! metadata through [`registry::DecodedRect`] instead of touching the
//! canvas.

pub mod copyrect;
pub mod hextile;
pub mod pixels;
pub mod pseudo;
pub mod raw;
pub mod registry;
pub mod tight;
pub mod zrle;

pub use pixels::DecodeContext;
pub use pseudo::CursorShape;
pub use registry::{Codec, DecodedRect, DecoderRegistry};

// Re-export the tag constants decoders are registered under.
pub use rfb_wire::messages::{
    ENCODING_COPY_RECT, ENCODING_CURSOR, ENCODING_DESKTOP_SIZE, ENCODING_HEXTILE,
    ENCODING_POINTER_POS, ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE,
};
