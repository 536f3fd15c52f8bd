//! Typed RFB messages and the tag dispatch for both directions.

pub mod client;
pub mod server;
pub mod types;

#[cfg(test)]
mod proptest_framing;

pub use client::{
    ClientCutText, ClientInit, FramebufferUpdateRequest, KeyEvent, PointerEvent, SetEncodings,
    SetPixelFormat,
};
pub use server::{
    Bell, FramebufferUpdateHeader, ServerCutText, ServerInit, SetColorMapEntries,
};
pub use types::{
    read_pixel_format, write_pixel_format, Rectangle, ENCODING_COPY_RECT, ENCODING_CURSOR,
    ENCODING_DESKTOP_SIZE, ENCODING_HEXTILE, ENCODING_POINTER_POS, ENCODING_RAW, ENCODING_TIGHT,
    ENCODING_ZRLE,
};

use crate::error::RfbError;

/// Server-to-client message tags. An unrecognized tag is fatal: the stream
/// position after it is unknowable, so the session cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessageType {
    FramebufferUpdate,
    SetColorMapEntries,
    Bell,
    ServerCutText,
}

impl TryFrom<u8> for ServerMessageType {
    type Error = RfbError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::FramebufferUpdate),
            1 => Ok(Self::SetColorMapEntries),
            2 => Ok(Self::Bell),
            3 => Ok(Self::ServerCutText),
            other => Err(RfbError::protocol(format!(
                "unknown server message type {}",
                other
            ))),
        }
    }
}

/// Client-to-server message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessageType {
    SetPixelFormat,
    SetEncodings,
    FramebufferUpdateRequest,
    KeyEvent,
    PointerEvent,
    ClientCutText,
}

impl TryFrom<u8> for ClientMessageType {
    type Error = RfbError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::SetPixelFormat),
            2 => Ok(Self::SetEncodings),
            3 => Ok(Self::FramebufferUpdateRequest),
            4 => Ok(Self::KeyEvent),
            5 => Ok(Self::PointerEvent),
            6 => Ok(Self::ClientCutText),
            other => Err(RfbError::protocol(format!(
                "unknown client message type {}",
                other
            ))),
        }
    }
}
