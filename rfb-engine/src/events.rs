//! The consumer surface: events out, commands in.
//!
//! The engine talks to its host application through a pair of bounded
//! channels. Ordering within a connection is preserved: events are emitted
//! in wire order, and framebuffer events only ever describe complete
//! updates.

use bytes::Bytes;
use rfb_codecs::CursorShape;
use rfb_core::Rect;
use rfb_pixels::PixelFormat;

/// Events delivered from the engine to the application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Handshake finished; the session is running.
    Connected {
        /// Initial framebuffer width in pixels.
        width: u16,
        /// Initial framebuffer height in pixels.
        height: u16,
        /// Desktop name from ServerInit.
        name: String,
        /// The pixel format updates will arrive in.
        pixel_format: PixelFormat,
    },

    /// A framebuffer update was applied in full.
    ///
    /// The shared frame handle now holds the new frame; `damage` lists the
    /// rectangles that changed.
    FramebufferUpdated {
        /// Regions touched by this update.
        damage: Vec<Rect>,
    },

    /// The server resized the framebuffer.
    DesktopResized { width: u16, height: u16 },

    /// The server replaced the client-side cursor image.
    CursorShape(CursorShape),

    /// The server moved the pointer.
    CursorMoved { x: u16, y: u16 },

    /// The server updated colormap entries.
    ColormapChanged { first: u16, count: u16 },

    /// Audible bell.
    Bell,

    /// Clipboard bytes from the server.
    CutText { text: Bytes },

    /// A fatal error tore the connection down. Reported exactly once.
    Error { message: String },

    /// The connection is closed; no further events follow.
    Closed,
}

/// Commands the application sends to the engine.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Ask the server for an update of a region (the whole screen when
    /// `rect` is `None`).
    RequestUpdate {
        incremental: bool,
        rect: Option<Rect>,
    },

    /// Pointer state: position plus button mask (bit 0 = left).
    Pointer { x: u16, y: u16, buttons: u8 },

    /// Key press or release, X11 keysym.
    Key { key: u32, down: bool },

    /// Clipboard bytes for the server.
    CutText { text: Bytes },

    /// Close the connection cleanly.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_and_commands_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ServerEvent>();
        assert_send::<ClientCommand>();
    }
}
