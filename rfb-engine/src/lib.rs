//! High-level RFB session engine.
//!
//! This crate ties the wire layer, the codecs and the framebuffer together
//! into a running session: it drives the client handshake over a
//! caller-supplied byte-stream duplex, then runs two cooperative tasks: an
//! inbound reader that owns the canvas and codec state, and an outbound
//! writer that serializes client messages through the connection's write
//! mutex. The application talks to the session through bounded channels
//! ([`ServerEvent`] out, [`ClientCommand`] in) plus a shared handle to the
//! last *complete* frame.
//!
//! # Quick start
//!
//! ```no_run
//! use rfb_engine::{Config, ServerEvent, Session};
//!
//! # async fn example(stream: tokio::net::TcpStream) -> rfb_engine::Result<()> {
//! let (reader, writer) = stream.into_split();
//! let config = Config::default();
//! let session = Session::connect(config, reader, writer).await?;
//!
//! let handle = session.handle();
//! while let Ok(event) = handle.events().recv_async().await {
//!     match event {
//!         ServerEvent::Connected { width, height, .. } => {
//!             println!("connected: {}x{}", width, height);
//!         }
//!         ServerEvent::FramebufferUpdated { .. } => {
//!             let frame = session.frame();
//!             let canvas = frame.lock();
//!             // render canvas.data() ...
//!         }
//!         ServerEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency model
//!
//! One connection runs exactly two tasks. The reader owns all decode state;
//! rectangle boundaries are its only cancellation points, because stopping
//! mid-rectangle would desynchronize the persistent zlib streams from the
//! server. The writer guards the output half with a mutex so pipelined
//! update requests and application commands never interleave on the wire.
//! A shared idempotent [`QuitSignal`] tears both down; fatal errors are
//! reported once on the event channel.

pub mod config;
pub mod connection;
pub mod events;
pub mod framebuffer;
pub mod quit;

mod event_loop;

pub use config::{Config, PreferredFormat, SecurityHandler};
pub use connection::{establish, Connection};
pub use events::{ClientCommand, ServerEvent};
pub use framebuffer::{Framebuffer, UpdateOutcome};
pub use quit::QuitSignal;
pub use rfb_wire::{ProtocolVersion, Result, RfbError, SecurityKind};

/// Server-role surface: the accept-side handshake and password verifier,
/// for embedders building the other end of the protocol.
pub mod server {
    pub use rfb_wire::handshake::{offer_security, offer_version, recv_client_init, send_server_init};
    pub use rfb_wire::messages::ServerInit;
    pub use rfb_wire::security::VncAuth;
}

use rfb_pixels::Canvas;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// Shared handle to the last completely decoded frame.
///
/// The reader task replaces the contents only after a framebuffer update
/// has been applied in full, so readers never observe partial updates.
pub type FrameHandle = Arc<parking_lot::Mutex<Canvas>>;

/// Handle for talking to a running session. Cloneable across threads.
#[derive(Clone)]
pub struct SessionHandle {
    commands: flume::Sender<ClientCommand>,
    events: flume::Receiver<ServerEvent>,
}

impl SessionHandle {
    /// Send a command to the session.
    pub fn send(&self, command: ClientCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| RfbError::Cancelled)
    }

    /// The event stream, in wire order.
    pub fn events(&self) -> &flume::Receiver<ServerEvent> {
        &self.events
    }

    /// Request a clean close.
    pub fn close(&self) -> Result<()> {
        self.send(ClientCommand::Close)
    }
}

/// A connected RFB session with its two multiplexer tasks running.
pub struct Session {
    handle: SessionHandle,
    frame: FrameHandle,
    quit: QuitSignal,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Perform the handshake over the given duplex halves and start the
    /// session tasks.
    ///
    /// The engine does no dialing or listening; hand it the halves of any
    /// `AsyncRead`/`AsyncWrite` stream. Read timeouts, if wanted, belong on
    /// that stream.
    pub async fn connect<R, W>(config: Config, reader: R, writer: W) -> Result<Session>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conn = connection::establish(&config, reader, writer).await?;

        let (cmd_tx, cmd_rx) = flume::bounded(32);
        let (event_tx, event_rx) = flume::bounded(64);
        let frame: FrameHandle = Arc::new(parking_lot::Mutex::new(Canvas::new(
            conn.init.width as u32,
            conn.init.height as u32,
        )));
        let quit = QuitSignal::new();

        let _ = event_tx.send(ServerEvent::Connected {
            width: conn.init.width,
            height: conn.init.height,
            name: conn.init.name.clone(),
            pixel_format: conn.effective_pixel_format(&config),
        });

        let (reader_task, writer_task) = event_loop::spawn(
            conn,
            &config,
            cmd_rx,
            event_tx,
            frame.clone(),
            quit.clone(),
        );

        Ok(Session {
            handle: SessionHandle {
                commands: cmd_tx,
                events: event_rx,
            },
            frame,
            quit,
            reader: reader_task,
            writer: writer_task,
        })
    }

    /// A cloneable handle for commands and events.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// The shared last-complete-frame handle.
    pub fn frame(&self) -> FrameHandle {
        self.frame.clone()
    }

    /// Whether the session has shut down (or is doing so).
    pub fn is_closed(&self) -> bool {
        self.quit.is_raised()
    }

    /// Wait for both tasks to finish.
    pub async fn join(mut self) -> Result<()> {
        (&mut self.reader)
            .await
            .map_err(|e| RfbError::protocol(format!("reader task panicked: {}", e)))?;
        (&mut self.writer)
            .await
            .map_err(|e| RfbError::protocol(format!("writer task panicked: {}", e)))?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Dropping the session tears the connection down.
        self.quit.raise();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessionHandle>();
        assert_send_sync::<FrameHandle>();
    }
}
