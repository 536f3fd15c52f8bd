//! The two multiplexer tasks: inbound reader and outbound writer.
//!
//! The reader owns the input stream, the framebuffer (canvas, colormap,
//! codec registry) and delivers server messages to the application in wire
//! order. The writer owns the command channel and serializes outbound
//! client messages through the connection's write mutex, flushing each one
//! atomically. Both observe the shared [`QuitSignal`].
//!
//! Error policy: every failure except a consumer-initiated close is fatal.
//! Whichever task hits the error first reports it once, raises quit, and
//! both tasks unwind; the reader emits the final `Closed` event.

use crate::config::Config;
use crate::connection::Connection;
use crate::events::{ClientCommand, ServerEvent};
use crate::framebuffer::Framebuffer;
use crate::quit::QuitSignal;
use crate::FrameHandle;
use rfb_codecs::DecodedRect;
use rfb_wire::messages::{
    ClientCutText, FramebufferUpdateRequest, KeyEvent, PointerEvent, ServerCutText,
    ServerMessageType, SetColorMapEntries,
};
use rfb_wire::{Result, RfbInStream, RfbOutStream};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// Shared, mutex-guarded write half. Application commands and messages the
/// reader synthesizes (pipelined update requests) both go through this, so
/// no outbound message can interleave with another.
type SharedWriter<W> = Arc<tokio::sync::Mutex<RfbOutStream<W>>>;

/// Spawn the reader and writer tasks for an established connection.
pub fn spawn<R, W>(
    conn: Connection<R, W>,
    config: &Config,
    commands: flume::Receiver<ClientCommand>,
    events: flume::Sender<ServerEvent>,
    frame: FrameHandle,
    quit: QuitSignal,
) -> (JoinHandle<()>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pixel_format = conn.effective_pixel_format(config);
    let framebuffer = Framebuffer::new(
        conn.init.width,
        conn.init.height,
        pixel_format,
        &config.encodings,
    );
    let writer: SharedWriter<W> = Arc::new(tokio::sync::Mutex::new(conn.output));

    let reader_task = tokio::spawn(read_loop(
        conn.input,
        framebuffer,
        writer.clone(),
        events.clone(),
        frame,
        quit.clone(),
    ));
    let writer_task = tokio::spawn(write_loop(writer, commands, events, quit));

    (reader_task, writer_task)
}

/// Report a fatal error exactly once and raise quit.
fn fail(events: &flume::Sender<ServerEvent>, quit: &QuitSignal, message: String) {
    if quit.raise() {
        tracing::error!(%message, "connection failed");
        let _ = events.send(ServerEvent::Error { message });
    }
}

async fn read_loop<R, W>(
    mut input: RfbInStream<R>,
    mut framebuffer: Framebuffer,
    writer: SharedWriter<W>,
    events: flume::Sender<ServerEvent>,
    frame: FrameHandle,
    quit: QuitSignal,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Kick the session off with a full-screen update request.
    let (width, height) = framebuffer.dimensions();
    if let Err(e) = request_update(&writer, false, width as u16, height as u16).await {
        fail(&events, &quit, e.to_string());
    }

    while !quit.is_raised() {
        let tag = tokio::select! {
            _ = quit.wait() => break,
            tag = input.read_u8() => match tag {
                Ok(tag) => tag,
                Err(e) => {
                    fail(&events, &quit, e.to_string());
                    break;
                }
            },
        };

        if let Err(e) = dispatch(
            tag,
            &mut input,
            &mut framebuffer,
            &writer,
            &events,
            &frame,
        )
        .await
        {
            fail(&events, &quit, e.to_string());
            break;
        }
    }

    quit.raise();
    let _ = events.send(ServerEvent::Closed);
    tracing::debug!("reader task exited");
}

async fn dispatch<R, W>(
    tag: u8,
    input: &mut RfbInStream<R>,
    framebuffer: &mut Framebuffer,
    writer: &SharedWriter<W>,
    events: &flume::Sender<ServerEvent>,
    frame: &FrameHandle,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match ServerMessageType::try_from(tag)? {
        ServerMessageType::FramebufferUpdate => {
            let outcome = framebuffer.apply_update(input).await?;

            // Publish the complete frame, then tell the application.
            *frame.lock() = framebuffer.canvas().clone();
            for effect in outcome.side_effects {
                let event = match effect {
                    DecodedRect::CursorShape(shape) => ServerEvent::CursorShape(shape),
                    DecodedRect::CursorPosition { x, y } => ServerEvent::CursorMoved { x, y },
                    DecodedRect::DesktopSize { width, height } => {
                        ServerEvent::DesktopResized { width, height }
                    }
                    DecodedRect::Framebuffer => continue,
                };
                let _ = events.send(event);
            }
            let _ = events.send(ServerEvent::FramebufferUpdated {
                damage: outcome.damage,
            });

            // Pipeline the next incremental request.
            let (width, height) = framebuffer.dimensions();
            request_update(writer, true, width as u16, height as u16).await?;
        }
        ServerMessageType::SetColorMapEntries => {
            let msg = SetColorMapEntries::read_from(input).await?;
            framebuffer.set_colormap_entries(msg.first_color, &msg.colors)?;
            let _ = events.send(ServerEvent::ColormapChanged {
                first: msg.first_color,
                count: msg.colors.len() as u16,
            });
        }
        ServerMessageType::Bell => {
            let _ = events.send(ServerEvent::Bell);
        }
        ServerMessageType::ServerCutText => {
            let msg = ServerCutText::read_from(input).await?;
            let _ = events.send(ServerEvent::CutText { text: msg.text });
        }
    }
    Ok(())
}

async fn request_update<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    incremental: bool,
    width: u16,
    height: u16,
) -> Result<()> {
    let mut out = writer.lock().await;
    FramebufferUpdateRequest {
        incremental,
        x: 0,
        y: 0,
        width,
        height,
    }
    .write_to(&mut out);
    out.flush().await?;
    Ok(())
}

async fn write_loop<W>(
    writer: SharedWriter<W>,
    commands: flume::Receiver<ClientCommand>,
    events: flume::Sender<ServerEvent>,
    quit: QuitSignal,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let command = tokio::select! {
            _ = quit.wait() => break,
            cmd = commands.recv_async() => match cmd {
                Ok(cmd) => cmd,
                // The application dropped its handle: a clean close.
                Err(_) => {
                    quit.raise();
                    break;
                }
            },
        };

        if matches!(command, ClientCommand::Close) {
            tracing::debug!("close requested by consumer");
            quit.raise();
            break;
        }

        if let Err(e) = write_command(&writer, command).await {
            fail(&events, &quit, e.to_string());
            break;
        }
    }
    tracing::debug!("writer task exited");
}

/// Serialize one command; the mutex plus a single flush keep the message
/// atomic on the wire.
async fn write_command<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    command: ClientCommand,
) -> Result<()> {
    let mut out = writer.lock().await;
    match command {
        ClientCommand::RequestUpdate { incremental, rect } => {
            let (x, y, width, height) = match rect {
                Some(r) => (r.x as u16, r.y as u16, r.width as u16, r.height as u16),
                None => (0, 0, u16::MAX, u16::MAX),
            };
            FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            }
            .write_to(&mut out);
        }
        ClientCommand::Pointer { x, y, buttons } => {
            PointerEvent { buttons, x, y }.write_to(&mut out);
        }
        ClientCommand::Key { key, down } => {
            KeyEvent { down, key }.write_to(&mut out);
        }
        ClientCommand::CutText { text } => {
            ClientCutText { text }.write_to(&mut out);
        }
        ClientCommand::Close => unreachable!("handled by the write loop"),
    }
    out.flush().await?;
    Ok(())
}
