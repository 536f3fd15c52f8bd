//! Connection establishment: drive the handshake over a caller-supplied
//! duplex.
//!
//! The engine never dials or listens; the application hands it the two
//! halves of whatever byte stream it owns (TCP, TLS, an in-memory pipe) and
//! [`establish`] runs the client side of the handshake on them, advancing
//! the [`SessionPhase`] state machine as each phase completes.

use crate::config::Config;
use rfb_wire::handshake::{
    negotiate_security, negotiate_version, recv_server_init, send_client_init,
};
use rfb_wire::messages::{ServerInit, SetEncodings, SetPixelFormat};
use rfb_wire::session::SessionPhase;
use rfb_wire::{ProtocolVersion, Result, RfbInStream, RfbOutStream, SecurityKind};
use tokio::io::{AsyncRead, AsyncWrite};

/// A connection that completed the handshake and is in the Running phase.
pub struct Connection<R, W> {
    /// Buffered input half.
    pub input: RfbInStream<R>,
    /// Buffered output half.
    pub output: RfbOutStream<W>,
    /// Protocol version agreed during the handshake.
    pub version: ProtocolVersion,
    /// The security type that was actually used.
    pub security: SecurityKind,
    /// Framebuffer parameters from ServerInit.
    pub init: ServerInit,
    /// Handshake phase tracker, left in the Running state.
    pub phase: SessionPhase,
}

/// Run the client handshake and initial setup messages.
///
/// After ServerInit this sends SetPixelFormat (when the configuration
/// prefers a format) and SetEncodings, so the returned connection is ready
/// for the first FramebufferUpdateRequest.
pub async fn establish<R, W>(config: &Config, reader: R, writer: W) -> Result<Connection<R, W>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config.validate()?;

    let mut input = RfbInStream::new(reader);
    let mut output = RfbOutStream::new(writer);
    let mut phase = SessionPhase::new();

    let version = negotiate_version(&mut input, &mut output).await?;
    phase.advance()?; // AwaitVersionReply
    phase.advance()?; // SecurityList
    tracing::info!(version = version.label(), "protocol version negotiated");

    phase.advance()?; // SecurityChoice
    phase.advance()?; // SecurityExchange
    let security = negotiate_security(
        &mut input,
        &mut output,
        version,
        &config.security_kinds(),
        config.password_bytes(),
    )
    .await?;
    phase.advance()?; // SecurityResult

    phase.advance()?; // ClientInit
    send_client_init(&mut output, config.shared).await?;

    phase.advance()?; // ServerInit
    let init = recv_server_init(&mut input).await?;
    tracing::info!(
        width = init.width,
        height = init.height,
        name = %init.name,
        "server init received"
    );

    phase.advance()?; // Running

    if let Some(preferred) = config.preferred_format {
        SetPixelFormat {
            pixel_format: preferred.pixel_format(),
        }
        .write_to(&mut output);
    }
    SetEncodings {
        encodings: config.encodings.clone(),
    }
    .write_to(&mut output);
    output.flush().await?;

    Ok(Connection {
        input,
        output,
        version,
        security,
        init,
        phase,
    })
}

impl<R, W> Connection<R, W> {
    /// The pixel format updates will arrive in: the configured preference
    /// if one was advertised, the server's native format otherwise.
    pub fn effective_pixel_format(&self, config: &Config) -> rfb_pixels::PixelFormat {
        config
            .preferred_format
            .map(|f| f.pixel_format())
            .unwrap_or(self.init.pixel_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityHandler;
    use rfb_pixels::PixelFormat;
    use rfb_wire::handshake::{offer_security, offer_version, recv_client_init, send_server_init};
    use rfb_wire::messages::ClientMessageType;
    use rfb_wire::security::VncAuth;

    /// Emulate a minimal server accept loop on the other end of a duplex.
    async fn run_server(
        mut sin: RfbInStream<tokio::io::DuplexStream>,
        mut sout: RfbOutStream<tokio::io::DuplexStream>,
        offered: Vec<SecurityKind>,
        auth: VncAuth,
    ) -> Result<bool> {
        let version = offer_version(&mut sin, &mut sout).await?;
        offer_security(&mut sin, &mut sout, version, &offered, &auth).await?;
        let shared = recv_client_init(&mut sin).await?;
        send_server_init(
            &mut sout,
            &ServerInit {
                width: 800,
                height: 600,
                pixel_format: PixelFormat::rgb888(),
                name: "unit server".to_string(),
            },
        )
        .await?;

        // Drain the client's post-init SetPixelFormat and SetEncodings so its
        // flush doesn't hit a closed pipe when this stub returns.
        let tag = sin.read_u8().await?;
        assert_eq!(
            ClientMessageType::try_from(tag)?,
            ClientMessageType::SetPixelFormat
        );
        SetPixelFormat::read_from(&mut sin).await?;
        let tag = sin.read_u8().await?;
        assert_eq!(
            ClientMessageType::try_from(tag)?,
            ClientMessageType::SetEncodings
        );
        SetEncodings::read_from(&mut sin).await?;

        Ok(shared)
    }

    fn duplex_ends() -> (
        (tokio::io::DuplexStream, tokio::io::DuplexStream),
        (
            RfbInStream<tokio::io::DuplexStream>,
            RfbOutStream<tokio::io::DuplexStream>,
        ),
    ) {
        let (client_read, server_write) = tokio::io::duplex(8192);
        let (server_read, client_write) = tokio::io::duplex(8192);
        (
            (client_read, client_write),
            (RfbInStream::new(server_read), RfbOutStream::new(server_write)),
        )
    }

    #[tokio::test]
    async fn establishes_with_security_none() {
        let ((client_read, client_write), (sin, sout)) = duplex_ends();

        let server = tokio::spawn(async move {
            run_server(sin, sout, vec![SecurityKind::None], VncAuth::new(None))
                .await
                .unwrap()
        });

        let config = Config::builder()
            .security(vec![SecurityHandler::None])
            .build()
            .unwrap();
        let conn = establish(&config, client_read, client_write).await.unwrap();

        assert_eq!(conn.version, ProtocolVersion::V3_8);
        assert_eq!(conn.security, SecurityKind::None);
        assert_eq!((conn.init.width, conn.init.height), (800, 600));
        assert_eq!(conn.init.name, "unit server");
        assert!(conn.phase.is_running());
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn establishes_with_vnc_auth_and_sends_setup() {
        let ((client_read, client_write), (sin, sout)) = duplex_ends();

        let server = tokio::spawn(async move {
            let mut sin = sin;
            let mut sout = sout;
            let version = offer_version(&mut sin, &mut sout).await?;
            offer_security(
                &mut sin,
                &mut sout,
                version,
                &[SecurityKind::VncAuth],
                &VncAuth::new(Some(b"pw".to_vec())),
            )
            .await?;
            recv_client_init(&mut sin).await?;
            send_server_init(
                &mut sout,
                &ServerInit {
                    width: 64,
                    height: 64,
                    pixel_format: PixelFormat::rgb888(),
                    name: String::new(),
                },
            )
            .await?;

            // The client follows init with SetPixelFormat and SetEncodings.
            let tag = sin.read_u8().await?;
            assert_eq!(
                ClientMessageType::try_from(tag)?,
                ClientMessageType::SetPixelFormat
            );
            SetPixelFormat::read_from(&mut sin).await?;
            let tag = sin.read_u8().await?;
            assert_eq!(
                ClientMessageType::try_from(tag)?,
                ClientMessageType::SetEncodings
            );
            let encodings = rfb_wire::messages::SetEncodings::read_from(&mut sin).await?;
            Result::Ok(encodings.encodings)
        });

        let config = Config::builder()
            .security(vec![SecurityHandler::VncAuth])
            .password("pw")
            .encodings(vec![16, 0])
            .build()
            .unwrap();
        let conn = establish(&config, client_read, client_write).await.unwrap();
        assert_eq!(conn.security, SecurityKind::VncAuth);
        assert_eq!(conn.effective_pixel_format(&config), PixelFormat::rgb888());

        let advertised = server.await.unwrap().unwrap();
        assert_eq!(advertised, vec![16, 0]);
    }
}
