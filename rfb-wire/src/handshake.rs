//! RFB handshake: version negotiation, security, client/server init.
//!
//! Both roles are implemented. The client drives `negotiate_*`; a server
//! accepting a connection drives `offer_*`. Each function performs one phase
//! of the state machine described by [`crate::session::SessionState`] and
//! leaves the stream positioned at the start of the next phase.
//!
//! Version negotiation picks the minimum of both sides' versions out of
//! 3.3 / 3.7 / 3.8; servers advertising 3.9 or later are pinned to 3.8.
//! Version 3.3 has a single server-chosen security type transmitted as a
//! `u32` scalar; 3.7 and later use the length-prefixed list. The
//! SecurityResult failure reason string exists only from 3.8 on.

use crate::error::{Result, RfbError};
use crate::io::{RfbInStream, RfbOutStream};
use crate::messages::{ClientInit, ServerInit};
use crate::security::{encrypt_challenge, VncAuth};
use tokio::io::{AsyncRead, AsyncWrite};

/// Security type tag: no authentication.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type tag: VNC password authentication.
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

/// The protocol version both sides settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// The 12-byte version string for this version.
    pub fn as_bytes(&self) -> &'static [u8; 12] {
        match self {
            Self::V3_3 => b"RFB 003.003\n",
            Self::V3_7 => b"RFB 003.007\n",
            Self::V3_8 => b"RFB 003.008\n",
        }
    }

    /// Human-readable form, e.g. `"3.8"`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::V3_3 => "3.3",
            Self::V3_7 => "3.7",
            Self::V3_8 => "3.8",
        }
    }

    /// Map a parsed `(major, minor)` pair to the highest version this engine
    /// speaks with that peer. Anything at or above 3.8 pins to 3.8.
    fn from_peer(major: u32, minor: u32) -> Result<Self> {
        if major > 3 || (major == 3 && minor >= 8) {
            Ok(Self::V3_8)
        } else if major == 3 && minor == 7 {
            Ok(Self::V3_7)
        } else if major == 3 && minor >= 3 {
            Ok(Self::V3_3)
        } else {
            Err(RfbError::protocol(format!(
                "unsupported protocol version {}.{}",
                major, minor
            )))
        }
    }
}

/// Security mechanisms this engine implements. Other RFB security types are
/// pluggable in principle but not built in; a server insisting on one is
/// rejected with `SecurityRejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityKind {
    /// Type 1: no authentication.
    None,
    /// Type 2: VNC password challenge/response.
    VncAuth,
}

impl SecurityKind {
    /// Wire tag for this security type.
    pub fn tag(&self) -> u8 {
        match self {
            Self::None => SECURITY_TYPE_NONE,
            Self::VncAuth => SECURITY_TYPE_VNC_AUTH,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            SECURITY_TYPE_NONE => Some(Self::None),
            SECURITY_TYPE_VNC_AUTH => Some(Self::VncAuth),
            _ => None,
        }
    }
}

/// Parse a 12-byte `RFB xxx.yyy\n` version string.
fn parse_version(buf: &[u8; 12]) -> Result<(u32, u32)> {
    if &buf[0..4] != b"RFB " || buf[7] != b'.' || buf[11] != b'\n' {
        return Err(RfbError::protocol(format!(
            "malformed version string {:?}",
            String::from_utf8_lossy(buf)
        )));
    }
    let digits = |bytes: &[u8]| -> Result<u32> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                RfbError::protocol(format!(
                    "non-numeric version digits in {:?}",
                    String::from_utf8_lossy(buf)
                ))
            })
    };
    Ok((digits(&buf[4..7])?, digits(&buf[8..11])?))
}

/// Read a u32-length-prefixed failure reason string.
async fn read_reason<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<String> {
    let len = stream.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_bytes(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read a SecurityResult word. `with_reason` selects the 3.8 behavior of a
/// reason string following a failure.
async fn read_security_result<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    with_reason: bool,
) -> Result<()> {
    match stream.read_u32().await? {
        0 => Ok(()),
        1 => {
            let reason = if with_reason {
                read_reason(stream).await?
            } else {
                "authentication failed".to_string()
            };
            Err(RfbError::security(reason))
        }
        other => Err(RfbError::protocol(format!(
            "invalid SecurityResult value {}",
            other
        ))),
    }
}

//
// Client side
//

/// Negotiate the protocol version as the client.
///
/// Reads the server's version string, picks the minimum of both sides, and
/// replies with the chosen version.
pub async fn negotiate_version<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
) -> Result<ProtocolVersion> {
    let mut buf = [0u8; 12];
    instream.read_bytes(&mut buf).await?;
    let (major, minor) = parse_version(&buf)?;
    let version = ProtocolVersion::from_peer(major, minor)?;
    tracing::debug!(server = %format!("{}.{}", major, minor), chosen = version.label(), "version negotiated");

    outstream.write_bytes(version.as_bytes());
    outstream.flush().await?;
    Ok(version)
}

/// Negotiate security as the client.
///
/// `handlers` is the ordered preference list from configuration; the first
/// handler the server offers wins. `password` feeds the VNC authentication
/// exchange when that type is chosen.
pub async fn negotiate_security<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    version: ProtocolVersion,
    handlers: &[SecurityKind],
    password: Option<&[u8]>,
) -> Result<SecurityKind> {
    if handlers.is_empty() {
        return Err(RfbError::security("no security handlers configured"));
    }

    let chosen = match version {
        ProtocolVersion::V3_3 => {
            // The server dictates a single scalar type.
            let tag = instream.read_u32().await?;
            if tag == 0 {
                let reason = read_reason(instream).await?;
                return Err(RfbError::security(reason));
            }
            let kind = u8::try_from(tag)
                .ok()
                .and_then(SecurityKind::from_tag)
                .filter(|k| handlers.contains(k))
                .ok_or_else(|| {
                    RfbError::security(format!("server chose unsupported security type {}", tag))
                })?;
            kind
        }
        ProtocolVersion::V3_7 | ProtocolVersion::V3_8 => {
            let count = instream.read_u8().await?;
            if count == 0 {
                let reason = read_reason(instream).await?;
                return Err(RfbError::security(reason));
            }
            let mut offered = vec![0u8; count as usize];
            instream.read_bytes(&mut offered).await?;

            let kind = handlers
                .iter()
                .copied()
                .find(|k| offered.contains(&k.tag()))
                .ok_or_else(|| {
                    RfbError::security(format!(
                        "no mutual security type (server offered {:?})",
                        offered
                    ))
                })?;

            outstream.write_u8(kind.tag());
            outstream.flush().await?;
            kind
        }
    };
    tracing::debug!(?chosen, "security type selected");

    match chosen {
        SecurityKind::None => {
            // SecurityResult for None exists only from 3.8 on.
            if version == ProtocolVersion::V3_8 {
                read_security_result(instream, true).await?;
            }
        }
        SecurityKind::VncAuth => {
            let password =
                password.ok_or_else(|| RfbError::security("server requires a password"))?;
            let mut challenge = [0u8; 16];
            instream.read_bytes(&mut challenge).await?;
            outstream.write_bytes(&encrypt_challenge(&challenge, password));
            outstream.flush().await?;
            read_security_result(instream, version == ProtocolVersion::V3_8).await?;
        }
    }

    Ok(chosen)
}

/// Send the ClientInit shared flag.
pub async fn send_client_init<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    shared: bool,
) -> Result<()> {
    ClientInit { shared }.write_to(outstream);
    outstream.flush().await?;
    Ok(())
}

/// Receive the ServerInit message.
pub async fn recv_server_init<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> Result<ServerInit> {
    let init = ServerInit::read_from(instream).await?;
    if !init.pixel_format.is_valid() {
        return Err(RfbError::protocol(format!(
            "ServerInit carries invalid pixel format {:?}",
            init.pixel_format
        )));
    }
    Ok(init)
}

//
// Server side
//

/// Advertise our version and parse the client's reply.
pub async fn offer_version<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
) -> Result<ProtocolVersion> {
    outstream.write_bytes(ProtocolVersion::V3_8.as_bytes());
    outstream.flush().await?;

    let mut buf = [0u8; 12];
    instream.read_bytes(&mut buf).await?;
    let (major, minor) = parse_version(&buf)?;
    ProtocolVersion::from_peer(major, minor)
}

/// Offer security types and run the chosen exchange as the server.
///
/// `offered` comes from server configuration; under 3.3 only its first entry
/// is used (the version has no list). VNC authentication verifies against
/// `auth`.
pub async fn offer_security<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    version: ProtocolVersion,
    offered: &[SecurityKind],
    auth: &VncAuth,
) -> Result<SecurityKind> {
    let chosen = match version {
        ProtocolVersion::V3_3 => {
            let kind = *offered
                .first()
                .ok_or_else(|| RfbError::security("no security types configured"))?;
            outstream.write_u32(kind.tag() as u32);
            outstream.flush().await?;
            kind
        }
        ProtocolVersion::V3_7 | ProtocolVersion::V3_8 => {
            if offered.is_empty() {
                return Err(RfbError::security("no security types configured"));
            }
            outstream.write_u8(offered.len() as u8);
            for kind in offered {
                outstream.write_u8(kind.tag());
            }
            outstream.flush().await?;

            let tag = instream.read_u8().await?;
            match SecurityKind::from_tag(tag).filter(|k| offered.contains(k)) {
                Some(kind) => kind,
                None => {
                    if version == ProtocolVersion::V3_8 {
                        write_security_failure(outstream, "security type not offered").await?;
                    }
                    return Err(RfbError::security(format!(
                        "client chose unoffered security type {}",
                        tag
                    )));
                }
            }
        }
    };

    match chosen {
        SecurityKind::None => {
            if version == ProtocolVersion::V3_8 {
                outstream.write_u32(0);
                outstream.flush().await?;
            }
        }
        SecurityKind::VncAuth => {
            let challenge = auth.generate_challenge();
            outstream.write_bytes(&challenge);
            outstream.flush().await?;

            let mut response = [0u8; 16];
            instream.read_bytes(&mut response).await?;

            if auth.verify_response(&response, &challenge) {
                outstream.write_u32(0);
                outstream.flush().await?;
            } else {
                if version == ProtocolVersion::V3_8 {
                    write_security_failure(outstream, "authentication failed").await?;
                } else {
                    outstream.write_u32(1);
                    outstream.flush().await?;
                }
                return Err(RfbError::security("client failed VNC authentication"));
            }
        }
    }

    Ok(chosen)
}

/// Write a failed SecurityResult with the 3.8 reason string.
async fn write_security_failure<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    reason: &str,
) -> Result<()> {
    outstream.write_u32(1);
    outstream.write_u32(reason.len() as u32);
    outstream.write_bytes(reason.as_bytes());
    outstream.flush().await?;
    Ok(())
}

/// Read the ClientInit shared flag.
pub async fn recv_client_init<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> Result<bool> {
    Ok(ClientInit::read_from(instream).await?.shared)
}

/// Send the ServerInit message.
pub async fn send_server_init<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    init: &ServerInit,
) -> Result<()> {
    init.write_to(outstream);
    outstream.flush().await?;
    Ok(())
}
