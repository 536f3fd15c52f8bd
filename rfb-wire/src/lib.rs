//! RFB wire protocol layer.
//!
//! This crate implements everything that touches raw protocol bytes:
//!
//! - [`io`]: buffered big-endian readers/writers over any async duplex half
//! - [`error`]: the engine-wide error taxonomy ([`RfbError`])
//! - [`messages`]: typed client-to-server and server-to-client messages
//! - [`handshake`]: version/security/init negotiation for both roles
//! - [`security`]: the VNC password challenge/response (DES with the
//!   historical bit-reversed key quirk)
//! - [`session`]: the handshake phase state machine
//!
//! All multibyte integers on the wire are big-endian. The crate never opens
//! sockets; callers hand it the halves of whatever byte-stream duplex they
//! own.

pub mod error;
pub mod handshake;
pub mod io;
pub mod messages;
pub mod security;
pub mod session;

pub use error::{Result, RfbError};
pub use handshake::{ProtocolVersion, SecurityKind};
pub use io::{RfbInStream, RfbOutStream};
pub use session::SessionState;
