//! Entry points on the process-wide provider.
//!
//! Each function takes the protocol family as an `Option` so a missing
//! family is reported as [`Error::NullArgument`] rather than defaulted:
//!
//! ```rust,no_run
//! use mill_rdma::{sockets, Ops, ProtocolFamily};
//!
//! let selector = sockets::open_selector()?;
//! let channel = sockets::open_socket_channel(Some(ProtocolFamily::Inet))?;
//! channel.set_blocking(false)?;
//! channel.register(&selector, Ops::CONNECT)?;
//! # Ok::<(), mill_rdma::Error>(())
//! ```

use crate::channel::{RdmaServerSocket, RdmaSocket, ServerSocketChannel, SocketChannel};
use crate::error::{Error, Result};
use crate::family::ProtocolFamily;
use crate::provider::Provider;
use crate::selector::Selector;

fn require_family(family: Option<ProtocolFamily>) -> Result<ProtocolFamily> {
    family.ok_or(Error::NullArgument("protocol family"))
}

/// Opens an unbound blocking socket.
pub fn open_socket(family: Option<ProtocolFamily>) -> Result<RdmaSocket> {
    Provider::system().open_socket(require_family(family)?)
}

/// Opens an unbound blocking server socket.
pub fn open_server_socket(family: Option<ProtocolFamily>) -> Result<RdmaServerSocket> {
    Provider::system().open_server_socket(require_family(family)?)
}

pub fn open_socket_channel(family: Option<ProtocolFamily>) -> Result<SocketChannel> {
    Provider::system().open_socket_channel(require_family(family)?)
}

pub fn open_server_socket_channel(family: Option<ProtocolFamily>) -> Result<ServerSocketChannel> {
    Provider::system().open_server_socket_channel(require_family(family)?)
}

pub fn open_selector() -> Result<Selector> {
    Provider::system().open_selector()
}
