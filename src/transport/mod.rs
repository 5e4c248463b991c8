//! The native transport seam.
//!
//! The provider never talks to RDMA verbs directly. A `Transport` opens
//! `Endpoint`s (one per socket) and the `Poller` that selectors use to watch
//! them; everything above this module is transport-agnostic.

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crate::family::ProtocolFamily;
use crate::options::{OptionValue, SocketOption};
use crate::park;
use crate::selector::poller::{Poller, Wake};

pub mod socket;

pub use socket::SocketTransport;

/// Direction a parked thread waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Readable,
    Writable,
}

/// A native socket endpoint.
///
/// Endpoints are always non-blocking: operations that cannot complete
/// return `io::ErrorKind::WouldBlock`, and the connection handle layers
/// blocking mode on top.
pub trait Endpoint: AsRawFd + Send + Sync + fmt::Debug {
    fn family(&self) -> ProtocolFamily;

    fn bind(&self, addr: SocketAddr) -> io::Result<()>;

    fn listen(&self, backlog: u32) -> io::Result<()>;

    /// Starts a connection; `Ok(true)` if it completed synchronously,
    /// `Ok(false)` if it is in progress.
    fn connect(&self, addr: SocketAddr) -> io::Result<bool>;

    /// Checks a pending connection; `Ok(false)` while still in progress.
    fn finish_connect(&self) -> io::Result<bool>;

    fn accept(&self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)>;

    /// `Ok(0)` means end-of-stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<Option<SocketAddr>>;

    fn peer_addr(&self) -> io::Result<Option<SocketAddr>>;

    fn set_option(&self, option: SocketOption, value: OptionValue) -> io::Result<()>;

    fn option(&self, option: SocketOption) -> io::Result<OptionValue>;

    /// Parks the calling thread until this endpoint is ready for `wait`, the
    /// descriptor `signal` becomes readable, or `timeout` elapses.
    fn park(&self, wait: Wait, signal: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
        park::wait(self.as_raw_fd(), wait, signal, timeout)
    }
}

/// Factory for endpoints and pollers of one native transport.
pub trait Transport: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether the transport can be used on this host at all.
    fn is_available(&self) -> bool;

    fn supports(&self, family: ProtocolFamily) -> bool;

    fn open(&self, family: ProtocolFamily) -> io::Result<Box<dyn Endpoint>>;

    /// Opens the transport's own readiness mechanism for a selector.
    fn open_poller(&self, events_capacity: usize) -> io::Result<(Box<dyn Poller>, Arc<dyn Wake>)>;
}
