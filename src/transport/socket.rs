//! rsocket-compatible transport over kernel stream sockets.
//!
//! Implements the rsocket contract (non-blocking connect, queue-pair sizing
//! options, a poller separate from the application's default one) on plain
//! TCP sockets, so the provider runs on hosts without RDMA hardware. Queue
//! pair parameters are kept with the endpoint, the way rsocket keeps them
//! until the connection is established.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::family::ProtocolFamily;
use crate::options::{OptionValue, SocketOption};
use crate::selector::poller::{MioPoller, Poller, Wake};
use crate::transport::{Endpoint, Transport};

/// Default rsocket send queue depth.
pub const DEFAULT_SQ_SIZE: i32 = 384;
/// Default rsocket receive queue depth.
pub const DEFAULT_RQ_SIZE: i32 = 384;
/// Default rsocket inline data size.
pub const DEFAULT_INLINE_SIZE: i32 = 64;

#[derive(Debug, Clone, Copy)]
struct QueuePair {
    sq_size: i32,
    rq_size: i32,
    inline_size: i32,
}

impl Default for QueuePair {
    fn default() -> Self {
        Self {
            sq_size: DEFAULT_SQ_SIZE,
            rq_size: DEFAULT_RQ_SIZE,
            inline_size: DEFAULT_INLINE_SIZE,
        }
    }
}

/// Transport that emulates rsockets on top of kernel TCP sockets.
#[derive(Debug, Default)]
pub struct SocketTransport {
    ipv6: OnceLock<bool>,
}

impl SocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn ipv6_enabled(&self) -> bool {
        *self
            .ipv6
            .get_or_init(|| Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP)).is_ok())
    }
}

impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "rsocket-tcp"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports(&self, family: ProtocolFamily) -> bool {
        match family {
            ProtocolFamily::Inet => true,
            ProtocolFamily::Inet6 => self.ipv6_enabled(),
            ProtocolFamily::Unix => false,
        }
    }

    fn open(&self, family: ProtocolFamily) -> io::Result<Box<dyn Endpoint>> {
        let domain = match family {
            ProtocolFamily::Inet => Domain::IPV4,
            ProtocolFamily::Inet6 => Domain::IPV6,
            ProtocolFamily::Unix => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "rsockets do not support the UNIX family",
                ))
            }
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        if family == ProtocolFamily::Inet6 {
            socket.set_only_v6(true)?;
        }
        Ok(Box::new(SocketEndpoint::new(socket, family)?))
    }

    fn open_poller(&self, events_capacity: usize) -> io::Result<(Box<dyn Poller>, Arc<dyn Wake>)> {
        let (poller, waker) = MioPoller::new(events_capacity)?;
        Ok((Box::new(poller), waker))
    }
}

/// One emulated rsocket.
#[derive(Debug)]
pub struct SocketEndpoint {
    socket: Socket,
    family: ProtocolFamily,
    qp: Mutex<QueuePair>,
}

impl SocketEndpoint {
    fn new(socket: Socket, family: ProtocolFamily) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            family,
            qp: Mutex::new(QueuePair::default()),
        })
    }
}

fn in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

fn not_connected(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotConnected || err.raw_os_error() == Some(libc::ENOTCONN)
}

fn positive(option: SocketOption, value: OptionValue) -> io::Result<i32> {
    match value {
        OptionValue::Int(n) if n > 0 => Ok(n),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} requires a positive integer, got {:?}", option, value),
        )),
    }
}

fn flag(option: SocketOption, value: OptionValue) -> io::Result<bool> {
    value.as_bool().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} requires a boolean, got {:?}", option, value),
        )
    })
}

impl AsRawFd for SocketEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Endpoint for SocketEndpoint {
    fn family(&self) -> ProtocolFamily {
        self.family
    }

    fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        self.socket.bind(&SockAddr::from(addr))
    }

    fn listen(&self, backlog: u32) -> io::Result<()> {
        self.socket
            .listen(backlog.min(libc::c_int::MAX as u32) as libc::c_int)
    }

    fn connect(&self, addr: SocketAddr) -> io::Result<bool> {
        match self.socket.connect(&SockAddr::from(addr)) {
            Ok(()) => Ok(true),
            Err(e) if in_progress(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn finish_connect(&self) -> io::Result<bool> {
        if let Some(err) = self.socket.take_error()? {
            return Err(err);
        }
        match self.socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if not_connected(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn accept(&self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)> {
        let (socket, addr) = self.socket.accept()?;
        let addr = addr.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "peer address is not an IP address")
        })?;
        let endpoint = SocketEndpoint::new(socket, self.family)?;
        *endpoint.qp.lock() = *self.qp.lock();
        Ok((Box::new(endpoint), addr))
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.socket).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.socket).write(buf)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.socket.shutdown(how)
    }

    fn local_addr(&self) -> io::Result<Option<SocketAddr>> {
        Ok(self.socket.local_addr()?.as_socket())
    }

    fn peer_addr(&self) -> io::Result<Option<SocketAddr>> {
        match self.socket.peer_addr() {
            Ok(addr) => Ok(addr.as_socket()),
            Err(e) if not_connected(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_option(&self, option: SocketOption, value: OptionValue) -> io::Result<()> {
        match option {
            SocketOption::ReceiveBufferSize => self
                .socket
                .set_recv_buffer_size(positive(option, value)? as usize),
            SocketOption::SendBufferSize => self
                .socket
                .set_send_buffer_size(positive(option, value)? as usize),
            SocketOption::ReuseAddress => self.socket.set_reuse_address(flag(option, value)?),
            SocketOption::NoDelay => self.socket.set_nodelay(flag(option, value)?),
            SocketOption::RdmaSqSize => {
                self.qp.lock().sq_size = positive(option, value)?;
                Ok(())
            }
            SocketOption::RdmaRqSize => {
                self.qp.lock().rq_size = positive(option, value)?;
                Ok(())
            }
            SocketOption::RdmaInlineSize => {
                self.qp.lock().inline_size = positive(option, value)?;
                Ok(())
            }
        }
    }

    fn option(&self, option: SocketOption) -> io::Result<OptionValue> {
        let clamp = |n: usize| OptionValue::Int(n.min(i32::MAX as usize) as i32);
        Ok(match option {
            SocketOption::ReceiveBufferSize => clamp(self.socket.recv_buffer_size()?),
            SocketOption::SendBufferSize => clamp(self.socket.send_buffer_size()?),
            SocketOption::ReuseAddress => OptionValue::Bool(self.socket.reuse_address()?),
            SocketOption::NoDelay => OptionValue::Bool(self.socket.nodelay()?),
            SocketOption::RdmaSqSize => OptionValue::Int(self.qp.lock().sq_size),
            SocketOption::RdmaRqSize => OptionValue::Int(self.qp.lock().rq_size),
            SocketOption::RdmaInlineSize => OptionValue::Int(self.qp.lock().inline_size),
        })
    }
}
