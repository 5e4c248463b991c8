//! Channel behaviour over a transport whose endpoints never make progress.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mill_rdma::selector::poller::{Poller, Wake};
use mill_rdma::transport::{Endpoint, Transport};
use mill_rdma::{Error, OptionValue, ProtocolFamily, Provider, ProviderConfig, SocketOption, State};

/// Endpoint over a unix stream whose send buffer is full and whose peer
/// never reads, so it never becomes writable. Connections stay pending.
#[derive(Debug)]
struct Stalled {
    fail_listen: bool,
    accept_from: Option<SocketAddr>,
    local: UnixStream,
    _remote: UnixStream,
}

impl Stalled {
    fn new(fail_listen: bool, accept_from: Option<SocketAddr>) -> io::Result<Self> {
        let (mut local, remote) = UnixStream::pair()?;
        local.set_nonblocking(true)?;
        let chunk = [0u8; 4096];
        loop {
            match local.write(&chunk) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Stalled {
            fail_listen,
            accept_from,
            local,
            _remote: remote,
        })
    }
}

impl AsRawFd for Stalled {
    fn as_raw_fd(&self) -> RawFd {
        self.local.as_raw_fd()
    }
}

impl Endpoint for Stalled {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Inet
    }

    fn bind(&self, _: SocketAddr) -> io::Result<()> {
        Ok(())
    }

    fn listen(&self, _: u32) -> io::Result<()> {
        if self.fail_listen {
            Err(io::Error::new(io::ErrorKind::AddrInUse, "listen refused"))
        } else {
            Ok(())
        }
    }

    fn connect(&self, _: SocketAddr) -> io::Result<bool> {
        Ok(false)
    }

    fn finish_connect(&self) -> io::Result<bool> {
        Ok(false)
    }

    /// Hands out one connection whose peer is already gone, so only the
    /// address reported here identifies it.
    fn accept(&self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)> {
        match self.accept_from {
            Some(peer) => Ok((Box::new(Stalled::new(false, None)?), peer)),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn read(&self, _: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn write(&self, _: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn shutdown(&self, _: Shutdown) -> io::Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> io::Result<Option<SocketAddr>> {
        Ok(None)
    }

    fn peer_addr(&self) -> io::Result<Option<SocketAddr>> {
        Ok(None)
    }

    fn set_option(&self, _: SocketOption, _: OptionValue) -> io::Result<()> {
        Ok(())
    }

    fn option(&self, _: SocketOption) -> io::Result<OptionValue> {
        Ok(OptionValue::Bool(false))
    }
}

#[derive(Debug, Default)]
struct StalledTransport {
    fail_listen: bool,
    accept_from: Option<SocketAddr>,
}

impl Transport for StalledTransport {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports(&self, family: ProtocolFamily) -> bool {
        family == ProtocolFamily::Inet
    }

    fn open(&self, _: ProtocolFamily) -> io::Result<Box<dyn Endpoint>> {
        Ok(Box::new(Stalled::new(self.fail_listen, self.accept_from)?))
    }

    fn open_poller(&self, _: usize) -> io::Result<(Box<dyn Poller>, Arc<dyn Wake>)> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no poller"))
    }
}

fn provider(transport: StalledTransport) -> Provider {
    Provider::with_transport(ProviderConfig::default(), Arc::new(transport))
}

#[test]
fn test_close_releases_blocked_connect() {
    let provider = provider(StalledTransport::default());
    let channel = provider.open_socket_channel(ProtocolFamily::Inet).unwrap();

    let connector = {
        let channel = channel.clone();
        thread::spawn(move || channel.connect("10.0.0.1:7471".parse().unwrap()))
    };
    thread::sleep(Duration::from_millis(100));
    assert_eq!(channel.state(), State::Connecting);
    channel.close();

    match connector.join().unwrap() {
        Err(err) => assert!(matches!(err, Error::AsynchronousClose)),
        Ok(connected) => panic!("connect returned {} after close", connected),
    }
}

#[test]
fn test_connect_timeout_while_pending() {
    let provider = provider(StalledTransport::default());
    let socket = provider.open_socket(ProtocolFamily::Inet).unwrap();

    let err = socket
        .connect_timeout("10.0.0.1:7471".parse().unwrap(), Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
    assert!(!socket.channel().is_open());
}

#[test]
fn test_listen_failure_closes_server() {
    let provider = provider(StalledTransport {
        fail_listen: true,
        ..Default::default()
    });
    let server = provider
        .open_server_socket_channel(ProtocolFamily::Inet)
        .unwrap();

    let err = server
        .bind(Some("127.0.0.1:0".parse().unwrap()), Some(4))
        .unwrap_err();
    assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::AddrInUse));
    assert!(!server.is_open());
    assert!(matches!(
        server.bind(Some("127.0.0.1:0".parse().unwrap()), Some(4)),
        Err(Error::ClosedChannel)
    ));
}

#[test]
fn test_accept_keeps_transport_peer_address() {
    let peer: SocketAddr = "10.0.0.9:4000".parse().unwrap();
    let provider = provider(StalledTransport {
        accept_from: Some(peer),
        ..Default::default()
    });
    let server = provider.open_server_socket(ProtocolFamily::Inet).unwrap();
    server
        .bind(Some("127.0.0.1:0".parse().unwrap()), Some(4))
        .unwrap();

    let (socket, reported) = server.accept().unwrap();
    assert_eq!(reported, peer);
    assert!(socket.is_connected());
    assert_eq!(socket.peer_addr().unwrap(), None);
}
