//! Blocking socket adaptors.
//!
//! `RdmaSocket` and `RdmaServerSocket` present a channel as a classic
//! blocking socket: `std::io::Read`/`Write`, connect and accept timeouts, and
//! read timeouts. The underlying channel must stay in blocking mode.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::handle::ReadOutcome;
use crate::options::{OptionValue, SocketOption};

use super::{ServerSocketChannel, SocketChannel};

/// Blocking stream socket over an rsocket channel.
#[derive(Debug)]
pub struct RdmaSocket {
    channel: SocketChannel,
    read_timeout: Option<Duration>,
}

impl RdmaSocket {
    pub(crate) fn new(channel: SocketChannel) -> Self {
        RdmaSocket {
            channel,
            read_timeout: None,
        }
    }

    pub fn channel(&self) -> &SocketChannel {
        &self.channel
    }

    fn check_blocking(&self) -> Result<()> {
        if self.channel.is_blocking() {
            Ok(())
        } else {
            Err(Error::IllegalBlockingMode(
                "socket adaptor requires a blocking channel",
            ))
        }
    }

    pub fn bind(&self, addr: Option<SocketAddr>) -> Result<SocketAddr> {
        self.channel.bind(addr)
    }

    /// Connects, blocking until the connection is established.
    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.check_blocking()?;
        self.channel.handle().connect(addr)?;
        Ok(())
    }

    /// Connects with an upper bound on the wait. The socket is closed if the
    /// connection does not complete in time.
    pub fn connect_timeout(&self, addr: SocketAddr, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::IllegalArgument("connect timeout must be non-zero".into()));
        }
        self.check_blocking()?;
        let deadline = Instant::now() + timeout;
        match self.channel.handle().connect_until(addr, Some(deadline)) {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.io_kind() == Some(io::ErrorKind::TimedOut) {
                    self.channel.close();
                }
                Err(err)
            }
        }
    }

    /// Sets the read timeout; `None` blocks indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::IllegalArgument("read timeout must be non-zero".into()));
        }
        self.read_timeout = timeout;
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn local_addr(&self) -> Result<Option<SocketAddr>> {
        self.channel.local_addr()
    }

    pub fn peer_addr(&self) -> Result<Option<SocketAddr>> {
        self.channel.peer_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn set_option(&self, option: SocketOption, value: impl Into<OptionValue>) -> Result<()> {
        self.channel.set_option(option, value)
    }

    pub fn option(&self, option: SocketOption) -> Result<OptionValue> {
        self.channel.option(option)
    }

    pub fn shutdown_input(&self) -> Result<()> {
        self.channel.shutdown_input()
    }

    pub fn shutdown_output(&self) -> Result<()> {
        self.channel.shutdown_output()
    }

    pub fn close(&self) {
        self.channel.close()
    }

    fn read_bytes(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_blocking()?;
        let outcome = self
            .channel
            .handle()
            .read_timeout(buf, self.read_timeout)?;
        Ok(match outcome {
            ReadOutcome::Bytes(n) => n,
            ReadOutcome::EndOfStream => 0,
        })
    }

    fn write_bytes(&self, buf: &[u8]) -> io::Result<usize> {
        self.check_blocking()?;
        Ok(self.channel.write(buf)?)
    }
}

impl Read for RdmaSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf)
    }
}

impl Read for &RdmaSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf)
    }
}

impl Write for RdmaSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &RdmaSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocking listening socket over an rsocket server channel.
#[derive(Debug)]
pub struct RdmaServerSocket {
    channel: ServerSocketChannel,
    accept_timeout: Option<Duration>,
}

impl RdmaServerSocket {
    pub(crate) fn new(channel: ServerSocketChannel) -> Self {
        RdmaServerSocket {
            channel,
            accept_timeout: None,
        }
    }

    pub fn channel(&self) -> &ServerSocketChannel {
        &self.channel
    }

    pub fn bind(&self, addr: Option<SocketAddr>, backlog: Option<u32>) -> Result<SocketAddr> {
        self.channel.bind(addr, backlog)
    }

    pub fn set_accept_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::IllegalArgument("accept timeout must be non-zero".into()));
        }
        self.accept_timeout = timeout;
        Ok(())
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        self.accept_timeout
    }

    /// Waits for a connection. Times out with `io::ErrorKind::TimedOut` if an
    /// accept timeout is set.
    pub fn accept(&self) -> Result<(RdmaSocket, SocketAddr)> {
        if !self.channel.is_blocking() {
            return Err(Error::IllegalBlockingMode(
                "socket adaptor requires a blocking channel",
            ));
        }
        let (channel, peer) = self
            .channel
            .accept_timeout(self.accept_timeout)?
            .ok_or(Error::IllegalState("blocking accept returned without a connection"))?;
        Ok((RdmaSocket::new(channel), peer))
    }

    pub fn local_addr(&self) -> Result<Option<SocketAddr>> {
        self.channel.local_addr()
    }

    pub fn set_option(&self, option: SocketOption, value: impl Into<OptionValue>) -> Result<()> {
        self.channel.set_option(option, value)
    }

    pub fn option(&self, option: SocketOption) -> Result<OptionValue> {
        self.channel.option(option)
    }

    pub fn close(&self) {
        self.channel.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::ProtocolFamily;
    use crate::provider::Provider;
    use std::thread;

    fn pair(provider: &Provider) -> (RdmaServerSocket, SocketAddr) {
        let server = provider.open_server_socket(ProtocolFamily::Inet).unwrap();
        let addr = server
            .bind(Some("127.0.0.1:0".parse().unwrap()), None)
            .unwrap();
        (server, addr)
    }

    #[test]
    fn test_read_write_through_adaptors() {
        let provider = Provider::default();
        let (server, addr) = pair(&provider);

        let echo = thread::spawn(move || {
            let (mut socket, _) = server.accept().unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let mut client = provider.open_socket(ProtocolFamily::Inet).unwrap();
        client.connect(addr).unwrap();
        client.write_all(b"abc").unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        echo.join().unwrap();
    }

    #[test]
    fn test_accept_timeout() {
        let provider = Provider::default();
        let (mut server, _) = pair(&provider);
        server
            .set_accept_timeout(Some(Duration::from_millis(50)))
            .unwrap();

        let err = server.accept().unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::TimedOut));
        assert!(server.channel().is_open());
    }

    #[test]
    fn test_read_timeout_maps_to_io() {
        let provider = Provider::default();
        let (server, addr) = pair(&provider);

        let mut client = provider.open_socket(ProtocolFamily::Inet).unwrap();
        client.connect(addr).unwrap();
        let _peer = server.accept().unwrap();

        client
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut buf = [0u8; 4];
        let err = client.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let provider = Provider::default();
        let mut client = provider.open_socket(ProtocolFamily::Inet).unwrap();
        assert!(matches!(
            client.set_read_timeout(Some(Duration::ZERO)),
            Err(Error::IllegalArgument(_))
        ));
        assert!(matches!(
            client.connect_timeout("127.0.0.1:9".parse().unwrap(), Duration::ZERO),
            Err(Error::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_nonblocking_channel_rejected() {
        let provider = Provider::default();
        let mut client = provider.open_socket(ProtocolFamily::Inet).unwrap();
        client.channel().set_blocking(false).unwrap();
        let err = client.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
