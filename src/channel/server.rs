use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::family::ProtocolFamily;
use crate::handle::{ConnectionHandle, State};
use crate::options::{self, OptionValue, Role, SocketOption};
use crate::provider::Provider;
use crate::selector::key::SelectionKey;
use crate::selector::ops::Ops;
use crate::selector::Selector;

use super::SocketChannel;

/// Selectable listening channel.
#[derive(Clone)]
pub struct ServerSocketChannel {
    handle: Arc<ConnectionHandle>,
    provider: Provider,
}

impl fmt::Debug for ServerSocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSocketChannel")
            .field("handle", &self.handle.id())
            .field("family", &self.handle.family())
            .field("bound", &self.is_bound())
            .field("provider", &self.provider.id())
            .finish()
    }
}

impl ServerSocketChannel {
    pub(crate) fn new(handle: Arc<ConnectionHandle>, provider: Provider) -> Self {
        ServerSocketChannel { handle, provider }
    }

    pub(crate) fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn valid_ops() -> Ops {
        Ops::ACCEPT
    }

    pub fn family(&self) -> ProtocolFamily {
        self.handle.family()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn is_bound(&self) -> bool {
        self.handle.state() == State::Bound
    }

    pub fn is_blocking(&self) -> bool {
        self.handle.is_blocking()
    }

    pub fn set_blocking(&self, block: bool) -> Result<()> {
        self.handle.set_blocking(block)
    }

    /// Binds to `addr` (wildcard when `None`) and starts listening. A
    /// `backlog` of `None` uses the provider's configured backlog. The
    /// channel is closed if it bound but could not listen.
    pub fn bind(&self, addr: Option<SocketAddr>, backlog: Option<u32>) -> Result<SocketAddr> {
        let backlog = backlog
            .filter(|&b| b > 0)
            .unwrap_or(self.provider.config().backlog);
        self.handle.bind_with(addr, Some(backlog))
    }

    /// Accepts a connection.
    ///
    /// Blocks in blocking mode; in non-blocking mode returns `None` when no
    /// connection is pending. The accepted channel is connected, in blocking
    /// mode, and belongs to the same provider as the listener.
    pub fn accept(&self) -> Result<Option<SocketChannel>> {
        Ok(self.accept_timeout(None)?.map(|(channel, _)| channel))
    }

    /// Accepts a connection together with the peer address the transport
    /// reported for it.
    pub(crate) fn accept_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<(SocketChannel, SocketAddr)>> {
        let Some((endpoint, peer)) = self.handle.accept(timeout)? else {
            return Ok(None);
        };
        let handle = ConnectionHandle::accepted(endpoint, self.handle.family());
        debug!(listener = self.handle.id(), handle = handle.id(), %peer, "accepted");
        Ok(Some((SocketChannel::new(handle, self.provider.clone()), peer)))
    }

    pub fn local_addr(&self) -> Result<Option<SocketAddr>> {
        self.handle.local_addr()
    }

    pub fn set_option(&self, option: SocketOption, value: impl Into<OptionValue>) -> Result<()> {
        self.handle.set_option(option, value.into())
    }

    pub fn option(&self, option: SocketOption) -> Result<OptionValue> {
        self.handle.option(option)
    }

    pub fn supported_options() -> Vec<SocketOption> {
        options::supported_options(Role::ServerSocket)
    }

    pub fn register(&self, selector: &Selector, ops: Ops) -> Result<SelectionKey> {
        selector.register(self.clone(), ops)
    }

    pub fn key_for(&self, selector: &Selector) -> Option<SelectionKey> {
        selector.key_for(&self.handle)
    }

    pub fn is_registered(&self) -> bool {
        self.handle.is_registered()
    }

    pub fn close(&self) {
        self.handle.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::handle::ReadOutcome;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    fn listener() -> (ServerSocketChannel, SocketAddr) {
        let provider = Provider::default();
        let server = provider
            .open_server_socket_channel(ProtocolFamily::Inet)
            .unwrap();
        let addr = server
            .bind(Some("127.0.0.1:0".parse().unwrap()), None)
            .unwrap();
        (server, addr)
    }

    #[test]
    fn test_accept_before_bind() {
        let provider = Provider::default();
        let server = provider
            .open_server_socket_channel(ProtocolFamily::Inet)
            .unwrap();
        assert!(matches!(server.accept(), Err(Error::NotYetBound)));
    }

    #[test]
    fn test_accept_nonblocking_empty() {
        let (server, _) = listener();
        server.set_blocking(false).unwrap();
        assert!(server.accept().unwrap().is_none());
    }

    #[test]
    fn test_accepted_channel_inherits_provider() {
        let (server, addr) = listener();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"hello").unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let accepted = server.accept().unwrap().unwrap();
        assert!(accepted.is_connected());
        assert!(accepted.is_blocking());
        assert_eq!(accepted.family(), ProtocolFamily::Inet);
        assert_eq!(accepted.provider().id(), server.provider().id());

        let mut buf = [0u8; 5];
        let mut got = 0;
        while got < 5 {
            match accepted.read(&mut buf[got..]).unwrap() {
                ReadOutcome::Bytes(n) => got += n,
                ReadOutcome::EndOfStream => break,
            }
        }
        accepted.write(&buf).unwrap();
        assert_eq!(&client.join().unwrap(), b"hello");
    }

    #[test]
    fn test_server_rejects_socket_ops() {
        let (server, _) = listener();
        let selector = server.provider().open_selector().unwrap();
        server.set_blocking(false).unwrap();

        assert!(matches!(
            server.register(&selector, Ops::READ),
            Err(Error::IllegalArgument(_))
        ));
        let key = server.register(&selector, Ops::ACCEPT).unwrap();
        assert!(key.channel().as_server().is_some());
    }

    #[test]
    fn test_bind_twice() {
        let (server, _) = listener();
        assert!(matches!(server.bind(None, None), Err(Error::AlreadyBound)));
    }

    #[test]
    fn test_server_options() {
        assert_eq!(ServerSocketChannel::supported_options().len(), 5);
        let (server, _) = listener();
        assert_eq!(
            server.option(SocketOption::ReuseAddress).unwrap(),
            OptionValue::Bool(true)
        );
        assert!(matches!(
            server.option(SocketOption::SendBufferSize),
            Err(Error::UnsupportedOperation(_))
        ));
    }
}
