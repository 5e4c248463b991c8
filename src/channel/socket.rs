use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Error, Result};
use crate::family::ProtocolFamily;
use crate::handle::{ConnectionHandle, ReadOutcome, State};
use crate::options::{self, OptionValue, Role, SocketOption};
use crate::provider::Provider;
use crate::selector::key::SelectionKey;
use crate::selector::ops::Ops;
use crate::selector::Selector;

/// Selectable stream channel over one rsocket.
///
/// Clones share the underlying connection; closing any clone closes it for
/// all of them.
#[derive(Clone)]
pub struct SocketChannel {
    handle: Arc<ConnectionHandle>,
    provider: Provider,
}

impl fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketChannel")
            .field("handle", &self.handle.id())
            .field("family", &self.handle.family())
            .field("state", &self.handle.state())
            .field("provider", &self.provider.id())
            .finish()
    }
}

impl SocketChannel {
    pub(crate) fn new(handle: Arc<ConnectionHandle>, provider: Provider) -> Self {
        SocketChannel { handle, provider }
    }

    pub(crate) fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Operations a socket channel can be selected for.
    pub fn valid_ops() -> Ops {
        Ops::READ | Ops::WRITE | Ops::CONNECT
    }

    pub fn family(&self) -> ProtocolFamily {
        self.handle.family()
    }

    pub fn state(&self) -> State {
        self.handle.state()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.state() == State::Connected
    }

    pub fn is_connection_pending(&self) -> bool {
        self.handle.state() == State::Connecting
    }

    pub fn is_blocking(&self) -> bool {
        self.handle.is_blocking()
    }

    pub fn set_blocking(&self, block: bool) -> Result<()> {
        self.handle.set_blocking(block)
    }

    /// Binds the local side; `None` picks the wildcard address and an
    /// ephemeral port.
    pub fn bind(&self, addr: Option<SocketAddr>) -> Result<SocketAddr> {
        self.handle.bind(addr)
    }

    /// Starts connecting to `addr`. See [`ConnectionHandle::connect`].
    pub fn connect(&self, addr: SocketAddr) -> Result<bool> {
        self.handle.connect(addr)
    }

    pub fn finish_connect(&self) -> Result<bool> {
        self.handle.finish_connect()
    }

    /// Connects a non-blocking channel by selecting on `selector` for
    /// `OP_CONNECT` until the connection completes or `timeout` elapses.
    ///
    /// Selections that report nothing for this channel are retried. On
    /// success the connect key is cancelled, so the channel can be switched
    /// back to blocking mode; it is purged from `selector` at its next select.
    pub fn connect_via(&self, selector: &Selector, addr: SocketAddr, timeout: Duration) -> Result<()> {
        if self.is_blocking() {
            return Err(Error::IllegalBlockingMode(
                "connect_via requires a non-blocking channel",
            ));
        }
        if self.connect(addr)? {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let key = self.register(selector, Ops::CONNECT)?;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                key.cancel();
                return Err(Error::timed_out("connect"));
            }

            let selected = selector.select_timeout(remaining)?;
            if !selector.selected_keys().remove(&key) {
                trace!(handle = self.handle.id(), selected, "connect not ready");
                continue;
            }
            if self.finish_connect()? {
                key.cancel();
                return Ok(());
            }
        }
    }

    /// Reads into `buf`. In non-blocking mode `Bytes(0)` means no data is
    /// available yet.
    pub fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.handle.read(buf)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.handle.write(buf)
    }

    pub fn shutdown_input(&self) -> Result<()> {
        self.handle.shutdown_input()
    }

    pub fn shutdown_output(&self) -> Result<()> {
        self.handle.shutdown_output()
    }

    pub fn local_addr(&self) -> Result<Option<SocketAddr>> {
        self.handle.local_addr()
    }

    pub fn peer_addr(&self) -> Result<Option<SocketAddr>> {
        self.handle.peer_addr()
    }

    pub fn set_option(&self, option: SocketOption, value: impl Into<OptionValue>) -> Result<()> {
        self.handle.set_option(option, value.into())
    }

    pub fn option(&self, option: SocketOption) -> Result<OptionValue> {
        self.handle.option(option)
    }

    pub fn supported_options() -> Vec<SocketOption> {
        options::supported_options(Role::Socket)
    }

    /// Registers with `selector`, or updates the interest set of the existing
    /// registration.
    pub fn register(&self, selector: &Selector, ops: Ops) -> Result<SelectionKey> {
        selector.register(self.clone(), ops)
    }

    /// The key registering this channel with `selector`, if any.
    pub fn key_for(&self, selector: &Selector) -> Option<SelectionKey> {
        selector.key_for(&self.handle)
    }

    /// Whether the channel has a valid registration with any selector.
    pub fn is_registered(&self) -> bool {
        self.handle.is_registered()
    }

    pub fn close(&self) {
        self.handle.close()
    }
}
