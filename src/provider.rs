//! Provider factory.
//!
//! A `Provider` opens channels and selectors over one transport. Channels
//! and selectors remember the provider that made them and only mix with
//! their own kind: registering a channel with another provider's selector
//! fails with [`Error::ProviderMismatch`].

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::channel::{RdmaServerSocket, RdmaSocket, ServerSocketChannel, SocketChannel};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::family::ProtocolFamily;
use crate::handle::ConnectionHandle;
use crate::options::{Role, SocketOption};
use crate::selector::Selector;
use crate::transport::{SocketTransport, Transport};

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(u64);

impl ProviderId {
    fn next() -> Self {
        ProviderId(NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Inner {
    id: ProviderId,
    config: ProviderConfig,
    transport: Arc<dyn Transport>,
}

/// Factory for rsocket channels, adaptors and selectors.
///
/// Cheap to clone; clones are the same provider.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<Inner>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.inner.id)
            .field("transport", &self.inner.transport.name())
            .finish()
    }
}

impl Default for Provider {
    fn default() -> Self {
        Provider::new(ProviderConfig::default())
    }
}

impl Provider {
    /// Creates a provider over the default transport.
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_transport(config, Arc::new(SocketTransport::new()))
    }

    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        let id = ProviderId::next();
        debug!(provider = %id, transport = transport.name(), "provider created");
        Provider {
            inner: Arc::new(Inner {
                id,
                config,
                transport,
            }),
        }
    }

    /// The process-wide provider, created on first use with the default
    /// configuration.
    pub fn system() -> &'static Provider {
        static SYSTEM: OnceLock<Provider> = OnceLock::new();
        SYSTEM.get_or_init(Provider::default)
    }

    pub fn id(&self) -> ProviderId {
        self.inner.id
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub fn is_available(&self) -> bool {
        self.inner.transport.is_available()
    }

    /// Family used by the default-family openers.
    pub fn default_family(&self) -> ProtocolFamily {
        if self.inner.config.prefer_ipv6 && self.inner.transport.supports(ProtocolFamily::Inet6) {
            ProtocolFamily::Inet6
        } else {
            ProtocolFamily::Inet
        }
    }

    fn check_transport(&self) -> Result<()> {
        if self.inner.transport.is_available() {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation(format!(
                "transport {} is not available",
                self.inner.transport.name()
            )))
        }
    }

    fn open_handle(&self, family: ProtocolFamily, role: Role) -> Result<Arc<ConnectionHandle>> {
        self.check_transport()?;
        if !self.inner.transport.supports(family) {
            return Err(Error::UnsupportedOperation(format!(
                "protocol family {} is not supported by {}",
                family,
                self.inner.transport.name()
            )));
        }
        ConnectionHandle::open(&*self.inner.transport, family, role)
    }

    /// Opens an unbound socket channel in blocking mode.
    pub fn open_socket_channel(&self, family: ProtocolFamily) -> Result<SocketChannel> {
        let handle = self.open_handle(family, Role::Socket)?;
        for (option, value) in &self.inner.config.default_options {
            if let Err(e) = handle.set_option(*option, *value) {
                handle.close();
                return Err(e);
            }
        }
        Ok(SocketChannel::new(handle, self.clone()))
    }

    pub fn open_socket_channel_default(&self) -> Result<SocketChannel> {
        self.open_socket_channel(self.default_family())
    }

    /// Opens an unbound server socket channel in blocking mode, with
    /// `SO_REUSEADDR` enabled.
    pub fn open_server_socket_channel(&self, family: ProtocolFamily) -> Result<ServerSocketChannel> {
        let handle = self.open_handle(family, Role::ServerSocket)?;
        if let Err(e) = handle.set_option(SocketOption::ReuseAddress, true.into()) {
            handle.close();
            return Err(e);
        }
        Ok(ServerSocketChannel::new(handle, self.clone()))
    }

    pub fn open_server_socket_channel_default(&self) -> Result<ServerSocketChannel> {
        self.open_server_socket_channel(self.default_family())
    }

    pub fn open_selector(&self) -> Result<Selector> {
        self.check_transport()?;
        let capacity = self.inner.config.events_capacity;
        let (poller, waker) = self.inner.transport.open_poller(capacity)?;
        Ok(Selector::new(self.inner.id, poller, waker, capacity))
    }

    /// Opens a blocking socket adaptor.
    pub fn open_socket(&self, family: ProtocolFamily) -> Result<RdmaSocket> {
        Ok(RdmaSocket::new(self.open_socket_channel(family)?))
    }

    /// Opens a blocking server socket adaptor.
    pub fn open_server_socket(&self, family: ProtocolFamily) -> Result<RdmaServerSocket> {
        Ok(RdmaServerSocket::new(self.open_server_socket_channel(family)?))
    }

    /// Datagram channels are not available over rsockets.
    pub fn open_datagram_channel(&self, family: ProtocolFamily) -> Result<Infallible> {
        Err(Error::UnsupportedOperation(format!(
            "datagram channels ({}) are not supported by {}",
            family,
            self.inner.transport.name()
        )))
    }

    /// Pipes are not available over rsockets.
    pub fn open_pipe(&self) -> Result<Infallible> {
        Err(Error::UnsupportedOperation(format!(
            "pipes are not supported by {}",
            self.inner.transport.name()
        )))
    }
}
