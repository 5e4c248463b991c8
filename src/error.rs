use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::family::ProtocolFamily;
use crate::provider::ProviderId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by channels, selectors and the provider.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport, a protocol family or an operation is not available.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("unsupported address type: {addr} is not an {family} address")]
    UnsupportedAddressType {
        addr: SocketAddr,
        family: ProtocolFamily,
    },
    #[error("channel from provider {channel} cannot be registered with a selector from provider {selector}")]
    ProviderMismatch {
        channel: ProviderId,
        selector: ProviderId,
    },
    #[error("no connection pending")]
    NoConnectionPending,
    #[error("connection already pending")]
    ConnectionPending,
    #[error("channel is already connected")]
    AlreadyConnected,
    #[error("channel is not yet connected")]
    NotYetConnected,
    #[error("channel is already bound")]
    AlreadyBound,
    #[error("channel is not yet bound")]
    NotYetBound,
    #[error("channel is closed")]
    ClosedChannel,
    /// Another thread closed the channel while this thread was blocked on it.
    #[error("channel closed by another thread during a blocking operation")]
    AsynchronousClose,
    /// The blocked thread was interrupted; the channel has been closed.
    #[error("channel closed because the blocked thread was interrupted")]
    ClosedByInterrupt,
    #[error("selector is closed")]
    ClosedSelector,
    #[error("selection key is cancelled")]
    CancelledKey,
    #[error("illegal blocking mode: {0}")]
    IllegalBlockingMode(&'static str),
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    #[error("{0} is null")]
    NullArgument(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for the cancellation signals raised by closing or interrupting.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::AsynchronousClose | Error::ClosedByInterrupt)
    }

    /// The underlying native error kind, if this is an I/O failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub(crate) fn timed_out(what: &str) -> Self {
        Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out", what),
        ))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(e) => e.kind(),
            Error::UnsupportedOperation(_) | Error::UnsupportedAddressType { .. } => {
                io::ErrorKind::Unsupported
            }
            Error::NotYetConnected | Error::NoConnectionPending => io::ErrorKind::NotConnected,
            Error::ClosedChannel | Error::AsynchronousClose | Error::ClosedByInterrupt => {
                io::ErrorKind::BrokenPipe
            }
            Error::AlreadyBound => io::ErrorKind::AddrInUse,
            Error::IllegalArgument(_) | Error::NullArgument(_) | Error::IllegalBlockingMode(_) => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
