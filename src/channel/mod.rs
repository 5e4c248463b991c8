//! Selectable channels.
//!
//! [`SocketChannel`] and [`ServerSocketChannel`] own a connection handle and
//! the provider that created them. [`Channel`] is what a selection key
//! carries: the closed set of channel kinds a selector understands.

use std::sync::Arc;

use crate::handle::{ConnectionHandle, State};
use crate::provider::ProviderId;
use crate::selector::ops::Ops;
use crate::selector::poller::Readiness;

pub mod server;
pub mod socket;
pub mod stream;

pub use server::ServerSocketChannel;
pub use socket::SocketChannel;
pub use stream::{RdmaServerSocket, RdmaSocket};

/// A channel registered with a selector.
#[derive(Clone, Debug)]
pub enum Channel {
    Socket(SocketChannel),
    Server(ServerSocketChannel),
}

impl Channel {
    pub(crate) fn handle(&self) -> &Arc<ConnectionHandle> {
        match self {
            Channel::Socket(channel) => channel.handle(),
            Channel::Server(channel) => channel.handle(),
        }
    }

    pub(crate) fn provider_id(&self) -> ProviderId {
        match self {
            Channel::Socket(channel) => channel.provider().id(),
            Channel::Server(channel) => channel.provider().id(),
        }
    }

    pub fn valid_ops(&self) -> Ops {
        match self {
            Channel::Socket(_) => SocketChannel::valid_ops(),
            Channel::Server(_) => ServerSocketChannel::valid_ops(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle().is_open()
    }

    pub fn as_socket(&self) -> Option<&SocketChannel> {
        match self {
            Channel::Socket(channel) => Some(channel),
            Channel::Server(_) => None,
        }
    }

    pub fn as_server(&self) -> Option<&ServerSocketChannel> {
        match self {
            Channel::Server(channel) => Some(channel),
            Channel::Socket(_) => None,
        }
    }

    /// Maps native readiness to the operations it makes ready for this
    /// channel, restricted to `interest`.
    pub(crate) fn translate_ready(&self, readiness: &Readiness, interest: Ops) -> Ops {
        // an error or hang-up completes every pending operation
        if readiness.is_error() || readiness.is_hup() {
            return interest;
        }

        let mut ready = Ops::EMPTY;
        match self {
            Channel::Server(_) => {
                if readiness.is_readable() {
                    ready |= Ops::ACCEPT;
                }
            }
            Channel::Socket(channel) => {
                let state = channel.handle().state();
                if readiness.is_readable() {
                    ready |= Ops::READ;
                }
                if readiness.is_writable() {
                    match state {
                        State::Connecting => ready |= Ops::CONNECT,
                        State::Connected => ready |= Ops::WRITE,
                        _ => {}
                    }
                }
            }
        }
        ready & interest
    }
}

impl From<SocketChannel> for Channel {
    fn from(channel: SocketChannel) -> Self {
        Channel::Socket(channel)
    }
}

impl From<ServerSocketChannel> for Channel {
    fn from(channel: ServerSocketChannel) -> Self {
        Channel::Server(channel)
    }
}
