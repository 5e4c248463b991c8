//! # Mill-RDMA
//! Selectable channels over RDMA sockets (rsockets) for synchronous Rust programs.
//!
//! Mill-RDMA provides socket and server-socket channels, blocking socket adaptors
//! and a readiness selector over a transport whose connection establishment and
//! readiness notification differ from kernel stream sockets, while keeping the
//! familiar non-blocking `connect` / `finish_connect` / `select` lifecycle.
//! ## Core Philosophy
//! Mill-RDMA was designed for applications that:
//! - **Own their threads** and want readiness selection without an async runtime
//! - **Need RDMA tuning** (queue pair sizes, inline data) through ordinary socket options
//! - **Mix blocking and non-blocking** use of the same connection
//! ## Features
//! - **Provider factory**: channels and selectors that only mix within one provider
//! - **Blocking and non-blocking modes**: cancellable by close or thread interrupt
//! - **Level-triggered selection**: over mio's edge-triggered polling
//! - **Pluggable transport**: the default transport emulates rsockets over TCP
//! - **Thread-safe**: registration and cancellation from any thread, lock-free key table
//! ## Architecture Overview
//! ```text
//! ┌──────────┐    ┌───────────────┐    ┌──────────────────┐    ┌──────────┐
//! │ Provider │───▶│ SocketChannel │───▶│ ConnectionHandle │───▶│ Endpoint │
//! └──────────┘    └───────────────┘    └──────────────────┘    └──────────┘
//!      │                  │ register                                 ▲
//!      ▼                  ▼                                          │
//! ┌──────────┐    ┌───────────────┐    ┌──────────────────┐          │
//! │ Selector │───▶│ SelectionKey  │───▶│ Poller (mio)     │──────────┘
//! └──────────┘    └───────────────┘    └──────────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_rdma::{Ops, ProtocolFamily, Provider};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::system();
//!     let selector = provider.open_selector()?;
//!
//!     let channel = provider.open_socket_channel(ProtocolFamily::Inet)?;
//!     channel.set_blocking(false)?;
//!
//!     let mut connected = channel.connect("127.0.0.1:7".parse()?)?;
//!     while !connected {
//!         let key = channel.register(&selector, Ops::CONNECT)?;
//!         if selector.select_timeout(Duration::from_secs(5))? > 0 {
//!             for ready in selector.selected_keys().drain() {
//!                 if let Some(socket) = ready.channel().as_socket() {
//!                     connected = socket.finish_connect()?;
//!                 }
//!             }
//!         }
//!         if connected {
//!             key.cancel();
//!         }
//!     }
//!
//!     channel.set_blocking(true)?;
//!     channel.write(&[0xca, 0xfe, 0xba, 0xbe])?;
//!     Ok(())
//! }
//! ```
//!
//! - [`Provider`]: Factory for channels, adaptors and selectors
//! - [`SocketChannel`] / [`ServerSocketChannel`]: Selectable channels
//! - [`RdmaSocket`] / [`RdmaServerSocket`]: Blocking adaptors implementing `Read`/`Write`
//! - [`Selector`]: Readiness multiplexer and [`SelectionKey`] registrations
//! - [`options`]: Socket option registry
//! - [`transport`]: The native transport seam
//! - [`interrupt`]: Per-thread interrupt status
//! - [`error`]: Error types and result handling

pub mod channel;
pub mod config;
pub mod error;
pub mod family;
pub mod handle;
pub mod interrupt;
pub mod options;
pub mod provider;
pub mod selector;
pub mod sockets;
pub mod transport;

mod park;

pub use channel::{Channel, RdmaServerSocket, RdmaSocket, ServerSocketChannel, SocketChannel};
pub use config::{ProviderConfig, ProviderConfigBuilder};
pub use error::{Error, Result};
pub use family::ProtocolFamily;
pub use handle::{ReadOutcome, State};
pub use interrupt::InterruptHandle;
pub use options::{OptionType, OptionValue, Role, SocketOption};
pub use provider::{Provider, ProviderId};
pub use selector::{Ops, SelectedKeys, SelectionKey, Selector};

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use mill_rdma::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::{Channel, RdmaServerSocket, RdmaSocket, ServerSocketChannel, SocketChannel};
    pub use crate::config::ProviderConfig;
    pub use crate::error::{Error, Result};
    pub use crate::family::ProtocolFamily;
    pub use crate::handle::ReadOutcome;
    pub use crate::options::{OptionValue, SocketOption};
    pub use crate::provider::Provider;
    pub use crate::selector::{Ops, SelectionKey, Selector};
}
