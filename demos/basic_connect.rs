//! Connects to an echo peer through a selector, then switches the channel to
//! blocking mode and round-trips four bytes.
//!
//! ```text
//! cargo run --example basic_connect [ADDR]
//! ```
//!
//! Without an address a loopback echo peer is started in-process.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use mill_rdma::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn spawn_echo_peer() -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            thread::spawn(move || {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 || stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            });
        }
    });
    Ok(addr)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mill_rdma=debug".parse()?))
        .init();

    let addr = match std::env::args().nth(1) {
        Some(arg) => arg.parse().with_context(|| format!("invalid address {}", arg))?,
        None => spawn_echo_peer()?,
    };

    let provider = Provider::system();
    info!(transport = provider.transport_name(), %addr, "connecting");

    let selector = provider.open_selector()?;
    let family = if addr.is_ipv6() {
        ProtocolFamily::Inet6
    } else {
        ProtocolFamily::Inet
    };
    let channel = provider.open_socket_channel(family)?;
    channel.set_blocking(false)?;

    let mut connected = channel.connect(addr)?;
    if connected {
        info!("connected immediately");
    }
    while !connected {
        channel.register(&selector, Ops::CONNECT)?;
        if selector.select_timeout(Duration::from_secs(10))? == 0 {
            bail!("timed out connecting to {}", addr);
        }
        for key in selector.selected_keys().drain() {
            if let Some(socket) = key.channel().as_socket() {
                connected = socket.finish_connect()?;
                if connected {
                    key.cancel();
                }
            }
        }
    }

    let sent = [0xca, 0xfe, 0xba, 0xbe];
    channel.set_blocking(true)?;
    channel.write(&sent)?;

    let mut buf = [0u8; 100];
    let n = channel.read(&mut buf)?.bytes();
    channel.close();
    selector.close();

    if buf[..n] != sent {
        bail!("echoed bytes incorrect: sent {:02x?}, got {:02x?}", sent, &buf[..n]);
    }
    info!(bytes = n, "echo verified");
    Ok(())
}
