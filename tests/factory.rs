use std::io;
use std::sync::Arc;

use mill_rdma::selector::poller::{Poller, Wake};
use mill_rdma::transport::{Endpoint, Transport};
use mill_rdma::{sockets, Error, ProtocolFamily, Provider, ProviderConfig, SocketOption};

/// Transport for a host without RDMA devices.
#[derive(Debug)]
struct NoDevices;

impl Transport for NoDevices {
    fn name(&self) -> &'static str {
        "no-devices"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn supports(&self, _: ProtocolFamily) -> bool {
        false
    }

    fn open(&self, _: ProtocolFamily) -> io::Result<Box<dyn Endpoint>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no devices"))
    }

    fn open_poller(&self, _: usize) -> io::Result<(Box<dyn Poller>, Arc<dyn Wake>)> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no devices"))
    }
}

#[test]
fn test_unavailable_transport() {
    let provider = Provider::with_transport(ProviderConfig::default(), Arc::new(NoDevices));
    assert!(!provider.is_available());
    assert_eq!(provider.transport_name(), "no-devices");

    assert!(matches!(
        provider.open_socket_channel(ProtocolFamily::Inet),
        Err(Error::UnsupportedOperation(_))
    ));
    assert!(matches!(
        provider.open_server_socket_channel(ProtocolFamily::Inet6),
        Err(Error::UnsupportedOperation(_))
    ));
    assert!(matches!(
        provider.open_selector(),
        Err(Error::UnsupportedOperation(_))
    ));
}

#[test]
fn test_null_family() {
    assert!(matches!(sockets::open_socket(None), Err(Error::NullArgument(_))));
    assert!(matches!(
        sockets::open_server_socket_channel(None),
        Err(Error::NullArgument(_))
    ));
    let err = sockets::open_socket_channel(None).unwrap_err();
    assert_eq!(err.to_string(), "protocol family is null");
}

#[test]
fn test_unix_family() {
    let err = sockets::open_socket_channel(Some(ProtocolFamily::Unix)).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));
}

#[test]
fn test_family_mismatch_keeps_state() {
    let provider = Provider::default();
    let channel = provider.open_socket_channel(ProtocolFamily::Inet).unwrap();

    let err = channel.connect("[::1]:80".parse().unwrap()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedAddressType { .. }));
    let err = channel.bind(Some("[::]:0".parse().unwrap())).unwrap_err();
    assert!(matches!(err, Error::UnsupportedAddressType { .. }));
    assert_eq!(channel.state(), mill_rdma::State::Unbound);
    assert!(channel.is_open());
}

#[test]
fn test_options_by_name() {
    let option: SocketOption = "rdma_sqsize".parse().unwrap();
    assert_eq!(option, SocketOption::RdmaSqSize);
    assert!(option.is_transport_specific());
    assert!("SO_LINGER".parse::<SocketOption>().is_err());
}
