//! Protocol families and address validation.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{Error, Result};

/// Protocol family of a channel, fixed when the channel is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
    /// Local-domain sockets. No RDMA transport supports this family.
    Unix,
}

impl ProtocolFamily {
    /// Returns `true` if `addr` belongs to this family.
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        matches!(
            (self, addr),
            (ProtocolFamily::Inet, SocketAddr::V4(_)) | (ProtocolFamily::Inet6, SocketAddr::V6(_))
        )
    }

    /// Checks that `addr` can be used by a channel of this family.
    pub fn check(&self, addr: &SocketAddr) -> Result<()> {
        if self.matches(addr) {
            Ok(())
        } else {
            Err(Error::UnsupportedAddressType {
                addr: *addr,
                family: *self,
            })
        }
    }

    /// The wildcard address with an ephemeral port.
    pub fn wildcard(&self) -> Option<SocketAddr> {
        match self {
            ProtocolFamily::Inet => Some(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)),
            ProtocolFamily::Inet6 => Some(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)),
            ProtocolFamily::Unix => None,
        }
    }

    /// The loopback address of this family.
    pub fn loopback(&self) -> Option<IpAddr> {
        match self {
            ProtocolFamily::Inet => Some(Ipv4Addr::LOCALHOST.into()),
            ProtocolFamily::Inet6 => Some(Ipv6Addr::LOCALHOST.into()),
            ProtocolFamily::Unix => None,
        }
    }

    /// Maps an unspecified target address to the loopback address, keeping the port.
    pub(crate) fn connect_target(&self, addr: SocketAddr) -> SocketAddr {
        match self.loopback() {
            Some(lo) if addr.ip().is_unspecified() => SocketAddr::new(lo, addr.port()),
            _ => addr,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFamily::Inet => write!(f, "INET"),
            ProtocolFamily::Inet6 => write!(f, "INET6"),
            ProtocolFamily::Unix => write!(f, "UNIX"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_matches() {
        let v4: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let v6: SocketAddr = "[fe80::1]:9000".parse().unwrap();

        assert!(ProtocolFamily::Inet.matches(&v4));
        assert!(!ProtocolFamily::Inet.matches(&v6));
        assert!(ProtocolFamily::Inet6.matches(&v6));
        assert!(!ProtocolFamily::Inet6.matches(&v4));
        assert!(!ProtocolFamily::Unix.matches(&v4));
    }

    #[test]
    fn test_check_mismatch() {
        let v6: SocketAddr = "[::1]:80".parse().unwrap();
        match ProtocolFamily::Inet.check(&v6) {
            Err(Error::UnsupportedAddressType { addr, family }) => {
                assert_eq!(addr, v6);
                assert_eq!(family, ProtocolFamily::Inet);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_connect_target_unspecified() {
        let any: SocketAddr = "0.0.0.0:7".parse().unwrap();
        assert_eq!(
            ProtocolFamily::Inet.connect_target(any),
            "127.0.0.1:7".parse::<SocketAddr>().unwrap()
        );

        let any6: SocketAddr = "[::]:7".parse().unwrap();
        assert_eq!(
            ProtocolFamily::Inet6.connect_target(any6),
            "[::1]:7".parse::<SocketAddr>().unwrap()
        );

        let fixed: SocketAddr = "192.168.1.4:7".parse().unwrap();
        assert_eq!(ProtocolFamily::Inet.connect_target(fixed), fixed);
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(
            ProtocolFamily::Inet.wildcard(),
            Some("0.0.0.0:0".parse().unwrap())
        );
        assert!(ProtocolFamily::Unix.wildcard().is_none());
    }
}
