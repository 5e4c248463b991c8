//! Socket option registry.
//!
//! Declares which options a socket or server socket accepts and validates
//! values before they reach the native endpoint. Nothing is cached here:
//! every read goes to the native layer, since other tools may reconfigure
//! the endpoint behind our back.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::transport::Endpoint;

/// Which kind of endpoint an option is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Socket,
    ServerSocket,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Socket => write!(f, "socket"),
            Role::ServerSocket => write!(f, "server socket"),
        }
    }
}

/// Value type carried by an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    Int,
}

/// A socket option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i32),
}

impl OptionValue {
    pub fn value_type(&self) -> OptionType {
        match self {
            OptionValue::Bool(_) => OptionType::Bool,
            OptionValue::Int(_) => OptionType::Int,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            OptionValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            OptionValue::Int(i) => Some(*i),
            OptionValue::Bool(_) => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(value)
    }
}

/// Options understood by RDMA sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketOption {
    /// `SO_RCVBUF`
    ReceiveBufferSize,
    /// `SO_SNDBUF`
    SendBufferSize,
    /// `SO_REUSEADDR`
    ReuseAddress,
    /// `TCP_NODELAY`
    NoDelay,
    /// Send queue depth of the underlying queue pair.
    RdmaSqSize,
    /// Receive queue depth of the underlying queue pair.
    RdmaRqSize,
    /// Maximum inline data size for sends.
    RdmaInlineSize,
}

const ALL: [SocketOption; 7] = [
    SocketOption::ReceiveBufferSize,
    SocketOption::SendBufferSize,
    SocketOption::ReuseAddress,
    SocketOption::NoDelay,
    SocketOption::RdmaSqSize,
    SocketOption::RdmaRqSize,
    SocketOption::RdmaInlineSize,
];

impl SocketOption {
    pub fn name(&self) -> &'static str {
        match self {
            SocketOption::ReceiveBufferSize => "SO_RCVBUF",
            SocketOption::SendBufferSize => "SO_SNDBUF",
            SocketOption::ReuseAddress => "SO_REUSEADDR",
            SocketOption::NoDelay => "TCP_NODELAY",
            SocketOption::RdmaSqSize => "RDMA_SQSIZE",
            SocketOption::RdmaRqSize => "RDMA_RQSIZE",
            SocketOption::RdmaInlineSize => "RDMA_INLINE",
        }
    }

    pub fn value_type(&self) -> OptionType {
        match self {
            SocketOption::ReuseAddress | SocketOption::NoDelay => OptionType::Bool,
            _ => OptionType::Int,
        }
    }

    /// Server sockets carry no send path, so `SO_SNDBUF` and `TCP_NODELAY`
    /// are socket-only.
    pub fn applies_to(&self, role: Role) -> bool {
        match role {
            Role::Socket => true,
            Role::ServerSocket => !matches!(
                self,
                SocketOption::SendBufferSize | SocketOption::NoDelay
            ),
        }
    }

    /// Returns `true` for the RDMA-specific extensions.
    pub fn is_transport_specific(&self) -> bool {
        matches!(
            self,
            SocketOption::RdmaSqSize | SocketOption::RdmaRqSize | SocketOption::RdmaInlineSize
        )
    }
}

impl fmt::Display for SocketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SocketOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ALL.iter()
            .copied()
            .find(|opt| opt.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::IllegalArgument(format!("unknown socket option '{}'", s)))
    }
}

/// Options supported for `role`.
pub fn supported_options(role: Role) -> Vec<SocketOption> {
    ALL.iter().copied().filter(|opt| opt.applies_to(role)).collect()
}

/// Validates `option` and `value` against the registry.
pub fn validate(role: Role, option: SocketOption, value: &OptionValue) -> Result<()> {
    check_supported(role, option)?;
    if value.value_type() != option.value_type() {
        return Err(Error::IllegalArgument(format!(
            "{} expects a {:?} value, got {:?}",
            option,
            option.value_type(),
            value
        )));
    }
    Ok(())
}

pub(crate) fn check_supported(role: Role, option: SocketOption) -> Result<()> {
    if option.applies_to(role) {
        Ok(())
    } else {
        Err(Error::UnsupportedOperation(format!(
            "option {} is not supported by a {}",
            option, role
        )))
    }
}

/// Validates and pushes `value` to the endpoint.
pub(crate) fn set_option(
    endpoint: &dyn Endpoint,
    role: Role,
    option: SocketOption,
    value: OptionValue,
) -> Result<()> {
    validate(role, option, &value)?;
    endpoint.set_option(option, value)?;
    Ok(())
}

/// Reads the current value from the endpoint.
pub(crate) fn get_option(
    endpoint: &dyn Endpoint,
    role: Role,
    option: SocketOption,
) -> Result<OptionValue> {
    check_supported(role, option)?;
    Ok(endpoint.option(option)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_supports_everything() {
        let opts = supported_options(Role::Socket);
        assert_eq!(opts.len(), 7);
        assert!(opts.contains(&SocketOption::NoDelay));
        assert!(opts.contains(&SocketOption::RdmaInlineSize));
    }

    #[test]
    fn test_server_socket_subset() {
        let opts = supported_options(Role::ServerSocket);
        assert!(opts.contains(&SocketOption::ReceiveBufferSize));
        assert!(opts.contains(&SocketOption::ReuseAddress));
        assert!(opts.contains(&SocketOption::RdmaSqSize));
        assert!(!opts.contains(&SocketOption::SendBufferSize));
        assert!(!opts.contains(&SocketOption::NoDelay));
    }

    #[test]
    fn test_validate_rejects_wrong_role() {
        let result = validate(
            Role::ServerSocket,
            SocketOption::NoDelay,
            &OptionValue::Bool(true),
        );
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let result = validate(
            Role::Socket,
            SocketOption::ReceiveBufferSize,
            &OptionValue::Bool(true),
        );
        assert!(matches!(result, Err(Error::IllegalArgument(_))));
        assert!(validate(Role::Socket, SocketOption::ReceiveBufferSize, &65536.into()).is_ok());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "so_rcvbuf".parse::<SocketOption>().unwrap(),
            SocketOption::ReceiveBufferSize
        );
        assert_eq!(
            "RDMA_INLINE".parse::<SocketOption>().unwrap(),
            SocketOption::RdmaInlineSize
        );
        assert!("SO_LINGER".parse::<SocketOption>().is_err());

        for opt in supported_options(Role::Socket) {
            assert_eq!(opt.to_string().parse::<SocketOption>().unwrap(), opt);
        }
    }
}
