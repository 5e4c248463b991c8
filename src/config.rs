use crate::options::{OptionValue, SocketOption};

/// Default listen backlog for server sockets.
pub const DEFAULT_BACKLOG: u32 = 50;
/// Default number of readiness events a selector collects per poll.
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Configuration for a provider.
///
/// Use `ProviderConfig::builder()` for ergonomic construction. A provider
/// copies its configuration when it is built; later changes to a config
/// value do not affect existing providers.
///
/// ## Defaults
///
/// - prefer_ipv6: false, default-family openers use IPv4
/// - backlog: 50
/// - events_capacity: 1024
/// - default_options: none
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Open IPv6 sockets from the default-family openers when the transport supports them
    pub prefer_ipv6: bool,
    /// Listen backlog used when `bind` is not given one
    pub backlog: u32,
    /// Readiness events collected per poll
    pub events_capacity: usize,
    /// Options applied to every new socket channel
    pub default_options: Vec<(SocketOption, OptionValue)>,
}

impl ProviderConfig {
    /// Create a new builder for ProviderConfig
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::new()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            prefer_ipv6: false,
            backlog: DEFAULT_BACKLOG,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            default_options: Vec::new(),
        }
    }
}

/// Builder for ProviderConfig.
///
/// Unset fields use the defaults from `ProviderConfig::default()`.
#[derive(Debug, Default)]
pub struct ProviderConfigBuilder {
    prefer_ipv6: Option<bool>,
    backlog: Option<u32>,
    events_capacity: Option<usize>,
    default_options: Vec<(SocketOption, OptionValue)>,
}

impl ProviderConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer IPv6 for the default-family openers
    pub fn prefer_ipv6(mut self, enabled: bool) -> Self {
        self.prefer_ipv6 = Some(enabled);
        self
    }

    /// Set the default listen backlog
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Set the number of events collected per poll
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    /// Add an option applied to every new socket channel. Setting the same
    /// option twice keeps the last value.
    pub fn default_option(mut self, option: SocketOption, value: impl Into<OptionValue>) -> Self {
        let value = value.into();
        match self.default_options.iter_mut().find(|(o, _)| *o == option) {
            Some(slot) => slot.1 = value,
            None => self.default_options.push((option, value)),
        }
        self
    }

    /// Build the ProviderConfig
    pub fn build(self) -> ProviderConfig {
        let default = ProviderConfig::default();
        ProviderConfig {
            prefer_ipv6: self.prefer_ipv6.unwrap_or(default.prefer_ipv6),
            backlog: self.backlog.filter(|&b| b > 0).unwrap_or(default.backlog),
            events_capacity: self
                .events_capacity
                .filter(|&c| c > 0)
                .unwrap_or(default.events_capacity),
            default_options: self.default_options,
        }
    }
}
