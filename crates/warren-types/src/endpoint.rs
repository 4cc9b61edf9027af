use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing endpoint or server addresses.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    /// The address string was empty where one is required.
    #[error("address must not be empty")]
    Empty,
}

/// A `host:port` pair where either side may be absent.
///
/// Ports are kept as strings: an empty port on a local bind means "let the
/// OS assign one", and rendering must round-trip whatever was parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Split an address into host and port on the first `:`. An address
    /// without a colon is all host; a leading colon leaves the host empty.
    pub fn parse(address: &str) -> Self {
        match address.split_once(':') {
            Some((host, port)) => Self::new(host, port),
            None => Self::new(address, ""),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty() && self.port.is_empty()
    }

    pub fn has_port(&self) -> bool {
        !self.port.is_empty()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port.is_empty() {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Rewrite a `:PORT` address to `127.0.0.1:PORT`. Any other address is
/// returned unchanged, which also makes the expansion idempotent.
pub fn expand_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("127.0.0.1{address}")
    } else {
        address.to_string()
    }
}

/// A server coordinate in `[user@]host[:port]` form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerAddress {
    pub user: String,
    pub host: String,
    pub port: String,
}

impl ServerAddress {
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        if address.is_empty() {
            return Err(AddressError::Empty);
        }
        let (user, rest) = match address.split_once('@') {
            Some((user, rest)) => (user.to_string(), rest),
            None => (String::new(), address),
        };
        let endpoint = Endpoint::parse(rest);
        Ok(Self {
            user,
            host: endpoint.host,
            port: endpoint.port,
        })
    }

    /// The `host[:port]` part, without the user.
    pub fn address(&self) -> String {
        if self.port.is_empty() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.user.is_empty() {
            write!(f, "{}@", self.user)?;
        }
        write!(f, "{}", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let endpoint = Endpoint::parse("example.com:8080");
        assert_eq!(endpoint.host, "example.com");
        assert_eq!(endpoint.port, "8080");
        assert_eq!(endpoint.to_string(), "example.com:8080");
    }

    #[test]
    fn parses_address_without_port() {
        let endpoint = Endpoint::parse("example.com");
        assert_eq!(endpoint.host, "example.com");
        assert!(!endpoint.has_port());
        assert_eq!(endpoint.to_string(), "example.com");
    }

    #[test]
    fn parses_port_only_address() {
        let endpoint = Endpoint::parse(":8080");
        assert_eq!(endpoint.host, "");
        assert_eq!(endpoint.port, "8080");
    }

    #[test]
    fn expands_port_only_addresses() {
        assert_eq!(expand_address(":80"), "127.0.0.1:80");
        assert_eq!(expand_address("10.0.0.1:80"), "10.0.0.1:80");
        assert_eq!(expand_address("host"), "host");
    }

    #[test]
    fn expansion_is_idempotent() {
        for address in [":80", "127.0.0.1:80", "example.com", ""] {
            let once = expand_address(address);
            assert_eq!(expand_address(&once), once);
        }
    }

    #[test]
    fn rendering_round_trips() {
        for address in ["example.com:22", ":8080", "example.com"] {
            let endpoint = Endpoint::parse(address);
            assert_eq!(Endpoint::parse(&endpoint.to_string()), endpoint);
        }
    }

    #[test]
    fn parses_full_server_address() {
        let server = ServerAddress::parse("alice@bastion.acme.io:2222").unwrap();
        assert_eq!(server.user, "alice");
        assert_eq!(server.host, "bastion.acme.io");
        assert_eq!(server.port, "2222");
        assert_eq!(server.address(), "bastion.acme.io:2222");
        assert_eq!(server.to_string(), "alice@bastion.acme.io:2222");
    }

    #[test]
    fn parses_bare_server_host() {
        let server = ServerAddress::parse("bastion").unwrap();
        assert_eq!(server.user, "");
        assert_eq!(server.host, "bastion");
        assert_eq!(server.port, "");
        assert_eq!(server.address(), "bastion");
    }

    #[test]
    fn rejects_empty_server_address() {
        assert_eq!(ServerAddress::parse(""), Err(AddressError::Empty));
    }
}
