//! Endpoint parsing and address sets
//!
//! An endpoint is a user-supplied `host[:port]` descriptor. IPv6 literals must
//! use bracket notation (`[::1]:2379`). Endpoints are parsed once, when a
//! resolver is built, and malformed input is a configuration error.

use crate::error::{Error, Result};
use crate::DEFAULT_PORT;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};

/// A resolved `(host, port)` pair handed to the transport
///
/// The host is kept as given: an IP literal or a name the transport resolves
/// when it connects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a single `host[:port]` endpoint, applying [`DEFAULT_PORT`] when
    /// the port is omitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] naming the endpoint if it is empty,
    /// has more than one `:` outside brackets, or carries an invalid port.
    ///
    /// # Example
    ///
    /// ```rust
    /// use etcdv3::Address;
    ///
    /// let address = Address::parse("10.0.0.1").unwrap();
    /// assert_eq!(address.to_string(), "10.0.0.1:2379");
    ///
    /// assert!(Address::parse("a:b:c").is_err());
    /// ```
    pub fn parse(endpoint: &str) -> Result<Self> {
        let trimmed = endpoint.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_endpoint(endpoint, "endpoint is empty"));
        }

        let (host, port) = match trimmed.strip_prefix('[') {
            Some(rest) => {
                let (host, after) = rest
                    .split_once(']')
                    .ok_or_else(|| Error::invalid_endpoint(trimmed, "missing closing ']'"))?;
                if host.parse::<Ipv6Addr>().is_err() {
                    return Err(Error::invalid_endpoint(trimmed, "invalid IPv6 address"));
                }
                let port = match after {
                    "" => None,
                    after => Some(after.strip_prefix(':').ok_or_else(|| {
                        Error::invalid_endpoint(trimmed, "unexpected characters after ']'")
                    })?),
                };
                (host, port)
            }
            None => {
                let mut parts = trimmed.split(':');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(host), None, _) => (host, None),
                    (Some(host), Some(port), None) => (host, Some(port)),
                    _ => {
                        return Err(Error::invalid_endpoint(
                            trimmed,
                            "more than one ':' separator",
                        ))
                    }
                }
            }
        };

        let host = host.trim();
        if host.is_empty() {
            return Err(Error::invalid_endpoint(trimmed, "missing host"));
        }

        let port = match port.map(str::trim) {
            None => DEFAULT_PORT,
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| Error::invalid_endpoint(trimmed, format!("invalid port {:?}", port)))?,
        };

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The URI the transport connects to for this address
    pub fn uri(&self, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{}://{}", scheme, self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Split endpoint configuration strings on `,`, trim each entry, drop empty
/// entries and collapse duplicates while keeping first-seen order.
pub fn split_endpoints<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut endpoints: Vec<String> = Vec::new();
    for item in items {
        for entry in item.as_ref().split(',').map(str::trim) {
            if !entry.is_empty() && !endpoints.iter().any(|e| e == entry) {
                endpoints.push(entry.to_string());
            }
        }
    }
    endpoints
}

/// A deduplicated, immutable set of addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    addresses: BTreeSet<Address>,
}

impl AddressSet {
    /// Parse every endpoint, failing on the first malformed one.
    pub fn parse<I, S>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        split_endpoints(endpoints)
            .iter()
            .map(|endpoint| Address::parse(endpoint))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }

    pub fn to_vec(&self) -> Vec<Address> {
        self.addresses.iter().cloned().collect()
    }
}

impl FromIterator<Address> for AddressSet {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_only_uses_default_port() {
        let address = Address::parse("etcd0.example.com").unwrap();
        assert_eq!(address.host(), "etcd0.example.com");
        assert_eq!(address.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_host_and_port() {
        let address = Address::parse("  10.0.0.1:4001 ").unwrap();
        assert_eq!(address, Address::new("10.0.0.1", 4001));
    }

    #[test]
    fn test_parse_ipv6_brackets() {
        assert_eq!(Address::parse("[::1]:2380").unwrap(), Address::new("::1", 2380));
        assert_eq!(
            Address::parse("[fe80::1]").unwrap(),
            Address::new("fe80::1", DEFAULT_PORT)
        );
        assert_eq!(Address::new("::1", 2380).to_string(), "[::1]:2380");
    }

    #[test]
    fn test_parse_rejects_extra_separators() {
        let error = Address::parse("a:b:c").unwrap_err();
        assert!(error.is_configuration());
        assert!(error.to_string().contains("\"a:b:c\""));

        // bare IPv6 without brackets is ambiguous
        assert!(Address::parse("::1").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("   ").is_err());
        assert!(Address::parse(":2379").is_err());
        assert!(Address::parse("host:").is_err());
        assert!(Address::parse("host:http").is_err());
        assert!(Address::parse("host:70000").is_err());
        assert!(Address::parse("[::1").is_err());
        assert!(Address::parse("[::1]2379").is_err());
        assert!(Address::parse("[not-v6]:2379").is_err());
    }

    #[test]
    fn test_uri() {
        assert_eq!(Address::new("10.0.0.1", 2379).uri(false), "http://10.0.0.1:2379");
        assert_eq!(Address::new("::1", 2379).uri(true), "https://[::1]:2379");
    }

    #[test]
    fn test_split_endpoints() {
        let endpoints = split_endpoints(["a:1, b:2,,", " a:1 ", "c"]);
        assert_eq!(endpoints, vec!["a:1", "b:2", "c"]);
        assert!(split_endpoints([" , ,"]).is_empty());
    }

    #[test]
    fn test_address_set_collapses_duplicates() {
        let set = AddressSet::parse(["10.0.0.2:2379,10.0.0.1", "10.0.0.1:2379"]).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Address::new("10.0.0.1", 2379)));
        assert!(set.contains(&Address::new("10.0.0.2", 2379)));
    }

    #[test]
    fn test_address_set_names_bad_endpoint() {
        let error = AddressSet::parse(["10.0.0.1:2379", "a:b:c"]).unwrap_err();
        match error {
            Error::InvalidEndpoint { endpoint, .. } => assert_eq!(endpoint, "a:b:c"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
