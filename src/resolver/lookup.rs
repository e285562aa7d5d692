//! DNS lookups behind a trait, so resolvers can run against the system
//! resolver or a fixed in-memory table.

use crate::address::Address;
use crate::error::{Error, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use tokio::sync::OnceCell;

/// A parsed SRV record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Target host, without the trailing root dot
    pub target: String,
}

impl SrvRecord {
    pub fn new(priority: u16, weight: u16, port: u16, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            priority,
            weight,
            port,
            target: target.trim_end_matches('.').to_string(),
        }
    }

    pub fn address(&self) -> Address {
        Address::new(self.target.clone(), self.port)
    }
}

/// Source of A/AAAA and SRV answers
#[tonic::async_trait]
pub trait DnsLookup: fmt::Debug + Send + Sync + 'static {
    /// Look up the IP addresses of `host`.
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>>;

    /// Look up the SRV records published under `name`.
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>>;
}

/// Lookups through the operating system's resolver configuration
///
/// The underlying resolver is created on first use.
#[derive(Default)]
pub struct SystemDns {
    resolver: OnceCell<TokioAsyncResolver>,
}

impl SystemDns {
    async fn resolver(&self) -> &TokioAsyncResolver {
        self.resolver
            .get_or_init(|| async {
                TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
                    tracing::warn!(
                        "Failed to read system DNS configuration, using defaults: {}",
                        e
                    );
                    TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
                })
            })
            .await
    }
}

impl fmt::Debug for SystemDns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDns")
            .field("initialized", &self.resolver.initialized())
            .finish()
    }
}

#[tonic::async_trait]
impl DnsLookup for SystemDns {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        tracing::debug!("Looking up A/AAAA records for {}", host);
        let lookup = self
            .resolver()
            .await
            .lookup_ip(host)
            .await
            .map_err(|e| Error::Resolution {
                name: host.to_string(),
                message: e.to_string(),
            })?;
        Ok(lookup.iter().collect())
    }

    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        tracing::debug!("Looking up SRV records for {}", name);
        let lookup = self
            .resolver()
            .await
            .srv_lookup(name)
            .await
            .map_err(|e| Error::Resolution {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(lookup
            .iter()
            .map(|srv| {
                SrvRecord::new(
                    srv.priority(),
                    srv.weight(),
                    srv.port(),
                    srv.target().to_utf8(),
                )
            })
            .collect())
    }
}

/// A fixed in-memory DNS table
///
/// Names without an entry fail to resolve. Useful for tests and for pinning
/// names when no DNS server is reachable.
///
/// # Example
///
/// ```rust
/// use etcdv3::resolver::{MemoryDns, SrvRecord};
///
/// let dns = MemoryDns::new()
///     .with_host("etcd0.local", ["10.0.0.1".parse().unwrap()])
///     .with_srv("_etcd-client._tcp.local", [SrvRecord::new(0, 0, 2379, "etcd0.local.")]);
/// ```
#[derive(Debug, Default)]
pub struct MemoryDns {
    hosts: RwLock<HashMap<String, Vec<IpAddr>>>,
    srv: RwLock<HashMap<String, Vec<SrvRecord>>>,
}

impl MemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: &str, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.set_host(host, ips);
        self
    }

    pub fn with_srv(self, name: &str, records: impl IntoIterator<Item = SrvRecord>) -> Self {
        self.set_srv(name, records);
        self
    }

    /// Replace the A/AAAA answer for `host`.
    pub fn set_host(&self, host: &str, ips: impl IntoIterator<Item = IpAddr>) {
        self.hosts
            .write()
            .insert(host.to_string(), ips.into_iter().collect());
    }

    /// Replace the SRV answer for `name`.
    pub fn set_srv(&self, name: &str, records: impl IntoIterator<Item = SrvRecord>) {
        self.srv
            .write()
            .insert(name.to_string(), records.into_iter().collect());
    }

    /// Drop every answer for `name`, so lookups of it fail.
    pub fn remove(&self, name: &str) {
        self.hosts.write().remove(name);
        self.srv.write().remove(name);
    }
}

fn no_records(name: &str) -> Error {
    Error::Resolution {
        name: name.to_string(),
        message: "no records found".to_string(),
    }
}

#[tonic::async_trait]
impl DnsLookup for MemoryDns {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.hosts
            .read()
            .get(host)
            .cloned()
            .ok_or_else(|| no_records(host))
    }

    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        self.srv
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| no_records(name))
    }
}
