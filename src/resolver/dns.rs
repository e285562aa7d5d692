use super::{dedup_in_order, AddressListener, DnsLookup, RefreshTask};
use crate::address::{split_endpoints, Address};
use crate::error::Result;
use futures::future::join_all;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Resolver that looks up the A/AAAA records of each endpoint host
///
/// Each endpoint keeps its own port (or the default port). Endpoints whose
/// host is already an IP literal are passed through without a lookup.
#[derive(Debug)]
pub struct DnsResolver {
    hosts: Arc<[Address]>,
    lookup: Arc<dyn DnsLookup>,
    refresh: RefreshTask,
}

impl DnsResolver {
    pub fn new<I, S>(
        endpoints: I,
        lookup: Arc<dyn DnsLookup>,
        refresh_interval: Option<Duration>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = split_endpoints(endpoints)
            .iter()
            .map(|endpoint| Address::parse(endpoint))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            hosts: hosts.into(),
            lookup,
            refresh: RefreshTask::new(refresh_interval),
        })
    }

    /// Look up every host once and return the combined addresses.
    pub async fn resolve(&self) -> Vec<Address> {
        resolve_hosts(&self.hosts, self.lookup.as_ref()).await
    }

    pub async fn start(&self, listener: Arc<dyn AddressListener>) {
        listener.on_addresses(self.resolve().await);

        let hosts = self.hosts.clone();
        let lookup = self.lookup.clone();
        self.refresh.spawn(listener, move || {
            let hosts = hosts.clone();
            let lookup = lookup.clone();
            async move { resolve_hosts(&hosts, lookup.as_ref()).await }
        });
    }

    pub fn shutdown(&self) {
        self.refresh.stop();
    }
}

async fn resolve_hosts(hosts: &[Address], lookup: &dyn DnsLookup) -> Vec<Address> {
    let lookups = hosts.iter().map(|host| async move {
        if let Ok(ip) = host.host().parse::<IpAddr>() {
            return vec![Address::new(ip.to_string(), host.port())];
        }

        match lookup.lookup_ip(host.host()).await {
            Ok(ips) => ips
                .into_iter()
                .map(|ip| Address::new(ip.to_string(), host.port()))
                .collect(),
            Err(e) => {
                tracing::warn!("DNS lookup for {} failed, skipping: {}", host.host(), e);
                Vec::new()
            }
        }
    });

    let addresses = join_all(lookups).await.into_iter().flatten().collect();
    dedup_in_order(addresses)
}
