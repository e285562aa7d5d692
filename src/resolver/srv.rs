use super::{dedup_in_order, AddressListener, DnsLookup, RefreshTask};
use crate::address::{split_endpoints, Address};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Resolver that reads DNS SRV records for each configured query name
///
/// Every record's `(target, port)` goes into one flat list in discovery
/// order. A `(target, port)` pair already seen under an earlier name or
/// record is dropped, so the delivered list has set semantics. Record
/// priority and weight are parsed but not used for ordering; callers that
/// need priority-based failover must layer it on top.
#[derive(Debug)]
pub struct SrvResolver {
    names: Arc<[String]>,
    lookup: Arc<dyn DnsLookup>,
    refresh: RefreshTask,
}

impl SrvResolver {
    pub fn new<I, S>(names: I, lookup: Arc<dyn DnsLookup>, refresh_interval: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: split_endpoints(names).into(),
            lookup,
            refresh: RefreshTask::new(refresh_interval),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Query every name once and return the combined addresses. Names whose
    /// lookup fails contribute nothing.
    pub async fn resolve(&self) -> Vec<Address> {
        resolve_names(&self.names, self.lookup.as_ref()).await
    }

    pub async fn start(&self, listener: Arc<dyn AddressListener>) {
        listener.on_addresses(self.resolve().await);

        let names = self.names.clone();
        let lookup = self.lookup.clone();
        self.refresh.spawn(listener, move || {
            let names = names.clone();
            let lookup = lookup.clone();
            async move { resolve_names(&names, lookup.as_ref()).await }
        });
    }

    pub fn shutdown(&self) {
        self.refresh.stop();
    }
}

async fn resolve_names(names: &[String], lookup: &dyn DnsLookup) -> Vec<Address> {
    let lookups = names.iter().map(|name| async move {
        match lookup.lookup_srv(name).await {
            Ok(records) => {
                tracing::debug!("SRV lookup for {} returned {} record(s)", name, records.len());
                records.iter().map(|record| record.address()).collect()
            }
            Err(e) => {
                tracing::warn!("SRV lookup for {} failed, skipping: {}", name, e);
                Vec::new()
            }
        }
    });

    // first occurrence wins
    let addresses = join_all(lookups).await.into_iter().flatten().collect();
    dedup_in_order(addresses)
}
