//! Endpoint resolution
//!
//! A [`Resolver`] turns the configured endpoints into the address list the
//! transport connects to. There are three variants, selected by
//! [`ResolverFactory::create`] from the target string:
//!
//! | target      | variant                  | endpoints are            |
//! |-------------|--------------------------|--------------------------|
//! | `static`    | [`StaticResolver`]       | `host[:port]` pairs      |
//! | `dns`       | [`DnsResolver`]          | hostnames to look up     |
//! | `dns+srv`   | [`SrvResolver`]          | SRV record names         |
//!
//! Targets may also be written as URIs (`etcd:///dns+srv`), in which case the
//! path selects the variant.
//!
//! Every delivery to an [`AddressListener`] is a complete address list that
//! replaces whatever was delivered before.

mod dns;
mod lookup;
mod srv;
mod static_list;

pub use dns::DnsResolver;
pub use lookup::{DnsLookup, MemoryDns, SrvRecord, SystemDns};
pub use srv::SrvResolver;
pub use static_list::StaticResolver;

use crate::address::{split_endpoints, Address};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Receives address lists from a resolver
#[cfg_attr(test, mockall::automock)]
pub trait AddressListener: Send + Sync {
    /// Called with the full current address list. An empty list means no
    /// endpoint is available.
    fn on_addresses(&self, addresses: Vec<Address>);
}

/// The resolution strategy named by a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Static,
    Dns,
    DnsSrv,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Static => "static",
            Scheme::Dns => "dns",
            Scheme::DnsSrv => "dns+srv",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    /// Accepts a bare scheme (`dns+srv`) or a `scheme:///<path>` URI whose
    /// path names the scheme. An empty target selects the default.
    fn from_str(target: &str) -> Result<Self> {
        let trimmed = target.trim();
        let path = match trimmed.split_once(":///") {
            Some((_, path)) => path,
            None => trimmed,
        };

        match path.trim_matches('/') {
            "" => Ok(ResolverFactory::DEFAULT_SCHEME),
            "static" => Ok(Scheme::Static),
            "dns" => Ok(Scheme::Dns),
            "dns+srv" => Ok(Scheme::DnsSrv),
            _ => Err(Error::UnknownResolver(target.to_string())),
        }
    }
}

/// A resolver of any variant
#[derive(Debug)]
pub enum Resolver {
    Static(StaticResolver),
    Dns(DnsResolver),
    DnsSrv(SrvResolver),
}

impl Resolver {
    /// Resolve and deliver the address list to `listener`.
    ///
    /// Lookup failures never surface here: they are logged and the affected
    /// names are left out of the delivered list.
    pub async fn start(&self, listener: Arc<dyn AddressListener>) {
        tracing::debug!("Starting {} resolver", self.scheme());
        match self {
            Resolver::Static(resolver) => resolver.start(listener.as_ref()),
            Resolver::Dns(resolver) => resolver.start(listener).await,
            Resolver::DnsSrv(resolver) => resolver.start(listener).await,
        }
    }

    /// Stop any background re-resolution. A no-op for resolvers that do not
    /// refresh.
    pub fn shutdown(&self) {
        match self {
            Resolver::Static(_) => {}
            Resolver::Dns(resolver) => resolver.shutdown(),
            Resolver::DnsSrv(resolver) => resolver.shutdown(),
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Resolver::Static(_) => Scheme::Static,
            Resolver::Dns(_) => Scheme::Dns,
            Resolver::DnsSrv(_) => Scheme::DnsSrv,
        }
    }
}

/// Builds the resolver named by a target from a shared endpoint configuration
///
/// # Example
///
/// ```rust
/// use etcdv3::resolver::{ResolverFactory, Scheme};
///
/// let factory = ResolverFactory::new(["10.0.0.1:2379,10.0.0.2"]);
/// let resolver = factory.create("static").unwrap();
/// assert_eq!(resolver.scheme(), Scheme::Static);
///
/// assert!(factory.create("foo").is_err());
/// ```
#[derive(Clone)]
pub struct ResolverFactory {
    endpoints: Vec<String>,
    lookup: Arc<dyn DnsLookup>,
    refresh_interval: Option<Duration>,
}

impl ResolverFactory {
    /// Scheme used when the caller names none
    pub const DEFAULT_SCHEME: Scheme = Scheme::Static;

    /// Create a factory over comma-separated endpoint strings. Entries are
    /// trimmed, empty entries dropped and duplicates collapsed.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            endpoints: split_endpoints(endpoints),
            lookup: Arc::new(SystemDns::default()),
            refresh_interval: None,
        }
    }

    /// Use `lookup` instead of the system DNS client.
    pub fn with_lookup(mut self, lookup: Arc<dyn DnsLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Re-resolve DNS and DNS SRV targets on this interval after `start`.
    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Build the resolver for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownResolver`] naming `target` when it selects no
    /// known scheme, and [`Error::InvalidEndpoint`] when an endpoint cannot be
    /// parsed for a variant that parses them.
    pub fn create(&self, target: &str) -> Result<Resolver> {
        let scheme: Scheme = target.parse()?;
        tracing::debug!(
            "Creating {} resolver for {} endpoint(s)",
            scheme,
            self.endpoints.len()
        );

        let resolver = match scheme {
            Scheme::Static => Resolver::Static(StaticResolver::new(&self.endpoints)?),
            Scheme::Dns => Resolver::Dns(DnsResolver::new(
                &self.endpoints,
                self.lookup.clone(),
                self.refresh_interval,
            )?),
            Scheme::DnsSrv => Resolver::DnsSrv(SrvResolver::new(
                &self.endpoints,
                self.lookup.clone(),
                self.refresh_interval,
            )),
        };
        Ok(resolver)
    }
}

impl fmt::Debug for ResolverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverFactory")
            .field("endpoints", &self.endpoints)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

/// Keep only the first occurrence of each address, in order.
fn dedup_in_order(addresses: Vec<Address>) -> Vec<Address> {
    let mut seen = std::collections::HashSet::with_capacity(addresses.len());
    addresses
        .into_iter()
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Background re-resolution shared by the DNS variants
#[derive(Debug)]
struct RefreshTask {
    interval: Option<Duration>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTask {
    fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|interval| !interval.is_zero()),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the refresh loop if an interval is configured. Each tick
    /// delivers a fresh full list; deliveries come from this one task so they
    /// stay ordered.
    fn spawn<F, Fut>(&self, listener: Arc<dyn AddressListener>, mut resolve: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Vec<Address>> + Send + 'static,
    {
        let Some(interval) = self.interval else {
            return;
        };

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await; // the first tick completes immediately

            loop {
                timer.tick().await;
                let addresses = resolve().await;
                tracing::debug!("Refreshed address list: {} address(es)", addresses.len());
                listener.on_addresses(addresses);
            }
        });

        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            tracing::debug!("Stopping resolver refresh task");
            handle.abort();
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.stop();
    }
}
