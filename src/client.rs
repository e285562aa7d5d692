//! The etcd client
//!
//! [`ClientBuilder::build`] creates the configured resolver, feeds its address
//! lists into a balanced tonic channel and wires token authentication in front
//! of every call.

use crate::address::{split_endpoints, Address};
use crate::auth::{AuthInterceptor, Credentials, GrpcAuthenticator, TokenCache};
use crate::error::{Error, Result};
use crate::grpc::etcdserverpb::{kv_client::KvClient, PutRequest, RangeRequest};
use crate::model::{GetResponse, PutResponse};
use crate::resolver::{AddressListener, DnsLookup, Resolver, ResolverFactory, Scheme};
use crate::{DEFAULT_CHANGE_BUFFER, DEFAULT_RESOLVER, DEFAULT_TOKEN_JITTER, DEFAULT_TOKEN_TTL};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tonic::transport::channel::Change;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Request;

/// Connection settings applied to every endpoint added to the channel
#[derive(Debug, Clone, Default)]
struct EndpointTemplate {
    tls: Option<ClientTlsConfig>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl EndpointTemplate {
    fn endpoint(&self, address: &Address) -> Result<Endpoint> {
        let mut endpoint = Endpoint::from_shared(address.uri(self.tls.is_some()))?;
        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.clone())?;
        }
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        Ok(endpoint)
    }
}

/// Translates full address lists into insert/remove changes for a balanced
/// channel
#[derive(Debug)]
struct ChannelListener {
    template: EndpointTemplate,
    changes: Sender<Change<Address, Endpoint>>,
    current: Mutex<Vec<Address>>,
}

impl ChannelListener {
    fn new(template: EndpointTemplate, changes: Sender<Change<Address, Endpoint>>) -> Self {
        Self {
            template,
            changes,
            current: Mutex::new(Vec::new()),
        }
    }

    fn addresses(&self) -> Vec<Address> {
        self.current.lock().clone()
    }

    fn send(&self, change: Change<Address, Endpoint>) {
        match self.changes.try_send(change) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Address change buffer is full, dropping change");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Channel is gone, ignoring address change");
            }
        }
    }
}

impl AddressListener for ChannelListener {
    fn on_addresses(&self, addresses: Vec<Address>) {
        let mut current = self.current.lock();
        let next: HashSet<&Address> = addresses.iter().collect();
        let previous: HashSet<&Address> = current.iter().collect();

        for removed in current.iter().filter(|address| !next.contains(address)) {
            tracing::debug!("Removing endpoint {}", removed);
            self.send(Change::Remove(removed.clone()));
        }
        for added in addresses.iter().filter(|address| !previous.contains(address)) {
            match self.template.endpoint(added) {
                Ok(endpoint) => {
                    tracing::debug!("Adding endpoint {}", added);
                    self.send(Change::Insert(added.clone(), endpoint));
                }
                Err(e) => tracing::warn!("Skipping endpoint {}: {}", added, e),
            }
        }

        if addresses.is_empty() {
            tracing::warn!("Resolver delivered no addresses");
        } else {
            tracing::info!("Using {} endpoint(s)", addresses.len());
        }
        *current = addresses;
    }
}

/// Builder for [`Client`]
#[derive(Clone)]
pub struct ClientBuilder {
    endpoints: Vec<String>,
    resolver: String,
    user: Option<String>,
    password: Option<String>,
    token_ttl: Duration,
    token_jitter: Duration,
    dns_refresh_interval: Option<Duration>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    tls: Option<(String, String)>,
    lookup: Option<Arc<dyn DnsLookup>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            resolver: DEFAULT_RESOLVER.to_string(),
            user: None,
            password: None,
            token_ttl: DEFAULT_TOKEN_TTL,
            token_jitter: DEFAULT_TOKEN_JITTER,
            dns_refresh_interval: None,
            connect_timeout: None,
            request_timeout: None,
            tls: None,
            lookup: None,
        }
    }
}

impl ClientBuilder {
    /// Add comma-separated endpoint strings. May be called more than once.
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.endpoints.extend(split_endpoints(endpoints));
        self
    }

    /// Resolver target: `static`, `dns`, `dns+srv`, or a `scheme:///<path>` URI.
    pub fn resolver(mut self, target: impl Into<String>) -> Self {
        self.resolver = target.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn token_jitter(mut self, jitter: Duration) -> Self {
        self.token_jitter = jitter;
        self
    }

    /// Re-resolve DNS and DNS SRV targets periodically.
    pub fn dns_refresh_interval(mut self, interval: Duration) -> Self {
        self.dns_refresh_interval = Some(interval);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Connect over TLS, trusting the PEM encoded `ca_pem` and expecting
    /// `domain` in the server certificate.
    pub fn tls(mut self, ca_pem: impl Into<String>, domain: impl Into<String>) -> Self {
        self.tls = Some((ca_pem.into(), domain.into()));
        self
    }

    /// Answer DNS queries from `lookup` instead of the system resolver.
    pub fn lookup(mut self, lookup: Arc<dyn DnsLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    fn tls_config(&self) -> Result<Option<ClientTlsConfig>> {
        let Some((ca_pem, domain)) = &self.tls else {
            return Ok(None);
        };
        if !ca_pem.contains("-----BEGIN CERTIFICATE-----") {
            return Err(Error::Configuration(
                "CA certificate is not PEM encoded".to_string(),
            ));
        }
        if domain.trim().is_empty() {
            return Err(Error::Configuration("TLS domain name is empty".to_string()));
        }

        let config = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca_pem))
            .domain_name(domain.trim());

        // Builds the TLS connector, which parses the certificate
        Endpoint::from_static("https://127.0.0.1")
            .tls_config(config.clone())
            .map_err(|e| Error::Configuration(format!("Invalid TLS configuration: {}", e)))?;

        Ok(Some(config))
    }

    /// Validate the configuration, start resolution and assemble the client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error (see [`Error::is_configuration`]) when no
    /// endpoint is configured, an endpoint is malformed, the resolver target
    /// is unknown, the refresh interval is zero or the TLS material is
    /// invalid. Lookup failures are not errors: they leave the affected names
    /// out of the address list.
    pub async fn build(self) -> Result<Client> {
        if self.endpoints.is_empty() {
            return Err(Error::Configuration("no endpoints configured".to_string()));
        }
        if self.dns_refresh_interval == Some(Duration::ZERO) {
            return Err(Error::Configuration(
                "DNS refresh interval must be positive".to_string(),
            ));
        }
        let tls = self.tls_config()?;

        let mut factory = ResolverFactory::new(&self.endpoints)
            .with_refresh_interval(self.dns_refresh_interval);
        if let Some(lookup) = self.lookup.clone() {
            factory = factory.with_lookup(lookup);
        }
        let resolver = factory.create(&self.resolver)?;

        let (channel, changes) = Channel::balance_channel::<Address>(DEFAULT_CHANGE_BUFFER);
        let template = EndpointTemplate {
            tls,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        };
        let listener = Arc::new(ChannelListener::new(template, changes));
        resolver.start(listener.clone()).await;

        let credentials = Credentials::from_parts(self.user, self.password);
        if credentials.is_none() {
            tracing::debug!("No credentials configured, calls are unauthenticated");
        }
        let authenticator = Arc::new(GrpcAuthenticator::new(channel.clone()));
        let cache = TokenCache::new(credentials, authenticator)
            .with_lifetime(self.token_ttl, self.token_jitter);

        tracing::info!(
            "Client ready: {} resolver over {} endpoint(s)",
            resolver.scheme(),
            factory.endpoints().len()
        );

        Ok(Client {
            kv: KvClient::new(channel),
            interceptor: AuthInterceptor::new(Arc::new(cache)),
            resolver: Arc::new(resolver),
            listener,
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("endpoints", &self.endpoints)
            .field("resolver", &self.resolver)
            .field("user", &self.user)
            .field("token_ttl", &self.token_ttl)
            .field("token_jitter", &self.token_jitter)
            .field("dns_refresh_interval", &self.dns_refresh_interval)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

/// An etcd v3 client
///
/// Cheap to clone; clones share the channel, the resolver and the token cache.
#[derive(Debug, Clone)]
pub struct Client {
    kv: KvClient<Channel>,
    interceptor: AuthInterceptor,
    resolver: Arc<Resolver>,
    listener: Arc<ChannelListener>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Store `value` under `key`. The response carries the previous record if
    /// the key existed.
    pub async fn put(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<PutResponse> {
        let request = Request::new(PutRequest {
            key: key.into(),
            value: value.into(),
            prev_kv: true,
            ..Default::default()
        });

        let mut kv = self.kv.clone();
        let response = self
            .interceptor
            .call(request, |request| async move { kv.put(request).await })
            .await?;
        Ok(response.into_inner().into())
    }

    /// Fetch the record stored under `key`.
    pub async fn get(&self, key: impl Into<Vec<u8>>) -> Result<GetResponse> {
        self.range(key.into(), Vec::new()).await
    }

    /// Fetch every record in `[key, range_end)`. A `range_end` of `"\0"`
    /// selects all keys from `key` onwards.
    pub async fn get_range(
        &self,
        key: impl Into<Vec<u8>>,
        range_end: impl Into<Vec<u8>>,
    ) -> Result<GetResponse> {
        self.range(key.into(), range_end.into()).await
    }

    async fn range(&self, key: Vec<u8>, range_end: Vec<u8>) -> Result<GetResponse> {
        let request = Request::new(RangeRequest {
            key,
            range_end,
            ..Default::default()
        });

        let mut kv = self.kv.clone();
        let response = self
            .interceptor
            .call(request, |request| async move { kv.range(request).await })
            .await?;
        Ok(response.into_inner().into())
    }

    /// The address list most recently delivered by the resolver
    pub fn addresses(&self) -> Vec<Address> {
        self.listener.addresses()
    }

    pub fn scheme(&self) -> Scheme {
        self.resolver.scheme()
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        self.interceptor.token_cache()
    }

    /// Stop background re-resolution. Calls keep using the last address list.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down {} resolver", self.resolver.scheme());
        self.resolver.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryDns;
    use tokio::sync::mpsc;

    // self-signed P-256 CA, valid until 2126
    const TEST_CA_PEM: &str = "\
        -----BEGIN CERTIFICATE-----\n\
        MIIBlDCCATugAwIBAgIUJhx3xO5JAugdIMhjwatbE64txrkwCgYIKoZIzj0EAwIw\n\
        FzEVMBMGA1UEAwwMZXRjZCB0ZXN0IENBMCAXDTI2MTAxOTE2MjE1N1oYDzIxMjYw\n\
        OTI1MTYyMTU3WjAXMRUwEwYDVQQDDAxldGNkIHRlc3QgQ0EwWTATBgcqhkjOPQIB\n\
        BggqhkjOPQMBBwNCAAR3W9gl3xNKKXDffhomgE8K7D/dhSFzqsytOCZSt52sp95N\n\
        Vc6prEZHUYoHF5RXodo0+BKzaxLeckLo8SrdVH/fo2MwYTAdBgNVHQ4EFgQUGMdG\n\
        8i+1FnMycC55d1lVSvCDzmUwHwYDVR0jBBgwFoAUGMdG8i+1FnMycC55d1lVSvCD\n\
        zmUwDwYDVR0TAQH/BAUwAwEB/zAOBgNVHQ8BAf8EBAMCAQYwCgYIKoZIzj0EAwID\n\
        RwAwRAIgFDccM2VCNGs3UGYU8oGWY6QZowEIiz5b5wVJqBWMVbgCICKUz6ZLzaGa\n\
        ghmLetQCrpqHz+i+sRtWMOpenLMDWwVR\n\
        -----END CERTIFICATE-----\n\
    ";

    fn describe(change: Change<Address, Endpoint>) -> String {
        match change {
            Change::Insert(address, _) => format!("+{}", address),
            Change::Remove(address) => format!("-{}", address),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Change<Address, Endpoint>>) -> Vec<String> {
        let mut changes = Vec::new();
        while let Ok(change) = rx.try_recv() {
            changes.push(describe(change));
        }
        changes
    }

    #[test]
    fn test_listener_translates_lists_into_changes() {
        let (tx, mut rx) = mpsc::channel(16);
        let listener = ChannelListener::new(EndpointTemplate::default(), tx);
        let a = Address::new("10.0.0.1", 2379);
        let b = Address::new("10.0.0.2", 2379);
        let c = Address::new("10.0.0.3", 2379);

        listener.on_addresses(vec![a.clone(), b.clone()]);
        assert_eq!(drain(&mut rx), vec!["+10.0.0.1:2379", "+10.0.0.2:2379"]);

        listener.on_addresses(vec![b.clone(), c.clone()]);
        assert_eq!(drain(&mut rx), vec!["-10.0.0.1:2379", "+10.0.0.3:2379"]);
        assert_eq!(listener.addresses(), vec![b.clone(), c.clone()]);

        // same list again changes nothing
        listener.on_addresses(vec![c, b]);
        assert!(drain(&mut rx).is_empty());

        listener.on_addresses(Vec::new());
        assert_eq!(drain(&mut rx).len(), 2);
        assert!(listener.addresses().is_empty());
    }

    #[test]
    fn test_listener_survives_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let listener = ChannelListener::new(EndpointTemplate::default(), tx);
        listener.on_addresses(vec![Address::new("10.0.0.1", 2379)]);
        assert_eq!(listener.addresses().len(), 1);
    }

    #[test]
    fn test_endpoint_template_uses_scheme() {
        let template = EndpointTemplate::default();
        let endpoint = template.endpoint(&Address::new("::1", 2379)).unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("http"));
        assert_eq!(endpoint.uri().port_u16(), Some(2379));
    }

    #[tokio::test]
    async fn test_build_requires_endpoints() {
        let error = Client::builder().build().await.unwrap_err();
        assert!(error.is_configuration());

        let error = Client::builder().endpoints([" , "]).build().await.unwrap_err();
        assert!(error.is_configuration());
    }

    #[tokio::test]
    async fn test_build_rejects_malformed_endpoint() {
        let error = Client::builder()
            .endpoints(["10.0.0.1:2379,a:b:c"])
            .build()
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidEndpoint { ref endpoint, .. } if endpoint == "a:b:c"));
    }

    #[tokio::test]
    async fn test_build_rejects_unknown_resolver() {
        let error = Client::builder()
            .endpoints(["10.0.0.1:2379"])
            .resolver("foo")
            .build()
            .await
            .unwrap_err();
        assert!(matches!(error, Error::UnknownResolver(ref target) if target == "foo"));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_refresh_interval() {
        let error = Client::builder()
            .endpoints(["etcd.local"])
            .resolver("dns")
            .dns_refresh_interval(Duration::ZERO)
            .build()
            .await
            .unwrap_err();
        assert!(error.is_configuration());
    }

    #[test]
    fn test_tls_config_accepts_pem_ca_and_domain() {
        let builder = Client::builder()
            .endpoints(["10.0.0.1:2379"])
            .tls(TEST_CA_PEM, " etcd.local ");
        let tls = builder.tls_config().unwrap();
        assert!(tls.is_some());

        let template = EndpointTemplate {
            tls,
            ..EndpointTemplate::default()
        };
        let endpoint = template.endpoint(&Address::new("10.0.0.1", 2379)).unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("https"));
        assert_eq!(endpoint.uri().port_u16(), Some(2379));
    }

    #[test]
    fn test_tls_listener_inserts_https_endpoints() {
        let tls = Client::builder().tls(TEST_CA_PEM, "etcd.local").tls_config().unwrap();
        let template = EndpointTemplate {
            tls,
            ..EndpointTemplate::default()
        };
        let (tx, mut rx) = mpsc::channel(16);
        let listener = ChannelListener::new(template, tx);

        listener.on_addresses(vec![Address::new("10.0.0.1", 2379), Address::new("::1", 2380)]);

        let mut schemes = Vec::new();
        while let Ok(change) = rx.try_recv() {
            match change {
                Change::Insert(_, endpoint) => {
                    schemes.push(endpoint.uri().scheme_str().map(str::to_string))
                }
                Change::Remove(address) => panic!("unexpected removal of {}", address),
            }
        }
        assert_eq!(schemes, vec![Some("https".to_string()); 2]);
    }

    #[tokio::test]
    async fn test_build_with_tls() {
        let client = Client::builder()
            .endpoints(["10.0.0.1:2379,10.0.0.2:2379"])
            .tls(TEST_CA_PEM, "etcd.local")
            .connect_timeout(Duration::from_millis(100))
            .build()
            .await
            .unwrap();

        assert_eq!(client.addresses().len(), 2);
        client.shutdown();
    }

    #[tokio::test]
    async fn test_build_rejects_tls_without_domain() {
        let error = Client::builder()
            .endpoints(["10.0.0.1:2379"])
            .tls(TEST_CA_PEM, "  ")
            .build()
            .await
            .unwrap_err();
        assert!(error.is_configuration());
    }

    #[tokio::test]
    async fn test_build_rejects_bad_tls_material() {
        let error = Client::builder()
            .endpoints(["10.0.0.1:2379"])
            .tls("not a certificate", "etcd.local")
            .build()
            .await
            .unwrap_err();
        assert!(error.is_configuration());
    }

    #[tokio::test]
    async fn test_build_with_dns_lookup_override() {
        let lookup = MemoryDns::new()
            .with_host("etcd.local", ["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()]);
        let client = Client::builder()
            .endpoints(["etcd.local:2380"])
            .resolver("dns")
            .lookup(Arc::new(lookup))
            .build()
            .await
            .unwrap();

        assert_eq!(client.scheme(), Scheme::Dns);
        assert_eq!(
            client.addresses(),
            vec![Address::new("10.0.0.1", 2380), Address::new("10.0.0.2", 2380)]
        );
        assert!(!client.token_cache().is_enabled());
        client.shutdown();
    }
}
