//! # etcdv3
//!
//! A client connection layer for etcd v3 clusters over gRPC.
//!
//! ## Features
//!
//! - **Endpoint Resolution**: static `host:port` lists, DNS names and DNS SRV records
//! - **Balanced Transport**: every resolved address joins one balanced tonic channel
//! - **Token Authentication**: lazily fetched tokens with expiry and jitter, at most one refresh in flight
//! - **Embedded Server**: an in-memory etcd-compatible server for tests and local development
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use etcdv3::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .endpoints(["10.0.0.1:2379,10.0.0.2:2379"])
//!         .resolver("static")
//!         .user("root")
//!         .password("secret")
//!         .build()
//!         .await?;
//!
//!     client.put("key", "value").await?;
//!     let response = client.get("key").await?;
//!     for kv in response.kvs() {
//!         println!("{} = {}", kv.key_str(), kv.value_str());
//!     }
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```

use std::time::Duration;

pub mod address;
pub mod auth;
pub mod client;
pub mod error;
pub mod grpc;
pub mod model;
pub mod resolver;
pub mod store;

pub use address::{Address, AddressSet};
pub use auth::{AuthInterceptor, Credentials, TokenCache, TokenStatus};
pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use model::{GetResponse, KeyValue, PutResponse, ResponseHeader};
pub use resolver::{AddressListener, Resolver, ResolverFactory, Scheme};
pub use store::MemoryStore;

/// Creates an embedded etcd-compatible server on `addr`
///
/// # Example
///
/// ```rust,no_run
/// use etcdv3::{serve_embedded, MemoryStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new().with_user("root", "secret");
///     let server = serve_embedded(store, "127.0.0.1:2379".parse()?).await?;
///     println!("listening on {}", server.addr());
///     server.wait().await;
///     Ok(())
/// }
/// ```
pub async fn serve_embedded(
    store: MemoryStore,
    addr: std::net::SocketAddr,
) -> Result<grpc::EmbeddedServer> {
    grpc::EmbeddedServer::bind(store, addr).await
}

/// Default etcd client port
pub const DEFAULT_PORT: u16 = 2379;

/// Resolver used when none is configured
pub const DEFAULT_RESOLVER: &str = "static";

/// Metadata key carrying the authentication token
pub const AUTH_TOKEN_METADATA_KEY: &str = "token";

/// Lifetime assumed for a freshly issued token
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Subtracted from the token lifetime so tokens are refreshed before the
/// server expires them
pub const DEFAULT_TOKEN_JITTER: Duration = Duration::from_secs(30);

/// Capacity of the channel carrying address changes to the transport
pub const DEFAULT_CHANGE_BUFFER: usize = 1024;
