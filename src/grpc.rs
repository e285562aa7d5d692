//! gRPC server implementation
//!
//! Generated etcd protobuf types, plus the embedded `KV` and `Auth` services
//! backed by a [`MemoryStore`].

use crate::error::Result;
use crate::{MemoryStore, AUTH_TOKEN_METADATA_KEY};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

// Include generated protobuf code
pub mod etcdserverpb {
    tonic::include_proto!("etcdserverpb");
}

use etcdserverpb::auth_server::{Auth, AuthServer};
use etcdserverpb::kv_server::{Kv, KvServer};
use etcdserverpb::{
    AuthenticateRequest, AuthenticateResponse, PutRequest, PutResponse, RangeRequest,
    RangeResponse,
};

fn display_key(key: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(key)
}

/// Reject the request unless it carries a token the store accepts.
fn check_token<T>(store: &MemoryStore, request: &Request<T>) -> std::result::Result<(), Status> {
    let token = request
        .metadata()
        .get(AUTH_TOKEN_METADATA_KEY)
        .and_then(|value| value.to_str().ok());
    store.validate_token(token).map_err(Status::from)
}

/// Embedded `etcdserverpb.KV` service
#[derive(Debug, Clone)]
pub struct KvService {
    store: MemoryStore,
}

impl KvService {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl Kv for KvService {
    async fn range(
        &self,
        request: Request<RangeRequest>,
    ) -> std::result::Result<Response<RangeResponse>, Status> {
        check_token(&self.store, &request)?;
        let req = request.into_inner();

        tracing::info!(
            "gRPC RANGE {} (range_end: {}, limit: {})",
            display_key(&req.key),
            display_key(&req.range_end),
            req.limit
        );

        if req.revision > 0 {
            return Err(Status::unimplemented("historical revisions are not retained"));
        }

        let result = self.store.range(&req.key, &req.range_end, req.limit);
        let mut kvs = result.kvs;
        if req.count_only {
            kvs.clear();
        } else if req.keys_only {
            for kv in &mut kvs {
                kv.value.clear();
            }
        }

        Ok(Response::new(RangeResponse {
            header: Some(self.store.header()),
            kvs,
            more: result.more,
            count: result.count,
        }))
    }

    async fn put(
        &self,
        request: Request<PutRequest>,
    ) -> std::result::Result<Response<PutResponse>, Status> {
        check_token(&self.store, &request)?;
        let req = request.into_inner();

        tracing::info!(
            "gRPC PUT {} (lease: {}, prev_kv: {})",
            display_key(&req.key),
            req.lease,
            req.prev_kv
        );

        if req.key.is_empty() {
            return Err(Status::invalid_argument("key is not provided"));
        }
        if req.ignore_value || req.ignore_lease {
            return Err(Status::unimplemented(
                "ignore_value and ignore_lease are not supported",
            ));
        }

        let previous = self.store.put(&req.key, &req.value, req.lease);

        Ok(Response::new(PutResponse {
            header: Some(self.store.header()),
            prev_kv: if req.prev_kv { previous } else { None },
        }))
    }
}

/// Embedded `etcdserverpb.Auth` service
#[derive(Debug, Clone)]
pub struct AuthService {
    store: MemoryStore,
}

impl AuthService {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl Auth for AuthService {
    async fn authenticate(
        &self,
        request: Request<AuthenticateRequest>,
    ) -> std::result::Result<Response<AuthenticateResponse>, Status> {
        let req = request.into_inner();
        tracing::info!("gRPC AUTHENTICATE {}", req.name);

        let token = self
            .store
            .authenticate(&req.name, &req.password)
            .map_err(Status::from)?;

        Ok(Response::new(AuthenticateResponse {
            header: Some(self.store.header()),
            token,
        }))
    }
}

/// Create the KV gRPC service from a MemoryStore
pub fn create_kv_service(store: MemoryStore) -> KvServer<KvService> {
    KvServer::new(KvService::new(store))
}

/// Create the Auth gRPC service from a MemoryStore
pub fn create_auth_service(store: MemoryStore) -> AuthServer<AuthService> {
    AuthServer::new(AuthService::new(store))
}

/// A running embedded server
///
/// The server task is aborted when this handle is dropped.
#[derive(Debug)]
pub struct EmbeddedServer {
    addr: SocketAddr,
    store: MemoryStore,
    handle: Option<JoinHandle<std::result::Result<(), tonic::transport::Error>>>,
}

impl EmbeddedServer {
    /// Bind `addr` and serve both services in a background task. Bind to
    /// port 0 to let the OS pick a free port.
    pub async fn bind(store: MemoryStore, addr: SocketAddr) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Starting embedded gRPC server on {}", addr);

        let kv = create_kv_service(store.clone());
        let auth = create_auth_service(store.clone());
        let handle = tokio::spawn(async move {
            Server::builder()
                .add_service(kv)
                .add_service(auth)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
        });

        Ok(Self {
            addr,
            store,
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Run until the server stops.
    pub async fn wait(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match handle.await {
            Ok(Ok(())) => tracing::info!("Embedded server on {} stopped", self.addr),
            Ok(Err(e)) => tracing::error!("Embedded server on {} failed: {}", self.addr, e),
            Err(e) => tracing::error!("Embedded server task on {} ended: {}", self.addr, e),
        }
    }
}

impl Drop for EmbeddedServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
