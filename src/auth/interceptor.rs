use super::TokenCache;
use crate::AUTH_TOKEN_METADATA_KEY;
use std::future::Future;
use std::sync::Arc;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::{Request, Response, Status};

/// Attaches the cached token to outgoing calls and keeps it alive while
/// calls succeed
///
/// Authentication is best effort here: if no token can be had the call is
/// sent without one and the server decides whether to accept it.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    cache: Arc<TokenCache>,
}

impl AuthInterceptor {
    pub fn new(cache: Arc<TokenCache>) -> Self {
        Self { cache }
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Add the `token` metadata entry to `request` if a token is available.
    pub async fn authorize<T>(&self, mut request: Request<T>) -> Request<T> {
        match self.cache.get_or_refresh().await {
            Ok(Some(token)) => match token.parse::<MetadataValue<Ascii>>() {
                Ok(value) => {
                    request
                        .metadata_mut()
                        .insert(AUTH_TOKEN_METADATA_KEY, value);
                }
                Err(_) => {
                    tracing::warn!("Token is not valid metadata, sending request without it");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Sending request without authentication token: {}", e);
            }
        }
        request
    }

    /// Record the outcome of a call. Only successes touch the cache.
    pub fn observe<R>(&self, result: &Result<Response<R>, Status>) {
        if result.is_ok() {
            self.cache.extend();
        }
    }

    /// Authorize `request`, send it with `send`, and observe the result.
    pub async fn call<T, R, F, Fut>(&self, request: Request<T>, send: F) -> Result<Response<R>, Status>
    where
        F: FnOnce(Request<T>) -> Fut,
        Fut: Future<Output = Result<Response<R>, Status>>,
    {
        let request = self.authorize(request).await;
        let result = send(request).await;
        self.observe(&result);
        result
    }
}
