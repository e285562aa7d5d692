//! Token authentication
//!
//! The [`TokenCache`] holds the token issued by the cluster's `Authenticate`
//! RPC and decides when to fetch a new one. The [`AuthInterceptor`] consults it
//! before every call and attaches the token to the call's metadata.

mod interceptor;
mod token;

pub use interceptor::AuthInterceptor;
pub use token::{TokenCache, TokenStatus};

use crate::error::{Error, Result};
use crate::grpc::etcdserverpb::{auth_client::AuthClient, AuthenticateRequest};
use std::fmt;
use tonic::transport::Channel;

/// User name and password used to obtain a token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Credentials only exist when both parts are present; otherwise calls
    /// go out unauthenticated.
    pub fn from_parts(user: Option<String>, password: Option<String>) -> Option<Self> {
        match (user, password) {
            (Some(user), Some(password)) => Some(Self::new(user, password)),
            _ => None,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Exchanges credentials for a token
#[tonic::async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, credentials: &Credentials) -> Result<String>;
}

/// Authenticates through the cluster's `Auth/Authenticate` RPC
///
/// The authentication call itself is sent without a token.
#[derive(Debug, Clone)]
pub struct GrpcAuthenticator {
    client: AuthClient<Channel>,
}

impl GrpcAuthenticator {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: AuthClient::new(channel),
        }
    }
}

#[tonic::async_trait]
impl Authenticator for GrpcAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<String> {
        let mut client = self.client.clone();
        let response = client
            .authenticate(AuthenticateRequest {
                name: credentials.user().to_string(),
                password: credentials.password().to_string(),
            })
            .await
            .map_err(Error::Authentication)?;

        let token = response.into_inner().token;
        if token.is_empty() {
            return Err(Error::Authentication(tonic::Status::unauthenticated(
                "server returned an empty token",
            )));
        }
        Ok(token)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Issues `token-1`, `token-2`, ... and counts calls. Each call takes
    /// `delay`, and the first `failures` calls fail.
    #[derive(Debug, Default)]
    pub(crate) struct CountingAuthenticator {
        calls: AtomicUsize,
        delay: Duration,
        failures: usize,
    }

    impl CountingAuthenticator {
        pub(crate) fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        pub(crate) fn failing_first(failures: usize) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[tonic::async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn authenticate(&self, _credentials: &Credentials) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call <= self.failures {
                return Err(Error::Authentication(tonic::Status::unavailable(
                    "cluster unreachable",
                )));
            }
            Ok(format!("token-{}", call))
        }
    }
}
