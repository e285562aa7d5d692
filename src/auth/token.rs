use super::{Authenticator, Credentials};
use crate::error::Result;
use crate::{DEFAULT_TOKEN_JITTER, DEFAULT_TOKEN_TTL};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

/// Where the cached token is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// No token has been issued yet
    Empty,
    /// A token is cached and `now < valid_until`
    Valid,
    /// A token is cached but `now >= valid_until`
    Expired,
}

#[derive(Debug, Clone, Default)]
enum TokenState {
    #[default]
    Empty,
    Issued {
        token: String,
        valid_until: Instant,
    },
}

impl TokenState {
    fn status(&self, now: Instant) -> TokenStatus {
        match self {
            TokenState::Empty => TokenStatus::Empty,
            TokenState::Issued { valid_until, .. } if now < *valid_until => TokenStatus::Valid,
            TokenState::Issued { .. } => TokenStatus::Expired,
        }
    }
}

/// Lazily fetched authentication token with expiry and jitter
///
/// A token is considered valid for `lifetime - jitter` after it was issued or
/// last extended. The token and its expiry sit behind a short synchronous
/// lock that is never held across an await. Refreshes are serialized by a
/// separate async gate held for the whole authentication call, so at most one
/// refresh is ever in flight and concurrent callers wait for its result.
///
/// Without credentials the cache is disabled: [`TokenCache::get_or_refresh`]
/// returns `None` and never contacts the server.
pub struct TokenCache {
    credentials: Option<Credentials>,
    authenticator: Arc<dyn Authenticator>,
    lifetime: Duration,
    jitter: Duration,
    state: Mutex<TokenState>,
    refresh: AsyncMutex<()>,
}

impl TokenCache {
    pub fn new(credentials: Option<Credentials>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            credentials,
            authenticator,
            lifetime: DEFAULT_TOKEN_TTL,
            jitter: DEFAULT_TOKEN_JITTER,
            state: Mutex::new(TokenState::Empty),
            refresh: AsyncMutex::new(()),
        }
    }

    /// Set the token lifetime and the jitter subtracted from it. A jitter
    /// larger than the lifetime makes every token expire immediately.
    pub fn with_lifetime(mut self, lifetime: Duration, jitter: Duration) -> Self {
        self.lifetime = lifetime;
        self.jitter = jitter;
        self
    }

    /// Whether credentials are configured
    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// How long a token stays valid after being issued or extended
    pub fn validity(&self) -> Duration {
        self.lifetime.saturating_sub(self.jitter)
    }

    fn valid_token(&self) -> Option<String> {
        match &*self.state.lock() {
            TokenState::Issued { token, valid_until } if Instant::now() < *valid_until => {
                Some(token.clone())
            }
            _ => None,
        }
    }

    /// Return the cached token, authenticating first if there is none or it
    /// has expired.
    ///
    /// # Errors
    ///
    /// Returns the authenticator's error if the refresh fails. The cache is
    /// left as it was; the next call tries again.
    pub async fn get_or_refresh(&self) -> Result<Option<String>> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };

        if let Some(token) = self.valid_token() {
            return Ok(Some(token));
        }

        let _gate = self.refresh.lock().await;
        // another caller may have refreshed while we waited
        if let Some(token) = self.valid_token() {
            return Ok(Some(token));
        }

        tracing::debug!("Authenticating as {}", credentials.user());
        let token = self.authenticator.authenticate(credentials).await?;
        *self.state.lock() = TokenState::Issued {
            token: token.clone(),
            valid_until: Instant::now() + self.validity(),
        };
        tracing::info!("Obtained authentication token for {}", credentials.user());

        Ok(Some(token))
    }

    /// Push the expiry of a valid token to `now + lifetime - jitter`.
    ///
    /// Does nothing when there is no valid token, or while a refresh is in
    /// flight (the refresh sets a fresh expiry itself). Concurrent readers do
    /// not prevent an extension. Returns whether the expiry moved.
    pub fn extend(&self) -> bool {
        if self.refresh.try_lock().is_err() {
            return false;
        }

        let now = Instant::now();
        match &mut *self.state.lock() {
            TokenState::Issued { valid_until, .. } if now < *valid_until => {
                *valid_until = now + self.validity();
                true
            }
            _ => false,
        }
    }

    pub fn status(&self) -> TokenStatus {
        self.state.lock().status(Instant::now())
    }

    /// Expiry of the cached token, if any
    pub fn valid_until(&self) -> Option<Instant> {
        match &*self.state.lock() {
            TokenState::Empty => None,
            TokenState::Issued { valid_until, .. } => Some(*valid_until),
        }
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("credentials", &self.credentials)
            .field("lifetime", &self.lifetime)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::CountingAuthenticator;
    use tokio_test::{assert_err, assert_ok};

    const LIFETIME: Duration = Duration::from_secs(60);
    const JITTER: Duration = Duration::from_secs(10);

    fn cache(authenticator: Arc<CountingAuthenticator>) -> TokenCache {
        TokenCache::new(Some(Credentials::new("root", "pw")), authenticator)
            .with_lifetime(LIFETIME, JITTER)
    }

    #[tokio::test]
    async fn test_without_credentials_never_authenticates() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = TokenCache::new(None, authenticator.clone());

        for _ in 0..5 {
            assert_eq!(assert_ok!(cache.get_or_refresh().await), None);
        }
        assert!(!cache.is_enabled());
        assert!(!cache.extend());
        assert_eq!(authenticator.calls(), 0);
        assert_eq!(cache.status(), TokenStatus::Empty);
    }

    #[tokio::test]
    async fn test_first_call_authenticates_once() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = cache(authenticator.clone());
        assert_eq!(cache.status(), TokenStatus::Empty);

        let token = assert_ok!(cache.get_or_refresh().await);
        assert_eq!(token.as_deref(), Some("token-1"));
        assert_eq!(cache.status(), TokenStatus::Valid);

        let again = assert_ok!(cache.get_or_refresh().await);
        assert_eq!(again.as_deref(), Some("token-1"));
        assert_eq!(authenticator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let authenticator = Arc::new(CountingAuthenticator::with_delay(Duration::from_millis(200)));
        let cache = Arc::new(cache(authenticator.clone()));

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_refresh().await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move {
                // arrive while the first refresh is in flight
                tokio::time::sleep(Duration::from_millis(50)).await;
                cache.get_or_refresh().await
            }
        });

        let first = assert_ok!(first.await.unwrap());
        let second = assert_ok!(second.await.unwrap());
        assert_eq!(first, second);
        assert_eq!(first.as_deref(), Some("token-1"));
        assert_eq!(authenticator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validity_is_lifetime_minus_jitter() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = cache(authenticator.clone());

        let issued_at = Instant::now();
        assert_ok!(cache.get_or_refresh().await);
        assert_eq!(cache.valid_until(), Some(issued_at + LIFETIME - JITTER));

        tokio::time::advance(LIFETIME - JITTER - Duration::from_millis(1)).await;
        assert_eq!(cache.status(), TokenStatus::Valid);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.status(), TokenStatus::Expired);

        let token = assert_ok!(cache.get_or_refresh().await);
        assert_eq!(token.as_deref(), Some("token-2"));
        assert_eq!(authenticator.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_resets_validity_from_now() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = cache(authenticator.clone());
        assert_ok!(cache.get_or_refresh().await);

        tokio::time::advance(Duration::from_secs(30)).await;
        let extended_at = Instant::now();
        assert!(cache.extend());
        assert_eq!(cache.valid_until(), Some(extended_at + LIFETIME - JITTER));

        // still valid past the original expiry without a new fetch
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(cache.status(), TokenStatus::Valid);
        assert_ok!(cache.get_or_refresh().await);
        assert_eq!(authenticator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_does_not_revive_expired_token() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = cache(authenticator.clone());
        assert_ok!(cache.get_or_refresh().await);

        tokio::time::advance(LIFETIME).await;
        assert!(!cache.extend());
        assert_eq!(cache.status(), TokenStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_waits_out_a_reader_instead_of_skipping() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = cache(authenticator.clone());
        assert_ok!(cache.get_or_refresh().await);

        tokio::time::advance(Duration::from_secs(30)).await;
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let shared = &cache;
        std::thread::scope(|scope| {
            scope.spawn(move || {
                let _reader = shared.state.lock();
                held_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(20));
            });
            held_rx.recv().unwrap();
            assert!(cache.extend());
        });

        // 55s after issue, 25s after the extension
        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(cache.status(), TokenStatus::Valid);
        assert_ok!(cache.get_or_refresh().await);
        assert_eq!(authenticator.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_extend_succeeds_alongside_concurrent_readers() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = Arc::new(cache(authenticator.clone()));
        assert_ok!(cache.get_or_refresh().await);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        cache.get_or_refresh().await.unwrap();
                        let _ = cache.status();
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            assert!(cache.extend());
        }
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(authenticator.calls(), 1);
    }

    #[tokio::test]
    async fn test_extend_skips_while_refresh_gate_is_held() {
        let cache = cache(Arc::new(CountingAuthenticator::default()));
        assert_ok!(cache.get_or_refresh().await);
        let before = cache.valid_until();

        let gate = cache.refresh.try_lock().unwrap();
        assert!(!cache.extend());
        assert_eq!(cache.valid_until(), before);

        drop(gate);
        assert!(cache.extend());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_during_refresh_leaves_refreshed_expiry() {
        let authenticator = Arc::new(CountingAuthenticator::with_delay(Duration::from_millis(200)));
        let cache = Arc::new(cache(authenticator.clone()));
        assert_ok!(cache.get_or_refresh().await);
        tokio::time::advance(LIFETIME).await;

        let refresh = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cache.extend());

        let token = assert_ok!(refresh.await.unwrap());
        assert_eq!(token.as_deref(), Some("token-2"));
        assert_eq!(cache.valid_until(), Some(Instant::now() + LIFETIME - JITTER));
        assert_eq!(authenticator.calls(), 2);
    }

    #[tokio::test]
    async fn test_extend_on_empty_cache_is_noop() {
        let cache = cache(Arc::new(CountingAuthenticator::default()));
        assert!(!cache.extend());
        assert_eq!(cache.status(), TokenStatus::Empty);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_state_and_retries_next_call() {
        let authenticator = Arc::new(CountingAuthenticator::failing_first(1));
        let cache = cache(authenticator.clone());

        assert_err!(cache.get_or_refresh().await);
        assert_eq!(cache.status(), TokenStatus::Empty);

        let token = assert_ok!(cache.get_or_refresh().await);
        assert_eq!(token.as_deref(), Some("token-2"));
        assert_eq!(authenticator.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_larger_than_lifetime_expires_immediately() {
        let authenticator = Arc::new(CountingAuthenticator::default());
        let cache = TokenCache::new(Some(Credentials::new("root", "pw")), authenticator.clone())
            .with_lifetime(Duration::from_secs(5), Duration::from_secs(10));

        assert_eq!(cache.validity(), Duration::ZERO);
        assert_ok!(cache.get_or_refresh().await);
        assert_eq!(cache.status(), TokenStatus::Expired);
        assert_ok!(cache.get_or_refresh().await);
        assert_eq!(authenticator.calls(), 2);
    }
}
