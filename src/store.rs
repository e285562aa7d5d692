//! In-memory store behind the embedded server
//!
//! Implements the subset of etcd's key-value and authentication semantics the
//! client uses: revisioned puts, range queries and simple tokens.

use crate::error::{Error, Result};
use crate::grpc::etcdserverpb::{KeyValue, ResponseHeader};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cluster id reported in response headers
pub const CLUSTER_ID: u64 = 0x2f1b_6c0e_8a3d_4e51;

/// Member id reported in response headers
pub const MEMBER_ID: u64 = 0x8e9e_05c5_2164_694d;

#[derive(Debug, Default)]
struct State {
    revision: i64,
    data: BTreeMap<Vec<u8>, KeyValue>,
    users: HashMap<String, String>,
    tokens: HashSet<String>,
    issued: u64,
}

/// Result of a range query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeResult {
    pub kvs: Vec<KeyValue>,
    pub more: bool,
    pub count: i64,
}

/// Shared in-memory key-value store
///
/// This struct is cheaply cloneable (uses Arc internally) and can be safely
/// shared across threads. Authentication is enabled once a user is added.
///
/// # Example
///
/// ```rust
/// use etcdv3::MemoryStore;
///
/// let store = MemoryStore::new().with_user("root", "secret");
/// let token = store.authenticate("root", "secret").unwrap();
/// assert!(store.validate_token(Some(&token)).is_ok());
///
/// let prev = store.put(b"key", b"value", 0);
/// assert!(prev.is_none());
/// assert_eq!(store.range(b"key", b"", 0).count, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    auth_requests: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user and enable authentication
    pub fn with_user(self, name: &str, password: &str) -> Self {
        self.add_user(name, password);
        self
    }

    pub fn add_user(&self, name: &str, password: &str) {
        tracing::debug!("Adding user {}", name);
        self.state
            .write()
            .users
            .insert(name.to_string(), password.to_string());
    }

    pub fn auth_enabled(&self) -> bool {
        !self.state.read().users.is_empty()
    }

    /// Number of authenticate requests received so far, successful or not
    pub fn auth_requests(&self) -> usize {
        self.auth_requests.load(Ordering::SeqCst)
    }

    /// Check a user's password and issue a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] when authentication is disabled or the
    /// credentials do not match.
    pub fn authenticate(&self, name: &str, password: &str) -> Result<String> {
        self.auth_requests.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write();
        if state.users.is_empty() {
            return Err(Error::Authentication(tonic::Status::failed_precondition(
                "authentication is not enabled",
            )));
        }
        if state.users.get(name).map(String::as_str) != Some(password) {
            tracing::warn!("Authentication failed for {}", name);
            return Err(Error::Authentication(tonic::Status::invalid_argument(
                "authentication failed, invalid user ID or password",
            )));
        }

        state.issued += 1;
        let token = format!("{}.{}", name, state.issued);
        state.tokens.insert(token.clone());
        Ok(token)
    }

    /// Accept any request while authentication is disabled; otherwise require
    /// a token issued by [`MemoryStore::authenticate`] and not yet revoked.
    pub fn validate_token(&self, token: Option<&str>) -> Result<()> {
        let state = self.state.read();
        if state.users.is_empty() {
            return Ok(());
        }
        match token {
            Some(token) if state.tokens.contains(token) => Ok(()),
            Some(_) => Err(Error::Authentication(tonic::Status::unauthenticated(
                "invalid auth token",
            ))),
            None => Err(Error::Authentication(tonic::Status::unauthenticated(
                "user name is empty",
            ))),
        }
    }

    /// Forget every issued token, as when tokens expire server-side
    pub fn revoke_tokens(&self) {
        self.state.write().tokens.clear();
    }

    pub fn revision(&self) -> i64 {
        self.state.read().revision
    }

    pub fn header(&self) -> ResponseHeader {
        ResponseHeader {
            cluster_id: CLUSTER_ID,
            member_id: MEMBER_ID,
            revision: self.revision(),
            raft_term: 1,
        }
    }

    /// Store `value` under `key` and return the previous record, if any.
    pub fn put(&self, key: &[u8], value: &[u8], lease: i64) -> Option<KeyValue> {
        let mut state = self.state.write();
        state.revision += 1;
        let revision = state.revision;

        let previous = state.data.get(key).cloned();
        let (create_revision, version) = previous
            .as_ref()
            .map(|kv| (kv.create_revision, kv.version + 1))
            .unwrap_or((revision, 1));

        state.data.insert(
            key.to_vec(),
            KeyValue {
                key: key.to_vec(),
                value: value.to_vec(),
                create_revision,
                mod_revision: revision,
                version,
                lease,
            },
        );

        previous
    }

    /// Query `[key, range_end)` with etcd's conventions: an empty `range_end`
    /// selects `key` alone, and `range_end == [0]` selects every key `>= key`.
    /// A positive `limit` caps the returned records; `count` is always the
    /// total number of matches.
    pub fn range(&self, key: &[u8], range_end: &[u8], limit: i64) -> RangeResult {
        let state = self.state.read();

        let matches: Vec<&KeyValue> = if range_end.is_empty() {
            state.data.get(key).into_iter().collect()
        } else {
            let upper = if range_end == [0] {
                Bound::Unbounded
            } else if range_end <= key {
                return RangeResult::default();
            } else {
                Bound::Excluded(range_end.to_vec())
            };
            state
                .data
                .range((Bound::Included(key.to_vec()), upper))
                .map(|(_, kv)| kv)
                .collect()
        };

        let count = matches.len() as i64;
        let take = if limit > 0 {
            (limit as usize).min(matches.len())
        } else {
            matches.len()
        };

        RangeResult {
            kvs: matches[..take].iter().map(|kv| (*kv).clone()).collect(),
            more: take < matches.len(),
            count,
        }
    }
}
