//! Response types returned by [`crate::Client`]
//!
//! Thin wrappers over the protobuf messages. Keys and values are byte strings;
//! the `*_str` accessors decode them lossily for display.

use crate::grpc::etcdserverpb as pb;
use serde::{Serialize, Serializer};
use std::borrow::Cow;

fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Metadata the cluster attaches to every response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseHeader {
    pub cluster_id: u64,
    pub member_id: u64,
    pub revision: i64,
    pub raft_term: u64,
}

impl From<Option<pb::ResponseHeader>> for ResponseHeader {
    fn from(header: Option<pb::ResponseHeader>) -> Self {
        header
            .map(|h| Self {
                cluster_id: h.cluster_id,
                member_id: h.member_id,
                revision: h.revision,
                raft_term: h.raft_term,
            })
            .unwrap_or_default()
    }
}

/// A stored key-value record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    #[serde(serialize_with = "lossy_utf8")]
    key: Vec<u8>,
    #[serde(serialize_with = "lossy_utf8")]
    value: Vec<u8>,
    create_revision: i64,
    mod_revision: i64,
    version: i64,
    lease: i64,
}

impl KeyValue {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn value_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }

    pub fn create_revision(&self) -> i64 {
        self.create_revision
    }

    pub fn mod_revision(&self) -> i64 {
        self.mod_revision
    }

    /// Number of modifications since the key was created
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn lease(&self) -> i64 {
        self.lease
    }
}

impl From<pb::KeyValue> for KeyValue {
    fn from(kv: pb::KeyValue) -> Self {
        Self {
            key: kv.key,
            value: kv.value,
            create_revision: kv.create_revision,
            mod_revision: kv.mod_revision,
            version: kv.version,
            lease: kv.lease,
        }
    }
}

/// Result of a put
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutResponse {
    header: ResponseHeader,
    prev_kv: Option<KeyValue>,
}

impl PutResponse {
    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    /// Whether the key held a value before this put
    pub fn has_prev_kv(&self) -> bool {
        self.prev_kv.is_some()
    }

    pub fn prev_kv(&self) -> Option<&KeyValue> {
        self.prev_kv.as_ref()
    }
}

impl From<pb::PutResponse> for PutResponse {
    fn from(response: pb::PutResponse) -> Self {
        Self {
            header: response.header.into(),
            prev_kv: response.prev_kv.map(KeyValue::from),
        }
    }
}

/// Result of a get or range query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetResponse {
    header: ResponseHeader,
    kvs: Vec<KeyValue>,
    more: bool,
    count: i64,
}

impl GetResponse {
    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    /// Matching records in key order
    pub fn kvs(&self) -> &[KeyValue] {
        &self.kvs
    }

    pub fn into_kvs(self) -> Vec<KeyValue> {
        self.kvs
    }

    /// Whether more records matched than were returned
    pub fn more(&self) -> bool {
        self.more
    }

    /// Total number of matching records
    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.kvs.is_empty()
    }
}

impl From<pb::RangeResponse> for GetResponse {
    fn from(response: pb::RangeResponse) -> Self {
        Self {
            header: response.header.into(),
            kvs: response.kvs.into_iter().map(KeyValue::from).collect(),
            more: response.more,
            count: response.count,
        }
    }
}
