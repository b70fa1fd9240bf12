//! Persistent store abstraction

use async_trait::async_trait;
use cairn_core::{CairnError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// A read issued as part of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(String),
    HGetAll(String),
}

/// Reply to a pipelined [`Command`], in request order
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Option<String>),
    Hash(HashMap<String, String>),
}

/// Trait for the key-value primitives the context store needs (allows
/// swapping the in-memory backend for a networked one)
///
/// Every operation is atomic on a single key. Nothing here spans keys
/// transactionally; `pipeline` only batches reads into one round trip.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value, replacing any previous value and TTL
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> Result<usize>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Set or refresh the expiry of an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Write hash fields, creating the hash if needed
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<()>;

    /// Write hash fields and set the key's expiry as one operation
    async fn hset_ex(&self, key: &str, fields: Vec<(String, String)>, ttl: Duration) -> Result<()>;

    /// Create a hash with an expiry unless the key already exists
    ///
    /// Returns `false`, writing nothing, when the key is live.
    async fn hset_nx_ex(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Read every field of a hash; a missing key reads as empty
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Add a member to a sorted set
    async fn zadd(&self, key: &str, score: f64, member: String) -> Result<()>;

    /// Members with `min <= score <= max`, ascending by score
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>>;

    /// Run reads in a single round trip
    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>>;

    /// Pipelined multi-key get
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let replies = self
            .pipeline(keys.iter().cloned().map(Command::Get).collect())
            .await?;
        replies
            .into_iter()
            .map(|reply| match reply {
                Reply::Value(value) => Ok(value),
                Reply::Hash(_) => Err(CairnError::Store(
                    "unexpected hash reply to GET".to_string(),
                )),
            })
            .collect()
    }

    /// Pipelined hash reads
    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>> {
        let replies = self
            .pipeline(keys.iter().cloned().map(Command::HGetAll).collect())
            .await?;
        replies
            .into_iter()
            .map(|reply| match reply {
                Reply::Hash(hash) => Ok(hash),
                Reply::Value(_) => Err(CairnError::Store(
                    "unexpected value reply to HGETALL".to_string(),
                )),
            })
            .collect()
    }
}
