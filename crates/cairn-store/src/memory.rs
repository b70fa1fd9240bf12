//! In-memory key-value backend with lazy expiry

use async_trait::async_trait;
use cairn_core::{CairnError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{Command, KvBackend, Reply};

#[derive(Debug, Clone)]
enum Data {
    String(String),
    Hash(HashMap<String, String>),
    /// Kept sorted by score, then member
    SortedSet(Vec<(f64, String)>),
}

impl Data {
    fn kind(&self) -> &'static str {
        match self {
            Data::String(_) => "string",
            Data::Hash(_) => "hash",
            Data::SortedSet(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local backend
///
/// Expiry is checked on access against `tokio::time::Instant`, so tests that
/// pause the clock can advance past a TTL deterministically. Clones share
/// the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    failing_prefixes: Arc<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write to keys starting with `prefix` (for exercising
    /// failure paths in tests)
    pub fn with_failing_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefixes = (*self.failing_prefixes).clone();
        prefixes.push(prefix.into());
        self.failing_prefixes = Arc::new(prefixes);
        self
    }

    /// Number of live (unexpired) keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys starting with `prefix`, sorted
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remaining time to live of a key, if it has one
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| !e.is_expired(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.failing_prefixes.iter().any(|p| key.starts_with(p)) {
            return Err(CairnError::Store(format!("write rejected for key {}", key)));
        }
        Ok(())
    }

    fn wrong_type(key: &str, expected: &str, found: &Data) -> CairnError {
        CairnError::Store(format!(
            "WRONGTYPE key {} holds a {}, expected {}",
            key,
            found.kind(),
            expected
        ))
    }

    fn live<'a>(
        entries: &'a HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a Entry> {
        entries.get(key).filter(|e| !e.is_expired(now))
    }

    /// Drop the entry if it has expired, so writes start fresh
    fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
    }

    /// Merge fields into the hash at `key`, creating it if absent or expired
    fn merge_hash<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        fields: Vec<(String, String)>,
        now: Instant,
    ) -> Result<&'a mut Entry> {
        Self::purge_expired(entries, key, now);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Data::Hash(HashMap::new())));
        match &mut entry.data {
            Data::Hash(hash) => hash.extend(fields),
            other => return Err(Self::wrong_type(key, "hash", other)),
        }
        Ok(entry)
    }

    fn read_value(entries: &HashMap<String, Entry>, key: &str, now: Instant) -> Result<Option<String>> {
        match Self::live(entries, key, now) {
            None => Ok(None),
            Some(Entry {
                data: Data::String(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(entry) => Err(Self::wrong_type(key, "string", &entry.data)),
        }
    }

    fn read_hash(
        entries: &HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Result<HashMap<String, String>> {
        match Self::live(entries, key, now) {
            None => Ok(HashMap::new()),
            Some(Entry {
                data: Data::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(entry) => Err(Self::wrong_type(key, "hash", &entry.data)),
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Self::read_value(&entries, key, Instant::now())
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.check_writable(key)?;
        let mut entries = self.entries.write().await;
        let mut entry = Entry::new(Data::String(value));
        entry.expires_at = ttl.map(|ttl| Instant::now() + ttl);
        entries.insert(key.to_string(), entry);
        debug!(key, ?ttl, "SET");
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        for key in keys {
            self.check_writable(key)?;
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        debug!(requested = keys.len(), removed, "DEL");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.read().await;
        Ok(Self::live(&entries, key, Instant::now()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_writable(key)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries, key, now);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        self.check_writable(key)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Self::merge_hash(&mut entries, key, fields, now)?;
        Ok(())
    }

    async fn hset_ex(&self, key: &str, fields: Vec<(String, String)>, ttl: Duration) -> Result<()> {
        self.check_writable(key)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = Self::merge_hash(&mut entries, key, fields, now)?;
        entry.expires_at = Some(now + ttl);
        debug!(key, ?ttl, "HSET+EXPIRE");
        Ok(())
    }

    async fn hset_nx_ex(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool> {
        self.check_writable(key)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if Self::live(&entries, key, now).is_some() {
            debug!(key, "HSET NX skipped, key exists");
            return Ok(false);
        }
        let mut entry = Entry::new(Data::Hash(fields.into_iter().collect()));
        entry.expires_at = Some(now + ttl);
        entries.insert(key.to_string(), entry);
        debug!(key, ?ttl, "HSET NX+EXPIRE");
        Ok(true)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        let hash = Self::read_hash(&entries, key, Instant::now())?;
        Ok(hash.get(field).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let entries = self.entries.read().await;
        Self::read_hash(&entries, key, Instant::now())
    }

    async fn zadd(&self, key: &str, score: f64, member: String) -> Result<()> {
        self.check_writable(key)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries, key, now);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Data::SortedSet(Vec::new())));
        match &mut entry.data {
            Data::SortedSet(members) => {
                members.retain(|(_, m)| *m != member);
                let pos = members
                    .iter()
                    .position(|(s, m)| *s > score || (*s == score && *m > member))
                    .unwrap_or(members.len());
                members.insert(pos, (score, member));
                Ok(())
            }
            other => Err(Self::wrong_type(key, "zset", other)),
        }
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let entries = self.entries.read().await;
        match Self::live(&entries, key, Instant::now()) {
            None => Ok(Vec::new()),
            Some(Entry {
                data: Data::SortedSet(members),
                ..
            }) => Ok(members
                .iter()
                .filter(|(score, _)| *score >= min && *score <= max)
                .map(|(score, member)| (member.clone(), *score))
                .collect()),
            Some(entry) => Err(Self::wrong_type(key, "zset", &entry.data)),
        }
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        debug!(commands = commands.len(), "PIPELINE");
        commands
            .into_iter()
            .map(|command| match command {
                Command::Get(key) => Self::read_value(&entries, &key, now).map(Reply::Value),
                Command::HGetAll(key) => Self::read_hash(&entries, &key, now).map(Reply::Hash),
            })
            .collect()
    }
}
