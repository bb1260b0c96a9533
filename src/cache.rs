//! Cache abstraction, domain-scoped key builders, and pattern purge.
//!
//! The cache is a generic string-valued TTL store. Keys are structured as
//! `admin:{domain}:{entity}:{suffix}` so a whole domain (or one entity kind
//! within it) can be invalidated with a single pattern delete.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Generic TTL key-value cache, string-valued and JSON-serialized by callers.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` with a TTL in seconds.
    async fn setex(&self, key: &str, ttl_seconds: u64, value: &str) -> Result<()>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Keys matching a glob-style pattern where `*` matches any run of
    /// characters.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
}

/// Delete every key matching `pattern`, returning the number removed.
pub async fn purge_pattern(cache: &dyn Cache, pattern: &str) -> Result<u64> {
    let keys = cache.keys(pattern).await?;
    if keys.is_empty() {
        return Ok(0);
    }
    cache.del(&keys).await
}

/// Cache key for one user's resolved routes in a domain.
pub fn user_routes_key(domain: &str, user_id: &str) -> String {
    format!("admin:{domain}:routes:{user_id}")
}

/// Pattern covering every cached route entry of a domain.
pub fn domain_routes_pattern(domain: &str) -> String {
    format!("admin:{domain}:routes:*")
}

/// Cache key for a single entity row.
pub fn entity_key(domain: &str, entity: &str, id: &str) -> String {
    format!("admin:{domain}:{entity}:{id}")
}

/// Pattern covering everything cached for a domain.
pub fn domain_pattern(domain: &str) -> String {
    format!("admin:{domain}:*")
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory cache with lazy TTL expiry, the test and single-process stand-in
/// for Redis.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, expired ones excluded.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn setex(&self, key: &str, ttl_seconds: u64, value: &str) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut matched: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired() && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }
}

/// Match `text` against a glob pattern where `*` matches any run of
/// characters, including the empty one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == text;
    }

    let mut rest = text;

    let first = segments[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    let last = segments[segments.len() - 1];
    for middle in &segments[1..segments.len() - 1] {
        if middle.is_empty() {
            continue;
        }
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}
