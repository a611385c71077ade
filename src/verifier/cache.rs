//! Read-through caches for the outbound lookups of the verifier.
//!
//! Concurrent misses for the same key may each fetch; the last insert wins.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use ssi::JWK;
use tokio::sync::RwLock;
use url::Url;

use super::resolver::{PublicKeyResolver, StatusListFetcher, TrustStatementFetcher};

/// A map whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries
            .read()
            .await
            .get(key)
            .filter(|(inserted, _)| inserted.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .await
            .insert(key, (Instant::now(), value));
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (inserted, _)| inserted.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug)]
pub struct CachingKeyResolver {
    inner: Arc<dyn PublicKeyResolver>,
    cache: TtlCache<(String, String), JWK>,
}

impl CachingKeyResolver {
    pub fn new(inner: Arc<dyn PublicKeyResolver>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn evict_expired(&self) -> usize {
        self.cache.evict_expired().await
    }
}

#[async_trait]
impl PublicKeyResolver for CachingKeyResolver {
    async fn resolve(&self, issuer: &str, kid: &str) -> Result<JWK> {
        let key = (issuer.to_owned(), kid.to_owned());
        if let Some(jwk) = self.cache.get(&key).await {
            return Ok(jwk);
        }
        let jwk = self.inner.resolve(issuer, kid).await?;
        self.cache.insert(key, jwk.clone()).await;
        Ok(jwk)
    }
}

#[derive(Debug)]
pub struct CachingTrustStatementFetcher {
    inner: Arc<dyn TrustStatementFetcher>,
    cache: TtlCache<(Url, String), Vec<String>>,
}

impl CachingTrustStatementFetcher {
    pub fn new(inner: Arc<dyn TrustStatementFetcher>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn evict_expired(&self) -> usize {
        self.cache.evict_expired().await
    }
}

#[async_trait]
impl TrustStatementFetcher for CachingTrustStatementFetcher {
    async fn fetch(&self, registry: &Url, vct: &str) -> Result<Vec<String>> {
        let key = (registry.clone(), vct.to_owned());
        if let Some(statements) = self.cache.get(&key).await {
            return Ok(statements);
        }
        let statements = self.inner.fetch(registry, vct).await?;
        self.cache.insert(key, statements.clone()).await;
        Ok(statements)
    }
}

#[derive(Debug)]
pub struct CachingStatusListFetcher {
    inner: Arc<dyn StatusListFetcher>,
    cache: TtlCache<Url, Vec<u8>>,
}

impl CachingStatusListFetcher {
    pub fn new(inner: Arc<dyn StatusListFetcher>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn evict_expired(&self) -> usize {
        self.cache.evict_expired().await
    }
}

#[async_trait]
impl StatusListFetcher for CachingStatusListFetcher {
    async fn fetch(&self, uri: &Url) -> Result<Vec<u8>> {
        if let Some(token) = self.cache.get(uri).await {
            return Ok(token);
        }
        let token = self.inner.fetch(uri).await?;
        self.cache.insert(uri.clone(), token.clone()).await;
        Ok(token)
    }
}
