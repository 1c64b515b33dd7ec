//! Fast-path route cache.
//!
//! Holds one serialized [`RouteProjection`] per eligible route, keyed by id.
//! Every gateway instance builds its live route table from here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::resilience::{with_deadline, Elapsed};
use crate::routes::types::RouteProjection;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Timeout(#[from] Elapsed),
}

#[async_trait]
pub trait RouteCache: Send + Sync + 'static {
    async fn put(&self, projection: &RouteProjection) -> Result<(), CacheError>;

    async fn remove(&self, id: &str) -> Result<(), CacheError>;

    /// Every entry as `(id, json)`.
    async fn raw_entries(&self) -> Result<Vec<(String, String)>, CacheError>;

    /// Atomically replace the whole cache content.
    async fn replace_all(&self, projections: &[RouteProjection]) -> Result<(), CacheError>;

    /// Decoded entries. An undecodable entry is logged and skipped; the others
    /// are still returned.
    async fn projections(&self) -> Result<Vec<RouteProjection>, CacheError> {
        let entries = self.raw_entries().await?;
        let mut projections = Vec::with_capacity(entries.len());
        for (id, json) in entries {
            match serde_json::from_str::<RouteProjection>(&json) {
                Ok(p) => projections.push(p),
                Err(e) => tracing::error!(route_id = %id, error = %e, "Skipping undecodable cache entry"),
            }
        }
        Ok(projections)
    }
}

/// Process-local cache. Cloning shares the same storage, so several gateway
/// instances in one process can share it like they would share Redis.
#[derive(Debug, Clone, Default)]
pub struct MemoryRouteCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryRouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text under `id`, bypassing serialization.
    pub async fn insert_raw(&self, id: &str, json: &str) {
        self.entries.write().await.insert(id.to_string(), json.to_string());
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }
}

#[async_trait]
impl RouteCache for MemoryRouteCache {
    async fn put(&self, projection: &RouteProjection) -> Result<(), CacheError> {
        let json = serde_json::to_string(projection)?;
        self.entries.write().await.insert(projection.id.clone(), json);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn raw_entries(&self) -> Result<Vec<(String, String)>, CacheError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn replace_all(&self, projections: &[RouteProjection]) -> Result<(), CacheError> {
        let mut next = HashMap::with_capacity(projections.len());
        for p in projections {
            next.insert(p.id.clone(), serde_json::to_string(p)?);
        }
        *self.entries.write().await = next;
        Ok(())
    }
}

/// Redis hash: field = route id, value = projection JSON.
#[derive(Clone)]
pub struct RedisRouteCache {
    conn: ConnectionManager,
    key: String,
    timeout: Duration,
}

impl RedisRouteCache {
    pub async fn connect(url: &str, key: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = with_deadline("redis connect", timeout, async {
            Ok::<_, CacheError>(ConnectionManager::new(client).await?)
        })
        .await?;
        tracing::info!(key, "Connected route cache to Redis");
        Ok(Self {
            conn,
            key: key.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl RouteCache for RedisRouteCache {
    async fn put(&self, projection: &RouteProjection) -> Result<(), CacheError> {
        let json = serde_json::to_string(projection)?;
        let mut conn = self.conn.clone();
        with_deadline("cache put", self.timeout, async {
            let _: () = redis::cmd("HSET")
                .arg(&self.key)
                .arg(&projection.id)
                .arg(json)
                .query_async(&mut conn)
                .await?;
            Ok::<_, CacheError>(())
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        with_deadline("cache remove", self.timeout, async {
            let _: () = redis::cmd("HDEL")
                .arg(&self.key)
                .arg(id)
                .query_async(&mut conn)
                .await?;
            Ok::<_, CacheError>(())
        })
        .await
    }

    async fn raw_entries(&self) -> Result<Vec<(String, String)>, CacheError> {
        let mut conn = self.conn.clone();
        with_deadline("cache read", self.timeout, async {
            let entries: HashMap<String, String> =
                redis::cmd("HGETALL").arg(&self.key).query_async(&mut conn).await?;
            Ok::<_, CacheError>(entries.into_iter().collect())
        })
        .await
    }

    async fn replace_all(&self, projections: &[RouteProjection]) -> Result<(), CacheError> {
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&self.key).ignore();
        if !projections.is_empty() {
            let cmd = pipe.cmd("HSET").arg(&self.key);
            for p in projections {
                cmd.arg(&p.id).arg(serde_json::to_string(p)?);
            }
            cmd.ignore();
        }

        let mut conn = self.conn.clone();
        with_deadline("cache replace_all", self.timeout, async {
            let _: () = pipe.query_async(&mut conn).await?;
            Ok::<_, CacheError>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(id: &str) -> RouteProjection {
        RouteProjection {
            id: id.into(),
            uri: format!("http://{}", id),
            order: 0,
            predicates: vec![],
            filters: vec![],
        }
    }

    #[tokio::test]
    async fn test_memory_put_remove() {
        let cache = MemoryRouteCache::new();
        cache.put(&projection("a")).await.unwrap();
        cache.put(&projection("b")).await.unwrap();
        cache.remove("a").await.unwrap();
        cache.remove("missing").await.unwrap();

        let ids: Vec<_> = cache.projections().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_skipped() {
        let cache = MemoryRouteCache::new();
        cache.put(&projection("good")).await.unwrap();
        cache.insert_raw("bad", "{\"id\":").await;

        let projections = cache.projections().await.unwrap();
        assert_eq!(projections.len(), 1);
        assert_eq!(projections[0].id, "good");
    }

    #[tokio::test]
    async fn test_replace_all() {
        let cache = MemoryRouteCache::new();
        cache.put(&projection("old")).await.unwrap();
        cache.replace_all(&[projection("x"), projection("y")]).await.unwrap();

        assert!(!cache.contains("old").await);
        assert!(cache.contains("x").await);

        cache.replace_all(&[]).await.unwrap();
        assert!(cache.raw_entries().await.unwrap().is_empty());
    }
}
