//! API client storage.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clients::{ApiClient, ClientDirectory};
use crate::store::{read_json, write_atomic, BlockingPool, StoreError};

/// Where client records live.
#[derive(Debug, Clone)]
pub enum ClientPersistence {
    File(PathBuf),
    Memory,
}

pub struct ApiClientStore {
    by_key: DashMap<String, ApiClient>,
    next_id: AtomicU64,
    persistence: ClientPersistence,
    pool: BlockingPool,
    write_lock: Mutex<()>,
}

impl ApiClientStore {
    pub async fn open(persistence: ClientPersistence, pool: BlockingPool) -> Result<Self, StoreError> {
        let clients: Vec<ApiClient> = match &persistence {
            ClientPersistence::File(path) => {
                let path = path.clone();
                pool.run("clients load", move || read_json(&path)).await?
            }
            ClientPersistence::Memory => Vec::new(),
        };
        tracing::info!(clients = clients.len(), "API clients loaded");

        let next_id = clients.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        let by_key = clients.into_iter().map(|c| (c.app_key.clone(), c)).collect();
        Ok(Self {
            by_key,
            next_id: AtomicU64::new(next_id),
            persistence,
            pool,
            write_lock: Mutex::new(()),
        })
    }

    fn snapshot(&self) -> Vec<ApiClient> {
        let mut clients: Vec<ApiClient> = self.by_key.iter().map(|e| e.value().clone()).collect();
        clients.sort_by_key(|c| c.id);
        clients
    }

    async fn persist(&self, clients: Vec<ApiClient>) -> Result<(), StoreError> {
        match &self.persistence {
            ClientPersistence::File(path) => {
                let path = path.clone();
                self.pool
                    .mutate("clients write", move |guard| {
                        guard.begin_commit()?;
                        write_atomic(&path, &clients)
                    })
                    .await
            }
            ClientPersistence::Memory => Ok(()),
        }
    }

    /// New enabled client with freshly generated keys.
    pub async fn create(&self, description: Option<String>) -> Result<ApiClient, StoreError> {
        let _guard = self.write_lock.lock().await;
        let client = ApiClient {
            id: self.next_id.load(Ordering::SeqCst),
            app_key: format!("AK{}", Uuid::new_v4().simple()),
            secret_key: format!("SK{}", Uuid::new_v4().simple()),
            description,
            enabled: true,
        };

        let mut next = self.snapshot();
        next.push(client.clone());
        self.persist(next).await?;

        self.next_id.fetch_add(1, Ordering::SeqCst);
        self.by_key.insert(client.app_key.clone(), client.clone());
        tracing::info!(client_id = client.id, app_key = %client.app_key, "API client created");
        Ok(client)
    }

    /// Change description and/or enabled flag. Keys are immutable.
    pub async fn update(
        &self,
        id: u64,
        description: Option<String>,
        enabled: Option<bool>,
    ) -> Result<Option<ApiClient>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut client) = self.get(id) else {
            return Ok(None);
        };
        if description.is_some() {
            client.description = description;
        }
        if let Some(enabled) = enabled {
            client.enabled = enabled;
        }

        let next: Vec<ApiClient> = self
            .snapshot()
            .into_iter()
            .map(|c| if c.id == id { client.clone() } else { c })
            .collect();
        self.persist(next).await?;

        self.by_key.insert(client.app_key.clone(), client.clone());
        tracing::info!(client_id = id, enabled = client.enabled, "API client updated");
        Ok(Some(client))
    }

    /// Returns whether the client existed.
    pub async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(client) = self.get(id) else {
            return Ok(false);
        };

        let next: Vec<ApiClient> = self.snapshot().into_iter().filter(|c| c.id != id).collect();
        self.persist(next).await?;

        self.by_key.remove(&client.app_key);
        tracing::info!(client_id = id, "API client deleted");
        Ok(true)
    }

    /// Clients ordered by id, optionally filtered by a case-insensitive
    /// substring of appKey or description.
    pub fn list(&self, query: Option<&str>) -> Vec<ApiClient> {
        let needle = query.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());
        self.snapshot()
            .into_iter()
            .filter(|c| match &needle {
                None => true,
                Some(n) => {
                    c.app_key.to_lowercase().contains(n)
                        || c.description
                            .as_deref()
                            .map(|d| d.to_lowercase().contains(n))
                            .unwrap_or(false)
                }
            })
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<ApiClient> {
        self.by_key
            .iter()
            .find(|e| e.value().id == id)
            .map(|e| e.value().clone())
    }

    pub fn find_by_app_key(&self, app_key: &str) -> Option<ApiClient> {
        self.by_key.get(app_key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl ClientDirectory for ApiClientStore {
    fn lookup(&self, app_key: &str) -> Option<ApiClient> {
        self.find_by_app_key(app_key)
    }
}
