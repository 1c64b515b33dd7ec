//! Durable route store.
//!
//! Rows keep predicates and filters as JSON text, the way a relational table
//! would. Repositories are synchronous; [`RouteStore`] moves every call onto
//! the blocking pool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::routes::types::RouteDefinition;
use crate::store::{read_json, write_atomic, BlockingPool, CommitGuard, StoreError};

/// One row of the durable route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRow {
    pub id: String,
    pub uri: String,
    pub predicates: String,
    pub filters: String,
    pub order: i32,
    pub enabled: bool,
    pub predicate_description: Option<String>,
    pub filter_description: Option<String>,
    pub creator: Option<String>,
    pub updater: Option<String>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl RouteRow {
    pub fn from_definition(def: &RouteDefinition) -> Result<Self, StoreError> {
        Ok(Self {
            id: def.id.clone(),
            uri: def.uri.clone(),
            predicates: serde_json::to_string(&def.predicates)?,
            filters: serde_json::to_string(&def.filters)?,
            order: def.order,
            enabled: def.enabled,
            predicate_description: def.predicate_description.clone(),
            filter_description: def.filter_description.clone(),
            creator: def.creator.clone(),
            updater: def.updater.clone(),
            create_time: def.created_at,
            update_time: def.updated_at,
        })
    }

    pub fn into_definition(self) -> Result<RouteDefinition, StoreError> {
        let corrupt = |column: &str, e: serde_json::Error| StoreError::Corrupt {
            id: self.id.clone(),
            reason: format!("{}: {}", column, e),
        };
        let predicates = serde_json::from_str(&self.predicates).map_err(|e| corrupt("predicates", e))?;
        let filters = serde_json::from_str(&self.filters).map_err(|e| corrupt("filters", e))?;

        let mut def = RouteDefinition {
            id: self.id,
            uri: self.uri,
            order: self.order,
            predicates,
            filters,
            enabled: self.enabled,
            predicate_description: self.predicate_description,
            filter_description: self.filter_description,
            creator: self.creator,
            updater: self.updater,
            created_at: self.create_time,
            updated_at: self.update_time,
        };
        def.normalize_names();
        Ok(def)
    }
}

/// Synchronous route table. Implementations must make each mutation
/// all-or-nothing, and call [`CommitGuard::begin_commit`] under their lock
/// right before the change becomes visible.
pub trait RouteRepository: Send + Sync + 'static {
    /// Insert or replace the row; returns the stored definition and whether it
    /// was newly created. Creator and creation time of an existing row are kept.
    fn upsert(&self, def: RouteDefinition, guard: &CommitGuard) -> Result<(RouteDefinition, bool), StoreError>;

    /// Returns whether a row existed.
    fn delete(&self, id: &str, guard: &CommitGuard) -> Result<bool, StoreError>;

    fn find_all(&self) -> Result<Vec<RouteDefinition>, StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<RouteDefinition>, StoreError>;

    /// Case-insensitive substring match on id or uri.
    fn search(&self, query: &str) -> Result<Vec<RouteDefinition>, StoreError> {
        let needle = query.to_lowercase();
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|r| r.id.to_lowercase().contains(&needle) || r.uri.to_lowercase().contains(&needle))
            .collect())
    }
}

fn stamp(mut def: RouteDefinition, existing: Option<&RouteRow>, now: DateTime<Utc>) -> RouteDefinition {
    match existing {
        Some(row) => {
            def.creator = row.creator.clone();
            def.created_at = row.create_time;
        }
        None => {
            def.creator = def.creator.or_else(|| def.updater.clone());
            def.created_at = Some(now);
        }
    }
    def.updated_at = Some(now);
    def
}

type Table = BTreeMap<String, RouteRow>;

fn rows_to_definitions(table: &Table) -> Result<Vec<RouteDefinition>, StoreError> {
    table.values().cloned().map(RouteRow::into_definition).collect()
}

/// Route table persisted as a JSON array of rows.
pub struct FileRouteRepository {
    path: PathBuf,
    rows: Mutex<Table>,
}

impl FileRouteRepository {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let rows: Vec<RouteRow> = read_json(&path)?;
        tracing::info!(path = %path.display(), routes = rows.len(), "Route table opened");
        Ok(Self {
            path,
            rows: Mutex::new(rows.into_iter().map(|r| (r.id.clone(), r)).collect()),
        })
    }

    /// Persist `next`, then make it visible. On error the old table stays.
    fn commit(&self, current: &mut Table, next: Table) -> Result<(), StoreError> {
        let rows: Vec<&RouteRow> = next.values().collect();
        write_atomic(&self.path, &rows)?;
        *current = next;
        Ok(())
    }
}

impl RouteRepository for FileRouteRepository {
    fn upsert(&self, def: RouteDefinition, guard: &CommitGuard) -> Result<(RouteDefinition, bool), StoreError> {
        let mut rows = self.rows.lock();
        let existing = rows.get(&def.id);
        let created = existing.is_none();
        let def = stamp(def, existing, Utc::now());

        let mut next = rows.clone();
        next.insert(def.id.clone(), RouteRow::from_definition(&def)?);
        guard.begin_commit()?;
        self.commit(&mut rows, next)?;
        Ok((def, created))
    }

    fn delete(&self, id: &str, guard: &CommitGuard) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock();
        if !rows.contains_key(id) {
            return Ok(false);
        }
        let mut next = rows.clone();
        next.remove(id);
        guard.begin_commit()?;
        self.commit(&mut rows, next)?;
        Ok(true)
    }

    fn find_all(&self) -> Result<Vec<RouteDefinition>, StoreError> {
        rows_to_definitions(&self.rows.lock())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<RouteDefinition>, StoreError> {
        self.rows
            .lock()
            .get(id)
            .cloned()
            .map(RouteRow::into_definition)
            .transpose()
    }
}

/// Volatile route table.
#[derive(Default)]
pub struct MemoryRouteRepository {
    rows: Mutex<Table>,
}

impl MemoryRouteRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RouteRepository for MemoryRouteRepository {
    fn upsert(&self, def: RouteDefinition, guard: &CommitGuard) -> Result<(RouteDefinition, bool), StoreError> {
        let mut rows = self.rows.lock();
        let existing = rows.get(&def.id);
        let created = existing.is_none();
        let def = stamp(def, existing, Utc::now());
        let row = RouteRow::from_definition(&def)?;
        guard.begin_commit()?;
        rows.insert(def.id.clone(), row);
        Ok((def, created))
    }

    fn delete(&self, id: &str, guard: &CommitGuard) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock();
        if !rows.contains_key(id) {
            return Ok(false);
        }
        guard.begin_commit()?;
        Ok(rows.remove(id).is_some())
    }

    fn find_all(&self) -> Result<Vec<RouteDefinition>, StoreError> {
        rows_to_definitions(&self.rows.lock())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<RouteDefinition>, StoreError> {
        self.rows
            .lock()
            .get(id)
            .cloned()
            .map(RouteRow::into_definition)
            .transpose()
    }
}

/// Async facade over a repository; every call runs on the blocking pool.
#[derive(Clone)]
pub struct RouteStore {
    repo: Arc<dyn RouteRepository>,
    pool: BlockingPool,
}

impl RouteStore {
    pub fn new(repo: Arc<dyn RouteRepository>, pool: BlockingPool) -> Self {
        Self { repo, pool }
    }

    pub async fn upsert(&self, def: RouteDefinition) -> Result<(RouteDefinition, bool), StoreError> {
        let repo = self.repo.clone();
        self.pool.mutate("route upsert", move |guard| repo.upsert(def, guard)).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let repo = self.repo.clone();
        let id = id.to_string();
        self.pool.mutate("route delete", move |guard| repo.delete(&id, guard)).await
    }

    pub async fn find_all(&self) -> Result<Vec<RouteDefinition>, StoreError> {
        let repo = self.repo.clone();
        self.pool.run("route find_all", move || repo.find_all()).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<RouteDefinition>, StoreError> {
        let repo = self.repo.clone();
        let id = id.to_string();
        self.pool.run("route find_by_id", move || repo.find_by_id(&id)).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<RouteDefinition>, StoreError> {
        let repo = self.repo.clone();
        let query = query.to_string();
        self.pool.run("route search", move || repo.search(&query)).await
    }
}
