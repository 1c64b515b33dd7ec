//! Route management subsystem.
//!
//! # Data Flow
//! ```text
//! Admin mutation (save / delete):
//!     → validator.rs (normalise names, check against the registry)
//!     → store.rs (persist the full definition, eligible or not)
//!     → cache.rs (put projection if eligible, else remove)
//!     → notify::ChangeNotifier (local reload + cluster broadcast)
//!
//! Reconciliation (startup, periodic, admin):
//!     store.rs (all rows) → validator.rs → cache.rs replace_all → notify
//! ```
//!
//! # Design Decisions
//! - The store is the source of truth and is written first
//! - The cache only ever holds routes that are enabled and fully valid
//! - A cache failure never rolls back the store; reconciliation repairs it
//! - Ineligible routes are kept in the store so operators can fix them

pub mod cache;
pub mod service;
pub mod store;
pub mod types;
pub mod validator;

pub use cache::{CacheError, MemoryRouteCache, RedisRouteCache, RouteCache};
pub use service::{ReconcileError, RouteAdminService, SaveOutcome};
pub use store::{FileRouteRepository, MemoryRouteRepository, RouteRepository, RouteRow, RouteStore};
pub use validator::{FILTER_NOT_FOUND, PREDICATE_NOT_FOUND};
pub use types::{FilterDefinition, PredicateDefinition, ProjectedFilter, RouteDefinition, RouteProjection};
