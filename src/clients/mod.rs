//! API client registry.
//!
//! # Data Flow
//! ```text
//! Admin API (create / update / delete)
//!     → ApiClientStore (write lock, persist snapshot on the blocking pool)
//!     → in-memory index swapped in after the write is durable
//!
//! AuthGate (every request)
//!     → ClientDirectory::lookup(app_key) (lock-free read of the index)
//! ```
//!
//! # Design Decisions
//! - The request path never touches disk
//! - appKey and secretKey are generated once and never change
//! - Mutations are serialised; reads are not

pub mod store;

use serde::{Deserialize, Serialize};

pub use store::{ApiClientStore, ClientPersistence};

/// A caller allowed to sign requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiClient {
    pub id: u64,
    pub app_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
}

/// Read-only appKey lookup used by the AuthGate.
pub trait ClientDirectory: Send + Sync + 'static {
    fn lookup(&self, app_key: &str) -> Option<ApiClient>;
}

impl ClientDirectory for std::collections::HashMap<String, ApiClient> {
    fn lookup(&self, app_key: &str) -> Option<ApiClient> {
        self.get(app_key).cloned()
    }
}
