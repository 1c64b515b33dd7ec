//! Routing subsystem: the live, in-memory route table.
//!
//! # Data Flow
//! ```text
//! Reload (startup, RouteEvent::Reload):
//!     RouteCache::projections()
//!     → table.rs (compile each projection through the registry)
//!     → sort by order, then id
//!     → RouteTableHandle swaps the new table in atomically
//!
//! Incoming request:
//!     → RouteTableHandle::match_request
//!     → first route whose predicates all match, or None
//! ```
//!
//! # Design Decisions
//! - A route that fails to compile is skipped and logged; the rest load
//! - Tables are immutable; a reload builds a new one and swaps the pointer
//! - Readers never block on a reload (ArcSwap)
//! - First match wins

pub mod reloader;
pub mod table;

pub use reloader::RouteTableReloader;
pub use table::{Route, RouteCompileError, RouteTable, RouteTableHandle};
