//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → registry → store / cache / bus → notifier → services
//!         → startup reconcile → first table load → background tasks → listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → listeners drain, background tasks exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The table is loaded before the gateway listener binds, so the first
//!   request already sees every projected route
//! - One shutdown channel for everything

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{bootstrap, Gateway, StartupError};
