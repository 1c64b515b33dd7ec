//! Route gateway library: dynamic HTTP routing with a durable route store, a
//! shared route cache and cluster-wide refresh.

pub mod admin;
pub mod capability;
pub mod clients;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod notify;
pub mod observability;
pub mod resilience;
pub mod routes;
pub mod routing;
pub mod security;
pub mod store;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::{bootstrap, Gateway, Shutdown};
