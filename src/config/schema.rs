//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public listener that serves proxied traffic.
    pub listener: ListenerConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Durable route and client store.
    pub store: StoreConfig,

    /// Fast-path route cache.
    pub cache: CacheConfig,

    /// Cluster change notification.
    pub notifier: NotifierConfig,

    /// Request signature authentication.
    pub auth: AuthConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request hardening.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Name recorded as creator/updater on route mutations.
    pub operator: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
            operator: "admin".to_string(),
        }
    }
}

/// Which implementation backs a store.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON documents on local disk.
    File,
    /// Volatile, process local.
    Memory,
}

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Route table file (file backend).
    pub routes_path: String,

    /// API client file (file backend).
    pub clients_path: String,

    /// Size of the dedicated blocking worker pool.
    pub worker_threads: usize,

    /// Deadline for a single store operation in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            routes_path: "data/routes.json".to_string(),
            clients_path: "data/clients.json".to_string(),
            worker_threads: 4,
            operation_timeout_ms: 5_000,
        }
    }
}

/// Which implementation backs the route cache and the refresh bus.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SharedBackend {
    Redis,
    Memory,
}

/// Fast-path cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: SharedBackend,

    /// Redis connection URL (redis backend).
    pub redis_url: String,

    /// Hash key holding route projections.
    pub routes_key: String,

    /// Deadline for a single cache operation in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: SharedBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            routes_key: "gateway:routes".to_string(),
            operation_timeout_ms: 2_000,
        }
    }
}

/// Change notification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub backend: SharedBackend,

    /// Redis connection URL (redis backend).
    pub redis_url: String,

    /// Broadcast channel name.
    pub channel: String,

    /// Maximum attempts for publishing or (re)subscribing.
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles per attempt.
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    pub max_delay_ms: u64,

    /// Deadline for a single publish in milliseconds.
    pub publish_timeout_ms: u64,

    /// Periodic reconciliation interval in seconds (0 disables).
    pub reconcile_interval_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            backend: SharedBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel: "gateway:routes:refresh".to_string(),
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            publish_timeout_ms: 2_000,
            reconcile_interval_secs: 300,
        }
    }
}

/// Signature authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require signed requests on the public listener.
    pub enabled: bool,

    /// Accepted clock skew between client and gateway.
    pub timestamp_tolerance_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timestamp_tolerance_secs: 300,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per key; also the burst capacity.
    pub requests_per_second: f64,

    /// Buckets untouched for this long are evicted.
    pub idle_ttl_secs: u64,

    /// How often the eviction sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10.0,
            idle_ttl_secs: 3_600,
            sweep_interval_secs: 60,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) used when RUST_LOG is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [rate_limit]
            requests_per_second = 1.0

            [cache]
            backend = "redis"
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.requests_per_second, 1.0);
        assert_eq!(config.rate_limit.idle_ttl_secs, 3_600);
        assert_eq!(config.cache.backend, SharedBackend::Redis);
        assert_eq!(config.notifier.channel, "gateway:routes:refresh");
        assert_eq!(config.auth.timestamp_tolerance_secs, 300);
        assert_eq!(config.store.backend, StoreBackend::File);
    }
}
