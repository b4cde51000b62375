//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::cost::Role;

/// Root configuration for the dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Listener configuration (bind address, concurrency ceiling).
    pub listener: ListenerConfig,

    /// Fixed backend set. Not reconfigurable at runtime.
    pub backends: Vec<BackendConfig>,

    /// Backend selection strategy.
    pub scheduler: SchedulerConfig,

    /// Per-operation I/O deadlines.
    pub timeouts: TimeoutConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Read-only admin API.
    pub admin: AdminConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            backends: default_backends(),
            scheduler: SchedulerConfig::default(),
            timeouts: TimeoutConfig::default(),
            shutdown: ShutdownConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// The reference deployment: two video servers and one music server.
fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            name: "serv1".to_string(),
            role: Role::Video,
            address: "192.168.0.101:80".to_string(),
        },
        BackendConfig {
            name: "serv2".to_string(),
            role: Role::Video,
            address: "192.168.0.102:80".to_string(),
        },
        BackendConfig {
            name: "serv3".to_string(),
            role: Role::Music,
            address: "192.168.0.103:80".to_string(),
        },
    ]
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:80").
    pub bind_address: String,

    /// Maximum concurrent client handlers. Extra connections are closed
    /// immediately. Zero disables the ceiling.
    pub max_connections: usize,

    /// Listen backlog.
    pub backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
            max_connections: 1024,
            backlog: 128,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Media specialization.
    pub role: Role,

    /// Backend address (e.g., "192.168.0.101:80").
    pub address: String,
}

/// Backend selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Minimize projected completion time.
    #[default]
    VirtualFinish,
    /// Rotate through backends, ignoring cost.
    RoundRobin,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub strategy: SchedulingStrategy,
}

/// Timeout configuration in milliseconds. Zero means no deadline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: Option<u64>,
    pub backend_write_ms: Option<u64>,
    pub backend_read_ms: Option<u64>,
    pub client_read_ms: Option<u64>,
    pub client_write_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: Some(5_000),
            backend_write_ms: Some(5_000),
            backend_read_ms: Some(30_000),
            client_read_ms: Some(10_000),
            client_write_ms: Some(10_000),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long outstanding handlers may run after shutdown begins.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 10 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
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
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Placeholder key shipped in the defaults. Rejected when the admin API is on.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
