//! Flare Nacos Bridge
//!
//! Bridges a push-oriented registry/config center (Nacos) to pull-oriented consumers:
//! protocol fanout registration, merged discovery views, and blocking watchers with
//! cancel-safe shutdown for both service instances and configuration documents.

pub mod backend;
pub mod client;
pub mod config;
pub mod config_source;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod registry;
pub mod types;

// Re-exports
pub use backend::{
    BackendInstance, ConfigClient, MemoryBackend, NacosBackend, NamingClient, Operation,
};
pub use client::{BridgeClient, BridgeClientBuilder};
pub use config::{BridgeConfig, ConfigOptions, RegistryOptions, split_host_port};
pub use config_source::{ConfigSource, ConfigWatcher, NacosConfigSource};
pub use discovery::{
    Endpoint, Protocol, QualifiedName, ServiceInstance, ServiceWatcher, WatcherState, qualify,
};
pub use error::{BackendError, BridgeError, ErrorCategory, ErrorCode, Result};
pub use logging::{LoggingConfig, init_logging};
pub use registry::{Discovery, Registrar, ServiceRegistration, Watcher, watch_stream};
pub use types::KeyValue;
