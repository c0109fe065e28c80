//! Unified Configuration Module
//!
//! This module consolidates NLDS's configuration into a single, coherent
//! document loaded once at process start and treated as immutable
//! thereafter, with validation and defaults provided through a builder
//! pattern.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unified configuration for all NLDS components.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NldsConfig {
    /// Identity-provider authentication configuration.
    pub authentication: AuthenticationConfig,

    /// Message bus (RabbitMQ / AMQP) connection configuration.
    pub rabbit_mq: RabbitMqConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Indexer consumer configuration.
    pub indexer: IndexerConfig,

    /// Catalog consumer configuration.
    pub catalog: CatalogConfig,

    /// Transfer (disk/object-store put/get/del) consumer configuration.
    pub transfer: TransferConfig,

    /// Archive (tape put/get) consumer configuration.
    pub archive: ArchiveConfig,

    /// Monitor consumer configuration.
    pub monitor: MonitorConfig,

    /// Router / NLDS worker configuration.
    pub router: RouterConfig,
}

/// Identity-provider authentication backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// Which authenticator backend to use, e.g. `"jasmin"`. Required by the
    /// config schema; an empty value fails validation.
    pub authenticator_backend: String,

    /// Base URL for the identity provider's user-profile endpoint.
    pub user_profile_url: String,

    /// Base URL for the identity provider's user-services endpoint.
    pub user_services_url: String,

    /// Base URL for the identity provider's user-grants endpoint.
    pub user_grants_url: String,

    /// How long an authentication decision may be cached before
    /// re-validating with the identity provider.
    pub cache_ttl: Duration,
}

/// RabbitMQ / AMQP bus connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitMqConfig {
    pub user: String,
    pub password: String,
    pub server: String,
    pub port: u16,
    pub vhost: String,
    pub exchange: String,

    /// Exchange type, normally `"topic"`.
    pub exchange_type: String,

    /// AMQP heartbeat interval; the keepalive daemon pumps the connection
    /// at `max(heartbeat/2, 1)` seconds while a consumer is actively
    /// polling.
    pub heartbeat: Duration,

    /// Base delay for the exponential backoff reconnect loop.
    pub retry_base_delay: Duration,

    /// Cap for the exponential backoff reconnect loop.
    pub retry_max_delay: Duration,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` env-filter style directive, e.g. `"info"` or
    /// `"nlds=debug,lapin=warn"`.
    pub level: String,

    /// Emit structured JSON log lines instead of human-readable text.
    pub json: bool,
}

/// Indexer consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Maximum number of files accumulated before a list is flushed
    /// downstream regardless of byte-size threshold.
    pub filelist_max_length: usize,

    /// Maximum cumulative byte size accumulated before a list is flushed.
    pub filelist_max_size: u64,

    /// Maximum number of retry attempts for a single file before it is
    /// recorded as permanently failed.
    pub max_retries: u32,
}

/// Catalog consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// SQL connection string (sqlite or postgres, via `sqlx`).
    pub database_url: String,

    /// Default bucket/holding label applied to new holdings when the
    /// caller supplies none.
    pub default_label: String,

    /// Maximum number of connections in the `sqlx` pool.
    pub max_connections: u32,
}

/// Transfer consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Object-store endpoint (S3-compatible).
    pub object_store_url: String,
    pub object_store_access_key: String,
    pub object_store_secret_key: String,

    /// Chunk size used when streaming bytes through the adler32 wrapper.
    pub chunk_size: usize,

    /// Maximum number of retry attempts per file.
    pub max_retries: u32,
}

/// Archive consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Target aggregation size in bytes (spec default: 5 GiB).
    pub target_aggregation_size: u64,

    /// Tape library endpoint/device identifier.
    pub tape_url: String,

    /// Maximum number of retry attempts per file.
    pub max_retries: u32,
}

/// Monitor consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// SQL connection string for the monitor's own persistence store.
    pub database_url: String,
}

/// Router / NLDS worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Interval at which the router sweeps for due `ARCHIVE_NEXT`
    /// scheduling work.
    pub archive_next_interval: Duration,
}

/// Configuration builder with validation and defaults.
#[derive(Default)]
pub struct ConfigBuilder {
    config: NldsConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder with defaults.
    pub fn new() -> Self {
        Self {
            config: NldsConfig::default(),
        }
    }

    pub fn authentication(mut self, authentication: AuthenticationConfig) -> Self {
        self.config.authentication = authentication;
        self
    }

    pub fn rabbit_mq(mut self, rabbit_mq: RabbitMqConfig) -> Self {
        self.config.rabbit_mq = rabbit_mq;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn indexer(mut self, indexer: IndexerConfig) -> Self {
        self.config.indexer = indexer;
        self
    }

    pub fn catalog(mut self, catalog: CatalogConfig) -> Self {
        self.config.catalog = catalog;
        self
    }

    pub fn transfer(mut self, transfer: TransferConfig) -> Self {
        self.config.transfer = transfer;
        self
    }

    pub fn archive(mut self, archive: ArchiveConfig) -> Self {
        self.config.archive = archive;
        self
    }

    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.config.monitor = monitor;
        self
    }

    pub fn router(mut self, router: RouterConfig) -> Self {
        self.config.router = router;
        self
    }

    /// Build and validate the configuration.
    ///
    /// Mirrors the original `CONFIG_SCHEMA`-driven validator: the
    /// `authentication` section requires `authenticator_backend`; the
    /// `rabbit_mq` section requires `user`/`password`/`server`/`vhost`/
    /// `exchange`.
    pub fn build(self) -> Result<NldsConfig> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<()> {
        if self.config.authentication.authenticator_backend.is_empty() {
            return Err(anyhow::anyhow!(
                "authentication.authenticator_backend is required"
            ));
        }

        let bus = &self.config.rabbit_mq;
        if bus.user.is_empty() {
            return Err(anyhow::anyhow!("rabbit_mq.user is required"));
        }
        if bus.password.is_empty() {
            return Err(anyhow::anyhow!("rabbit_mq.password is required"));
        }
        if bus.server.is_empty() {
            return Err(anyhow::anyhow!("rabbit_mq.server is required"));
        }
        if bus.vhost.is_empty() {
            return Err(anyhow::anyhow!("rabbit_mq.vhost is required"));
        }
        if bus.exchange.is_empty() {
            return Err(anyhow::anyhow!("rabbit_mq.exchange is required"));
        }
        if bus.port == 0 {
            return Err(anyhow::anyhow!("rabbit_mq.port cannot be 0"));
        }

        if self.config.archive.target_aggregation_size == 0 {
            return Err(anyhow::anyhow!(
                "archive.target_aggregation_size cannot be 0"
            ));
        }

        if self.config.indexer.filelist_max_length == 0 {
            return Err(anyhow::anyhow!(
                "indexer.filelist_max_length cannot be 0"
            ));
        }

        Ok(())
    }
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            authenticator_backend: "jasmin".to_string(),
            user_profile_url: "https://localhost/api/user".to_string(),
            user_services_url: "https://localhost/api/services".to_string(),
            user_grants_url: "https://localhost/api/grants".to_string(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            user: "guest".to_string(),
            password: "guest".to_string(),
            server: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            exchange: "nlds_exchange".to_string(),
            exchange_type: "topic".to_string(),
            heartbeat: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            filelist_max_length: 1000,
            filelist_max_size: 10 * 1024 * 1024 * 1024, // 10 GiB
            max_retries: 5,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://nlds_catalog.db".to_string(),
            default_label: "default".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            object_store_url: "http://localhost:9000".to_string(),
            object_store_access_key: String::new(),
            object_store_secret_key: String::new(),
            chunk_size: 262_144,
            max_retries: 5,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            target_aggregation_size: 5 * 1024 * 1024 * 1024, // 5 GiB
            tape_url: "tape://localhost".to_string(),
            max_retries: 5,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://nlds_monitor.db".to_string(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            archive_next_interval: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_invalid_without_rabbit_credentials_cleared() {
        // the documented defaults are deliberately non-empty, so a fresh
        // builder validates cleanly
        let config = ConfigBuilder::new().build();
        assert!(config.is_ok());
    }

    #[test]
    fn empty_authenticator_backend_fails_validation() {
        let mut auth = AuthenticationConfig::default();
        auth.authenticator_backend = String::new();
        let result = ConfigBuilder::new().authentication(auth).build();
        assert!(result.is_err());
    }

    #[test]
    fn empty_rabbit_vhost_fails_validation() {
        let mut bus = RabbitMqConfig::default();
        bus.vhost = String::new();
        let result = ConfigBuilder::new().rabbit_mq(bus).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_aggregation_target_fails_validation() {
        let mut archive = ArchiveConfig::default();
        archive.target_aggregation_size = 0;
        let result = ConfigBuilder::new().archive(archive).build();
        assert!(result.is_err());
    }
}
