//! Configuration types for the pairsync system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for one integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name scoping this integration's rows in the pairing table
    /// (e.g. "hubspot/deals")
    pub service_name: String,

    /// Primary Store (local system of record)
    pub primary: CollectionConfig,

    /// Secondary Service (remote side)
    pub secondary: CollectionConfig,

    /// Pairing table configuration
    #[serde(default)]
    pub pairing_table: PairingTableConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Create a configuration with default engine settings and an
    /// in-memory pairing table
    pub fn new(
        service_name: impl Into<String>,
        primary: CollectionConfig,
        secondary: CollectionConfig,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            primary,
            secondary,
            pairing_table: PairingTableConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_service_name(&self.service_name)?;

        self.primary.validate()?;
        self.secondary.validate()?;
        if self.primary.name == self.secondary.name {
            return Err(crate::Error::config(format!(
                "Primary and secondary must be different collections, both are '{}'",
                self.primary.name
            )));
        }

        self.pairing_table.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}

/// Check that a service name can scope pairing rows
pub fn validate_service_name(service_name: &str) -> Result<(), crate::Error> {
    if service_name.trim().is_empty() {
        return Err(crate::Error::config("Service name cannot be empty"));
    }
    if service_name.chars().any(char::is_whitespace) {
        return Err(crate::Error::config(format!(
            "Service name cannot contain whitespace: '{}'",
            service_name
        )));
    }
    Ok(())
}

/// A named collection and the backend that stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection name; store instances are memoized by it
    pub name: String,

    /// Backend configuration
    pub store: StoreConfig,
}

impl CollectionConfig {
    /// Create a collection configuration
    pub fn new(name: impl Into<String>, store: StoreConfig) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    /// Validate the collection configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Collection name must be set"));
        }
        self.store.validate()
    }
}

/// Store backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// JSON-file-backed store
    File {
        /// Path to the collection file
        path: String,
    },

    /// Generic JSON collection over HTTP
    Http {
        /// Collection endpoint, e.g. "https://api.example.com/crm/deals"
        base_url: String,
        /// Bearer token (optional)
        #[serde(default)]
        api_token: Option<String>,
        /// Field carrying the record id
        #[serde(default = "default_id_field")]
        id_field: String,
        /// Field carrying the last-modification time
        #[serde(default = "default_updated_at_field")]
        updated_at_field: String,
    },

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("File store path cannot be empty"));
                }
                Ok(())
            }
            StoreConfig::Http {
                base_url,
                id_field,
                updated_at_field,
                ..
            } => {
                if base_url.is_empty() {
                    return Err(crate::Error::config("HTTP store base URL cannot be empty"));
                }
                if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "HTTP store base URL must use HTTP or HTTPS scheme. Got: {}",
                        base_url
                    )));
                }
                if id_field.is_empty() || updated_at_field.is_empty() {
                    return Err(crate::Error::config(
                        "HTTP store id and updated-at field names cannot be empty",
                    ));
                }
                if id_field == updated_at_field {
                    return Err(crate::Error::config(
                        "HTTP store id and updated-at fields must differ",
                    ));
                }
                Ok(())
            }
            StoreConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom store factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom store config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::File { .. } => "file",
            StoreConfig::Http { .. } => "http",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_updated_at_field() -> String {
    "updatedAt".to_string()
}

/// Pairing table configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairingTableConfig {
    /// In-memory pairing table (not persistent)
    #[default]
    Memory,

    /// File-based pairing table
    File {
        /// Path to the pairing file
        path: String,
    },

    /// Custom pairing table
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl PairingTableConfig {
    /// Validate the pairing table configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            PairingTableConfig::Memory => Ok(()),
            PairingTableConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("Pairing table path cannot be empty"));
                }
                Ok(())
            }
            PairingTableConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom pairing table factory cannot be empty",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the pairing table type name
    pub fn type_name(&self) -> &str {
        match self {
            PairingTableConfig::Memory => "memory",
            PairingTableConfig::File { .. } => "file",
            PairingTableConfig::Custom { factory, .. } => factory,
        }
    }

    /// Key under which the registry memoizes the table
    ///
    /// Integrations configured with the same key share one table instance.
    pub fn instance_key(&self) -> String {
        match self {
            PairingTableConfig::Memory => "memory".to_string(),
            PairingTableConfig::File { path } => format!("file:{}", path),
            PairingTableConfig::Custom { factory, config } => {
                format!("custom:{}:{}", factory, config)
            }
        }
    }
}

/// Which side's data wins when both sides carry the same `updated_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Secondary's data is pushed to Primary
    #[default]
    SecondaryWins,
    /// Primary's data is pushed to Secondary
    PrimaryWins,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of retry attempts for failed idempotent calls
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay between retry attempts (in milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Time budget for a single store or pairing-table call (in seconds)
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// How long a pass waits for stores to become ready (in seconds)
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Interval between passes when the engine drives its own schedule
    /// (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Conflict tie-break
    #[serde(default)]
    pub tie_break: TieBreak,

    /// Capacity of the internal event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.operation_timeout_secs == 0 {
            return Err(crate::Error::config("Operation timeout must be > 0"));
        }
        if self.ready_timeout_secs == 0 {
            return Err(crate::Error::config("Ready timeout must be > 0"));
        }
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Delay between retry attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Time budget for a single call
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Readiness budget for a pass
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Interval between scheduled passes
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            operation_timeout_secs: default_operation_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            tie_break: TieBreak::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_collection(name: &str) -> CollectionConfig {
        CollectionConfig::new(
            name,
            StoreConfig::File {
                path: format!("/tmp/{}.json", name),
            },
        )
    }

    #[test]
    fn test_service_name_required() {
        let config = SyncConfig::new("", file_collection("deals"), file_collection("remote"));
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let config = SyncConfig::new(
            "hubspot deals",
            file_collection("deals"),
            file_collection("remote"),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_collection_rejected() {
        let config = SyncConfig::new(
            "hubspot/deals",
            file_collection("deals"),
            file_collection("deals"),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_store_defaults_from_json() {
        let json = serde_json::json!({
            "service_name": "hubspot/deals",
            "primary": { "name": "deals", "store": { "type": "file", "path": "deals.json" } },
            "secondary": {
                "name": "hubspot-deals",
                "store": { "type": "http", "base_url": "https://api.example.com/deals" }
            }
        });

        let config: SyncConfig = serde_json::from_value(json).unwrap();
        config.validate().unwrap();

        match &config.secondary.store {
            StoreConfig::Http {
                id_field,
                updated_at_field,
                api_token,
                ..
            } => {
                assert_eq!(id_field, "id");
                assert_eq!(updated_at_field, "updatedAt");
                assert!(api_token.is_none());
            }
            other => panic!("unexpected store config: {:?}", other),
        }
        assert_eq!(config.engine.tie_break, TieBreak::SecondaryWins);
        assert_eq!(config.engine.poll_interval_secs, 10);
        assert!(matches!(config.pairing_table, PairingTableConfig::Memory));
    }

    #[test]
    fn test_http_scheme_checked() {
        let store = StoreConfig::Http {
            base_url: "ftp://example.com".to_string(),
            api_token: None,
            id_field: "id".to_string(),
            updated_at_field: "updatedAt".to_string(),
        };
        assert!(store.validate().is_err());
    }

    #[test]
    fn test_engine_zero_timeouts_rejected() {
        let engine = EngineConfig {
            operation_timeout_secs: 0,
            ..Default::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_pairing_instance_keys() {
        let a = PairingTableConfig::File {
            path: "/var/lib/pairsync/pairings.json".into(),
        };
        assert_eq!(a.instance_key(), "file:/var/lib/pairsync/pairings.json");
        assert_eq!(PairingTableConfig::Memory.instance_key(), "memory");
    }
}
