// # pairsyncd - Pairing Sync Daemon
//
// This daemon is a THIN integration layer:
// - DO NOT add reconciliation, conflict or retry logic here
// - All pairing logic MUST be in pairsync-core
// - Configuration is via environment variables ONLY
//
// The pairsyncd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime
// 3. Registering store backends
// 4. Running the reconciliation loop until SIGINT/SIGTERM
//
// ## Configuration
//
// ### Integration
// - `PAIRSYNC_SERVICE_NAME`: Name scoping the pairing rows (e.g. hubspot/deals)
//
// ### Primary Store
// - `PAIRSYNC_PRIMARY_NAME`: Collection name (default: primary)
// - `PAIRSYNC_PRIMARY_TYPE`: Backend type (file, memory)
// - `PAIRSYNC_PRIMARY_PATH`: Path to the collection file (for file)
//
// ### Secondary Service
// - `PAIRSYNC_SECONDARY_NAME`: Collection name (default: secondary)
// - `PAIRSYNC_SECONDARY_TYPE`: Backend type (http, file, memory)
// - `PAIRSYNC_SECONDARY_URL`: Collection endpoint (for http)
// - `PAIRSYNC_SECONDARY_API_TOKEN`: Bearer token (for http, optional)
// - `PAIRSYNC_SECONDARY_ID_FIELD`: Id field name (for http, default: id)
// - `PAIRSYNC_SECONDARY_UPDATED_AT_FIELD`: Modification time field (for http, default: updatedAt)
// - `PAIRSYNC_SECONDARY_PATH`: Path to the collection file (for file)
//
// ### Pairing Table
// - `PAIRSYNC_PAIRING_TYPE`: Type of pairing table (file, memory)
// - `PAIRSYNC_PAIRING_PATH`: Path to the pairing file (for file)
//
// ### Engine
// - `PAIRSYNC_POLL_INTERVAL_SECS`: Seconds between passes
// - `PAIRSYNC_MAX_RETRIES`: Maximum retry attempts
// - `PAIRSYNC_TIE_BREAK`: Winner on equal timestamps (secondary, primary)
// - `PAIRSYNC_MODE`: Set to dry-run to log HTTP writes instead of sending them
//
// ## Example
//
// ```bash
// export PAIRSYNC_SERVICE_NAME=hubspot/deals
// export PAIRSYNC_PRIMARY_TYPE=file
// export PAIRSYNC_PRIMARY_PATH=/var/lib/pairsync/deals.json
// export PAIRSYNC_SECONDARY_TYPE=http
// export PAIRSYNC_SECONDARY_URL=https://api.example.com/crm/deals
// export PAIRSYNC_SECONDARY_API_TOKEN=your_token
// export PAIRSYNC_PAIRING_TYPE=file
// export PAIRSYNC_PAIRING_PATH=/var/lib/pairsync/pairings.json
//
// pairsyncd
// ```

use anyhow::{Context, Result};
use pairsync_core::{
    CollectionConfig, EngineConfig, EngineEvent, PairingTableConfig, StoreConfig, StoreRegistry,
    SyncConfig, TieBreak,
};
use std::env;
use std::path::Path;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum PairsyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<PairsyncExitCode> for ExitCode {
    fn from(code: PairsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// One side's settings as read from the environment
struct SideEnv {
    name: String,
    store_type: String,
    path: Option<String>,
    url: Option<String>,
    api_token: Option<String>,
    id_field: Option<String>,
    updated_at_field: Option<String>,
}

impl SideEnv {
    fn from_env(prefix: &str, default_name: &str, default_type: &str) -> Self {
        let var = |key: &str| env::var(format!("PAIRSYNC_{}_{}", prefix, key)).ok();
        Self {
            name: var("NAME").unwrap_or_else(|| default_name.to_string()),
            store_type: var("TYPE").unwrap_or_else(|| default_type.to_string()),
            path: var("PATH"),
            url: var("URL"),
            api_token: var("API_TOKEN").filter(|t| !t.is_empty()),
            id_field: var("ID_FIELD"),
            updated_at_field: var("UPDATED_AT_FIELD"),
        }
    }

    /// Validate and turn into a collection configuration
    fn collection(&self, prefix: &str) -> Result<CollectionConfig> {
        let store = match self.store_type.as_str() {
            "memory" => StoreConfig::Memory,
            "file" => StoreConfig::File {
                path: require_file_path(&format!("PAIRSYNC_{}_PATH", prefix), self.path.as_deref())?,
            },
            "http" => {
                let url = self
                    .url
                    .clone()
                    .filter(|u| !u.is_empty())
                    .with_context(|| {
                        format!("PAIRSYNC_{}_URL is required when PAIRSYNC_{}_TYPE=http", prefix, prefix)
                    })?;
                if url.starts_with("http://") {
                    eprintln!(
                        "WARNING: PAIRSYNC_{}_URL uses HTTP (not HTTPS). \
                              This is less secure. Consider using HTTPS.",
                        prefix
                    );
                }
                StoreConfig::Http {
                    base_url: url,
                    api_token: self.api_token.clone(),
                    id_field: self.id_field.clone().unwrap_or_else(|| "id".to_string()),
                    updated_at_field: self
                        .updated_at_field
                        .clone()
                        .unwrap_or_else(|| "updatedAt".to_string()),
                }
            }
            other => anyhow::bail!(
                "PAIRSYNC_{}_TYPE '{}' is not supported. \
                Supported types: memory, file, http",
                prefix,
                other
            ),
        };

        let collection = CollectionConfig::new(self.name.clone(), store);
        collection
            .validate()
            .with_context(|| format!("Invalid PAIRSYNC_{}_* settings", prefix))?;
        Ok(collection)
    }
}

/// Application configuration
struct Config {
    service_name: String,
    primary: SideEnv,
    secondary: SideEnv,
    pairing_type: String,
    pairing_path: Option<String>,
    poll_interval_secs: Option<u64>,
    max_retries: Option<usize>,
    tie_break: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            service_name: env::var("PAIRSYNC_SERVICE_NAME")
                .context("PAIRSYNC_SERVICE_NAME is required")?,
            primary: SideEnv::from_env("PRIMARY", "primary", "file"),
            secondary: SideEnv::from_env("SECONDARY", "secondary", "http"),
            pairing_type: env::var("PAIRSYNC_PAIRING_TYPE").unwrap_or_else(|_| "file".to_string()),
            pairing_path: env::var("PAIRSYNC_PAIRING_PATH").ok(),
            poll_interval_secs: parse_var("PAIRSYNC_POLL_INTERVAL_SECS")?,
            max_retries: parse_var("PAIRSYNC_MAX_RETRIES")?,
            tie_break: env::var("PAIRSYNC_TIE_BREAK").unwrap_or_else(|_| "secondary".to_string()),
            log_level: env::var("PAIRSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration and build the integration settings
    fn validate(&self) -> Result<SyncConfig> {
        let primary = self.primary.collection("PRIMARY")?;
        let secondary = self.secondary.collection("SECONDARY")?;

        let pairing_table = match self.pairing_type.as_str() {
            "memory" => {
                eprintln!(
                    "WARNING: PAIRSYNC_PAIRING_TYPE=memory loses every pairing on restart. \
                          The next run will duplicate records on both sides."
                );
                PairingTableConfig::Memory
            }
            "file" => PairingTableConfig::File {
                path: require_file_path("PAIRSYNC_PAIRING_PATH", self.pairing_path.as_deref())?,
            },
            other => anyhow::bail!(
                "PAIRSYNC_PAIRING_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };

        let mut engine = EngineConfig::default();

        if let Some(interval) = self.poll_interval_secs {
            if !(1..=86_400).contains(&interval) {
                anyhow::bail!(
                    "PAIRSYNC_POLL_INTERVAL_SECS must be between 1 and 86400 seconds. Got: {}",
                    interval
                );
            }
            engine.poll_interval_secs = interval;
        }

        if let Some(max_retries) = self.max_retries {
            if max_retries > 10 {
                anyhow::bail!("PAIRSYNC_MAX_RETRIES must be between 0 and 10. Got: {}", max_retries);
            }
            engine.max_retries = max_retries;
        }

        engine.tie_break = match self.tie_break.to_lowercase().as_str() {
            "secondary" | "secondary_wins" => TieBreak::SecondaryWins,
            "primary" | "primary_wins" => TieBreak::PrimaryWins,
            other => anyhow::bail!(
                "PAIRSYNC_TIE_BREAK '{}' is not valid. Valid values: secondary, primary",
                other
            ),
        };

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "PAIRSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        let config = SyncConfig {
            service_name: self.service_name.clone(),
            primary,
            secondary,
            pairing_table,
            engine,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer. Got: {}", key, raw)),
        Err(_) => Ok(None),
    }
}

/// Require a file path whose parent directory exists
fn require_file_path(key: &str, path: Option<&str>) -> Result<String> {
    let path = path
        .filter(|p| !p.is_empty())
        .with_context(|| format!("{} is required for file-backed storage", key))?;

    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        anyhow::bail!(
            "{} parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
            key,
            parent.display(),
            parent.display()
        );
    }

    Ok(path.to_string())
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return PairsyncExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    let sync_config = match config.validate() {
        Ok(sync_config) => sync_config,
        Err(e) => {
            eprintln!("Configuration validation error: {:#}", e);
            return PairsyncExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return PairsyncExitCode::ConfigError.into();
    }

    info!("Starting pairsyncd daemon");
    info!(
        "Integration '{}': {} ({}) <-> {} ({})",
        sync_config.service_name,
        sync_config.primary.name,
        sync_config.primary.store.type_name(),
        sync_config.secondary.name,
        sync_config.secondary.store.type_name()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return PairsyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(sync_config).await {
            Ok(()) => PairsyncExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup error: {:#}", e);
                PairsyncExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {:#}", e);
                PairsyncExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Where the daemon failed
enum DaemonError {
    /// Building stores or the engine failed
    Startup(anyhow::Error),
    /// The engine loop failed
    Runtime(anyhow::Error),
}

/// Run the daemon
async fn run_daemon(config: SyncConfig) -> std::result::Result<(), DaemonError> {
    let registry = StoreRegistry::with_builtins();

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP store");
        pairsync_service_http::register(&registry);
    }

    #[cfg(not(feature = "http"))]
    {
        if config.primary.store.type_name() == "http" || config.secondary.store.type_name() == "http" {
            warn!("HTTP store configured but the http feature is disabled");
        }
    }

    let (engine, events) = registry
        .build_reconciler(&config)
        .await
        .map_err(|e| DaemonError::Startup(e.into()))?;

    let logger = tokio::spawn(log_events(events));

    info!(
        "Starting reconciliation loop (every {}s)",
        config.engine.poll_interval_secs
    );
    let result = engine.run().await;

    // Dropping the engine closes the event channel and ends the logger
    drop(engine);
    if let Err(e) = logger.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    result.map_err(|e| DaemonError::Runtime(e.into()))?;
    info!("Shutting down daemon");
    Ok(())
}

/// Log engine events until the engine is dropped
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::PassStarted { service_name } => debug!("Pass started for '{}'", service_name),
            EngineEvent::CounterpartCreated {
                source,
                source_id,
                counterpart_id,
            } => info!(
                "Paired {} record {} with new counterpart {}",
                source, source_id, counterpart_id
            ),
            EngineEvent::OrphanRemoved { side, record_id } => {
                info!("Removed orphaned {} record {}", side, record_id)
            }
            EngineEvent::PairingRemoved { pairing_id } => debug!("Removed pairing {}", pairing_id),
            EngineEvent::ConflictResolved {
                winner,
                primary_id,
                secondary_id,
            } => info!(
                "Synced {} <-> {} ({} wins)",
                primary_id, secondary_id, winner
            ),
            EngineEvent::RecordFailed {
                side,
                record_id,
                error,
            } => warn!("{} record {} failed: {}", side, record_id, error),
            EngineEvent::PassFinished {
                service_name,
                outcome,
                mutations,
            } => info!(
                "Pass for '{}' finished: {:?}, {} mutation(s)",
                service_name, outcome, mutations
            ),
            EngineEvent::PassFailed {
                service_name,
                error,
            } => error!("Pass for '{}' failed: {}", service_name, error),
            EngineEvent::Stopped { reason } => info!("Engine stopped: {}", reason),
        }
    }
}
