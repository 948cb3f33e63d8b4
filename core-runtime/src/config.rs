//! # Core Configuration Module
//!
//! Provides configuration management for the capture upload core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding every collaborator and tunable the upload queue needs. It enforces
//! fail-fast validation so a missing bridge is reported at startup rather than
//! on the first upload.
//!
//! ## Required Dependencies
//!
//! - `IdentityProvider` - who is signed in
//! - `ObjectStore` - media upload client
//! - `MetadataStore` - document write client
//! - `SecureStore` - holds the queue's record key (desktop default: keyring)
//! - `FileSystemAccess` - quarantine file I/O (desktop default: tokio fs)
//!
//! ## Optional Dependencies
//!
//! - `NetworkMonitor` - skip passes while offline, wake on reconnect
//! - `BackgroundExecutor` - periodic wake-ups and delayed retries
//! - `Clock` - defaults to `SystemClock`
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/upload_queue.db")
//!     .quarantine_dir("/data/quarantine")
//!     .identity_provider(Arc::new(HostIdentity))
//!     .object_store(Arc::new(HostObjectStore))
//!     .metadata_store(Arc::new(HostMetadataStore))
//!     .network_monitor(monitor)
//!     .enable_network_awareness(true)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing collaborators produce `Error::CapabilityMissing` naming the bridge
//! and how to provide it; invalid tunables produce `Error::Config`.

use crate::error::{Error, Result};
use bridge_traits::{
    BackgroundExecutor, Clock, FileSystemAccess, IdentityProvider, MetadataStore,
    NetworkMonitor, ObjectStore, SecureStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Secure store entry holding the queue record key.
pub const DEFAULT_RECORD_KEY_NAME: &str = "upload_queue_record_key";

/// Backoff tunables for transiently failing uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound for any computed delay
    pub max_delay: Duration,
    /// Extra factor applied when the remote store throttled the request
    pub throttle_multiplier: u32,
    /// Delay before retrying a pass that was aborted for lack of identity or connectivity
    pub global_retry_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
            throttle_multiplier: 4,
            global_retry_delay: Duration::from_secs(5 * 60),
        }
    }
}

/// Per-operation network timeouts. Exceeding one is a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub upload: Duration,
    pub document: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            upload: Duration::from_secs(120),
            document: Duration::from_secs(30),
        }
    }
}

/// Feature flags control optional functionality.
///
/// Each flag requires the matching bridge to be provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Periodic wake-ups and delayed retries (requires BackgroundExecutor)
    pub enable_background_sync: bool,

    /// Connectivity gating and reconnect triggers (requires NetworkMonitor)
    pub enable_network_awareness: bool,
}

/// Core configuration for the capture upload core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite queue database
    pub database_path: PathBuf,

    /// App-exclusive directory holding quarantined capture files
    pub quarantine_dir: PathBuf,

    pub identity_provider: Arc<dyn IdentityProvider>,
    pub object_store: Arc<dyn ObjectStore>,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub secure_store: Arc<dyn SecureStore>,
    pub file_system: Arc<dyn FileSystemAccess>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub background_executor: Option<Arc<dyn BackgroundExecutor>>,
    pub clock: Arc<dyn Clock>,

    pub retry: RetrySettings,
    pub timeouts: OperationTimeouts,

    /// Interval between periodic wake-ups when background sync is enabled
    pub periodic_interval: Duration,

    /// Secure store entry name for the record key
    pub record_key_name: String,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("quarantine_dir", &self.quarantine_dir)
            .field("identity_provider", &"IdentityProvider { ... }")
            .field("object_store", &"ObjectStore { ... }")
            .field("metadata_store", &"MetadataStore { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "background_executor",
                &self
                    .background_executor
                    .as_ref()
                    .map(|_| "BackgroundExecutor { ... }"),
            )
            .field("retry", &self.retry)
            .field("timeouts", &self.timeouts)
            .field("periodic_interval", &self.periodic_interval)
            .field("features", &self.features)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Paths are not empty
    /// - Backoff and timeout values are usable
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.quarantine_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Quarantine directory cannot be empty".to_string(),
            ));
        }

        if self.retry.base_delay.is_zero() {
            return Err(Error::Config(
                "Retry base delay must be greater than zero".to_string(),
            ));
        }

        if self.retry.max_delay < self.retry.base_delay {
            return Err(Error::Config(
                "Retry max delay must not be smaller than the base delay".to_string(),
            ));
        }

        if self.retry.throttle_multiplier == 0 {
            return Err(Error::Config(
                "Throttle multiplier must be at least 1".to_string(),
            ));
        }

        if self.timeouts.upload.is_zero() || self.timeouts.document.is_zero() {
            return Err(Error::Config(
                "Operation timeouts must be greater than zero".to_string(),
            ));
        }

        if self.periodic_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "Periodic interval must be at least one second".to_string(),
            ));
        }

        if self.features.enable_background_sync && self.background_executor.is_none() {
            return Err(Error::Config(
                "Background sync enabled but no BackgroundExecutor provided. \
                 Disable the feature or inject a BackgroundExecutor implementation."
                    .to_string(),
            ));
        }

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::Config(
                "Network awareness enabled but no NetworkMonitor provided. \
                 Disable the feature or inject a NetworkMonitor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn capability_missing(capability: &str, message: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(capability_missing(
        "SecureStore",
        "SecureStore implementation is required to protect the upload queue record key. \
         Desktop: ensure the 'desktop-shims' feature is enabled to use the default KeyringSecureStore. \
         Mobile: inject platform-native secure storage (Keychain/Keystore).",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(capability_missing(
        "FileSystemAccess",
        "FileSystemAccess implementation is required for the quarantine directory. \
         Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
         Mobile: inject an adapter rooted in non-purgeable app storage.",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    quarantine_dir: Option<PathBuf>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    metadata_store: Option<Arc<dyn MetadataStore>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    background_executor: Option<Arc<dyn BackgroundExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    retry: Option<RetrySettings>,
    timeouts: Option<OperationTimeouts>,
    periodic_interval: Option<Duration>,
    record_key_name: Option<String>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the queue database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/data/upload_queue.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the quarantine directory. It must live in storage the OS never purges.
    pub fn quarantine_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.quarantine_dir = Some(path.into());
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata_store = Some(store);
        self
    }

    /// Sets the secure store implementation.
    ///
    /// If not provided, the keyring-backed desktop default is used when the
    /// `desktop-shims` feature is enabled.
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, the tokio-based desktop default is used when the
    /// `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn background_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.background_executor = Some(executor);
        self
    }

    /// Overrides the time source used for backoff decisions.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn retry_settings(mut self, retry: RetrySettings) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn operation_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Default: 15 minutes
    pub fn periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = Some(interval);
        self
    }

    pub fn record_key_name(mut self, name: impl Into<String>) -> Self {
        self.record_key_name = Some(name.into());
        self
    }

    /// Requires a `BackgroundExecutor` to be provided. Default: false
    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    /// Requires a `NetworkMonitor` to be provided. Default: false
    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if:
    /// - A required path or bridge is missing
    /// - Tunables are out of range
    /// - Feature flags are inconsistent with available bridges
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let quarantine_dir = self.quarantine_dir.ok_or_else(|| {
            Error::Config(
                "Quarantine directory is required. Use .quarantine_dir() to set it.".to_string(),
            )
        })?;

        let identity_provider = self.identity_provider.ok_or_else(|| {
            capability_missing(
                "IdentityProvider",
                "IdentityProvider implementation is required so uploads run as the signed-in user. \
                 Inject an adapter over the host auth subsystem.",
            )
        })?;

        let object_store = self.object_store.ok_or_else(|| {
            capability_missing(
                "ObjectStore",
                "ObjectStore implementation is required to upload captured media. \
                 Inject the host upload client.",
            )
        })?;

        let metadata_store = self.metadata_store.ok_or_else(|| {
            capability_missing(
                "MetadataStore",
                "MetadataStore implementation is required to write capture documents. \
                 Inject the host document client.",
            )
        })?;

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let config = CoreConfig {
            database_path,
            quarantine_dir,
            identity_provider,
            object_store,
            metadata_store,
            secure_store,
            file_system,
            network_monitor: self.network_monitor,
            background_executor: self.background_executor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            retry: self.retry.unwrap_or_default(),
            timeouts: self.timeouts.unwrap_or_default(),
            periodic_interval: self
                .periodic_interval
                .unwrap_or(Duration::from_secs(15 * 60)),
            record_key_name: self
                .record_key_name
                .unwrap_or_else(|| DEFAULT_RECORD_KEY_NAME.to_string()),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
