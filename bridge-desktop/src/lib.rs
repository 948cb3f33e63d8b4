//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`
//! - `SecureStore` using the `keyring` crate
//! - `NetworkMonitor` using a TCP reachability probe
//! - `BackgroundExecutor` using Tokio timers
//!
//! Remote collaborators (`ObjectStore`, `MetadataStore`, `IdentityProvider`)
//! are always injected by the host application.
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, TokioBackgroundExecutor, TokioFileSystem};
//!
//! let fs = Arc::new(TokioFileSystem::new());
//! let monitor: Arc<dyn NetworkMonitor> = Arc::new(DesktopNetworkMonitor::new());
//! let executor = TokioBackgroundExecutor::with_network_monitor(Some(monitor.clone()));
//! ```

mod background;
mod filesystem;
mod network;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use background::TokioBackgroundExecutor;
pub use filesystem::TokioFileSystem;
pub use network::DesktopNetworkMonitor;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
