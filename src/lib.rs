//! Workspace placeholder crate.
//!
//! Exposes the feature flags that map onto the workspace crates so host
//! applications can depend on `capture-sync-workspace` and get the upload
//! service with desktop bridges wired in.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
