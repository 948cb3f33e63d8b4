//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the capture upload core:
//! - Logging and tracing infrastructure
//! - Configuration management and bridge injection
//! - Event bus system for status reporting
//!
//! ## Overview
//!
//! Every other core crate depends on this one. It fixes the logging
//! conventions, validates the host-provided bridges once at startup, and owns
//! the broadcast channel that queue and upload outcomes are published on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
