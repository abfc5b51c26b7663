//! Core types for image builds.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (VmId, DiskId, etc.)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Build configuration, defaults and validation

pub mod config;
mod errors;
mod ids;

pub use config::BuildConfig;
pub use errors::{Error, Result};
pub use ids::{ClusterId, DiskId, TemplateId, VmId};
