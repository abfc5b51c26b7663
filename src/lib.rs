//! # ovirt-imager - VM image builder for oVirt
//!
//! Produces a reusable disk image by driving a temporary VM through its
//! lifecycle on an oVirt engine:
//! - Resolve the cluster and source template
//! - Create a VM from the template and boot it once with cloud-init
//! - Optionally hand the running VM to a provisioner
//! - Stop it, rename its boot disk and detach the disk
//! - Remove the temporary VM, leaving the disk behind as the artifact
//!
//! ## Architecture
//!
//! ```text
//!   Builder ──► Runner ──► Step ──► ResourceClient ──► oVirt REST API
//!                 │          │
//!                 │          └──► poller (wait for status convergence)
//!                 └──► cleanup in reverse order
//!
//!   SharedState ──► artifact::from_state ──► Artifact | error | nothing
//! ```
//!
//! Steps run strictly in sequence on one task. Each step records its
//! failure in the shared state and halts; every step that started is
//! cleaned up, last first.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod artifact;
pub mod builder;
pub mod client;
pub mod poller;
pub mod runner;
pub mod state;
pub mod steps;
pub mod types;
pub mod ui;

// Internal utilities
pub mod observability;

#[cfg(any(test, feature = "test-harness"))]
pub mod testing;

pub use artifact::Artifact;
pub use builder::Builder;
pub use types::{BuildConfig, Error, Result};
