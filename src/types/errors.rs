//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use crate::state::StateKey;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for image builds.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration problems, accumulated so all of them are reported at once.
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A named remote object (cluster, template, disk) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote API rejected a call or could not be reached.
    #[error("remote error: {0}")]
    Remote(String),

    /// Convergence observed a status that is neither pending nor a target.
    #[error("unexpected state '{got}', wanted target '{}'", .wanted.join(", "))]
    UnexpectedState { got: String, wanted: Vec<String> },

    /// The build was cancelled by the user.
    #[error("interrupted")]
    Interrupted,

    /// A convergence wait exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A required shared state entry was absent.
    #[error("missing state key: {0}")]
    MissingKey(StateKey),

    /// Config file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Invariant violations.
    #[error("internal error: {0}")]
    Internal(String),

    /// HTTP transport errors.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unexpected_state(got: impl Into<String>, wanted: &[String]) -> Self {
        Self::UnexpectedState {
            got: got.into(),
            wanted: wanted.to_vec(),
        }
    }

    /// True when the build stopped because the user aborted it.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// Prefix the message with what the caller was doing, keeping the variant.
    ///
    /// `Interrupted` and `UnexpectedState` pass through untouched so callers
    /// can still match on them after the step adds its context.
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            Error::NotFound(msg) => Error::NotFound(format!("{}: {}", what, msg)),
            Error::Remote(msg) => Error::Remote(format!("{}: {}", what, msg)),
            Error::Timeout(msg) => Error::Timeout(format!("{}: {}", what, msg)),
            Error::Http(e) => Error::Remote(format!("{}: {}", what, e)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_joins_messages() {
        let err = Error::Validation(vec![
            "username must be specified".to_string(),
            "password must be specified".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid configuration: username must be specified; password must be specified"
        );
    }

    #[test]
    fn test_unexpected_state_message() {
        let err = Error::unexpected_state("reboot_in_progress", &["up".to_string()]);
        assert_eq!(
            err.to_string(),
            "unexpected state 'reboot_in_progress', wanted target 'up'"
        );
    }

    #[test]
    fn test_context_keeps_variant() {
        let err = Error::remote("connection reset").context("Error stopping VM");
        assert!(matches!(err, Error::Remote(ref m) if m == "Error stopping VM: connection reset"));

        let err = Error::Interrupted.context("Failed waiting for VM");
        assert!(err.is_interrupted());
    }
}
