//! User-facing progress output.
//!
//! Steps narrate through [`Ui`] rather than logging directly so a host can
//! render build progress however it likes. [`TracingUi`] is the default sink.

/// Progress sink for a build.
pub trait Ui: Send + Sync + std::fmt::Debug {
    /// A headline: a step starting.
    fn say(&self, msg: &str);

    /// Detail under the current headline.
    fn message(&self, msg: &str);

    fn error(&self, msg: &str);
}

/// Renders UI output as `tracing` events under [`crate::observability::UI_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, msg: &str) {
        tracing::info!(target: crate::observability::UI_TARGET, "==> {}", msg);
    }

    fn message(&self, msg: &str) {
        tracing::info!(target: crate::observability::UI_TARGET, "    {}", msg);
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: crate::observability::UI_TARGET, "{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tracing_test::traced_test]
    #[test]
    fn test_tracing_ui_emits_events() {
        TracingUi.say("Stopping VM");
        TracingUi.message("VM id: v1");
        TracingUi.error("Error stopping VM");
        assert!(logs_contain("==> Stopping VM"));
        assert!(logs_contain("    VM id: v1"));
        assert!(logs_contain("Error stopping VM"));
    }
}
