//! Sequential step runner with reverse-order cleanup.
//!
//! Steps run in the order given until one halts, an error is recorded or the
//! build is cancelled. Every step that started gets its cleanup called, last
//! started first, whatever the outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::steps::{BuildContext, Step, StepAction};
use crate::types::Error;

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Steps whose `run` was called, in order.
    pub executed: Vec<&'static str>,
    /// The step that returned `Halt`, if any.
    pub halted_at: Option<&'static str>,
    /// The run stopped because the build was cancelled.
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Ordered list of steps.
#[derive(Debug, Default)]
pub struct Runner {
    steps: Vec<Box<dyn Step>>,
}

impl Runner {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &mut BuildContext) -> RunReport {
        let mut report = RunReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let mut executed: Vec<&dyn Step> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            if ctx.cancel.is_cancelled() {
                tracing::warn!("build_interrupted: before_step={}", step.name());
                if !ctx.state.has_error() {
                    ctx.state.record_error(Error::Interrupted);
                }
                break;
            }
            if ctx.state.has_error() {
                break;
            }

            executed.push(step.as_ref());
            tracing::info!("step_started: name={}", step.name());
            if step.run(ctx).await == StepAction::Halt {
                tracing::warn!("step_halted: name={}", step.name());
                report.halted_at = Some(step.name());
                break;
            }
            tracing::info!("step_completed: name={}", step.name());
        }

        for step in executed.iter().rev() {
            tracing::debug!("step_cleanup: name={}", step.name());
            step.cleanup(ctx).await;
        }

        report.executed = executed.iter().map(|s| s.name()).collect();
        report.cancelled = ctx.state.error().is_some_and(Error::is_interrupted);
        report.finished_at = Some(Utc::now());
        tracing::info!(
            "run_finished: executed={}, halted_at={:?}, cancelled={}",
            report.executed.len(),
            report.halted_at,
            report.cancelled
        );
        report
    }
}
