use async_trait::async_trait;

use super::{BuildContext, Step, StepAction};
use crate::client::status;
use crate::poller::Observation;
use crate::types::Result;

/// Wait for the VM to converge on a status.
#[derive(Debug, Clone)]
pub struct WaitForVm {
    name: &'static str,
    goal: &'static str,
    pending: &'static [&'static str],
    target: &'static [&'static str],
}

impl WaitForVm {
    /// After creation: the template image is copied while the VM is locked.
    pub fn created() -> Self {
        Self {
            name: "wait_for_vm_created",
            goal: "ready (status down)",
            pending: &[status::IMAGE_LOCKED],
            target: &[status::DOWN],
        }
    }

    /// After start.
    pub fn up() -> Self {
        Self {
            name: "wait_for_vm_up",
            goal: "up",
            pending: &[status::WAIT_FOR_LAUNCH, status::POWERING_UP],
            target: &[status::UP],
        }
    }

    /// After stop.
    pub fn down() -> Self {
        Self {
            name: "wait_for_vm_down",
            goal: "down",
            pending: &[status::UP, status::POWERING_DOWN],
            target: &[status::DOWN],
        }
    }

    async fn wait(&self, ctx: &BuildContext) -> Result<()> {
        let vm_id = ctx.state.require_vm_id()?;
        let conf = ctx.state_change(format!("vm {}", vm_id), self.pending, self.target)?;
        let client = &ctx.client;

        ctx.wait_for(&conf, move || async move {
            let status = client.get_vm_status(vm_id).await?;
            Ok(status.map(|s| Observation::new((), s)))
        })
        .await
    }
}

#[async_trait]
impl Step for WaitForVm {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        ctx.ui
            .message(&format!("Waiting for VM to become {} ...", self.goal));

        match self.wait(ctx).await {
            Ok(()) => {
                tracing::debug!("vm_converged: step={}", self.name);
                StepAction::Continue
            }
            Err(e) => {
                let vm = ctx
                    .state
                    .vm_id()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                let what = format!("Failed waiting for VM ({}) to become {}", vm, self.goal);
                ctx.fail(&what, e)
            }
        }
    }
}
