use async_trait::async_trait;

use super::{BuildContext, Step, StepAction};

/// Power the VM off so its disk can be detached. The VM itself is removed
/// by `CreateVm` cleanup.
#[derive(Debug, Default)]
pub struct StopVm;

#[async_trait]
impl Step for StopVm {
    fn name(&self) -> &'static str {
        "stop_vm"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        let vm_id = match ctx.state.require_vm_id() {
            Ok(id) => id.clone(),
            Err(e) => return ctx.fail("Error stopping VM", e),
        };

        ctx.ui.say(&format!("Stopping VM: {} ...", vm_id));
        match ctx.client.stop_vm(&vm_id).await {
            Ok(()) => {
                tracing::info!("vm_stopped: id={}", vm_id);
                StepAction::Continue
            }
            Err(e) => ctx.fail("Error stopping VM", e),
        }
    }
}
