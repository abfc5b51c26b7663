use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::{BuildContext, Step, StepAction};
use crate::types::{Error, Result, VmId};

/// Configures the running VM, typically over SSH.
///
/// `host` is the configured static address and may be empty when the VM
/// gets its address from DHCP.
#[async_trait]
pub trait Provisioner: Send + Sync + fmt::Debug {
    async fn provision(&self, host: &str, vm_id: &VmId) -> Result<()>;
}

/// Hand the running VM to a [`Provisioner`].
#[derive(Debug, Clone)]
pub struct Provision {
    provisioner: Arc<dyn Provisioner>,
}

impl Provision {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }
}

#[async_trait]
impl Step for Provision {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        let vm_id = match ctx.state.require_vm_id() {
            Ok(id) => id.clone(),
            Err(e) => return ctx.fail("Error provisioning VM", e),
        };
        let host = ctx.config.vm.address.clone();

        ctx.ui.say("Provisioning VM...");
        let provisioned = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(Error::Interrupted),
            result = self.provisioner.provision(&host, &vm_id) => result,
        };

        match provisioned {
            Ok(()) => {
                tracing::info!("vm_provisioned: id={}, host={}", vm_id, host);
                StepAction::Continue
            }
            Err(e) => ctx.fail("Error provisioning VM", e),
        }
    }
}
