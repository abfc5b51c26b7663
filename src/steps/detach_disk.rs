use async_trait::async_trait;

use super::{BuildContext, Step, StepAction};
use crate::client::status;
use crate::poller::Observation;
use crate::types::{DiskId, Error, Result, VmId};

/// Detach the boot disk so it outlives the VM. The detached disk is the
/// build's product and is recorded as `disk_id`.
#[derive(Debug, Default)]
pub struct DetachDisk;

/// A failure together with what was being attempted.
type Failure = (String, Error);

fn attempt<T>(result: Result<T>, what: impl FnOnce() -> String) -> std::result::Result<T, Failure> {
    result.map_err(|e| (what(), e))
}

impl DetachDisk {
    async fn wait_inactive(ctx: &BuildContext, vm_id: &VmId, disk_id: &DiskId) -> Result<()> {
        let conf = ctx.state_change(
            format!("disk attachment {}", disk_id),
            &[status::ACTIVE],
            &[status::INACTIVE],
        )?;
        let client = &ctx.client;
        ctx.wait_for(&conf, move || async move {
            let status = client.get_disk_attachment_status(vm_id, disk_id).await?;
            Ok(status.map(|s| Observation::new((), s)))
        })
        .await
    }

    async fn detach(ctx: &BuildContext, vm_id: &VmId) -> std::result::Result<DiskId, Failure> {
        let disk = attempt(ctx.boot_disk(vm_id).await, || {
            format!("Error getting disk of VM '{}'", vm_id)
        })?;
        let disk_id = disk.disk_id;

        if disk.active {
            ctx.ui
                .message(&format!("Deactivating disk attachment: {} ...", disk_id));
            let deactivated = ctx
                .client
                .set_disk_attachment_active(vm_id, &disk_id, false)
                .await;
            attempt(deactivated, || {
                format!("Failed to deactivate disk attachment '{}'", disk_id)
            })?;
        }

        ctx.ui
            .message("Waiting for disk attachment to become inactive ...");
        attempt(Self::wait_inactive(ctx, vm_id, &disk_id).await, || {
            format!(
                "Failed waiting for disk attachment ({}) to become inactive",
                disk_id
            )
        })?;

        attempt(ctx.client.detach_disk(vm_id, &disk_id).await, || {
            format!("Failed to detach disk ({}) from VM", disk_id)
        })?;
        Ok(disk_id)
    }
}

#[async_trait]
impl Step for DetachDisk {
    fn name(&self) -> &'static str {
        "detach_disk"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        let vm_id = match ctx.state.require_vm_id() {
            Ok(id) => id.clone(),
            Err(e) => return ctx.fail("Error detaching disk", e),
        };

        ctx.ui.say("Detaching disk from VM ...");
        match Self::detach(ctx, &vm_id).await {
            Ok(disk_id) => {
                tracing::info!("disk_detached: vm={}, disk={}", vm_id, disk_id);
                ctx.ui.message(&format!("Disk '{}' detached", disk_id));
                ctx.state.put(disk_id);
                StepAction::Continue
            }
            Err((what, e)) => ctx.fail(&what, e),
        }
    }
}
