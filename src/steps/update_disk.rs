use async_trait::async_trait;

use super::{BuildContext, Step, StepAction};
use crate::client::{status, DiskProperties};
use crate::poller::Observation;
use crate::types::{DiskId, Result, VmId};

/// Rename the boot disk and describe it, then wait until the engine has
/// released its lock on the disk.
#[derive(Debug, Default)]
pub struct UpdateDisk;

impl UpdateDisk {
    async fn update(ctx: &BuildContext, vm_id: &VmId) -> Result<DiskId> {
        let disk = ctx.boot_disk(vm_id).await?;
        let properties = DiskProperties {
            name: Some(ctx.config.disk.disk_name.clone()),
            description: Some(ctx.config.disk.disk_description.clone()),
        };
        ctx.client
            .update_disk_attachment(vm_id, &disk.disk_id, &properties)
            .await?;
        Ok(disk.disk_id)
    }

    async fn wait_unlocked(ctx: &BuildContext, disk_id: &DiskId) -> Result<()> {
        let conf = ctx.state_change(format!("disk {}", disk_id), &[status::LOCKED], &[status::OK])?;
        let client = &ctx.client;
        ctx.wait_for(&conf, move || async move {
            let status = client.get_disk_status(disk_id).await?;
            Ok(status.map(|s| Observation::new((), s)))
        })
        .await
    }
}

#[async_trait]
impl Step for UpdateDisk {
    fn name(&self) -> &'static str {
        "update_disk"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        let vm_id = match ctx.state.require_vm_id() {
            Ok(id) => id.clone(),
            Err(e) => return ctx.fail("Error updating disk", e),
        };

        ctx.ui.say("Updating disk properties ...");
        let disk_id = match Self::update(ctx, &vm_id).await {
            Ok(id) => id,
            Err(e) => return ctx.fail("Error updating disk properties", e),
        };
        ctx.ui.message(&format!(
            "Disk '{}' renamed to '{}'",
            disk_id, ctx.config.disk.disk_name
        ));

        ctx.ui.message("Waiting for disk to become ready ...");
        match Self::wait_unlocked(ctx, &disk_id).await {
            Ok(()) => {
                tracing::info!("disk_updated: vm={}, disk={}", vm_id, disk_id);
                StepAction::Continue
            }
            Err(e) => {
                let what = format!("Failed waiting for disk ({}) to become ok", disk_id);
                ctx.fail(&what, e)
            }
        }
    }
}
