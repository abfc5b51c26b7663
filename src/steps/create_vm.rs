use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::lookup::resolve_template;
use super::{BuildContext, Step, StepAction};
use crate::client::{status, VmSpec};
use crate::poller::{wait_for_state, Observation};
use crate::types::{Result, VmId};

/// Upper bound on waiting for a running VM to power off before removal.
const STOP_BEFORE_REMOVE_TIMEOUT: Duration = Duration::from_secs(120);

async fn vm_spec(ctx: &mut BuildContext) -> Result<VmSpec> {
    let cluster_id = ctx.state.require_cluster_id()?.clone();
    let template_id = match ctx.state.template_id() {
        Some(id) => id.clone(),
        None => {
            let id = resolve_template(ctx).await?;
            ctx.state.put(id.clone());
            id
        }
    };
    Ok(VmSpec {
        name: ctx.config.vm.vm_name.clone(),
        cluster_id,
        template_id,
    })
}

/// Power off a VM an aborted build left running; the engine refuses to
/// remove it otherwise.
///
/// The build token may already be cancelled, so the wait runs on its own
/// token, bounded by [`STOP_BEFORE_REMOVE_TIMEOUT`].
async fn ensure_down(ctx: &BuildContext, vm_id: &VmId) -> Result<()> {
    let current = ctx.client.get_vm_status(vm_id).await?;
    let running = matches!(
        current.as_deref(),
        Some(status::UP | status::WAIT_FOR_LAUNCH | status::POWERING_UP)
    );
    if !running && current.as_deref() != Some(status::POWERING_DOWN) {
        return Ok(());
    }

    if running {
        ctx.ui.message(&format!("Stopping VM {} before removal", vm_id));
        ctx.client.stop_vm(vm_id).await?;
        tracing::info!("vm_stopped_for_removal: id={}", vm_id);
    }

    let conf = ctx
        .state_change(
            format!("vm {}", vm_id),
            &[
                status::UP,
                status::WAIT_FOR_LAUNCH,
                status::POWERING_UP,
                status::POWERING_DOWN,
            ],
            &[status::DOWN],
        )?
        .with_timeout(Some(STOP_BEFORE_REMOVE_TIMEOUT));
    let client = &ctx.client;
    wait_for_state(
        &conf,
        &CancellationToken::new(),
        ctx.sleeper.as_ref(),
        move || async move {
            let status = client.get_vm_status(vm_id).await?;
            Ok(status.map(|s| Observation::new((), s)))
        },
    )
    .await
}

/// Create the temporary VM from the resolved template.
///
/// Resolves the template itself when no earlier step did. The VM id is
/// stored as soon as the engine returns it, so a later failure in any step
/// still removes the VM during cleanup. A VM still running at cleanup is
/// stopped first.
#[derive(Debug, Default)]
pub struct CreateVm;

#[async_trait]
impl Step for CreateVm {
    fn name(&self) -> &'static str {
        "create_vm"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        ctx.ui.say("Creating virtual machine...");

        let spec = match vm_spec(ctx).await {
            Ok(spec) => spec,
            Err(e) => return ctx.fail("Error creating VM", e),
        };

        match ctx.client.create_vm(&spec).await {
            Ok(vm_id) => {
                tracing::info!("vm_created: name={}, id={}", spec.name, vm_id);
                ctx.ui
                    .message(&format!("Virtual machine '{}' has been defined", vm_id));
                ctx.state.put(vm_id);
                StepAction::Continue
            }
            Err(e) => ctx.fail("Error creating VM", e),
        }
    }

    async fn cleanup(&self, ctx: &mut BuildContext) {
        let Some(vm_id) = ctx.state.vm_id().cloned() else {
            return;
        };

        ctx.ui.say(&format!("Removing VM: {}", vm_id));
        if let Err(e) = ensure_down(ctx, &vm_id).await {
            tracing::warn!("vm_stop_before_remove_failed: id={}, error={}", vm_id, e);
            ctx.ui
                .error(&format!("Error stopping VM before removal: {}", e));
        }
        match ctx.client.delete_vm(&vm_id).await {
            Ok(()) => tracing::info!("vm_removed: id={}", vm_id),
            Err(e) => {
                tracing::error!("vm_remove_failed: id={}, error={}", vm_id, e);
                ctx.ui
                    .error(&format!("Error removing VM, may still be around: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::*;
    use crate::testing::ScriptedClient;
    use crate::types::{ClusterId, Error, TemplateId, VmId};

    fn resolved(client: ScriptedClient) -> Harness {
        let mut h = harness(client);
        h.ctx.state.put(ClusterId::must("c1"));
        h.ctx.state.put(TemplateId::must("t1"));
        h
    }

    #[tokio::test]
    async fn test_create_stores_vm_id() {
        let mut h = resolved(ScriptedClient::new().with_vm("v1"));

        assert_eq!(CreateVm.run(&mut h.ctx).await, StepAction::Continue);
        assert_eq!(h.ctx.state.vm_id(), Some(&VmId::must("v1")));

        let spec = h.client.created().unwrap();
        assert_eq!(spec.name, "golden");
        assert_eq!(spec.cluster_id.as_str(), "c1");
        assert_eq!(spec.template_id.as_str(), "t1");
    }

    #[tokio::test]
    async fn test_create_resolves_template_when_absent() {
        let mut h = harness(
            ScriptedClient::new()
                .with_template("centos", 1, "t9")
                .with_vm("v1"),
        );
        h.ctx.state.put(ClusterId::must("c1"));

        assert_eq!(CreateVm.run(&mut h.ctx).await, StepAction::Continue);
        assert_eq!(h.client.created().unwrap().template_id.as_str(), "t9");
        assert_eq!(h.ctx.state.template_id(), Some(&TemplateId::must("t9")));
    }

    #[tokio::test]
    async fn test_create_with_unknown_template_halts() {
        let mut h = harness(ScriptedClient::new().with_vm("v1"));
        h.ctx.state.put(ClusterId::must("c1"));

        assert_eq!(CreateVm.run(&mut h.ctx).await, StepAction::Halt);
        assert!(matches!(h.ctx.state.error(), Some(Error::NotFound(_))));
        assert!(!h.client.called("create_vm"));
    }

    #[tokio::test]
    async fn test_create_without_cluster_halts() {
        let mut h = harness(ScriptedClient::new().with_vm("v1"));

        assert_eq!(CreateVm.run(&mut h.ctx).await, StepAction::Halt);
        assert!(matches!(h.ctx.state.error(), Some(Error::MissingKey(_))));
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_without_vm_is_noop() {
        let mut h = resolved(ScriptedClient::new().fail_on("create_vm", "quota exceeded"));

        assert_eq!(CreateVm.run(&mut h.ctx).await, StepAction::Halt);
        CreateVm.cleanup(&mut h.ctx).await;

        assert_eq!(h.client.mutations(), vec!["create_vm".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_vm() {
        let mut h = resolved(ScriptedClient::new().with_vm("v1"));
        CreateVm.run(&mut h.ctx).await;
        CreateVm.cleanup(&mut h.ctx).await;

        assert!(h.client.called("delete_vm"));
        assert!(h.ctx.state.vm_id().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_stops_running_vm_of_cancelled_build() {
        let mut h = resolved(
            ScriptedClient::new()
                .with_vm("v1")
                .with_vm_statuses(&["up", "powering_down", "down"]),
        );
        CreateVm.run(&mut h.ctx).await;
        h.ctx.cancel.cancel();

        CreateVm.cleanup(&mut h.ctx).await;

        assert_eq!(h.client.mutations(), vec!["create_vm", "stop_vm", "delete_vm"]);
        assert_eq!(h.sleeper.count(), 1);
        assert!(h.ui.errors().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_waits_out_powering_down_without_stop() {
        let mut h = resolved(
            ScriptedClient::new()
                .with_vm("v1")
                .with_vm_statuses(&["powering_down", "down"]),
        );
        CreateVm.run(&mut h.ctx).await;
        CreateVm.cleanup(&mut h.ctx).await;

        assert_eq!(h.client.mutations(), vec!["create_vm", "delete_vm"]);
    }

    #[tokio::test]
    async fn test_cleanup_stop_failure_still_removes() {
        let mut h = resolved(
            ScriptedClient::new()
                .with_vm("v1")
                .with_vm_statuses(&["up"])
                .fail_on("stop_vm", "engine unavailable"),
        );
        CreateVm.run(&mut h.ctx).await;
        CreateVm.cleanup(&mut h.ctx).await;

        assert!(h.client.called("delete_vm"));
        assert!(!h.ctx.state.has_error());
        assert_eq!(
            h.ui.errors(),
            vec!["Error stopping VM before removal: remote error: engine unavailable".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cleanup_failure_only_reported() {
        let mut h = resolved(
            ScriptedClient::new()
                .with_vm("v1")
                .fail_on("delete_vm", "vm is locked"),
        );
        CreateVm.run(&mut h.ctx).await;
        CreateVm.cleanup(&mut h.ctx).await;

        assert!(!h.ctx.state.has_error());
        assert_eq!(
            h.ui.errors(),
            vec!["Error removing VM, may still be around: remote error: vm is locked".to_string()]
        );
    }
}
