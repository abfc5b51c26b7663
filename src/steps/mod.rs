//! Build steps and the context they share.
//!
//! A step does one remote thing in `run` and undoes whatever it created in
//! `cleanup`. Steps never return errors: a failing step records the error in
//! the shared state, reports it, and halts the pipeline.

mod create_vm;
mod detach_disk;
mod lookup;
mod provision;
mod start_vm;
mod stop_vm;
mod update_disk;
mod wait;

pub use create_vm::CreateVm;
pub use detach_disk::DetachDisk;
pub use lookup::{FindCluster, FindTemplate};
pub use provision::{Provision, Provisioner};
pub use start_vm::StartVm;
pub use stop_vm::StopVm;
pub use update_disk::UpdateDisk;
pub use wait::WaitForVm;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::{DiskAttachment, ResourceClient};
use crate::poller::{wait_for_state, Observation, Sleeper, StateChangeConf, TokioSleeper};
use crate::state::SharedState;
use crate::types::{BuildConfig, Error, Result, VmId};
use crate::ui::Ui;

/// What the runner does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// One stage of the build pipeline.
#[async_trait]
pub trait Step: Send + Sync + fmt::Debug {
    /// Stable name used in logs and run reports.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut BuildContext) -> StepAction;

    /// Undo what `run` created. Must tolerate absent state keys and must not
    /// fail the build.
    async fn cleanup(&self, _ctx: &mut BuildContext) {}
}

// =============================================================================
// Build context
// =============================================================================

/// Everything one build shares between its steps.
pub struct BuildContext {
    pub state: SharedState,
    pub client: Arc<dyn ResourceClient>,
    pub ui: Arc<dyn Ui>,
    pub config: Arc<BuildConfig>,
    pub cancel: CancellationToken,
    pub sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("state", &self.state)
            .field("ui", &self.ui)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("sleeper", &self.sleeper)
            .finish_non_exhaustive()
    }
}

impl BuildContext {
    pub fn new(
        config: Arc<BuildConfig>,
        client: Arc<dyn ResourceClient>,
        ui: Arc<dyn Ui>,
    ) -> Self {
        Self {
            state: SharedState::new(),
            client,
            ui,
            config,
            cancel: CancellationToken::new(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Report and record a step failure, then halt.
    ///
    /// The UI line carries `what`; the stored error keeps its variant.
    pub fn fail(&mut self, what: &str, err: Error) -> StepAction {
        let shown = format!("{}: {}", what, err);
        self.ui.error(&shown);
        tracing::error!("step_failed: {}", shown);
        self.state.record_error(err.context(what));
        StepAction::Halt
    }

    /// Poll settings from the configuration applied to `label`.
    pub fn state_change(
        &self,
        label: impl Into<String>,
        pending: &[&str],
        target: &[&str],
    ) -> Result<StateChangeConf> {
        Ok(StateChangeConf::new(label, pending, target)?
            .with_interval(self.config.polling.interval)
            .with_timeout(self.config.polling.timeout))
    }

    /// [`wait_for_state`] with this build's cancellation and sleeper.
    pub async fn wait_for<T, F, Fut>(&self, conf: &StateChangeConf, refresh: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<Observation<T>>>>,
    {
        wait_for_state(conf, &self.cancel, self.sleeper.as_ref(), refresh).await
    }

    /// The VM's boot disk: the first bootable attachment, else the first one.
    pub(crate) async fn boot_disk(&self, vm_id: &VmId) -> Result<DiskAttachment> {
        let mut attachments = self.client.list_disk_attachments(vm_id).await?;
        if attachments.is_empty() {
            return Err(Error::not_found(format!(
                "VM '{}' has no disk attachments",
                vm_id
            )));
        }
        let index = attachments.iter().position(|a| a.bootable).unwrap_or(0);
        Ok(attachments.swap_remove(index))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::testing::{RecordingSleeper, ScriptedClient};
    use crate::types::config::{AccessConfig, SourceConfig};
    use crate::testing::RecordingUi;

    pub fn test_config() -> BuildConfig {
        let mut config = BuildConfig {
            access: AccessConfig {
                ovirt_url: "https://engine.local/ovirt-engine/api".to_string(),
                username: "admin@internal".to_string(),
                password: "secret".to_string(),
                ..Default::default()
            },
            source: SourceConfig {
                source_template_name: "centos".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        config.vm.vm_name = "golden".to_string();
        config.vm.hostname = "golden.local".to_string();
        config.communicator.ssh_username = "centos".to_string();
        config.communicator.ssh_public_key = "ssh-ed25519 AAAA test".to_string();
        config.disk.disk_description = "golden image".to_string();
        let env = |_: &str| -> Option<String> { None };
        if let Err(e) = config.prepare_with_env(&env) {
            panic!("test config must validate: {e}");
        }
        config
    }

    pub struct Harness {
        pub ctx: BuildContext,
        pub client: Arc<ScriptedClient>,
        pub ui: Arc<RecordingUi>,
        pub sleeper: Arc<RecordingSleeper>,
    }

    pub fn harness(client: ScriptedClient) -> Harness {
        harness_with(client, test_config())
    }

    pub fn harness_with(client: ScriptedClient, config: BuildConfig) -> Harness {
        let client = Arc::new(client);
        let ui = Arc::new(RecordingUi::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let ctx = BuildContext::new(Arc::new(config), client.clone(), ui.clone())
            .with_sleeper(sleeper.clone());
        Harness {
            ctx,
            client,
            ui,
            sleeper,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::testing::ScriptedClient;

    #[test]
    fn test_fail_records_first_error_and_reports() {
        let mut h = harness(ScriptedClient::new());

        let action = h.ctx.fail("Error stopping VM", Error::remote("boom"));
        h.ctx.fail("Error removing VM", Error::remote("later"));

        assert_eq!(action, StepAction::Halt);
        assert_eq!(
            h.ctx.state.error().unwrap().to_string(),
            "remote error: Error stopping VM: boom"
        );
        assert_eq!(
            h.ui.errors(),
            vec![
                "Error stopping VM: remote error: boom".to_string(),
                "Error removing VM: remote error: later".to_string(),
            ]
        );
    }

    #[test]
    fn test_state_change_uses_polling_config() {
        let mut config = test_config();
        config.polling.interval = std::time::Duration::from_millis(250);
        let h = harness_with(ScriptedClient::new(), config);

        let conf = h.ctx.state_change("disk d1", &["locked"], &["ok"]).unwrap();
        assert_eq!(conf.interval(), std::time::Duration::from_millis(250));
        assert!(format!("{:?}", h.ctx).contains("BuildContext"));
    }

    #[tokio::test]
    async fn test_boot_disk_prefers_bootable_attachment() {
        let h = harness(
            ScriptedClient::new()
                .with_attachment("data", true, false)
                .with_attachment("root", true, true),
        );
        let disk = h.ctx.boot_disk(&VmId::must("v1")).await.unwrap();
        assert_eq!(disk.disk_id.as_str(), "root");
    }

    #[tokio::test]
    async fn test_boot_disk_falls_back_to_first_attachment() {
        let h = harness(
            ScriptedClient::new()
                .with_attachment("first", false, false)
                .with_attachment("second", true, false),
        );
        let disk = h.ctx.boot_disk(&VmId::must("v1")).await.unwrap();
        assert_eq!(disk.disk_id.as_str(), "first");
        assert!(!disk.active);
    }

    #[tokio::test]
    async fn test_boot_disk_requires_attachment() {
        let h = harness(ScriptedClient::new());
        let err = h.ctx.boot_disk(&VmId::must("v1")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
