//! Build orchestration: assemble the pipeline, run it, and turn the final
//! state into an artifact.

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::artifact::{self, Artifact};
use crate::client::ovirt::OvirtClient;
use crate::client::ResourceClient;
use crate::poller::{Sleeper, TokioSleeper};
use crate::runner::{RunReport, Runner};
use crate::state::SharedState;
use crate::steps::{
    BuildContext, CreateVm, DetachDisk, FindCluster, FindTemplate, Provision, Provisioner,
    StartVm, Step, StopVm, UpdateDisk, WaitForVm,
};
use crate::types::{BuildConfig, Result};
use crate::ui::Ui;

/// Final state and run report of one build.
#[derive(Debug)]
pub struct BuildOutcome {
    pub report: RunReport,
    pub state: SharedState,
}

impl BuildOutcome {
    /// The build result: an error, an artifact, or nothing.
    pub fn into_result(mut self) -> Result<Option<Artifact>> {
        artifact::from_state(&mut self.state)
    }
}

/// Runs one image build against a prepared configuration.
pub struct Builder {
    config: Arc<BuildConfig>,
    client: Arc<dyn ResourceClient>,
    ui: Arc<dyn Ui>,
    provisioner: Option<Arc<dyn Provisioner>>,
    cancel: CancellationToken,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("provisioner", &self.provisioner)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// `config` must already have been through [`BuildConfig::prepare`].
    pub fn new(config: BuildConfig, client: Arc<dyn ResourceClient>, ui: Arc<dyn Ui>) -> Self {
        Self {
            config: Arc::new(config),
            client,
            ui,
            provisioner: None,
            cancel: CancellationToken::new(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Builder talking to the engine named in `config.access`.
    pub fn connect(config: BuildConfig, ui: Arc<dyn Ui>) -> Result<Self> {
        let client = OvirtClient::new(&config.access)?;
        Ok(Self::new(config, Arc::new(client), ui))
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn client(&self) -> Arc<dyn ResourceClient> {
        self.client.clone()
    }

    /// The default pipeline for this configuration.
    pub fn steps(&self) -> Vec<Box<dyn Step>> {
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(FindCluster),
            Box::new(FindTemplate),
            Box::new(CreateVm),
            Box::new(WaitForVm::created()),
            Box::new(StartVm),
            Box::new(WaitForVm::up()),
        ];
        if let Some(provisioner) = &self.provisioner {
            steps.push(Box::new(Provision::new(provisioner.clone())));
        }
        steps.push(Box::new(StopVm));
        steps.push(Box::new(WaitForVm::down()));
        if self.config.disk.export_disk {
            steps.push(Box::new(UpdateDisk));
            steps.push(Box::new(DetachDisk));
        }
        steps
    }

    fn context(&self) -> BuildContext {
        BuildContext::new(self.config.clone(), self.client.clone(), self.ui.clone())
            .with_cancellation(self.cancel.clone())
            .with_sleeper(self.sleeper.clone())
    }

    /// Run `runner` with a fresh state.
    pub async fn execute(&self, runner: &Runner) -> BuildOutcome {
        let mut ctx = self.context();
        let span = tracing::info_span!("build", vm = %self.config.vm.vm_name);

        let report = async {
            tracing::info!("build_started: steps={:?}", runner.step_names());
            runner.run(&mut ctx).await
        }
        .instrument(span)
        .await;

        BuildOutcome {
            report,
            state: ctx.state,
        }
    }

    /// Run the default pipeline.
    pub async fn run(&self) -> Result<Option<Artifact>> {
        let runner = Runner::new(self.steps());
        let result = self.execute(&runner).await.into_result();

        match &result {
            Ok(Some(artifact)) => tracing::info!("build_succeeded: disk={}", artifact.id()),
            Ok(None) => tracing::info!("build_succeeded: artifact=none"),
            Err(e) if e.is_interrupted() => tracing::warn!("build_cancelled"),
            Err(e) => tracing::error!("build_failed: error={}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::test_config;
    use crate::testing::{RecordingSleeper, ScriptedClient};
    use crate::types::{DiskId, Error, VmId};
    use async_trait::async_trait;

    /// Ends the pipeline early without an error, optionally leaving a disk.
    #[derive(Debug)]
    struct StopEarly {
        disk: Option<&'static str>,
    }

    #[async_trait]
    impl Step for StopEarly {
        fn name(&self) -> &'static str {
            "stop_early"
        }

        async fn run(&self, ctx: &mut BuildContext) -> crate::steps::StepAction {
            if let Some(disk) = self.disk {
                ctx.state.put(DiskId::must(disk));
            }
            crate::steps::StepAction::Halt
        }
    }
    use crate::testing::RecordingUi;
    use pretty_assertions::assert_eq;

    fn golden_client() -> ScriptedClient {
        ScriptedClient::new()
            .with_cluster("Default", "c1")
            .with_template("centos", 1, "t1")
            .with_vm("v1")
            .with_vm_statuses(&["image_locked", "down", "up", "down"])
            .with_disk("d1", true)
            .with_disk_statuses(&["locked", "ok"])
            .with_attachment_statuses(&["active", "inactive"])
    }

    fn builder(client: &Arc<ScriptedClient>, config: BuildConfig) -> Builder {
        Builder::new(config, client.clone(), Arc::new(RecordingUi::new()))
            .with_sleeper(Arc::new(RecordingSleeper::default()))
    }

    #[tokio::test]
    async fn test_default_pipeline_order() {
        let client = Arc::new(golden_client());
        let names: Vec<_> = builder(&client, test_config())
            .steps()
            .iter()
            .map(|s| s.name())
            .collect();

        assert_eq!(
            names,
            vec![
                "find_cluster",
                "find_template",
                "create_vm",
                "wait_for_vm_created",
                "start_vm",
                "wait_for_vm_up",
                "stop_vm",
                "wait_for_vm_down",
                "update_disk",
                "detach_disk",
            ]
        );
    }

    #[tokio::test]
    async fn test_full_build_produces_disk() {
        let client = Arc::new(golden_client());
        let artifact = builder(&client, test_config()).run().await.unwrap().unwrap();

        assert_eq!(artifact.id().as_str(), "d1");
        assert_eq!(
            client.mutations(),
            vec![
                "create_vm",
                "start_vm",
                "stop_vm",
                "update_disk_attachment",
                "set_disk_attachment_active",
                "detach_disk",
                "delete_vm",
            ]
        );
    }

    #[tokio::test]
    async fn test_without_export_there_is_no_artifact() {
        let client = Arc::new(golden_client());
        let mut config = test_config();
        config.disk.export_disk = false;
        let b = builder(&client, config);

        assert!(!b.steps().iter().any(|s| s.name() == "detach_disk"));
        assert!(b.run().await.unwrap().is_none());
        assert!(client.called("delete_vm"));
    }

    #[tokio::test]
    async fn test_vm_lifecycle_end_to_end() {
        let client = Arc::new(
            ScriptedClient::new()
                .with_cluster("Default", "c1")
                .with_template("centos", 1, "t1")
                .with_vm("v1")
                .with_vm_statuses(&["image_locked", "down", "up", "down"]),
        );
        let runner = Runner::new(vec![
            Box::new(FindCluster),
            Box::new(CreateVm),
            Box::new(WaitForVm::created()),
            Box::new(StartVm),
            Box::new(WaitForVm::up()),
            Box::new(StopVm),
            Box::new(WaitForVm::down()),
        ]);

        let outcome = builder(&client, test_config()).execute(&runner).await;

        assert!(outcome.state.error().is_none());
        assert_eq!(outcome.state.vm_id(), Some(&VmId::must("v1")));
        assert_eq!(outcome.report.executed.len(), 7);
        assert!(outcome.into_result().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_failure_cleans_nothing_remote() {
        let client = Arc::new(golden_client().fail_on("create_vm", "quota exceeded"));
        let runner = Runner::new(vec![Box::new(FindCluster), Box::new(CreateVm)]);

        let outcome = builder(&client, test_config()).execute(&runner).await;

        assert_eq!(outcome.report.halted_at, Some("create_vm"));
        assert_eq!(client.mutations(), vec!["create_vm"]);
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, Error::Remote(ref m) if m.ends_with("quota exceeded")));
    }

    #[tokio::test]
    async fn test_late_failure_removes_vm_and_keeps_first_error() {
        let client = Arc::new(
            golden_client()
                .fail_on("stop_vm", "engine unavailable")
                .fail_on("delete_vm", "engine unavailable"),
        );

        let err = builder(&client, test_config()).run().await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "remote error: Error stopping VM: engine unavailable"
        );
        assert!(client.called("delete_vm"));
    }

    #[tokio::test]
    async fn test_cooperative_stop_succeeds_without_artifact() {
        let client = Arc::new(golden_client());
        let runner = Runner::new(vec![
            Box::new(FindCluster),
            Box::new(StopEarly { disk: None }),
            Box::new(StopVm),
        ]);

        let outcome = builder(&client, test_config()).execute(&runner).await;

        assert_eq!(outcome.report.halted_at, Some("stop_early"));
        assert_eq!(outcome.report.executed, vec!["find_cluster", "stop_early"]);
        assert!(!client.called("stop_vm"));
        assert!(outcome.into_result().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cooperative_stop_keeps_produced_disk() {
        let client = Arc::new(golden_client());
        let runner = Runner::new(vec![
            Box::new(FindCluster),
            Box::new(StopEarly { disk: Some("d7") }),
            Box::new(StopVm),
        ]);

        let outcome = builder(&client, test_config()).execute(&runner).await;

        let artifact = outcome.into_result().unwrap().unwrap();
        assert_eq!(artifact.id().as_str(), "d7");
        assert!(client.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_build_reports_interrupted() {
        let client = Arc::new(golden_client());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = builder(&client, test_config())
            .with_cancellation(cancel)
            .run()
            .await
            .unwrap_err();

        assert!(err.is_interrupted());
        assert!(client.calls().is_empty());
    }
}
