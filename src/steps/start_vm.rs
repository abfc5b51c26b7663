use async_trait::async_trait;

use super::{BuildContext, Step, StepAction};
use crate::client::{InitPayload, NicConfiguration};
use crate::types::BuildConfig;

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// First-boot initialization derived from the configuration.
pub(crate) fn init_payload(config: &BuildConfig) -> InitPayload {
    let nic = non_empty(&config.vm.address).map(|address| NicConfiguration {
        address,
        netmask: config.vm.netmask.clone(),
        gateway: non_empty(&config.vm.gateway),
    });

    InitPayload {
        user_name: non_empty(&config.communicator.ssh_username),
        authorized_ssh_keys: non_empty(&config.communicator.ssh_public_key),
        host_name: non_empty(&config.vm.hostname),
        nic,
    }
}

/// Boot the VM once with cloud-init.
#[derive(Debug, Default)]
pub struct StartVm;

#[async_trait]
impl Step for StartVm {
    fn name(&self) -> &'static str {
        "start_vm"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        let vm_id = match ctx.state.require_vm_id() {
            Ok(id) => id.clone(),
            Err(e) => return ctx.fail("Error starting VM", e),
        };

        ctx.ui.say("Setting up initial run...");
        let init = init_payload(&ctx.config);
        if init.nic.is_some() {
            ctx.ui
                .message(&format!("Static address: {}", ctx.config.vm.address));
        }
        tracing::debug!(
            "vm_initialization: id={}, user={:?}, host={:?}, static_nic={}",
            vm_id,
            init.user_name,
            init.host_name,
            init.nic.is_some()
        );

        ctx.ui.say("Starting virtual machine...");
        match ctx.client.start_vm(&vm_id, &init).await {
            Ok(()) => {
                tracing::info!("vm_started: id={}", vm_id);
                StepAction::Continue
            }
            Err(e) => ctx.fail("Error starting VM", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::*;
    use crate::testing::ScriptedClient;
    use crate::types::VmId;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_without_address_has_no_nic() {
        let init = init_payload(&test_config());
        assert_eq!(
            init,
            InitPayload {
                user_name: Some("centos".to_string()),
                authorized_ssh_keys: Some("ssh-ed25519 AAAA test".to_string()),
                host_name: Some("golden.local".to_string()),
                nic: None,
            }
        );
    }

    #[test]
    fn test_payload_with_static_address() {
        let mut config = test_config();
        config.vm.address = "10.0.0.5".to_string();
        let init = init_payload(&config);
        assert_eq!(
            init.nic,
            Some(NicConfiguration {
                address: "10.0.0.5".to_string(),
                netmask: "255.255.255.0".to_string(),
                gateway: None,
            })
        );
    }

    #[tokio::test]
    async fn test_start_sends_payload() {
        let mut h = harness(ScriptedClient::new());
        h.ctx.state.put(VmId::must("v1"));

        assert_eq!(StartVm.run(&mut h.ctx).await, StepAction::Continue);
        let sent = h.client.started_with().unwrap();
        assert_eq!(sent.user_name.as_deref(), Some("centos"));
    }

    #[tokio::test]
    async fn test_start_failure_halts() {
        let mut h = harness(ScriptedClient::new().fail_on("start_vm", "no host available"));
        h.ctx.state.put(VmId::must("v1"));

        assert_eq!(StartVm.run(&mut h.ctx).await, StepAction::Halt);
        assert_eq!(
            h.ctx.state.error().unwrap().to_string(),
            "remote error: Error starting VM: no host available"
        );
    }
}
