//! Resolve configured names to remote ids.

use async_trait::async_trait;

use super::{BuildContext, Step, StepAction};
use crate::types::{Error, Result, TemplateId};

/// Look up the configured cluster by name.
#[derive(Debug, Default)]
pub struct FindCluster;

#[async_trait]
impl Step for FindCluster {
    fn name(&self) -> &'static str {
        "find_cluster"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        let name = ctx.config.source.cluster.clone();
        ctx.ui.say(&format!("Querying cluster '{}'...", name));

        match ctx.client.find_cluster_by_name(&name).await {
            Ok(Some(id)) => {
                ctx.ui.message(&format!("Using cluster id: {}", id));
                ctx.state.put(id);
                StepAction::Continue
            }
            Ok(None) => {
                let err = Error::not_found(format!("Could not find cluster '{}'", name));
                ctx.fail("Error getting cluster", err)
            }
            Err(e) => ctx.fail("Error getting cluster list", e),
        }
    }
}

/// Template id from the configuration, looked up by name and version when
/// no id is configured.
pub(crate) async fn resolve_template(ctx: &BuildContext) -> Result<TemplateId> {
    let source = &ctx.config.source;
    if !source.source_template_id.is_empty() {
        return TemplateId::from_string(source.source_template_id.clone()).map_err(Error::internal);
    }

    let name = &source.source_template_name;
    let version = source.source_template_version;
    ctx.ui
        .say(&format!("Querying template '{}' version {}...", name, version));
    ctx.client
        .find_template(name, version)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "Could not find template '{}' with version '{}'",
                name, version
            ))
        })
}

/// Resolve the source template, by id or by name and version.
#[derive(Debug, Default)]
pub struct FindTemplate;

#[async_trait]
impl Step for FindTemplate {
    fn name(&self) -> &'static str {
        "find_template"
    }

    async fn run(&self, ctx: &mut BuildContext) -> StepAction {
        match resolve_template(ctx).await {
            Ok(id) => {
                ctx.ui.message(&format!("Using template id: {}", id));
                ctx.state.put(id);
                StepAction::Continue
            }
            Err(e) => ctx.fail("Error searching for templates", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::*;
    use crate::testing::ScriptedClient;
    use crate::types::{ClusterId, TemplateId};

    #[tokio::test]
    async fn test_find_cluster_stores_id() {
        let mut h = harness(ScriptedClient::new().with_cluster("Default", "c1"));

        assert_eq!(FindCluster.run(&mut h.ctx).await, StepAction::Continue);
        assert_eq!(h.ctx.state.cluster_id(), Some(&ClusterId::must("c1")));
    }

    #[tokio::test]
    async fn test_find_cluster_not_found() {
        let mut h = harness(ScriptedClient::new().with_cluster("prod", "c1"));

        assert_eq!(FindCluster.run(&mut h.ctx).await, StepAction::Halt);
        assert!(matches!(
            h.ctx.state.error(),
            Some(Error::NotFound(m)) if m.contains("Could not find cluster 'Default'")
        ));
        assert_eq!(h.ui.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_find_template_by_name_and_version() {
        let mut h = harness(
            ScriptedClient::new()
                .with_template("centos", 2, "t2")
                .with_template("centos", 1, "t1"),
        );

        assert_eq!(FindTemplate.run(&mut h.ctx).await, StepAction::Continue);
        assert_eq!(h.ctx.state.template_id(), Some(&TemplateId::must("t1")));
    }

    #[tokio::test]
    async fn test_find_template_by_id_skips_lookup() {
        let mut config = test_config();
        config.source.source_template_name = String::new();
        config.source.source_template_id = "c2867299-28ea-48a2-922a-805b999fcb2d".to_string();
        let mut h = harness_with(ScriptedClient::new(), config);

        assert_eq!(FindTemplate.run(&mut h.ctx).await, StepAction::Continue);
        assert_eq!(
            h.ctx.state.require_template_id().unwrap().as_str(),
            "c2867299-28ea-48a2-922a-805b999fcb2d"
        );
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_find_template_remote_failure() {
        let mut h = harness(ScriptedClient::new().fail_on("find_template", "503"));

        assert_eq!(FindTemplate.run(&mut h.ctx).await, StepAction::Halt);
        assert!(matches!(h.ctx.state.error(), Some(Error::Remote(_))));
    }
}
