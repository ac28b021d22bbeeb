use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use hello_release_core::config::PipelineConfig;
use hello_release_core::execution::{
    ActionExecutor, ExecutionRecord, ExecutionStatus, SourceRevision, Wave,
};
use hello_release_core::pipeline::{Action, ActionKind};
use tracing::info;

/// Values given on the command line or through the environment. They win
/// over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub pipeline_account: Option<String>,
    pub prod_account: Option<String>,
    pub region: Option<String>,
    pub version_tag: Option<String>,
}

pub fn load_config_file(path: Option<&Path>) -> Result<Option<PipelineConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let config = PipelineConfig::load(path)
        .with_context(|| format!("failed to load pipeline config '{}'", path.display()))?;
    Ok(Some(config))
}

pub fn resolve_config(
    file: Option<PipelineConfig>,
    overrides: ConfigOverrides,
    fallback_version_tag: impl FnOnce() -> String,
) -> Result<PipelineConfig> {
    let mut config = match (file, overrides.pipeline_account.clone()) {
        (Some(mut config), Some(account)) => {
            config.pipeline_account = account;
            config
        }
        (Some(config), None) => config,
        (None, Some(account)) => PipelineConfig::new(account),
        (None, None) => bail!(
            "no pipeline account configured; pass --pipeline-account, set PIPELINE_ACCOUNT_ID or provide a config file"
        ),
    };

    if let Some(prod_account) = overrides.prod_account {
        config.prod_account = Some(prod_account);
    }
    if let Some(region) = overrides.region {
        config.region = region;
    }
    if let Some(tag) = overrides.version_tag {
        config.version_tag = Some(tag);
    }
    if config.version_tag.is_none() {
        config.version_tag = Some(fallback_version_tag());
    }

    config.validate()?;
    Ok(config)
}

pub fn describe_action(action: &Action) -> String {
    match &action.kind {
        ActionKind::CodeCommitSource {
            repository_name,
            branch,
        } => format!("source {repository_name}@{branch}"),
        ActionKind::CodeBuild { project } => format!("build project {project}"),
        ActionKind::CloudFormationDeploy(deploy) => {
            format!("deploy {} from {}", deploy.stack_name, deploy.template_path)
        }
        ActionKind::ManualApproval { .. } => "manual approval".to_string(),
    }
}

pub fn render_plan(waves: &[Wave<'_>]) -> String {
    let mut lines = Vec::new();
    for wave in waves {
        lines.push(format!("{} (run order {})", wave.stage, wave.run_order));
        for action in &wave.actions {
            let inputs: Vec<&str> = action.inputs.iter().map(|a| a.name()).collect();
            let outputs: Vec<&str> = action.outputs.iter().map(|a| a.name()).collect();
            lines.push(format!(
                "  - {}: {} [in: {}] [out: {}]",
                action.name,
                describe_action(action),
                inputs.join(", "),
                outputs.join(", ")
            ));
        }
    }
    lines.join("\n")
}

/// Runs nothing; fails the actions named `Action` or `Stage/Action`.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    failing: BTreeSet<String>,
}

impl SimulatedExecutor {
    pub fn new(failing: impl IntoIterator<Item = String>) -> Self {
        Self {
            failing: failing.into_iter().collect(),
        }
    }

    fn should_fail(&self, stage: &str, action: &Action) -> bool {
        self.failing.contains(&action.name)
            || self.failing.contains(&format!("{stage}/{}", action.name))
    }
}

impl ActionExecutor for SimulatedExecutor {
    fn execute(
        &self,
        stage: &str,
        action: &Action,
        revision: &SourceRevision,
    ) -> Result<(), String> {
        if self.should_fail(stage, action) {
            return Err(format!("simulated failure of {stage}/{}", action.name));
        }
        info!(
            stage,
            action = %action.name,
            commit = %revision.commit_id,
            "{}",
            describe_action(action)
        );
        Ok(())
    }
}

/// Turns a failed or stopped execution into an error so `dry-run` exits non-zero.
pub fn ensure_succeeded(record: &ExecutionRecord) -> Result<()> {
    match &record.status {
        ExecutionStatus::Succeeded => Ok(()),
        ExecutionStatus::Failed { stage, actions } => bail!(
            "execution {} failed in {stage}: {}",
            record.execution_id,
            actions.join(", ")
        ),
        ExecutionStatus::Stopped { before_stage } => bail!(
            "execution {} was stopped before {before_stage}",
            record.execution_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hello_release_core::assembly::ReleaseAssembly;
    use hello_release_core::execution::{plan_waves, run_pipeline, CancellationFlag};

    fn overrides(account: &str) -> ConfigOverrides {
        ConfigOverrides {
            pipeline_account: Some(account.to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut file = PipelineConfig::new("111111111111");
        file.region = "eu-west-1".to_string();
        file.version_tag = Some("from-file".to_string());

        let config = resolve_config(
            Some(file),
            ConfigOverrides {
                prod_account: Some("222222222222".to_string()),
                version_tag: Some("abc123".to_string()),
                ..ConfigOverrides::default()
            },
            || "unused".to_string(),
        )
        .expect("config should resolve");

        assert_eq!(config.pipeline_account, "111111111111");
        assert_eq!(config.prod_account(), "222222222222");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.version_tag.as_deref(), Some("abc123"));
    }

    #[test]
    fn version_tag_falls_back_when_unset() {
        let config = resolve_config(None, overrides("111111111111"), || {
            "20261019120000".to_string()
        })
        .expect("config should resolve");
        assert_eq!(config.version_tag.as_deref(), Some("20261019120000"));
        assert_eq!(config.prod_account(), "111111111111");
    }

    #[test]
    fn missing_pipeline_account_is_rejected() {
        let error = resolve_config(None, ConfigOverrides::default(), String::new)
            .expect_err("resolution should fail");
        assert!(error.to_string().contains("no pipeline account"));
    }

    #[test]
    fn invalid_account_fails_validation() {
        let error = resolve_config(None, overrides("not-an-account"), || "tag".to_string())
            .expect_err("resolution should fail");
        assert!(error.to_string().contains("12-digit"));
    }

    #[test]
    fn simulated_failure_can_target_one_stage() {
        let config = resolve_config(None, overrides("111111111111"), || "tag".to_string())
            .expect("config should resolve");
        let assembly = ReleaseAssembly::from_config(&config).expect("assembly should build");
        let declaration = assembly.pipeline.declaration();

        let executor = SimulatedExecutor::new(["Deploy_Prod/Deploy".to_string()]);
        let record = run_pipeline(
            declaration,
            1,
            &SourceRevision::new("abc123"),
            &executor,
            &CancellationFlag::new(),
        );

        assert_eq!(
            record.status,
            ExecutionStatus::Failed {
                stage: "Deploy_Prod".to_string(),
                actions: vec!["Deploy".to_string()],
            }
        );
        assert!(record
            .stage("Deploy_Dev")
            .is_some_and(|stage| stage.actions.iter().all(|action| action.succeeded())));
    }

    #[test]
    fn only_successful_runs_pass_the_exit_check() {
        let config = resolve_config(None, overrides("111111111111"), || "tag".to_string())
            .expect("config should resolve");
        let assembly = ReleaseAssembly::from_config(&config).expect("assembly should build");
        let declaration = assembly.pipeline.declaration();
        let revision = SourceRevision::new("abc123");

        let succeeded = run_pipeline(
            declaration,
            1,
            &revision,
            &SimulatedExecutor::new(Vec::new()),
            &CancellationFlag::new(),
        );
        assert!(ensure_succeeded(&succeeded).is_ok());

        let failed = run_pipeline(
            declaration,
            2,
            &revision,
            &SimulatedExecutor::new(["CDK_Synth".to_string()]),
            &CancellationFlag::new(),
        );
        let error = ensure_succeeded(&failed).expect_err("failed run should error");
        assert!(error.to_string().contains("failed in Build: CDK_Synth"));

        let cancellation = CancellationFlag::new();
        cancellation.cancel();
        let stopped = run_pipeline(
            declaration,
            3,
            &revision,
            &SimulatedExecutor::new(Vec::new()),
            &cancellation,
        );
        let error = ensure_succeeded(&stopped).expect_err("stopped run should error");
        assert!(error.to_string().contains("stopped before Source"));
    }

    #[test]
    fn plan_lists_every_action() {
        let config = resolve_config(None, overrides("111111111111"), || "tag".to_string())
            .expect("config should resolve");
        let assembly = ReleaseAssembly::from_config(&config).expect("assembly should build");
        let plan = render_plan(&plan_waves(assembly.pipeline.declaration()));

        for expected in ["CodeCommit_Source", "Application_Build", "CDK_Synth", "Deploy"] {
            assert!(plan.contains(expected), "plan is missing {expected}:\n{plan}");
        }
        assert!(plan.contains("deploy DevApplicationDeploymentStack"));
    }
}
