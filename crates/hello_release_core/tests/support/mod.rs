#![allow(dead_code)]

use std::sync::Mutex;

use hello_release_core::assembly::ReleaseAssembly;
use hello_release_core::config::{ApprovalGate, PipelineConfig};
use hello_release_core::execution::{ActionExecutor, SourceRevision};
use hello_release_core::pipeline::Action;

pub const PIPELINE_ACCOUNT: &str = "111111111111";
pub const PROD_ACCOUNT: &str = "222222222222";
pub const VERSION_TAG: &str = "2026-10-19T12:00:00Z";

/// Tooling account in eu-west-1 promoting into a separate prod account.
pub fn cross_account_config() -> PipelineConfig {
    let mut config = PipelineConfig::new(PIPELINE_ACCOUNT);
    config.prod_account = Some(PROD_ACCOUNT.to_string());
    config.region = "eu-west-1".to_string();
    config.version_tag = Some(VERSION_TAG.to_string());
    config
}

pub fn gated_config() -> PipelineConfig {
    let mut config = cross_account_config();
    config.approval = Some(ApprovalGate {
        summary: Some("Promote to production?".to_string()),
        notification_topic_arn: None,
    });
    config
}

pub fn assembly(config: &PipelineConfig) -> ReleaseAssembly {
    ReleaseAssembly::from_config(config).expect("assembly should build")
}

/// Records every executed action and fails the ones named in `failing`.
pub struct RecordingExecutor {
    failing: Vec<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingExecutor {
    pub fn succeeding() -> Self {
        Self::failing(&[])
    }

    pub fn failing(actions: &[&str]) -> Self {
        Self {
            failing: actions.iter().map(|name| name.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("poisoned mutex").clone()
    }

    pub fn calls_in(&self, stage: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(called_stage, _)| called_stage == stage)
            .map(|(_, action)| action)
            .collect()
    }
}

impl ActionExecutor for RecordingExecutor {
    fn execute(
        &self,
        stage: &str,
        action: &Action,
        _revision: &SourceRevision,
    ) -> Result<(), String> {
        self.calls
            .lock()
            .expect("poisoned mutex")
            .push((stage.to_string(), action.name.clone()));
        if self.failing.contains(&action.name) {
            Err(format!("{} failed", action.name))
        } else {
            Ok(())
        }
    }
}
