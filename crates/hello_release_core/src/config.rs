//! Pipeline configuration.
//!
//! Values come from an optional TOML file; callers layer CLI flags and
//! environment variables on top before validating.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentPreference;
use crate::error::DeclarationError;
use crate::naming::{is_account_id, DeploymentContext};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_BUILD_IMAGE: &str = "aws/codebuild/standard:7.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub pipeline_account: String,
    /// Falls back to the pipeline account when unset.
    #[serde(default)]
    pub prod_account: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_build_image")]
    pub build_image: String,
    #[serde(default)]
    pub version_tag: Option<String>,
    #[serde(default)]
    pub approval: Option<ApprovalGate>,
    #[serde(default)]
    pub dev: EnvironmentConfig,
    #[serde(default)]
    pub prod: EnvironmentConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub deployment: DeploymentPreference,
}

/// Manual approval held before the production deploy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ApprovalGate {
    pub summary: Option<String>,
    pub notification_topic_arn: Option<String>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_build_image() -> String {
    DEFAULT_BUILD_IMAGE.to_string()
}

impl PipelineConfig {
    pub fn new(pipeline_account: impl Into<String>) -> Self {
        Self {
            pipeline_account: pipeline_account.into(),
            prod_account: None,
            region: default_region(),
            branch: default_branch(),
            build_image: default_build_image(),
            version_tag: None,
            approval: None,
            dev: EnvironmentConfig::default(),
            prod: EnvironmentConfig::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DeclarationError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, DeclarationError> {
        let text = fs::read_to_string(path).map_err(|source| DeclarationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn prod_account(&self) -> &str {
        self.prod_account
            .as_deref()
            .unwrap_or(&self.pipeline_account)
    }

    pub fn pipeline_context(&self) -> DeploymentContext {
        DeploymentContext::new(self.pipeline_account.clone(), self.region.clone())
    }

    pub fn validate(&self) -> Result<(), DeclarationError> {
        if !is_account_id(&self.pipeline_account) {
            return Err(DeclarationError::config(format!(
                "pipeline_account must be a 12-digit account id, got '{}'",
                self.pipeline_account
            )));
        }
        if !is_account_id(self.prod_account()) {
            return Err(DeclarationError::config(format!(
                "prod_account must be a 12-digit account id, got '{}'",
                self.prod_account()
            )));
        }
        if self.region.trim().is_empty() {
            return Err(DeclarationError::config("region cannot be empty"));
        }
        if self.branch.trim().is_empty() {
            return Err(DeclarationError::config("branch cannot be empty"));
        }
        if self.build_image.trim().is_empty() {
            return Err(DeclarationError::config("build_image cannot be empty"));
        }
        if let Some(tag) = &self.version_tag {
            if tag.trim().is_empty() {
                return Err(DeclarationError::config("version_tag cannot be empty"));
            }
        }
        self.dev.deployment.validate()?;
        self.prod.deployment.validate()
    }
}
