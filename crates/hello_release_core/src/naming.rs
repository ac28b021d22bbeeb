//! Account-scoped resource names.
//!
//! Every name that embeds an account identity is derived here from an
//! explicit [`DeploymentContext`] so that the same context always yields the
//! same identifiers.

use serde::{Deserialize, Serialize};

pub const REPOSITORY_STACK: &str = "RepositoryStack";
pub const DEV_APPLICATION_STACK: &str = "DevApplicationStack";
pub const PROD_APPLICATION_STACK: &str = "ProdApplicationStack";
pub const PIPELINE_STACK: &str = "CrossAccountPipelineStack";

pub const DEV_DEPLOYMENT_STACK: &str = "DevApplicationDeploymentStack";
pub const PROD_DEPLOYMENT_STACK: &str = "ProdApplicationDeploymentStack";

pub const PIPELINE_NAME: &str = "CrossAccountPipeline";
pub const FUNCTION_NAME: &str = "HelloLambda";
pub const ARTIFACT_KEY_ALIAS: &str = "alias/key/artifact-key";
pub const ARTIFACT_KEY_EXPORT: &str = "ArtifactBucketEncryptionKey";
pub const API_ENDPOINT_EXPORT: &str = "HelloLambdaRestApiEndpoint";

pub const DEPLOYMENT_ROLE_NAME: &str = "CloudFormationDeploymentRole";
pub const CROSS_ACCOUNT_ROLE_NAME: &str = "CodePipelineCrossAccountRole";
pub const PIPELINE_ROLE_NAME: &str = "CrossAccountPipelineServiceRole";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    pub account: String,
    pub region: String,
}

impl DeploymentContext {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }
}

pub fn repository_name(context: &DeploymentContext) -> String {
    format!("repo-{}", context.account)
}

pub fn repository_arn(context: &DeploymentContext) -> String {
    format!(
        "arn:aws:codecommit:{}:{}:{}",
        context.region,
        context.account,
        repository_name(context)
    )
}

pub fn artifact_bucket_name(context: &DeploymentContext) -> String {
    format!("artifact-bucket-{}", context.account)
}

pub fn role_arn(account: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account}:role/{role_name}")
}

pub fn account_root_arn(account: &str) -> String {
    format!("arn:aws:iam::{account}:root")
}

/// Every role in `account`, the resource pattern granted for `sts:AssumeRole`.
pub fn role_namespace(account: &str) -> String {
    format!("arn:aws:iam::{account}:role/*")
}

pub fn stack_arn_pattern(context: &DeploymentContext, stack_name: &str) -> String {
    format!(
        "arn:aws:cloudformation:{}:{}:stack/{stack_name}/*",
        context.region, context.account
    )
}

pub fn template_file_name(stack_name: &str) -> String {
    format!("{stack_name}.template.json")
}

/// Account segment of an IAM ARN (`arn:aws:iam::<account>:...`).
pub fn arn_account(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|account| !account.is_empty())
}

pub fn is_account_id(value: &str) -> bool {
    value.len() == 12 && value.bytes().all(|byte| byte.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_embed_the_account() {
        let context = DeploymentContext::new("111111111111", "eu-west-1");
        assert_eq!(repository_name(&context), "repo-111111111111");
        assert_eq!(
            artifact_bucket_name(&context),
            "artifact-bucket-111111111111"
        );
        assert_eq!(
            repository_arn(&context),
            "arn:aws:codecommit:eu-west-1:111111111111:repo-111111111111"
        );
    }

    #[test]
    fn different_accounts_never_share_a_repository_name() {
        let tooling = DeploymentContext::new("111111111111", "eu-west-1");
        let other = DeploymentContext::new("222222222222", "eu-west-1");
        assert_ne!(repository_name(&tooling), repository_name(&other));
    }

    #[test]
    fn extracts_account_from_role_arn() {
        let arn = role_arn("222222222222", CROSS_ACCOUNT_ROLE_NAME);
        assert_eq!(
            arn,
            "arn:aws:iam::222222222222:role/CodePipelineCrossAccountRole"
        );
        assert_eq!(arn_account(&arn), Some("222222222222"));
        assert_eq!(arn_account("not-an-arn"), None);
    }

    #[test]
    fn validates_account_ids() {
        assert!(is_account_id("123456789012"));
        assert!(!is_account_id("12345678901"));
        assert!(!is_account_id("12345678901a"));
    }
}
