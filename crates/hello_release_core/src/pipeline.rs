//! Typed pipeline declaration: stages, actions and the artifacts they pass.
//!
//! A [`PipelineDeclaration`] is plain data. [`PipelineDeclaration::validate`]
//! checks the release invariants before anything is synthesized from it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{json, Value};

use crate::error::DeclarationError;
use crate::naming::{arn_account, role_arn, CROSS_ACCOUNT_ROLE_NAME, DEPLOYMENT_ROLE_NAME};

pub const SOURCE_STAGE: &str = "Source";
pub const BUILD_STAGE: &str = "Build";
pub const DEPLOY_DEV_STAGE: &str = "Deploy_Dev";
pub const DEPLOY_PROD_STAGE: &str = "Deploy_Prod";

pub const STAGE_ORDER: [&str; 4] = [SOURCE_STAGE, BUILD_STAGE, DEPLOY_DEV_STAGE, DEPLOY_PROD_STAGE];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Artifact(String);

impl Artifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn at_path(&self, file: impl Into<String>) -> ArtifactPath {
        ArtifactPath {
            artifact: self.clone(),
            file: file.into(),
        }
    }

    /// Storage coordinates of this artifact, resolved by the pipeline at run time.
    pub fn s3_location(&self) -> ArtifactLocation {
        ArtifactLocation {
            bucket_name: OverrideValue::ArtifactAttribute {
                artifact: self.clone(),
                attribute: ArtifactAttribute::BucketName,
            },
            object_key: OverrideValue::ArtifactAttribute {
                artifact: self.clone(),
                attribute: ArtifactAttribute::ObjectKey,
            },
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath {
    pub artifact: Artifact,
    pub file: String,
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.artifact, self.file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactAttribute {
    BucketName,
    ObjectKey,
}

impl ArtifactAttribute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BucketName => "BucketName",
            Self::ObjectKey => "ObjectKey",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideValue {
    ArtifactAttribute {
        artifact: Artifact,
        attribute: ArtifactAttribute,
    },
    Literal(String),
}

impl OverrideValue {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Self::ArtifactAttribute { artifact, .. } => Some(artifact),
            Self::Literal(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::ArtifactAttribute {
                artifact,
                attribute,
            } => json!({ "Fn::GetArtifactAtt": [artifact.name(), attribute.as_str()] }),
            Self::Literal(value) => json!(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub bucket_name: OverrideValue,
    pub object_key: OverrideValue,
}

pub type ParameterOverrides = BTreeMap<String, OverrideValue>;

/// Credentials for a deploy that runs in another account.
///
/// `action_role_arn` is the identity the pipeline assumes to start the
/// operation; `deployment_role_arn` is the identity CloudFormation runs as
/// while managing the target account's resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossAccountScope {
    pub account: String,
    pub deployment_role_arn: String,
    pub action_role_arn: String,
}

impl CrossAccountScope {
    pub fn for_account(account: &str) -> Self {
        Self {
            account: account.to_string(),
            deployment_role_arn: role_arn(account, DEPLOYMENT_ROLE_NAME),
            action_role_arn: role_arn(account, CROSS_ACCOUNT_ROLE_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployCredentials {
    PipelineAccount,
    CrossAccount(CrossAccountScope),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Iam,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iam => "CAPABILITY_IAM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployAction {
    pub template_path: ArtifactPath,
    pub stack_name: String,
    pub admin_permissions: bool,
    pub capabilities: Vec<Capability>,
    pub parameter_overrides: ParameterOverrides,
    pub credentials: DeployCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    CodeCommitSource {
        repository_name: String,
        branch: String,
    },
    CodeBuild {
        /// Logical id of the build project in the pipeline stack.
        project: String,
    },
    CloudFormationDeploy(DeployAction),
    ManualApproval {
        summary: Option<String>,
        notification_topic_arn: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub run_order: u32,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    pub kind: ActionKind,
}

impl Action {
    pub fn codecommit_source(
        name: impl Into<String>,
        repository_name: impl Into<String>,
        branch: impl Into<String>,
        output: Artifact,
    ) -> Self {
        Self {
            name: name.into(),
            run_order: 1,
            inputs: Vec::new(),
            outputs: vec![output],
            kind: ActionKind::CodeCommitSource {
                repository_name: repository_name.into(),
                branch: branch.into(),
            },
        }
    }

    pub fn codebuild(
        name: impl Into<String>,
        project: impl Into<String>,
        input: Artifact,
        outputs: Vec<Artifact>,
    ) -> Self {
        Self {
            name: name.into(),
            run_order: 1,
            inputs: vec![input],
            outputs,
            kind: ActionKind::CodeBuild {
                project: project.into(),
            },
        }
    }

    /// The template artifact is the primary input; `extra_inputs` follow it.
    pub fn cloudformation_deploy(
        name: impl Into<String>,
        deploy: DeployAction,
        extra_inputs: Vec<Artifact>,
    ) -> Self {
        let mut inputs = vec![deploy.template_path.artifact.clone()];
        for artifact in extra_inputs {
            if !inputs.contains(&artifact) {
                inputs.push(artifact);
            }
        }
        Self {
            name: name.into(),
            run_order: 1,
            inputs,
            outputs: Vec::new(),
            kind: ActionKind::CloudFormationDeploy(deploy),
        }
    }

    pub fn manual_approval(
        name: impl Into<String>,
        summary: Option<String>,
        notification_topic_arn: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            run_order: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            kind: ActionKind::ManualApproval {
                summary,
                notification_topic_arn,
            },
        }
    }

    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    pub fn deploy(&self) -> Option<&DeployAction> {
        match &self.kind {
            ActionKind::CloudFormationDeploy(deploy) => Some(deploy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    /// Distinct run orders in ascending order.
    pub fn run_orders(&self) -> Vec<u32> {
        let orders: BTreeSet<u32> = self.actions.iter().map(|action| action.run_order).collect();
        orders.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDeclaration {
    pub name: String,
    pub pipeline_account: String,
    /// Service role the orchestrator itself runs as.
    pub pipeline_role_arn: String,
    /// Output of the function build; the only valid source of code overrides.
    pub function_artifact: Artifact,
    pub stages: Vec<Stage>,
}

impl PipelineDeclaration {
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn actions(&self) -> impl Iterator<Item = (&Stage, &Action)> {
        self.stages
            .iter()
            .flat_map(|stage| stage.actions.iter().map(move |action| (stage, action)))
    }

    pub fn validate(&self) -> Result<(), DeclarationError> {
        self.validate_stage_order()?;
        self.validate_artifact_flow()?;
        self.validate_build_stage()?;
        self.validate_deploy_actions()
    }

    fn validate_stage_order(&self) -> Result<(), DeclarationError> {
        let found = self.stage_names();
        if found != STAGE_ORDER {
            return Err(DeclarationError::StageOrder {
                expected: STAGE_ORDER.iter().map(|name| name.to_string()).collect(),
                found: found.into_iter().map(str::to_string).collect(),
            });
        }
        Ok(())
    }

    /// Every input must come from an earlier stage or an earlier run order.
    fn validate_artifact_flow(&self) -> Result<(), DeclarationError> {
        let mut produced: BTreeSet<&Artifact> = BTreeSet::new();
        for stage in &self.stages {
            for run_order in stage.run_orders() {
                let wave: Vec<&Action> = stage
                    .actions
                    .iter()
                    .filter(|action| action.run_order == run_order)
                    .collect();
                for action in &wave {
                    for input in &action.inputs {
                        if !produced.contains(input) {
                            return Err(DeclarationError::UnproducedArtifact {
                                action: action.name.clone(),
                                artifact: input.name().to_string(),
                            });
                        }
                    }
                }
                for action in wave {
                    for output in &action.outputs {
                        if !produced.insert(output) {
                            return Err(DeclarationError::DuplicateArtifact(
                                output.name().to_string(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_build_stage(&self) -> Result<(), DeclarationError> {
        let source_outputs: BTreeSet<&Artifact> = self
            .stage(SOURCE_STAGE)
            .into_iter()
            .flat_map(|stage| stage.actions.iter())
            .flat_map(|action| action.outputs.iter())
            .collect();
        let Some(build) = self.stage(BUILD_STAGE) else {
            return Ok(());
        };
        let run_orders = build.run_orders();
        if run_orders.len() > 1 {
            return Err(DeclarationError::SerializedBuild { run_orders });
        }
        let build_outputs: BTreeSet<&Artifact> = build
            .actions
            .iter()
            .flat_map(|action| action.outputs.iter())
            .collect();

        for action in &build.actions {
            if let Some(artifact) = action
                .inputs
                .iter()
                .find(|input| build_outputs.contains(input))
            {
                return Err(DeclarationError::BuildDependency {
                    action: action.name.clone(),
                    artifact: artifact.name().to_string(),
                });
            }
            let reads_only_source = !action.inputs.is_empty()
                && action
                    .inputs
                    .iter()
                    .all(|input| source_outputs.contains(input));
            if !reads_only_source {
                let expected = source_outputs
                    .iter()
                    .map(|artifact| artifact.name())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(DeclarationError::BuildInput {
                    action: action.name.clone(),
                    expected,
                });
            }
        }
        Ok(())
    }

    fn validate_deploy_actions(&self) -> Result<(), DeclarationError> {
        for (stage, action) in self.actions() {
            let Some(deploy) = action.deploy() else {
                continue;
            };

            if deploy.parameter_overrides.is_empty() {
                return Err(DeclarationError::MissingOverrides {
                    action: action.name.clone(),
                });
            }
            for (parameter, value) in &deploy.parameter_overrides {
                let found = value.artifact().map(Artifact::name).unwrap_or("<literal>");
                if value.artifact() != Some(&self.function_artifact) {
                    return Err(DeclarationError::OverrideSource {
                        action: action.name.clone(),
                        parameter: parameter.clone(),
                        expected: self.function_artifact.name().to_string(),
                        found: found.to_string(),
                    });
                }
            }
            for required in [ArtifactAttribute::BucketName, ArtifactAttribute::ObjectKey] {
                let covered = deploy.parameter_overrides.values().any(|value| {
                    matches!(
                        value,
                        OverrideValue::ArtifactAttribute { artifact, attribute }
                            if artifact == &self.function_artifact && *attribute == required
                    )
                });
                if !covered {
                    return Err(DeclarationError::MissingCodeCoordinate {
                        action: action.name.clone(),
                        attribute: required.as_str().to_string(),
                    });
                }
            }
            if !action.inputs.contains(&self.function_artifact) {
                return Err(DeclarationError::MissingExtraInput {
                    action: action.name.clone(),
                    artifact: self.function_artifact.name().to_string(),
                });
            }

            match (stage.name.as_str(), &deploy.credentials) {
                (DEPLOY_PROD_STAGE, DeployCredentials::PipelineAccount) => {
                    return Err(DeclarationError::MissingCrossAccountScope {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
                (DEPLOY_PROD_STAGE, DeployCredentials::CrossAccount(scope)) => {
                    validate_scope(&action.name, scope, &self.pipeline_role_arn)?;
                }
                (_, DeployCredentials::CrossAccount(_)) => {
                    return Err(DeclarationError::UnexpectedCrossAccountScope {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
                (_, DeployCredentials::PipelineAccount) => {}
            }
        }
        Ok(())
    }
}

/// The prod account may equal the pipeline account; the two roles must still
/// be the target account's own and differ from the orchestrator's role.
fn validate_scope(
    action: &str,
    scope: &CrossAccountScope,
    pipeline_role_arn: &str,
) -> Result<(), DeclarationError> {
    if scope.deployment_role_arn == scope.action_role_arn {
        return Err(DeclarationError::ConflatedRoles {
            action: action.to_string(),
            role: scope.action_role_arn.clone(),
        });
    }
    for role in [&scope.deployment_role_arn, &scope.action_role_arn] {
        if role == pipeline_role_arn {
            return Err(DeclarationError::PipelineRoleReused {
                action: action.to_string(),
                role: role.clone(),
            });
        }
        if arn_account(role) != Some(scope.account.as_str()) {
            return Err(DeclarationError::RoleOutsideAccount {
                role: role.clone(),
                account: scope.account.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE_ROLE: &str = "arn:aws:iam::111111111111:role/CrossAccountPipelineServiceRole";

    #[test]
    fn artifact_path_uses_pipeline_notation() {
        let path = Artifact::new("CdkBuildOutput").at_path("DevApplicationStack.template.json");
        assert_eq!(
            path.to_string(),
            "CdkBuildOutput::DevApplicationStack.template.json"
        );
    }

    #[test]
    fn s3_location_resolves_through_artifact_attributes() {
        let location = Artifact::new("LambdaBuildOutput").s3_location();
        assert_eq!(
            location.bucket_name.to_json(),
            json!({"Fn::GetArtifactAtt": ["LambdaBuildOutput", "BucketName"]})
        );
        assert_eq!(
            location.object_key.to_json(),
            json!({"Fn::GetArtifactAtt": ["LambdaBuildOutput", "ObjectKey"]})
        );
    }

    #[test]
    fn cross_account_scope_uses_two_distinct_roles() {
        let scope = CrossAccountScope::for_account("222222222222");
        assert_ne!(scope.deployment_role_arn, scope.action_role_arn);
        assert!(validate_scope("Deploy", &scope, PIPELINE_ROLE).is_ok());
    }

    #[test]
    fn rejects_role_from_another_account() {
        let mut scope = CrossAccountScope::for_account("222222222222");
        scope.deployment_role_arn = role_arn("333333333333", DEPLOYMENT_ROLE_NAME);
        let error =
            validate_scope("Deploy", &scope, PIPELINE_ROLE).expect_err("scope should fail");
        assert!(matches!(error, DeclarationError::RoleOutsideAccount { .. }));
    }

    #[test]
    fn scope_in_pipeline_account_is_allowed_with_its_own_roles() {
        let scope = CrossAccountScope::for_account("111111111111");
        assert!(validate_scope("Deploy", &scope, PIPELINE_ROLE).is_ok());
    }

    #[test]
    fn rejects_scope_reusing_pipeline_role() {
        let mut scope = CrossAccountScope::for_account("111111111111");
        scope.action_role_arn = PIPELINE_ROLE.to_string();
        let error =
            validate_scope("Deploy", &scope, PIPELINE_ROLE).expect_err("scope should fail");
        assert!(matches!(error, DeclarationError::PipelineRoleReused { .. }));
    }

    #[test]
    fn deploy_action_does_not_duplicate_inputs() {
        let templates = Artifact::new("Templates");
        let action = Action::cloudformation_deploy(
            "Deploy",
            DeployAction {
                template_path: templates.at_path("a.json"),
                stack_name: "Stack".to_string(),
                admin_permissions: true,
                capabilities: vec![Capability::Iam],
                parameter_overrides: ParameterOverrides::new(),
                credentials: DeployCredentials::PipelineAccount,
            },
            vec![templates.clone(), Artifact::new("Code")],
        );
        assert_eq!(action.inputs, vec![templates, Artifact::new("Code")]);
    }
}
