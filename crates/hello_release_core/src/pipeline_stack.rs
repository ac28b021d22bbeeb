//! Tooling-account stack: artifact key and bucket, build projects, the
//! pipeline itself, its service role and the commit trigger.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::application::ApplicationStack;
use crate::buildspec::{function_build_spec, template_synth_build_spec, BuildSpec};
use crate::config::ApprovalGate;
use crate::error::DeclarationError;
use crate::iam::{
    inline_policy, policy_document, service_trust_policy, PolicyStatement, Principal,
    KMS_DECRYPT_ACTIONS, KMS_ENCRYPT_DECRYPT_ACTIONS, S3_PUT_ACTIONS, S3_READ_ACTIONS,
};
use crate::naming::{
    artifact_bucket_name, repository_arn, repository_name, role_arn, role_namespace,
    stack_arn_pattern, template_file_name, DeploymentContext, ARTIFACT_KEY_ALIAS,
    ARTIFACT_KEY_EXPORT, DEV_DEPLOYMENT_STACK, PIPELINE_NAME, PIPELINE_ROLE_NAME,
    PROD_DEPLOYMENT_STACK,
};
use crate::pipeline::{
    Action, ActionKind, Artifact, Capability, CrossAccountScope, DeployAction, DeployCredentials,
    PipelineDeclaration, Stage, BUILD_STAGE, DEPLOY_DEV_STAGE, DEPLOY_PROD_STAGE, SOURCE_STAGE,
};
use crate::template::{intrinsic, Output, RemovalPolicy, Resource, Template};

pub const SOURCE_OUTPUT: &str = "SourceOutput";
pub const TEMPLATE_BUILD_OUTPUT: &str = "CdkBuildOutput";
pub const FUNCTION_BUILD_OUTPUT: &str = "LambdaBuildOutput";

pub const SOURCE_ACTION: &str = "CodeCommit_Source";
pub const FUNCTION_BUILD_ACTION: &str = "Application_Build";
pub const TEMPLATE_BUILD_ACTION: &str = "CDK_Synth";
pub const DEPLOY_ACTION: &str = "Deploy";
pub const APPROVAL_ACTION: &str = "Approve_Prod";

const KEY_ID: &str = "ArtifactKey";
const KEY_ALIAS_ID: &str = "ArtifactKeyAlias";
const BUCKET_ID: &str = "ArtifactBucket";
const BUCKET_POLICY_ID: &str = "ArtifactBucketPolicy";
const FUNCTION_PROJECT_ID: &str = "LambdaBuild";
const TEMPLATE_PROJECT_ID: &str = "CdkBuild";
const PIPELINE_ID: &str = "Pipeline";
const PIPELINE_ROLE_ID: &str = "PipelineRole";
const DEV_DEPLOYMENT_ROLE_ID: &str = "DevDeploymentRole";
const TRIGGER_ROLE_ID: &str = "PipelineTriggerRole";
const TRIGGER_RULE_ID: &str = "PipelineTriggerRule";

pub struct PipelineStackProps<'a> {
    pub context: DeploymentContext,
    pub prod_account: String,
    pub branch: String,
    pub build_image: String,
    pub approval: Option<ApprovalGate>,
    pub dev_application: &'a ApplicationStack,
    pub prod_application: &'a ApplicationStack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProject {
    pub logical_id: String,
    pub spec: BuildSpec,
    pub environment_variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStack {
    context: DeploymentContext,
    build_image: String,
    declaration: PipelineDeclaration,
    prod_scope: CrossAccountScope,
    projects: Vec<BuildProject>,
}

impl PipelineStack {
    pub fn new(props: PipelineStackProps<'_>) -> Result<Self, DeclarationError> {
        let context = props.context;
        let prod_scope = CrossAccountScope::for_account(&props.prod_account);

        let source_output = Artifact::new(SOURCE_OUTPUT);
        let template_output = Artifact::new(TEMPLATE_BUILD_OUTPUT);
        let function_output = Artifact::new(FUNCTION_BUILD_OUTPUT);
        let function_location = function_output.s3_location();

        let source = Stage::new(
            SOURCE_STAGE,
            vec![Action::codecommit_source(
                SOURCE_ACTION,
                repository_name(&context),
                props.branch,
                source_output.clone(),
            )],
        );

        let build = Stage::new(
            BUILD_STAGE,
            vec![
                Action::codebuild(
                    FUNCTION_BUILD_ACTION,
                    FUNCTION_PROJECT_ID,
                    source_output.clone(),
                    vec![function_output.clone()],
                ),
                Action::codebuild(
                    TEMPLATE_BUILD_ACTION,
                    TEMPLATE_PROJECT_ID,
                    source_output,
                    vec![template_output.clone()],
                ),
            ],
        );

        let deploy_dev = Stage::new(
            DEPLOY_DEV_STAGE,
            vec![Action::cloudformation_deploy(
                DEPLOY_ACTION,
                DeployAction {
                    template_path: template_output
                        .at_path(template_file_name(props.dev_application.stack_name())),
                    stack_name: DEV_DEPLOYMENT_STACK.to_string(),
                    admin_permissions: true,
                    capabilities: vec![Capability::Iam],
                    parameter_overrides: props
                        .dev_application
                        .lambda_code()
                        .assign(&function_location),
                    credentials: DeployCredentials::PipelineAccount,
                },
                vec![function_output.clone()],
            )],
        );

        let prod_deploy = Action::cloudformation_deploy(
            DEPLOY_ACTION,
            DeployAction {
                template_path: template_output
                    .at_path(template_file_name(props.prod_application.stack_name())),
                stack_name: PROD_DEPLOYMENT_STACK.to_string(),
                admin_permissions: true,
                capabilities: vec![Capability::Iam],
                parameter_overrides: props
                    .prod_application
                    .lambda_code()
                    .assign(&function_location),
                credentials: DeployCredentials::CrossAccount(prod_scope.clone()),
            },
            vec![function_output.clone()],
        );
        let prod_actions = match props.approval {
            Some(gate) => vec![
                Action::manual_approval(
                    APPROVAL_ACTION,
                    gate.summary,
                    gate.notification_topic_arn,
                ),
                prod_deploy.with_run_order(2),
            ],
            None => vec![prod_deploy],
        };
        let deploy_prod = Stage::new(DEPLOY_PROD_STAGE, prod_actions);

        let declaration = PipelineDeclaration {
            name: PIPELINE_NAME.to_string(),
            pipeline_account: context.account.clone(),
            pipeline_role_arn: role_arn(&context.account, PIPELINE_ROLE_NAME),
            function_artifact: function_output,
            stages: vec![source, build, deploy_dev, deploy_prod],
        };
        declaration.validate()?;

        let synth_environment = BTreeMap::from([
            ("PIPELINE_ACCOUNT_ID".to_string(), context.account.clone()),
            ("PROD_ACCOUNT_ID".to_string(), props.prod_account.clone()),
        ]);
        let projects = vec![
            BuildProject {
                logical_id: FUNCTION_PROJECT_ID.to_string(),
                spec: function_build_spec(),
                environment_variables: BTreeMap::new(),
            },
            BuildProject {
                logical_id: TEMPLATE_PROJECT_ID.to_string(),
                spec: template_synth_build_spec(),
                environment_variables: synth_environment,
            },
        ];

        Ok(Self {
            context,
            build_image: props.build_image,
            declaration,
            prod_scope,
            projects,
        })
    }

    pub fn declaration(&self) -> &PipelineDeclaration {
        &self.declaration
    }

    pub fn projects(&self) -> &[BuildProject] {
        &self.projects
    }

    pub fn prod_scope(&self) -> &CrossAccountScope {
        &self.prod_scope
    }

    /// Principals outside the pipeline account allowed to decrypt artifacts.
    pub fn key_decrypt_grants(&self) -> Vec<Principal> {
        vec![
            Principal::Account(self.prod_scope.account.clone()),
            Principal::Role(self.prod_scope.action_role_arn.clone()),
        ]
    }

    /// Principals granted put and read on the artifact bucket.
    pub fn bucket_grants(&self) -> Vec<Principal> {
        vec![Principal::Account(self.prod_scope.account.clone())]
    }

    /// Statements attached to the pipeline's own service role.
    pub fn pipeline_role_statements(&self) -> Vec<PolicyStatement> {
        let bucket_arn = self.bucket_arn();
        let mut statements = vec![
            PolicyStatement::allow(
                S3_READ_ACTIONS
                    .iter()
                    .chain(S3_PUT_ACTIONS)
                    .chain(&["s3:DeleteObject*"])
                    .copied(),
            )
            .on(bucket_arn.clone())
            .on(format!("{bucket_arn}/*")),
            PolicyStatement::allow(KMS_ENCRYPT_DECRYPT_ACTIONS.iter().copied())
                .on(intrinsic::arn_of(KEY_ID)),
            PolicyStatement::allow([
                "codecommit:GetBranch",
                "codecommit:GetCommit",
                "codecommit:UploadArchive",
                "codecommit:GetUploadArchiveStatus",
                "codecommit:CancelUploadArchive",
            ])
            .on(repository_arn(&self.context)),
            PolicyStatement::allow([
                "codebuild:BatchGetBuilds",
                "codebuild:StartBuild",
                "codebuild:StopBuild",
            ])
            .on(intrinsic::arn_of(FUNCTION_PROJECT_ID))
            .on(intrinsic::arn_of(TEMPLATE_PROJECT_ID)),
            PolicyStatement::allow([
                "cloudformation:CreateStack",
                "cloudformation:DeleteStack",
                "cloudformation:DescribeStack*",
                "cloudformation:GetStackPolicy",
                "cloudformation:GetTemplate*",
                "cloudformation:SetStackPolicy",
                "cloudformation:UpdateStack",
                "cloudformation:ValidateTemplate",
            ])
            .on(stack_arn_pattern(&self.context, DEV_DEPLOYMENT_STACK)),
            PolicyStatement::allow(["iam:PassRole"]).on(intrinsic::arn_of(DEV_DEPLOYMENT_ROLE_ID)),
            PolicyStatement::allow(["sts:AssumeRole"]).on(role_namespace(&self.prod_scope.account)),
        ];
        let topics: Vec<&str> = self
            .declaration
            .actions()
            .filter_map(|(_, action)| match &action.kind {
                ActionKind::ManualApproval {
                    notification_topic_arn: Some(topic),
                    ..
                } => Some(topic.as_str()),
                _ => None,
            })
            .collect();
        if !topics.is_empty() {
            statements.push(
                topics
                    .into_iter()
                    .fold(PolicyStatement::allow(["sns:Publish"]), |statement, topic| {
                        statement.on(topic)
                    }),
            );
        }
        statements
    }

    pub fn synthesize(&self) -> Result<Template, DeclarationError> {
        let mut template = Template::new("Cross-account release pipeline for the hello function");

        self.add_artifact_store(&mut template);
        for project in &self.projects {
            self.add_build_project(&mut template, project)?;
        }
        self.add_pipeline_roles(&mut template);
        self.add_pipeline(&mut template)?;
        self.add_trigger(&mut template);

        template.add_output(
            "ArtifactBucketEncryptionKeyArn",
            Output::exported(intrinsic::arn_of(KEY_ID), ARTIFACT_KEY_EXPORT),
        );
        debug!(
            resources = template.resources.len(),
            "synthesized pipeline stack"
        );
        Ok(template)
    }

    fn bucket_arn(&self) -> String {
        format!("arn:aws:s3:::{}", artifact_bucket_name(&self.context))
    }

    /// Grants live in the key policy so they exist before the first
    /// cross-account deploy reads an artifact.
    fn add_artifact_store(&self, template: &mut Template) {
        let mut key_statements = vec![PolicyStatement::allow(["kms:*"])
            .for_principal(Principal::Account(self.context.account.clone()))];
        key_statements.extend(self.key_decrypt_grants().into_iter().map(|principal| {
            PolicyStatement::allow(KMS_DECRYPT_ACTIONS.iter().copied()).for_principal(principal)
        }));

        template.add_resource(
            KEY_ID,
            Resource::new(
                "AWS::KMS::Key",
                json!({ "KeyPolicy": policy_document(&key_statements) }),
            )
            .with_removal_policy(RemovalPolicy::Retain),
        );
        template.add_resource(
            KEY_ALIAS_ID,
            Resource::new(
                "AWS::KMS::Alias",
                json!({
                    "AliasName": ARTIFACT_KEY_ALIAS,
                    "TargetKeyId": intrinsic::arn_of(KEY_ID),
                }),
            ),
        );
        template.add_resource(
            BUCKET_ID,
            Resource::new(
                "AWS::S3::Bucket",
                json!({
                    "BucketName": artifact_bucket_name(&self.context),
                    "BucketEncryption": {
                        "ServerSideEncryptionConfiguration": [{
                            "ServerSideEncryptionByDefault": {
                                "SSEAlgorithm": "aws:kms",
                                "KMSMasterKeyID": intrinsic::arn_of(KEY_ID),
                            },
                        }],
                    },
                }),
            )
            .with_removal_policy(RemovalPolicy::Delete),
        );

        let bucket_arn = self.bucket_arn();
        let bucket_statements: Vec<PolicyStatement> = self
            .bucket_grants()
            .into_iter()
            .map(|principal| {
                PolicyStatement::allow(S3_PUT_ACTIONS.iter().chain(S3_READ_ACTIONS).copied())
                    .for_principal(principal)
                    .on(bucket_arn.clone())
                    .on(format!("{bucket_arn}/*"))
            })
            .collect();
        template.add_resource(
            BUCKET_POLICY_ID,
            Resource::new(
                "AWS::S3::BucketPolicy",
                json!({
                    "Bucket": intrinsic::reference(BUCKET_ID),
                    "PolicyDocument": policy_document(&bucket_statements),
                }),
            ),
        );
    }

    fn add_build_project(
        &self,
        template: &mut Template,
        project: &BuildProject,
    ) -> Result<(), DeclarationError> {
        let role_id = format!("{}Role", project.logical_id);
        let bucket_arn = self.bucket_arn();
        let statements = [
            PolicyStatement::allow([
                "logs:CreateLogGroup",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
            ])
            .on(format!(
                "arn:aws:logs:{}:{}:log-group:/aws/codebuild/*",
                self.context.region, self.context.account
            )),
            PolicyStatement::allow(S3_READ_ACTIONS.iter().chain(S3_PUT_ACTIONS).copied())
                .on(bucket_arn.clone())
                .on(format!("{bucket_arn}/*")),
            PolicyStatement::allow(KMS_ENCRYPT_DECRYPT_ACTIONS.iter().copied())
                .on(intrinsic::arn_of(KEY_ID)),
        ];
        template.add_resource(
            &role_id,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": service_trust_policy("codebuild.amazonaws.com"),
                    "Policies": [inline_policy("BuildAccess", &statements)],
                }),
            ),
        );

        let environment_variables: Vec<Value> = project
            .environment_variables
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Type": "PLAINTEXT", "Value": value }))
            .collect();
        template.add_resource(
            &project.logical_id,
            Resource::new(
                "AWS::CodeBuild::Project",
                json!({
                    "Source": { "Type": "CODEPIPELINE", "BuildSpec": project.spec.render()? },
                    "Artifacts": { "Type": "CODEPIPELINE" },
                    "Environment": {
                        "Type": "LINUX_CONTAINER",
                        "ComputeType": "BUILD_GENERAL1_SMALL",
                        "Image": self.build_image,
                        "EnvironmentVariables": environment_variables,
                    },
                    "ServiceRole": intrinsic::arn_of(&role_id),
                    "EncryptionKey": intrinsic::arn_of(KEY_ID),
                }),
            )
            .depends_on(role_id.clone()),
        );
        Ok(())
    }

    fn add_pipeline_roles(&self, template: &mut Template) {
        template.add_resource(
            PIPELINE_ROLE_ID,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "RoleName": PIPELINE_ROLE_NAME,
                    "AssumeRolePolicyDocument": service_trust_policy("codepipeline.amazonaws.com"),
                    "Policies": [inline_policy("PipelineAccess", &self.pipeline_role_statements())],
                }),
            ),
        );
        // Dev deploys run in this account with admin rights for CloudFormation.
        template.add_resource(
            DEV_DEPLOYMENT_ROLE_ID,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument":
                        service_trust_policy("cloudformation.amazonaws.com"),
                    "Policies": [
                        inline_policy("DeploymentAdmin", &[PolicyStatement::allow(["*"])])
                    ],
                }),
            ),
        );
    }

    fn add_pipeline(&self, template: &mut Template) -> Result<(), DeclarationError> {
        let stages = self
            .declaration
            .stages
            .iter()
            .map(|stage| {
                let actions = stage
                    .actions
                    .iter()
                    .map(|action| self.action_json(action))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(json!({ "Name": stage.name, "Actions": actions }))
            })
            .collect::<Result<Vec<Value>, DeclarationError>>()?;

        template.add_resource(
            PIPELINE_ID,
            Resource::new(
                "AWS::CodePipeline::Pipeline",
                json!({
                    "Name": self.declaration.name,
                    "RoleArn": intrinsic::arn_of(PIPELINE_ROLE_ID),
                    "ArtifactStore": {
                        "Type": "S3",
                        "Location": intrinsic::reference(BUCKET_ID),
                        "EncryptionKey": { "Type": "KMS", "Id": intrinsic::arn_of(KEY_ID) },
                    },
                    "RestartExecutionOnUpdate": false,
                    "Stages": stages,
                }),
            )
            .depends_on(PIPELINE_ROLE_ID),
        );
        Ok(())
    }

    fn action_json(&self, action: &Action) -> Result<Value, DeclarationError> {
        let (category, provider, configuration, role_arn) = match &action.kind {
            ActionKind::CodeCommitSource {
                repository_name,
                branch,
            } => (
                "Source",
                "CodeCommit",
                json!({
                    "RepositoryName": repository_name,
                    "BranchName": branch,
                    "PollForSourceChanges": false,
                }),
                None,
            ),
            ActionKind::CodeBuild { project } => (
                "Build",
                "CodeBuild",
                json!({ "ProjectName": intrinsic::reference(project) }),
                None,
            ),
            ActionKind::CloudFormationDeploy(deploy) => {
                let overrides: serde_json::Map<String, Value> = deploy
                    .parameter_overrides
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect();
                let overrides =
                    serde_json::to_string(&overrides).map_err(|source| DeclarationError::Serialize {
                        stack: deploy.stack_name.clone(),
                        source,
                    })?;
                let capabilities = deploy
                    .capabilities
                    .iter()
                    .map(|capability| capability.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                let (deployment_role, action_role) = match &deploy.credentials {
                    DeployCredentials::PipelineAccount => {
                        (intrinsic::arn_of(DEV_DEPLOYMENT_ROLE_ID), None)
                    }
                    DeployCredentials::CrossAccount(scope) => (
                        json!(scope.deployment_role_arn),
                        Some(json!(scope.action_role_arn)),
                    ),
                };
                (
                    "Deploy",
                    "CloudFormation",
                    json!({
                        "ActionMode": "CREATE_UPDATE",
                        "StackName": deploy.stack_name,
                        "TemplatePath": deploy.template_path.to_string(),
                        "RoleArn": deployment_role,
                        "Capabilities": capabilities,
                        "ParameterOverrides": overrides,
                    }),
                    action_role,
                )
            }
            ActionKind::ManualApproval {
                summary,
                notification_topic_arn,
            } => {
                let mut configuration = json!({});
                if let Some(summary) = summary {
                    configuration["CustomData"] = json!(summary);
                }
                if let Some(topic) = notification_topic_arn {
                    configuration["NotificationArn"] = json!(topic);
                }
                ("Approval", "Manual", configuration, None)
            }
        };

        let names = |list: &[Artifact]| -> Vec<Value> {
            list.iter()
                .map(|artifact| json!({ "Name": artifact.name() }))
                .collect()
        };
        let mut value = json!({
            "Name": action.name,
            "ActionTypeId": {
                "Category": category,
                "Owner": "AWS",
                "Provider": provider,
                "Version": "1",
            },
            "Configuration": configuration,
            "InputArtifacts": names(&action.inputs),
            "OutputArtifacts": names(&action.outputs),
            "RunOrder": action.run_order,
        });
        if let Some(role_arn) = role_arn {
            value["RoleArn"] = role_arn;
        }
        Ok(value)
    }

    /// Starts the pipeline on every update of the tracked branch.
    fn add_trigger(&self, template: &mut Template) {
        let branch = self
            .declaration
            .actions()
            .find_map(|(_, action)| match &action.kind {
                ActionKind::CodeCommitSource { branch, .. } => Some(branch.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let pipeline_arn = format!(
            "arn:aws:codepipeline:{}:{}:{}",
            self.context.region, self.context.account, self.declaration.name
        );

        template.add_resource(
            TRIGGER_ROLE_ID,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": service_trust_policy("events.amazonaws.com"),
                    "Policies": [inline_policy(
                        "StartPipeline",
                        &[PolicyStatement::allow(["codepipeline:StartPipelineExecution"])
                            .on(pipeline_arn.clone())],
                    )],
                }),
            ),
        );
        template.add_resource(
            TRIGGER_RULE_ID,
            Resource::new(
                "AWS::Events::Rule",
                json!({
                    "EventPattern": {
                        "source": ["aws.codecommit"],
                        "resources": [repository_arn(&self.context)],
                        "detail-type": ["CodeCommit Repository State Change"],
                        "detail": {
                            "event": ["referenceCreated", "referenceUpdated"],
                            "referenceName": [branch],
                        },
                    },
                    "State": "ENABLED",
                    "Targets": [{
                        "Id": "Target0",
                        "Arn": pipeline_arn,
                        "RoleArn": intrinsic::arn_of(TRIGGER_ROLE_ID),
                    }],
                }),
            )
            .depends_on(PIPELINE_ID),
        );
    }
}

