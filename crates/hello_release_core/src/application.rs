//! Per-environment application stack: the function, its alias, the REST API
//! in front of it and the CodeDeploy group shifting traffic to new versions.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::deployment::DeploymentPreference;
use crate::error::DeclarationError;
use crate::iam::service_trust_policy;
use crate::naming::{API_ENDPOINT_EXPORT, FUNCTION_NAME};
use crate::pipeline::{ArtifactLocation, ParameterOverrides};
use crate::template::{intrinsic, Output, Parameter, Resource, Template};

pub const FUNCTION_RUNTIME: &str = "provided.al2023";
pub const FUNCTION_HANDLER: &str = "bootstrap";
pub const STAGE_NAME_VARIABLE: &str = "STAGE_NAME";

const FUNCTION_ID: &str = "Lambda";
const FUNCTION_ROLE_ID: &str = "LambdaServiceRole";
const ALIAS_ID: &str = "LambdaAlias";
const API_ID: &str = "HelloLambdaRestApi";
const API_PROXY_RESOURCE_ID: &str = "HelloLambdaRestApiProxyResource";
const API_ROOT_METHOD_ID: &str = "HelloLambdaRestApiRootAnyMethod";
const API_PROXY_METHOD_ID: &str = "HelloLambdaRestApiProxyAnyMethod";
const API_DEPLOYMENT_ID: &str = "HelloLambdaRestApiDeployment";
const API_STAGE_ID: &str = "HelloLambdaRestApiStage";
const API_PERMISSION_ID: &str = "HelloLambdaRestApiInvokePermission";
const CODEDEPLOY_APP_ID: &str = "DeploymentGroupApplication";
const CODEDEPLOY_ROLE_ID: &str = "DeploymentGroupServiceRole";
const DEPLOYMENT_GROUP_ID: &str = "DeploymentGroup";

/// Template parameters standing in for the function code location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaCodeParameters {
    pub bucket_name_parameter: String,
    pub object_key_parameter: String,
}

impl Default for LambdaCodeParameters {
    fn default() -> Self {
        Self {
            bucket_name_parameter: "LambdaSourceBucketNameParameter".to_string(),
            object_key_parameter: "LambdaSourceObjectKeyParameter".to_string(),
        }
    }
}

impl LambdaCodeParameters {
    /// Overrides binding these parameters to `location` at deploy time.
    pub fn assign(&self, location: &ArtifactLocation) -> ParameterOverrides {
        BTreeMap::from([
            (
                self.bucket_name_parameter.clone(),
                location.bucket_name.clone(),
            ),
            (
                self.object_key_parameter.clone(),
                location.object_key.clone(),
            ),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationStackProps {
    pub stage_name: String,
    pub deployment: DeploymentPreference,
    /// Label unique per synthesis; forces a fresh function version.
    pub version_tag: String,
    /// Suffix for account-unique names (function name, endpoint export),
    /// needed when two environments share one account and region.
    pub name_qualifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationStack {
    stack_name: String,
    props: ApplicationStackProps,
    lambda_code: LambdaCodeParameters,
}

impl ApplicationStack {
    pub fn new(stack_name: impl Into<String>, props: ApplicationStackProps) -> Self {
        Self {
            stack_name: stack_name.into(),
            props,
            lambda_code: LambdaCodeParameters::default(),
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn stage_name(&self) -> &str {
        &self.props.stage_name
    }

    pub fn lambda_code(&self) -> &LambdaCodeParameters {
        &self.lambda_code
    }

    pub fn function_name(&self) -> String {
        self.qualified(FUNCTION_NAME)
    }

    pub fn endpoint_export(&self) -> String {
        self.qualified(API_ENDPOINT_EXPORT)
    }

    fn qualified(&self, name: &str) -> String {
        match &self.props.name_qualifier {
            Some(qualifier) => format!("{name}-{qualifier}"),
            None => name.to_string(),
        }
    }

    pub fn version_logical_id(&self) -> String {
        let digest = Sha256::digest(self.props.version_tag.as_bytes());
        let suffix: String = digest
            .iter()
            .take(4)
            .map(|byte| format!("{byte:02X}"))
            .collect();
        format!("LambdaVersion{suffix}")
    }

    pub fn synthesize(&self) -> Result<Template, DeclarationError> {
        self.props.deployment.validate()?;
        let stage_name = &self.props.stage_name;
        let mut template = Template::new(format!(
            "Hello function release target for the {stage_name} environment"
        ));

        template.add_parameter(
            &self.lambda_code.bucket_name_parameter,
            Parameter::string("The name of the S3 bucket where the Lambda code is stored"),
        );
        template.add_parameter(
            &self.lambda_code.object_key_parameter,
            Parameter::string("The S3 object key of the Lambda code package"),
        );

        self.add_function(&mut template);
        self.add_version_and_alias(&mut template);
        self.add_rest_api(&mut template);
        self.add_deployment_group(&mut template)?;
        Ok(template)
    }

    fn add_function(&self, template: &mut Template) {
        template.add_resource(
            FUNCTION_ROLE_ID,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": service_trust_policy("lambda.amazonaws.com"),
                    "ManagedPolicyArns": [intrinsic::sub(
                        "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole",
                    )],
                }),
            ),
        );
        template.add_resource(
            FUNCTION_ID,
            Resource::new(
                "AWS::Lambda::Function",
                json!({
                    "FunctionName": self.function_name(),
                    "Code": {
                        "S3Bucket": intrinsic::reference(&self.lambda_code.bucket_name_parameter),
                        "S3Key": intrinsic::reference(&self.lambda_code.object_key_parameter),
                    },
                    "Handler": FUNCTION_HANDLER,
                    "Runtime": FUNCTION_RUNTIME,
                    "Architectures": ["x86_64"],
                    "Role": intrinsic::arn_of(FUNCTION_ROLE_ID),
                    "Environment": {
                        "Variables": { STAGE_NAME_VARIABLE: self.props.stage_name },
                    },
                }),
            )
            .depends_on(FUNCTION_ROLE_ID),
        );
    }

    fn add_version_and_alias(&self, template: &mut Template) {
        let version_id = self.version_logical_id();
        template.add_resource(
            &version_id,
            Resource::new(
                "AWS::Lambda::Version",
                json!({
                    "FunctionName": intrinsic::reference(FUNCTION_ID),
                    "Description": self.props.version_tag,
                }),
            ),
        );
        template.add_resource(
            ALIAS_ID,
            Resource::new(
                "AWS::Lambda::Alias",
                json!({
                    "FunctionName": intrinsic::reference(FUNCTION_ID),
                    "FunctionVersion": intrinsic::get_att(&version_id, "Version"),
                    "Name": self.props.stage_name,
                }),
            )
            .with_update_policy(json!({
                "CodeDeployLambdaAliasUpdate": {
                    "ApplicationName": intrinsic::reference(CODEDEPLOY_APP_ID),
                    "DeploymentGroupName": intrinsic::reference(DEPLOYMENT_GROUP_ID),
                },
            })),
        );
    }

    /// Every path and method is proxied to the alias, not the bare function,
    /// so the deployment group controls what the endpoint serves.
    fn add_rest_api(&self, template: &mut Template) {
        let stage_name = &self.props.stage_name;
        let integration = json!({
            "Type": "AWS_PROXY",
            "IntegrationHttpMethod": "POST",
            "Uri": intrinsic::sub(format!(
                "arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/${{{ALIAS_ID}}}/invocations"
            )),
        });

        template.add_resource(
            API_ID,
            Resource::new(
                "AWS::ApiGateway::RestApi",
                json!({ "Name": "HelloLambdaRestApi" }),
            ),
        );
        template.add_resource(
            API_PROXY_RESOURCE_ID,
            Resource::new(
                "AWS::ApiGateway::Resource",
                json!({
                    "RestApiId": intrinsic::reference(API_ID),
                    "ParentId": intrinsic::get_att(API_ID, "RootResourceId"),
                    "PathPart": "{proxy+}",
                }),
            ),
        );
        template.add_resource(
            API_ROOT_METHOD_ID,
            any_method(intrinsic::get_att(API_ID, "RootResourceId"), &integration),
        );
        template.add_resource(
            API_PROXY_METHOD_ID,
            any_method(intrinsic::reference(API_PROXY_RESOURCE_ID), &integration),
        );
        template.add_resource(
            API_DEPLOYMENT_ID,
            Resource::new(
                "AWS::ApiGateway::Deployment",
                json!({
                    "RestApiId": intrinsic::reference(API_ID),
                    "Description": "Automatically created by the hello release pipeline",
                }),
            )
            .depends_on(API_ROOT_METHOD_ID)
            .depends_on(API_PROXY_METHOD_ID),
        );
        template.add_resource(
            API_STAGE_ID,
            Resource::new(
                "AWS::ApiGateway::Stage",
                json!({
                    "RestApiId": intrinsic::reference(API_ID),
                    "DeploymentId": intrinsic::reference(API_DEPLOYMENT_ID),
                    "StageName": stage_name,
                }),
            ),
        );
        template.add_resource(
            API_PERMISSION_ID,
            Resource::new(
                "AWS::Lambda::Permission",
                json!({
                    "Action": "lambda:InvokeFunction",
                    "FunctionName": intrinsic::reference(ALIAS_ID),
                    "Principal": "apigateway.amazonaws.com",
                    "SourceArn": intrinsic::sub(format!(
                        "arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{API_ID}}}/*"
                    )),
                }),
            ),
        );
        template.add_output(
            "HelloLambdaRestApiEndpoint",
            Output::exported(
                intrinsic::sub(format!(
                    "https://${{{API_ID}}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/{stage_name}/"
                )),
                self.endpoint_export(),
            ),
        );
    }

    fn add_deployment_group(&self, template: &mut Template) -> Result<(), DeclarationError> {
        let preference = &self.props.deployment;
        template.add_resource(
            CODEDEPLOY_APP_ID,
            Resource::new(
                "AWS::CodeDeploy::Application",
                json!({ "ComputePlatform": "Lambda" }),
            ),
        );
        template.add_resource(
            CODEDEPLOY_ROLE_ID,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": service_trust_policy("codedeploy.amazonaws.com"),
                    "ManagedPolicyArns": [intrinsic::sub(
                        "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSCodeDeployRoleForLambdaLimited",
                    )],
                }),
            ),
        );

        let mut properties = json!({
            "ApplicationName": intrinsic::reference(CODEDEPLOY_APP_ID),
            "ServiceRoleArn": intrinsic::arn_of(CODEDEPLOY_ROLE_ID),
            "DeploymentConfigName": preference.strategy.config_name()?,
            "DeploymentStyle": {
                "DeploymentType": "BLUE_GREEN",
                "DeploymentOption": "WITH_TRAFFIC_CONTROL",
            },
        });
        if preference.rollback.is_enabled() {
            properties["AutoRollbackConfiguration"] = json!({
                "Enabled": true,
                "Events": preference.rollback.events(),
            });
        }
        if !preference.rollback.alarms.is_empty() {
            properties["AlarmConfiguration"] = json!({
                "Enabled": true,
                "Alarms": preference
                    .rollback
                    .alarms
                    .iter()
                    .map(|name| json!({ "Name": name }))
                    .collect::<Vec<Value>>(),
            });
        }
        template.add_resource(
            DEPLOYMENT_GROUP_ID,
            Resource::new("AWS::CodeDeploy::DeploymentGroup", properties),
        );
        Ok(())
    }
}

fn any_method(resource_id: Value, integration: &Value) -> Resource {
    Resource::new(
        "AWS::ApiGateway::Method",
        json!({
            "RestApiId": intrinsic::reference(API_ID),
            "ResourceId": resource_id,
            "HttpMethod": "ANY",
            "AuthorizationType": "NONE",
            "Integration": integration,
        }),
    )
}
