//! CloudFormation template model.
//!
//! Resource properties stay as JSON values; the typed envelope keeps the
//! sections, dependencies and policies in the shape CloudFormation expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DeclarationError;

pub const FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemovalPolicy {
    Delete,
    Retain,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: String,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: Some(description.into()),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn add_parameter(&mut self, logical_id: impl Into<String>, parameter: Parameter) {
        self.parameters.insert(logical_id.into(), parameter);
    }

    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Resource) {
        self.resources.insert(logical_id.into(), resource);
    }

    pub fn add_output(&mut self, logical_id: impl Into<String>, output: Output) {
        self.outputs.insert(logical_id.into(), output);
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resources_of_type<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.kind == kind)
    }

    pub fn to_json_pretty(&self, stack_name: &str) -> Result<String, DeclarationError> {
        serde_json::to_string_pretty(self).map_err(|source| DeclarationError::Serialize {
            stack: stack_name.to_string(),
            source,
        })
    }
}

impl Parameter {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            kind: "String".to_string(),
            description: Some(description.into()),
        }
    }
}

impl Resource {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        Self {
            kind: kind.into(),
            properties,
            depends_on: Vec::new(),
            update_policy: None,
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn with_update_policy(mut self, policy: Value) -> Self {
        self.update_policy = Some(policy);
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

impl Output {
    pub fn exported(value: Value, export_name: impl Into<String>) -> Self {
        Self {
            value,
            description: None,
            export: Some(Export {
                name: export_name.into(),
            }),
        }
    }
}

/// Intrinsic function helpers.
pub mod intrinsic {
    use super::*;

    pub fn reference(logical_id: &str) -> Value {
        json!({ "Ref": logical_id })
    }

    pub fn get_att(logical_id: &str, attribute: &str) -> Value {
        json!({ "Fn::GetAtt": [logical_id, attribute] })
    }

    pub fn sub(text: impl Into<String>) -> Value {
        json!({ "Fn::Sub": text.into() })
    }

    pub fn arn_of(logical_id: &str) -> Value {
        get_att(logical_id, "Arn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_cloudformation_section_names() {
        let mut template = Template::new("demo");
        template.add_parameter("Bucket", Parameter::string("bucket"));
        template.add_resource(
            "Queue",
            Resource::new("AWS::SQS::Queue", json!({}))
                .depends_on("Other")
                .with_removal_policy(RemovalPolicy::Delete),
        );
        template.add_output(
            "QueueArn",
            Output::exported(intrinsic::arn_of("Queue"), "QueueArnExport"),
        );

        let value = serde_json::to_value(&template).expect("template should serialize");
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Parameters"]["Bucket"]["Type"], "String");
        assert_eq!(value["Resources"]["Queue"]["Type"], "AWS::SQS::Queue");
        assert_eq!(value["Resources"]["Queue"]["DependsOn"], json!(["Other"]));
        assert_eq!(value["Resources"]["Queue"]["DeletionPolicy"], "Delete");
        assert_eq!(
            value["Outputs"]["QueueArn"]["Export"]["Name"],
            "QueueArnExport"
        );
        assert_eq!(
            value["Outputs"]["QueueArn"]["Value"],
            json!({"Fn::GetAtt": ["Queue", "Arn"]})
        );
    }

    #[test]
    fn omits_empty_sections() {
        let template = Template::new("empty");
        let value = serde_json::to_value(&template).expect("template should serialize");
        assert!(value.get("Parameters").is_none());
        assert!(value.get("Outputs").is_none());
        assert_eq!(value["Resources"], json!({}));
    }
}
