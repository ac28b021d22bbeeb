//! IAM principals, statements and the grant action sets used by the stacks.

use serde_json::{json, Value};

use crate::naming::account_root_arn;

pub const POLICY_VERSION: &str = "2012-10-17";

pub const KMS_DECRYPT_ACTIONS: &[&str] = &["kms:Decrypt", "kms:DescribeKey"];
pub const KMS_ENCRYPT_DECRYPT_ACTIONS: &[&str] = &[
    "kms:Decrypt",
    "kms:DescribeKey",
    "kms:Encrypt",
    "kms:ReEncrypt*",
    "kms:GenerateDataKey*",
];
pub const S3_READ_ACTIONS: &[&str] = &["s3:GetObject*", "s3:GetBucket*", "s3:List*"];
pub const S3_PUT_ACTIONS: &[&str] = &[
    "s3:PutObject",
    "s3:PutObjectLegalHold",
    "s3:PutObjectRetention",
    "s3:PutObjectTagging",
    "s3:PutObjectVersionTagging",
    "s3:Abort*",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Principal {
    /// The root principal of an account; delegates to that account's IAM.
    Account(String),
    Role(String),
}

impl Principal {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Account(account) => json!({ "AWS": account_root_arn(account) }),
            Self::Role(arn) => json!({ "AWS": arn }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    actions: Vec<String>,
    resources: Vec<Value>,
    principal: Option<Principal>,
}

impl PolicyStatement {
    pub fn allow<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources: Vec::new(),
            principal: None,
        }
    }

    pub fn on(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn for_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut statement = json!({
            "Effect": "Allow",
            "Action": self.actions,
        });
        if let Some(principal) = &self.principal {
            statement["Principal"] = principal.to_json();
        }
        statement["Resource"] = match self.resources.as_slice() {
            [] => json!("*"),
            [single] => single.clone(),
            many => json!(many),
        };
        statement
    }
}

pub fn policy_document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
    })
}

pub fn service_trust_policy(service: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
}

pub fn inline_policy(name: &str, statements: &[PolicyStatement]) -> Value {
    json!({
        "PolicyName": name,
        "PolicyDocument": policy_document(statements),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_principal_points_at_root() {
        let principal = Principal::Account("222222222222".to_string());
        assert_eq!(
            principal.to_json(),
            json!({"AWS": "arn:aws:iam::222222222222:root"})
        );
    }

    #[test]
    fn statement_without_resources_applies_to_everything() {
        let statement = PolicyStatement::allow(["sts:AssumeRole"]);
        assert_eq!(statement.to_json()["Resource"], "*");
    }

    #[test]
    fn statement_keeps_multiple_resources_as_list() {
        let statement = PolicyStatement::allow(S3_READ_ACTIONS.iter().copied())
            .on("arn:aws:s3:::bucket")
            .on("arn:aws:s3:::bucket/*");
        assert_eq!(
            statement.to_json()["Resource"],
            json!(["arn:aws:s3:::bucket", "arn:aws:s3:::bucket/*"])
        );
    }
}
