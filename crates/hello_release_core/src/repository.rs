use serde_json::json;

use crate::naming::{repository_name, DeploymentContext};
use crate::template::{Resource, Template};

const REPOSITORY_ID: &str = "CodeCommitRepo";

/// Source store for one deploying account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryStack {
    context: DeploymentContext,
}

impl RepositoryStack {
    pub fn new(context: DeploymentContext) -> Self {
        Self { context }
    }

    pub fn repository_name(&self) -> String {
        repository_name(&self.context)
    }

    pub fn synthesize(&self) -> Template {
        let mut template = Template::new("Source repository for the hello release pipeline");
        template.add_resource(
            REPOSITORY_ID,
            Resource::new(
                "AWS::CodeCommit::Repository",
                json!({ "RepositoryName": self.repository_name() }),
            ),
        );
        template
    }
}
