//! The full set of stacks for one release, assembled from configuration.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::application::{ApplicationStack, ApplicationStackProps};
use crate::config::PipelineConfig;
use crate::error::DeclarationError;
use crate::naming::{
    template_file_name, DEV_APPLICATION_STACK, PIPELINE_STACK, PROD_APPLICATION_STACK,
    REPOSITORY_STACK,
};
use crate::pipeline_stack::{PipelineStack, PipelineStackProps};
use crate::repository::RepositoryStack;
use crate::template::Template;

pub const DEV_STAGE_NAME: &str = "dev";
pub const PROD_STAGE_NAME: &str = "prod";

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedStack {
    pub stack_name: String,
    pub template: Template,
}

impl SynthesizedStack {
    pub fn file_name(&self) -> String {
        template_file_name(&self.stack_name)
    }

    pub fn to_json_pretty(&self) -> Result<String, DeclarationError> {
        self.template.to_json_pretty(&self.stack_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseAssembly {
    pub repository: RepositoryStack,
    pub dev_application: ApplicationStack,
    pub prod_application: ApplicationStack,
    pub pipeline: PipelineStack,
}

impl ReleaseAssembly {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, DeclarationError> {
        config.validate()?;
        let version_tag = config
            .version_tag
            .clone()
            .ok_or_else(|| DeclarationError::config("version_tag must be set before synthesis"))?;
        let context = config.pipeline_context();
        // Both environments then live side by side in one account and region.
        let shares_account = config.prod_account() == config.pipeline_account;

        let repository = RepositoryStack::new(context.clone());
        let dev_application = ApplicationStack::new(
            DEV_APPLICATION_STACK,
            ApplicationStackProps {
                stage_name: DEV_STAGE_NAME.to_string(),
                deployment: config.dev.deployment.clone(),
                version_tag: version_tag.clone(),
                name_qualifier: None,
            },
        );
        let prod_application = ApplicationStack::new(
            PROD_APPLICATION_STACK,
            ApplicationStackProps {
                stage_name: PROD_STAGE_NAME.to_string(),
                deployment: config.prod.deployment.clone(),
                version_tag,
                name_qualifier: shares_account.then(|| PROD_STAGE_NAME.to_string()),
            },
        );
        let pipeline = PipelineStack::new(PipelineStackProps {
            context,
            prod_account: config.prod_account().to_string(),
            branch: config.branch.clone(),
            build_image: config.build_image.clone(),
            approval: config.approval.clone(),
            dev_application: &dev_application,
            prod_application: &prod_application,
        })?;

        Ok(Self {
            repository,
            dev_application,
            prod_application,
            pipeline,
        })
    }

    pub fn synthesize(&self) -> Result<Vec<SynthesizedStack>, DeclarationError> {
        Ok(vec![
            SynthesizedStack {
                stack_name: REPOSITORY_STACK.to_string(),
                template: self.repository.synthesize(),
            },
            SynthesizedStack {
                stack_name: self.dev_application.stack_name().to_string(),
                template: self.dev_application.synthesize()?,
            },
            SynthesizedStack {
                stack_name: self.prod_application.stack_name().to_string(),
                template: self.prod_application.synthesize()?,
            },
            SynthesizedStack {
                stack_name: PIPELINE_STACK.to_string(),
                template: self.pipeline.synthesize()?,
            },
        ])
    }

    /// Writes `<StackName>.template.json` for every stack into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, DeclarationError> {
        fs::create_dir_all(dir).map_err(|source| DeclarationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::new();
        for stack in self.synthesize()? {
            let path = dir.join(stack.file_name());
            fs::write(&path, stack.to_json_pretty()?).map_err(|source| DeclarationError::Io {
                path: path.clone(),
                source,
            })?;
            info!(stack = %stack.stack_name, path = %path.display(), "wrote template");
            written.push(path);
        }
        Ok(written)
    }
}
