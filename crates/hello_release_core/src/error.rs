use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("pipeline stages must be {expected:?}, found {found:?}")]
    StageOrder {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("artifact '{0}' is produced by more than one action")]
    DuplicateArtifact(String),

    #[error("action '{action}' consumes artifact '{artifact}' before any earlier action produces it")]
    UnproducedArtifact { action: String, artifact: String },

    #[error("build action '{action}' must consume only the source artifact '{expected}'")]
    BuildInput { action: String, expected: String },

    #[error("build actions must run concurrently, found run orders {run_orders:?}")]
    SerializedBuild { run_orders: Vec<u32> },

    #[error("build action '{action}' depends on '{artifact}', produced inside the same stage")]
    BuildDependency { action: String, artifact: String },

    #[error("deploy action '{action}' overrides '{parameter}' from '{found}', expected the function artifact '{expected}'")]
    OverrideSource {
        action: String,
        parameter: String,
        expected: String,
        found: String,
    },

    #[error("deploy action '{action}' has no parameter overrides for the function code location")]
    MissingOverrides { action: String },

    #[error("deploy action '{action}' does not resolve the function artifact's {attribute}")]
    MissingCodeCoordinate { action: String, attribute: String },

    #[error("deploy action '{action}' must list '{artifact}' as an input")]
    MissingExtraInput { action: String, artifact: String },

    #[error("deploy action '{action}' in stage '{stage}' requires cross-account credentials")]
    MissingCrossAccountScope { stage: String, action: String },

    #[error("deploy action '{action}' in stage '{stage}' must run with pipeline-account credentials")]
    UnexpectedCrossAccountScope { stage: String, action: String },

    #[error("deploy action '{action}' uses {role} both to start and to run the deployment")]
    ConflatedRoles { action: String, role: String },

    #[error("deploy action '{action}' reuses the pipeline's own role {role}")]
    PipelineRoleReused { action: String, role: String },

    #[error("role {role} is not owned by the target account {account}")]
    RoleOutsideAccount { role: String, account: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to render buildspec: {0}")]
    BuildSpec(#[from] serde_yaml::Error),

    #[error("failed to serialize template for {stack}: {source}")]
    Serialize {
        stack: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeclarationError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
