//! CodeBuild build specifications for the two Build-stage jobs.

use serde::{Deserialize, Serialize};

use crate::error::DeclarationError;

pub const BUILDSPEC_VERSION: &str = "0.2";

pub const FUNCTION_ARTIFACT_DIR: &str = "dist/function";
pub const FUNCTION_ARTIFACT_FILE: &str = "bootstrap";
pub const TEMPLATE_ARTIFACT_DIR: &str = "dist";
pub const TEMPLATE_ARTIFACT_GLOB: &str = "*ApplicationStack.template.json";

const INSTALL_RUSTUP: &str =
    "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y --profile minimal";
const LOAD_CARGO_ENV: &str = ". \"$HOME/.cargo/env\"";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSpec {
    pub version: String,
    pub phases: Phases,
    pub artifacts: ArtifactFiles,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phases {
    pub install: Phase,
    pub build: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactFiles {
    #[serde(rename = "base-directory")]
    pub base_directory: String,
    pub files: Vec<String>,
}

impl BuildSpec {
    pub fn new(install: &[&str], build: &[&str], base_directory: &str, files: &[&str]) -> Self {
        let owned = |commands: &[&str]| commands.iter().map(|c| c.to_string()).collect();
        Self {
            version: BUILDSPEC_VERSION.to_string(),
            phases: Phases {
                install: Phase {
                    commands: owned(install),
                },
                build: Phase {
                    commands: owned(build),
                },
            },
            artifacts: ArtifactFiles {
                base_directory: base_directory.to_string(),
                files: owned(files),
            },
        }
    }

    pub fn render(&self) -> Result<String, DeclarationError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Compiles the function and stages the `bootstrap` executable.
pub fn function_build_spec() -> BuildSpec {
    BuildSpec::new(
        &[INSTALL_RUSTUP],
        &[
            LOAD_CARGO_ENV,
            "cargo run --release -p xtask -- package-function --out dist/function",
        ],
        FUNCTION_ARTIFACT_DIR,
        &[FUNCTION_ARTIFACT_FILE],
    )
}

/// Synthesizes the per-environment templates into `dist`.
pub fn template_synth_build_spec() -> BuildSpec {
    BuildSpec::new(
        &[INSTALL_RUSTUP],
        &[
            LOAD_CARGO_ENV,
            "cargo run --release -p xtask -- synth --out dist",
        ],
        TEMPLATE_ARTIFACT_DIR,
        &[TEMPLATE_ARTIFACT_GLOB],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_codebuild_yaml_keys() {
        let rendered = function_build_spec()
            .render()
            .expect("buildspec should render");
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(&rendered).expect("rendered buildspec should parse");

        assert_eq!(parsed["version"], serde_yaml::Value::from("0.2"));
        assert_eq!(
            parsed["artifacts"]["base-directory"],
            serde_yaml::Value::from("dist/function")
        );
        assert!(parsed["phases"]["install"]["commands"].is_sequence());
        assert!(parsed["phases"]["build"]["commands"].is_sequence());
    }

    #[test]
    fn build_jobs_publish_distinct_file_sets() {
        let function = function_build_spec();
        let synth = template_synth_build_spec();
        assert_eq!(function.artifacts.files, vec!["bootstrap"]);
        assert_eq!(
            synth.artifacts.files,
            vec!["*ApplicationStack.template.json"]
        );
        assert_ne!(
            function.artifacts.base_directory,
            synth.artifacts.base_directory
        );
    }
}
