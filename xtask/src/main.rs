mod deploy;
mod release;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use hello_release_core::assembly::ReleaseAssembly;
use hello_release_core::config::PipelineConfig;
use hello_release_core::execution::{
    plan_waves, run_pipeline, CancellationFlag, CommitTrigger, SourceRevision,
};
use tracing_subscriber::EnvFilter;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::release::{
    ensure_succeeded, load_config_file, render_plan, resolve_config, ConfigOverrides,
    SimulatedExecutor,
};

const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";
const LAMBDA_PACKAGE: &str = "hello_release_lambda";
const LAMBDA_BINARY: &str = "hello_runtime";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the hello release pipeline workspace",
    long_about = "Synthesizes the CloudFormation templates, packages the hello function,\n\
                  simulates pipeline executions and stands up the pipeline stacks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write every stack template as <StackName>.template.json
    Synth {
        /// Output directory
        #[arg(long, default_value = "dist")]
        out: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Build the hello function and stage its `bootstrap` artifact
    PackageFunction {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Output directory for `bootstrap` and `function.zip`
        #[arg(long, default_value = "dist/function")]
        out: PathBuf,
    },
    /// Print the pipeline stages and their action waves
    Plan {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Simulate one pipeline execution without touching AWS
    DryRun {
        /// Commit id the simulated execution runs for
        #[arg(long, default_value = "HEAD")]
        commit: String,
        /// Fail the named action (`Action` or `Stage/Action`); repeatable
        #[arg(long)]
        fail_action: Vec<String>,
        /// Cancel the execution before it starts
        #[arg(long)]
        cancel: bool,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Create or update one synthesized stack in the configured region
    Deploy {
        /// Stack name, e.g. RepositoryStack or CrossAccountPipelineStack
        #[arg(long)]
        stack: String,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Run CI checks (fmt, clippy, tests)
    Ci,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// Pipeline configuration file (defaults to pipeline.toml when present)
    #[arg(long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,
    /// Account that hosts the pipeline, repository and dev environment
    #[arg(long, env = "PIPELINE_ACCOUNT_ID")]
    pipeline_account: Option<String>,
    /// Account that hosts the prod environment
    #[arg(long, env = "PROD_ACCOUNT_ID")]
    prod_account: Option<String>,
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,
    /// Tag that forces a new function version; defaults to the build's commit
    #[arg(long, env = "CODEBUILD_RESOLVED_SOURCE_VERSION")]
    version_tag: Option<String>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        let path = match &self.config {
            Some(path) => Some(path.as_path()),
            None if default_path.exists() => Some(default_path),
            None => None,
        };
        let file = load_config_file(path)?;
        resolve_config(
            file,
            ConfigOverrides {
                pipeline_account: self.pipeline_account.clone(),
                prod_account: self.prod_account.clone(),
                region: self.region.clone(),
                version_tag: self.version_tag.clone(),
            },
            || Utc::now().format("%Y%m%d%H%M%S").to_string(),
        )
    }

    fn assembly(&self) -> Result<(PipelineConfig, ReleaseAssembly)> {
        let config = self.resolve()?;
        let assembly = ReleaseAssembly::from_config(&config)?;
        Ok((config, assembly))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> Result<ExitStatus> {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .context("failed to execute cargo")
}

fn run_cargo(args: &[&str]) -> Result<()> {
    let status = cargo(args)?;
    if !status.success() {
        bail!("`cargo {}` exited with {status}", args.join(" "));
    }
    Ok(())
}

fn ensure_rust_target_installed(target: &str) -> Result<()> {
    let output = match Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return Ok(());
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        bail!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- package-function`"
        );
    }
    Ok(())
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_function(target: &str, profile: BuildProfile, out_dir: &Path) -> Result<()> {
    ensure_rust_target_installed(target)?;

    step("Build hello function binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        LAMBDA_PACKAGE,
        "--target",
        target,
        "--bin",
        LAMBDA_BINARY,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args)?;

    step("Stage function artifact");
    let binary_path = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(binary_name(LAMBDA_BINARY, target));
    let (bootstrap, zip) = stage_function_artifacts(&binary_path, out_dir)?;

    eprintln!(
        "\nStaged artifacts:\n- {}\n- {}",
        bootstrap.display(),
        zip.display()
    );
    Ok(())
}

/// Copies the binary to `<out>/bootstrap` and zips it into `<out>/function.zip`.
fn stage_function_artifacts(binary_path: &Path, out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    if !binary_path.exists() {
        bail!("expected lambda binary at '{}'", binary_path.display());
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create '{}'", out_dir.display()))?;

    let binary = fs::read(binary_path).context("failed to read lambda binary")?;
    let bootstrap_path = out_dir.join("bootstrap");
    fs::write(&bootstrap_path, &binary).context("failed to write bootstrap")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&bootstrap_path, fs::Permissions::from_mode(0o755))
            .context("failed to mark bootstrap executable")?;
    }

    let zip_path = out_dir.join("function.zip");
    let file = fs::File::create(&zip_path).context("failed to create function zip")?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .context("failed to start bootstrap entry in function zip")?;
    zip.write_all(&binary)
        .context("failed to write bootstrap entry")?;
    zip.finish().context("failed to finish function zip")?;

    Ok((bootstrap_path, zip_path))
}

// ── commands ───────────────────────────────────────────────────────

fn synth(out: &Path, args: &ConfigArgs) -> Result<()> {
    let (config, assembly) = args.assembly()?;
    step("Synthesize templates");
    tracing::info!(
        pipeline_account = %config.pipeline_account,
        prod_account = %config.prod_account(),
        region = %config.region,
        version_tag = config.version_tag.as_deref().unwrap_or_default(),
        "synthesizing release"
    );
    let written = assembly.write_to(out)?;
    for path in written {
        eprintln!("- {}", path.display());
    }
    Ok(())
}

fn plan(args: &ConfigArgs) -> Result<()> {
    let (_, assembly) = args.assembly()?;
    println!("{}", render_plan(&plan_waves(assembly.pipeline.declaration())));
    Ok(())
}

fn dry_run(
    commit: String,
    fail_action: Vec<String>,
    cancel: bool,
    args: &ConfigArgs,
) -> Result<()> {
    let (_, assembly) = args.assembly()?;
    let revision = SourceRevision::new(commit);
    let mut trigger = CommitTrigger::new();
    let Some(execution_id) = trigger.on_commit(&revision) else {
        return Ok(());
    };

    let cancellation = CancellationFlag::new();
    if cancel {
        cancellation.cancel();
    }
    let record = run_pipeline(
        assembly.pipeline.declaration(),
        execution_id,
        &revision,
        &SimulatedExecutor::new(fail_action),
        &cancellation,
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("failed to render execution record")?
    );
    ensure_succeeded(&record)
}

fn deploy(stack_name: &str, args: &ConfigArgs) -> Result<()> {
    let (config, assembly) = args.assembly()?;
    let stacks = assembly.synthesize()?;
    let Some(stack) = stacks.iter().find(|stack| stack.stack_name == stack_name) else {
        let names: Vec<&str> = stacks.iter().map(|stack| stack.stack_name.as_str()).collect();
        bail!(
            "unknown stack '{stack_name}'; expected one of: {}",
            names.join(", ")
        );
    };
    deploy::ensure_directly_deployable(stack)?;

    step(&format!("Deploy {stack_name} to {}", config.region));
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async {
        let client = deploy::client_for_region(&config.region).await;
        deploy::deploy_stack(&client, stack).await
    })
}

fn ci() -> Result<()> {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"])?;

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ])?;

    step("Test hello_release_core");
    run_cargo(&["test", "-p", "hello_release_core"])?;

    step("Test hello_release_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE])?;

    step("Test xtask");
    run_cargo(&["test", "-p", "xtask"])
}

// ── main ───────────────────────────────────────────────────────────

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Synth { out, config } => synth(&out, &config),
        Commands::PackageFunction {
            target,
            profile,
            out,
        } => package_function(&target, profile, &out),
        Commands::Plan { config } => plan(&config),
        Commands::DryRun {
            commit,
            fail_action,
            cancel,
            config,
        } => dry_run(commit, fail_action, cancel, &config),
        Commands::Deploy { stack, config } => deploy(&stack, &config),
        Commands::Ci => {
            ci()?;
            eprintln!("\nCI job passed.");
            Ok(())
        }
    }
}
