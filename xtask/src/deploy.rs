use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use aws_sdk_cloudformation::config::Region;
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::Capability;
use aws_sdk_cloudformation::Client;
use hello_release_core::assembly::SynthesizedStack;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    InProgress,
    Settled,
    /// A failed update was rolled back; the stack can be updated again.
    RolledBack,
    Failed,
}

impl StackState {
    pub fn classify(status: &str) -> Self {
        if status.ends_with("_IN_PROGRESS") {
            return Self::InProgress;
        }
        match status {
            "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => Self::Settled,
            "UPDATE_ROLLBACK_COMPLETE" => Self::RolledBack,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackChange {
    Create,
    Update,
}

/// Decides how to deploy over a stack that is absent or no longer in progress.
pub fn change_for(stack_name: &str, status: Option<&str>) -> Result<StackChange> {
    let Some(status) = status else {
        return Ok(StackChange::Create);
    };
    match StackState::classify(status) {
        StackState::Settled | StackState::RolledBack => Ok(StackChange::Update),
        StackState::InProgress => bail!("stack '{stack_name}' is still in {status}"),
        StackState::Failed if status == "ROLLBACK_COMPLETE" => bail!(
            "stack '{stack_name}' is in ROLLBACK_COMPLETE and cannot be updated; delete it and deploy again"
        ),
        StackState::Failed => bail!("stack '{stack_name}' is in {status} and cannot be updated"),
    }
}

fn is_missing_stack(message: &str) -> bool {
    message.contains("does not exist")
}

fn is_no_op_update(message: &str) -> bool {
    message.contains("No updates are to be performed")
}

/// Application stacks take the function code location as parameters and are
/// only deployed by the pipeline.
pub fn ensure_directly_deployable(stack: &SynthesizedStack) -> Result<()> {
    if !stack.template.parameters.is_empty() {
        let names: Vec<&str> = stack.template.parameters.keys().map(String::as_str).collect();
        bail!(
            "stack '{}' takes parameters ({}) that the pipeline supplies; push a commit instead of deploying it directly",
            stack.stack_name,
            names.join(", ")
        );
    }
    Ok(())
}

pub async fn client_for_region(region: &str) -> Client {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    Client::new(&config)
}

async fn current_status(client: &Client, stack_name: &str) -> Result<Option<String>> {
    match client.describe_stacks().stack_name(stack_name).send().await {
        Ok(output) => Ok(output
            .stacks()
            .first()
            .and_then(|stack| stack.stack_status())
            .map(|status| status.as_str().to_string())),
        Err(error) => {
            let message = DisplayErrorContext(&error).to_string();
            if is_missing_stack(&message) {
                Ok(None)
            } else {
                Err(anyhow!("failed to describe stack '{stack_name}': {message}"))
            }
        }
    }
}

async fn wait_until_idle(client: &Client, stack_name: &str) -> Result<String> {
    loop {
        let status = current_status(client, stack_name)
            .await?
            .ok_or_else(|| anyhow!("stack '{stack_name}' disappeared while waiting"))?;
        if StackState::classify(&status) != StackState::InProgress {
            return Ok(status);
        }
        info!(stack = stack_name, %status, "waiting for stack");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn wait_until_settled(client: &Client, stack_name: &str) -> Result<String> {
    let status = wait_until_idle(client, stack_name).await?;
    match StackState::classify(&status) {
        StackState::Settled => Ok(status),
        _ => bail!("stack '{stack_name}' ended in {status}"),
    }
}

pub async fn deploy_stack(client: &Client, stack: &SynthesizedStack) -> Result<()> {
    ensure_directly_deployable(stack)?;
    let name = stack.stack_name.as_str();
    let body = stack.to_json_pretty()?;

    let existing = match current_status(client, name).await? {
        Some(status) if StackState::classify(&status) == StackState::InProgress => {
            Some(wait_until_idle(client, name).await?)
        }
        other => other,
    };

    match change_for(name, existing.as_deref())? {
        StackChange::Create => {
            info!(stack = name, "creating stack");
            client
                .create_stack()
                .stack_name(name)
                .template_body(body)
                .capabilities(Capability::CapabilityNamedIam)
                .send()
                .await
                .map_err(|error| anyhow!("{}", DisplayErrorContext(&error)))
                .with_context(|| format!("failed to create stack '{name}'"))?;
        }
        StackChange::Update => {
            info!(stack = name, status = ?existing, "updating stack");
            if let Err(error) = client
                .update_stack()
                .stack_name(name)
                .template_body(body)
                .capabilities(Capability::CapabilityNamedIam)
                .send()
                .await
            {
                let message = DisplayErrorContext(&error).to_string();
                if is_no_op_update(&message) {
                    warn!(stack = name, "stack is already up to date");
                    return Ok(());
                }
                bail!("failed to update stack '{name}': {message}");
            }
        }
    }

    let status = wait_until_settled(client, name).await?;
    info!(stack = name, %status, "stack deployed");
    Ok(())
}
