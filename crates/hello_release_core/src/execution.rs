//! Execution model of the managed orchestrator, used for dry runs and for
//! checking release ordering without touching AWS.
//!
//! Stages are entered strictly in declaration order. Inside a stage,
//! actions sharing a run order form a wave: every action of the wave is
//! started, and the stage only advances once all of them succeeded. A failed
//! wave halts the execution; a cancelled execution enters no further stage.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::{Action, PipelineDeclaration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRevision {
    pub commit_id: String,
}

impl SourceRevision {
    pub fn new(commit_id: impl Into<String>) -> Self {
        Self {
            commit_id: commit_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave<'a> {
    pub stage: &'a str,
    pub run_order: u32,
    pub actions: Vec<&'a Action>,
}

impl Wave<'_> {
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|action| action.name.as_str()).collect()
    }
}

pub fn plan_waves(declaration: &PipelineDeclaration) -> Vec<Wave<'_>> {
    let mut waves = Vec::new();
    for stage in &declaration.stages {
        for run_order in stage.run_orders() {
            waves.push(Wave {
                stage: &stage.name,
                run_order,
                actions: stage
                    .actions
                    .iter()
                    .filter(|action| action.run_order == run_order)
                    .collect(),
            });
        }
    }
    waves
}

/// Seam to the service that actually runs an action.
pub trait ActionExecutor {
    fn execute(&self, stage: &str, action: &Action, revision: &SourceRevision)
        -> Result<(), String>;
}

#[derive(Debug, Default)]
pub struct CancellationFlag {
    cancelled: AtomicBool,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub action: String,
    pub run_order: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub actions: Vec<ActionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed { stage: String, actions: Vec<String> },
    Stopped { before_stage: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: u64,
    pub revision: SourceRevision,
    pub stages: Vec<StageRecord>,
    pub status: ExecutionStatus,
}

impl ExecutionRecord {
    pub fn entered_stages(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.stage.as_str()).collect()
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|stage| stage.stage == name)
    }
}

pub fn run_pipeline(
    declaration: &PipelineDeclaration,
    execution_id: u64,
    revision: &SourceRevision,
    executor: &dyn ActionExecutor,
    cancellation: &CancellationFlag,
) -> ExecutionRecord {
    let mut stages: Vec<StageRecord> = Vec::new();

    for wave in plan_waves(declaration) {
        let entering_stage = stages.last().map(|record| record.stage.as_str()) != Some(wave.stage);
        if entering_stage && cancellation.is_cancelled() {
            warn!(execution_id, stage = wave.stage, "execution stopped");
            return ExecutionRecord {
                execution_id,
                revision: revision.clone(),
                stages,
                status: ExecutionStatus::Stopped {
                    before_stage: wave.stage.to_string(),
                },
            };
        }
        if entering_stage {
            info!(execution_id, stage = wave.stage, "entering stage");
            stages.push(StageRecord {
                stage: wave.stage.to_string(),
                actions: Vec::new(),
            });
        }

        let records: Vec<ActionRecord> = wave
            .actions
            .iter()
            .map(|action| ActionRecord {
                action: action.name.clone(),
                run_order: action.run_order,
                error: executor.execute(wave.stage, action, revision).err(),
            })
            .collect();
        let failed: Vec<String> = records
            .iter()
            .filter(|record| !record.succeeded())
            .map(|record| record.action.clone())
            .collect();
        if let Some(current) = stages.last_mut() {
            current.actions.extend(records);
        }

        if !failed.is_empty() {
            warn!(execution_id, stage = wave.stage, ?failed, "stage failed");
            return ExecutionRecord {
                execution_id,
                revision: revision.clone(),
                stages,
                status: ExecutionStatus::Failed {
                    stage: wave.stage.to_string(),
                    actions: failed,
                },
            };
        }
    }

    info!(execution_id, commit = %revision.commit_id, "execution succeeded");
    ExecutionRecord {
        execution_id,
        revision: revision.clone(),
        stages,
        status: ExecutionStatus::Succeeded,
    }
}

/// Starts one execution per new commit on the tracked branch.
#[derive(Debug, Default)]
pub struct CommitTrigger {
    seen: BTreeSet<String>,
    next_execution_id: u64,
}

impl CommitTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execution id to start for `revision`, or `None` if it already ran.
    pub fn on_commit(&mut self, revision: &SourceRevision) -> Option<u64> {
        if !self.seen.insert(revision.commit_id.clone()) {
            return None;
        }
        self.next_execution_id += 1;
        Some(self.next_execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_ignores_repeated_commits() {
        let mut trigger = CommitTrigger::new();
        let first = SourceRevision::new("abc123");
        assert_eq!(trigger.on_commit(&first), Some(1));
        assert_eq!(trigger.on_commit(&first), None);
        assert_eq!(trigger.on_commit(&SourceRevision::new("def456")), Some(2));
    }

    #[test]
    fn cancellation_flag_latches() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
    }
}
