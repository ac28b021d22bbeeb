mod support;

use hello_release_core::execution::{
    plan_waves, run_pipeline, ActionExecutor, CancellationFlag, CommitTrigger, ExecutionStatus,
    SourceRevision,
};
use hello_release_core::pipeline::{
    Action, BUILD_STAGE, DEPLOY_DEV_STAGE, DEPLOY_PROD_STAGE, SOURCE_STAGE, STAGE_ORDER,
};
use hello_release_core::pipeline_stack::{
    APPROVAL_ACTION, DEPLOY_ACTION, FUNCTION_BUILD_ACTION, SOURCE_ACTION, TEMPLATE_BUILD_ACTION,
};
use support::{assembly, cross_account_config, gated_config, RecordingExecutor};

#[test]
fn build_wave_holds_both_jobs() {
    let release = assembly(&cross_account_config());
    let waves = plan_waves(release.pipeline.declaration());

    let stages: Vec<&str> = waves.iter().map(|wave| wave.stage).collect();
    assert_eq!(stages, STAGE_ORDER);

    let build = waves
        .iter()
        .find(|wave| wave.stage == BUILD_STAGE)
        .expect("build wave");
    assert_eq!(
        build.action_names(),
        vec![FUNCTION_BUILD_ACTION, TEMPLATE_BUILD_ACTION]
    );
}

#[test]
fn one_commit_yields_one_dev_then_one_prod_deployment() {
    let release = assembly(&cross_account_config());
    let mut trigger = CommitTrigger::new();
    let executor = RecordingExecutor::succeeding();
    let revision = SourceRevision::new("5f1c2e7");

    let execution_id = trigger.on_commit(&revision).expect("new commit starts a run");
    let record = run_pipeline(
        release.pipeline.declaration(),
        execution_id,
        &revision,
        &executor,
        &CancellationFlag::new(),
    );
    assert!(trigger.on_commit(&revision).is_none());

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(record.entered_stages(), STAGE_ORDER);
    assert_eq!(executor.calls_in(DEPLOY_DEV_STAGE), vec![DEPLOY_ACTION]);
    assert_eq!(executor.calls_in(DEPLOY_PROD_STAGE), vec![DEPLOY_ACTION]);

    let calls = executor.calls();
    let dev_index = calls
        .iter()
        .position(|(stage, _)| stage == DEPLOY_DEV_STAGE)
        .expect("dev deployed");
    let prod_index = calls
        .iter()
        .position(|(stage, _)| stage == DEPLOY_PROD_STAGE)
        .expect("prod deployed");
    assert!(dev_index < prod_index);
}

#[test]
fn failed_build_job_halts_before_dev_but_sibling_still_runs() {
    let release = assembly(&cross_account_config());
    let executor = RecordingExecutor::failing(&[TEMPLATE_BUILD_ACTION]);
    let record = run_pipeline(
        release.pipeline.declaration(),
        1,
        &SourceRevision::new("abc"),
        &executor,
        &CancellationFlag::new(),
    );

    assert_eq!(
        record.status,
        ExecutionStatus::Failed {
            stage: BUILD_STAGE.to_string(),
            actions: vec![TEMPLATE_BUILD_ACTION.to_string()],
        }
    );
    assert_eq!(
        executor.calls_in(BUILD_STAGE),
        vec![FUNCTION_BUILD_ACTION, TEMPLATE_BUILD_ACTION]
    );
    assert!(executor.calls_in(DEPLOY_DEV_STAGE).is_empty());
    assert!(record.stage(DEPLOY_DEV_STAGE).is_none());
}

#[test]
fn failed_dev_deploy_never_reaches_prod() {
    let release = assembly(&cross_account_config());
    let executor = RecordingExecutor::failing(&[DEPLOY_ACTION]);
    let record = run_pipeline(
        release.pipeline.declaration(),
        1,
        &SourceRevision::new("abc"),
        &executor,
        &CancellationFlag::new(),
    );

    assert!(matches!(
        record.status,
        ExecutionStatus::Failed { ref stage, .. } if stage == DEPLOY_DEV_STAGE
    ));
    assert!(executor.calls_in(DEPLOY_PROD_STAGE).is_empty());
}

#[test]
fn cancelled_execution_enters_no_stage() {
    let release = assembly(&cross_account_config());
    let executor = RecordingExecutor::succeeding();
    let cancellation = CancellationFlag::new();
    cancellation.cancel();

    let record = run_pipeline(
        release.pipeline.declaration(),
        1,
        &SourceRevision::new("abc"),
        &executor,
        &cancellation,
    );
    assert_eq!(
        record.status,
        ExecutionStatus::Stopped {
            before_stage: "Source".to_string(),
        }
    );
    assert!(record.stages.is_empty());
    assert!(executor.calls().is_empty());
}

/// Cancels the execution as soon as any action of `stage` runs.
struct CancelDuringStage<'a> {
    stage: &'static str,
    cancellation: &'a CancellationFlag,
    inner: RecordingExecutor,
}

impl ActionExecutor for CancelDuringStage<'_> {
    fn execute(
        &self,
        stage: &str,
        action: &Action,
        revision: &SourceRevision,
    ) -> Result<(), String> {
        if stage == self.stage {
            self.cancellation.cancel();
        }
        self.inner.execute(stage, action, revision)
    }
}

#[test]
fn cancelling_during_build_finishes_wave_and_skips_deploys() {
    let release = assembly(&cross_account_config());
    let cancellation = CancellationFlag::new();
    let executor = CancelDuringStage {
        stage: BUILD_STAGE,
        cancellation: &cancellation,
        inner: RecordingExecutor::succeeding(),
    };

    let record = run_pipeline(
        release.pipeline.declaration(),
        4,
        &SourceRevision::new("abc"),
        &executor,
        &cancellation,
    );

    assert_eq!(
        record.status,
        ExecutionStatus::Stopped {
            before_stage: DEPLOY_DEV_STAGE.to_string(),
        }
    );
    assert_eq!(record.entered_stages(), vec![SOURCE_STAGE, BUILD_STAGE]);
    let expected: Vec<(String, String)> = [
        (SOURCE_STAGE, SOURCE_ACTION),
        (BUILD_STAGE, FUNCTION_BUILD_ACTION),
        (BUILD_STAGE, TEMPLATE_BUILD_ACTION),
    ]
    .iter()
    .map(|(stage, action)| (stage.to_string(), action.to_string()))
    .collect();
    assert_eq!(executor.inner.calls(), expected);
}

#[test]
fn rejected_approval_blocks_prod_deploy() {
    let release = assembly(&gated_config());
    let executor = RecordingExecutor::failing(&[APPROVAL_ACTION]);
    let record = run_pipeline(
        release.pipeline.declaration(),
        1,
        &SourceRevision::new("abc"),
        &executor,
        &CancellationFlag::new(),
    );

    assert_eq!(executor.calls_in(DEPLOY_PROD_STAGE), vec![APPROVAL_ACTION]);
    assert!(matches!(
        record.status,
        ExecutionStatus::Failed { ref stage, .. } if stage == DEPLOY_PROD_STAGE
    ));
    let prod = record.stage(DEPLOY_PROD_STAGE).expect("prod stage entered");
    assert_eq!(prod.actions.len(), 1);
}
