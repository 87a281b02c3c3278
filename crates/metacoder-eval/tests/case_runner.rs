//! Case runner state machine: phases, lock balance, timeouts, layouts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metacoder_core::coder::OpencodeAssistant;
use metacoder_core::{
    CliCoder, CoderIdentity, DummyCoder, DummyScript, EvalCase, ExtensionCollection,
    ExtensionSpec, InvocationError, LockConfig, ModelSpec, LOCK_FILE_NAME,
};
use metacoder_eval::{
    AbortCause, CaseRunner, CaseRunnerConfig, MetricEngine, OutcomeStatus, Phase, WorkdirLayout,
};
use tokio_util::sync::CancellationToken;

fn lock(wait_budget_ms: u64) -> LockConfig {
    LockConfig {
        wait_budget_ms,
        poll_interval_ms: 5,
        stale_after_ms: 600_000,
    }
}

fn runner(layout: WorkdirLayout, timeout_ms: u64) -> CaseRunner {
    let config = CaseRunnerConfig::new(layout)
        .with_invocation_timeout_ms(timeout_ms)
        .with_lock(lock(5_000));
    CaseRunner::new(config, Arc::new(MetricEngine::with_builtins()))
}

fn model() -> ModelSpec {
    ModelSpec::new("echo-1", "local")
}

fn arith() -> EvalCase {
    EvalCase::new("arith", "What is 2+2?")
        .expecting("4")
        .with_metric("exact_match")
        .with_metric("execution_success")
}

fn answering_four() -> DummyCoder {
    DummyCoder::new().with_default_script(DummyScript::replying("4"))
}

#[tokio::test]
async fn scored_run_walks_every_phase() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Reused {
            root: root.path().to_path_buf(),
        },
        5_000,
    );

    let outcome = runner
        .run(
            &answering_four(),
            &model(),
            &arith(),
            &ExtensionCollection::new(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Scored);
    assert!(outcome.passed());
    assert_eq!(
        outcome.phases,
        vec![
            Phase::Prepare,
            Phase::Locked,
            Phase::Invoking,
            Phase::Scoring,
            Phase::Done
        ]
    );
    assert_eq!(outcome.metrics.len(), 2);
    let dir = outcome.working_dir.clone().unwrap();
    assert_eq!(dir, root.path().join("dummy/local_echo-1/arith"));
    assert!(dir.is_dir());
    assert!(!dir.join(LOCK_FILE_NAME).exists());
}

#[tokio::test]
async fn acquire_and_release_balance_on_every_path() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Reused {
            root: root.path().to_path_buf(),
        },
        50,
    );
    let cancel = CancellationToken::new();
    let slow = DummyCoder::new().with_default_script(DummyScript::replying("4").with_delay_ms(5_000));
    let failing = DummyCoder::new().with_default_script(DummyScript::default().failing(
        InvocationError::NonZeroExit {
            code: Some(2),
            stderr_tail: "boom".into(),
        },
    ));

    runner
        .run(&answering_four(), &model(), &arith(), &ExtensionCollection::new(), &cancel)
        .await;
    runner
        .run(&slow, &model(), &arith(), &ExtensionCollection::new(), &cancel)
        .await;
    runner
        .run(&failing, &model(), &arith(), &ExtensionCollection::new(), &cancel)
        .await;

    let metrics = runner.locker().metrics();
    assert_eq!(metrics.acquired(), 3);
    assert_eq!(metrics.released(), 3);
    assert_eq!(metrics.outstanding(), 0);
}

#[tokio::test]
async fn invocation_timeout_still_scores_and_aborts() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Reused {
            root: root.path().to_path_buf(),
        },
        50,
    );
    let slow = DummyCoder::new().with_default_script(DummyScript::replying("4").with_delay_ms(5_000));

    let outcome = runner
        .run(
            &slow,
            &model(),
            &arith(),
            &ExtensionCollection::new(),
            &CancellationToken::new(),
        )
        .await;

    match outcome.abort_cause() {
        Some(AbortCause::Invocation {
            error: InvocationError::Timeout { limit_ms },
        }) => assert_eq!(*limit_ms, 50),
        other => panic!("unexpected cause {:?}", other),
    }
    assert_eq!(outcome.phases.last(), Some(&Phase::Aborted));
    assert!(outcome.phases.contains(&Phase::Scoring));
    assert_eq!(outcome.metrics.len(), 2);
    assert!(outcome.metrics.iter().all(|m| !m.passed));
}

#[tokio::test]
async fn shared_directory_serializes_concurrent_runs() {
    let shared = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Shared {
            path: shared.path().to_path_buf(),
        },
        5_000,
    );
    let coder = DummyCoder::new().with_default_script(DummyScript::replying("4").with_delay_ms(150));
    let first = EvalCase::new("first", "a").with_metric("execution_success");
    let second = EvalCase::new("second", "b").with_metric("execution_success");
    let extensions = ExtensionCollection::new();
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let model_a = model();
    let model_b = model();
    let (a, b) = tokio::join!(
        runner.run(&coder, &model_a, &first, &extensions, &cancel),
        runner.run(&coder, &model_b, &second, &extensions, &cancel),
    );
    let elapsed = started.elapsed();

    assert!(a.is_scored() && b.is_scored());
    assert!(
        elapsed >= Duration::from_millis(300),
        "runs overlapped: {:?}",
        elapsed
    );
    assert_eq!(runner.locker().metrics().acquired(), 2);
}

#[tokio::test]
async fn unsupported_extensions_take_no_lock() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Reused {
            root: root.path().to_path_buf(),
        },
        5_000,
    );
    let opencode = CliCoder::new(OpencodeAssistant);
    let plan_extensions = ExtensionCollection::new().with(ExtensionSpec::stdio(
        "fs",
        "npx",
        vec!["@modelcontextprotocol/server-filesystem".into()],
    ));

    let outcome = runner
        .run(
            &opencode,
            &model(),
            &arith(),
            &plan_extensions,
            &CancellationToken::new(),
        )
        .await;

    assert!(outcome.is_unsupported());
    assert_eq!(outcome.coder, CoderIdentity::Opencode);
    assert_eq!(outcome.phases, vec![Phase::Prepare, Phase::Done]);
    assert_eq!(outcome.metrics.len(), 2);
    assert_eq!(runner.locker().metrics().acquired(), 0);
    assert!(outcome.working_dir.is_none());
}

#[tokio::test]
async fn missing_capability_is_unsupported() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Reused {
            root: root.path().to_path_buf(),
        },
        5_000,
    );
    let case = arith().requiring("cost");

    let outcome = runner
        .run(
            &answering_four(),
            &model(),
            &case,
            &ExtensionCollection::new(),
            &CancellationToken::new(),
        )
        .await;

    match &outcome.status {
        OutcomeStatus::Unsupported { reason } => assert!(reason.contains("cost")),
        other => panic!("unexpected status {:?}", other),
    }
}

#[tokio::test]
async fn held_lock_times_out() {
    let shared = tempfile::tempdir().unwrap();
    let config = CaseRunnerConfig::new(WorkdirLayout::Shared {
        path: shared.path().to_path_buf(),
    })
    .with_lock(lock(0));
    let runner = CaseRunner::new(config, Arc::new(MetricEngine::with_builtins()));

    let _held = runner.locker().acquire(shared.path()).await.unwrap();
    let coder = answering_four();
    let outcome = runner
        .run(
            &coder,
            &model(),
            &arith(),
            &ExtensionCollection::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome.abort_cause(),
        Some(AbortCause::LockTimeout { .. })
    ));
    assert_eq!(outcome.phases, vec![Phase::Prepare, Phase::Aborted]);
    assert_eq!(coder.invocations(), 0);
    assert_eq!(runner.locker().metrics().timed_out(), 1);
}

#[tokio::test]
async fn fresh_directories_are_removed_unless_kept() {
    let root = tempfile::tempdir().unwrap();
    let layout = WorkdirLayout::Fresh {
        root: root.path().to_path_buf(),
    };
    let engine = Arc::new(MetricEngine::with_builtins());
    let extensions = ExtensionCollection::new();
    let cancel = CancellationToken::new();

    let removing = CaseRunner::new(CaseRunnerConfig::new(layout.clone()), engine.clone());
    let outcome = removing
        .run(&answering_four(), &model(), &arith(), &extensions, &cancel)
        .await;
    assert!(outcome.is_scored());
    assert!(!outcome.working_dir.unwrap().exists());

    let keeping = CaseRunner::new(CaseRunnerConfig::new(layout).keeping_workdirs(), engine);
    let outcome = keeping
        .run(&answering_four(), &model(), &arith(), &extensions, &cancel)
        .await;
    assert!(outcome.working_dir.unwrap().is_dir());
}

#[tokio::test]
async fn cancelled_invocation_releases_lock() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Reused {
            root: root.path().to_path_buf(),
        },
        10_000,
    );
    let slow = DummyCoder::new().with_default_script(DummyScript::replying("4").with_delay_ms(10_000));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = runner
        .run(&slow, &model(), &arith(), &ExtensionCollection::new(), &cancel)
        .await;

    assert_eq!(outcome.abort_cause(), Some(&AbortCause::Cancelled));
    assert!(!outcome.phases.contains(&Phase::Scoring));
    assert!(outcome.metrics.iter().all(|m| !m.passed));
    assert_eq!(runner.locker().metrics().outstanding(), 0);
}

#[tokio::test]
async fn prompt_template_reaches_the_coder() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(
        WorkdirLayout::Reused {
            root: root.path().to_path_buf(),
        },
        5_000,
    );
    let coder = DummyCoder::new()
        .with_script_for("Answer with a digit: What is 2+2?", DummyScript::replying("4"));
    let case = arith().with_prompt_template("Answer with a digit: {input_text}");

    let outcome = runner
        .run(
            &coder,
            &model(),
            &case,
            &ExtensionCollection::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(outcome.is_scored());
    assert!(outcome.passed());
}
