//! 不动点调度器的行为测试
//!
//! 用有状态的桩执行器模拟"后一个脚本依赖前一个脚本副作用"的批次，
//! 不需要真实容器引擎。

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use scriptbatch_capture::CaptureOptions;
use scriptbatch_core::{
    BatchError, BatchResult, CompletedContainer, CompletedProcess, ComputeResource,
    ContainerExecutor, ContainerSpec, LimitsConfig, RetryConfig, ScriptEngine,
};
use scriptbatch_scheduler::{BatchRequest, ExecutionClass, ScriptBatchScheduler};

/// 有状态的桩执行器
///
/// 按脚本文件名决定退出码；"写共享状态"用内存中的标记集合模拟。
struct FakeExecutor {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    shared_markers: HashSet<String>,
    calls: Vec<String>,
}

impl FakeExecutor {
    fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ContainerExecutor for FakeExecutor {
    async fn run(&self, spec: &ContainerSpec) -> BatchResult<CompletedContainer> {
        let script = spec.command.last().cloned().unwrap_or_default();
        let name = Path::new(&script)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("")
            .to_string();

        let mut state = self.state.lock().unwrap();
        state.calls.push(name.clone());

        let exit_code = match name.as_str() {
            "engine-down" => {
                return Err(BatchError::ContainerEngine("容器引擎不可达".to_string()))
            }
            "setup-fail" => 1,
            "writes-shared" => {
                state.shared_markers.insert("shared-file".to_string());
                0
            }
            "needs-shared" => {
                if state.shared_markers.contains("shared-file") {
                    0
                } else {
                    75
                }
            }
            "always-transient" => 75,
            "times-out" => 124,
            "plain-failure" => 1,
            // revchain_i 依赖 revchain_{i+1} 的副作用，revchain4 是链底；
            // 与轮内的字典序相反，保证每轮恰好解锁一个脚本
            name if name.starts_with("revchain") => {
                let index: usize = name.trim_start_matches("revchain").parse().unwrap();
                let unlocked = index == 4
                    || state
                        .shared_markers
                        .contains(&format!("revchain{}", index + 1));
                if unlocked {
                    state.shared_markers.insert(name.to_string());
                    0
                } else {
                    75
                }
            }
            _ => 0,
        };

        Ok(make_container(spec, exit_code))
    }
}

fn make_container(spec: &ContainerSpec, exit_code: i32) -> CompletedContainer {
    CompletedContainer {
        image: spec.image.clone(),
        docker_command: format!("docker run --rm {} ...", spec.image),
        proc: CompletedProcess {
            command: spec.command.clone(),
            env: BTreeMap::new(),
            cwd: PathBuf::from("/"),
            resource: ComputeResource::zeroed(),
            exit_code,
            start: Utc::now(),
            stdout: format!("stdout of {exit_code}").into_bytes(),
            stderr: Vec::new(),
        },
    }
}

fn request(code_dir: &Path, results_dir: &Path, scripts: &[&str]) -> BatchRequest {
    BatchRequest {
        batch_id: Uuid::new_v4(),
        code_dir: code_dir.to_path_buf(),
        scripts: scripts.iter().map(PathBuf::from).collect(),
        engine: ScriptEngine::RScript,
        image: "r-runner:test".to_string(),
        env_setup_command: None,
        shared_dir: None,
        results_dir: results_dir.to_path_buf(),
        limits: LimitsConfig {
            wall_time_seconds: 60,
            kill_after_seconds: 5,
            memory_bytes: 1024 * 1024 * 1024,
            cpus: 1.0,
        },
        retry: RetryConfig {
            fixpoint_enabled: true,
            max_rounds: 10,
            retryable_exit_codes: vec![75],
        },
        capture: CaptureOptions::default(),
    }
}

#[tokio::test]
async fn test_fixpoint_discovers_dependency_order() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    // "needs-shared" 只有在 "writes-shared" 留下副作用之后才能成功；
    // 排序后的轮内顺序里 needs-shared 先于 writes-shared，第1轮必然失败
    let req = request(
        code.path(),
        results.path(),
        &["writes-shared.R", "needs-shared.R", "zz-other.R"],
    );

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let outcome = scheduler.run_batch(&req).await.unwrap();

    // 记录序列: needs-shared(失败), writes-shared(成功), zz-other(成功), needs-shared(成功)
    assert_eq!(
        scheduler.executor().calls(),
        vec![
            "needs-shared".to_string(),
            "writes-shared".to_string(),
            "zz-other".to_string(),
            "needs-shared".to_string(),
        ]
    );
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.records.len(), 4);

    // 最终顺序按最后一次尝试排列: writes-shared, zz-other, needs-shared
    assert_eq!(
        outcome.order,
        vec![
            PathBuf::from("writes-shared.R"),
            PathBuf::from("zz-other.R"),
            PathBuf::from("needs-shared.R"),
        ]
    );
    assert_eq!(
        outcome.report.retried_then_succeeded,
        vec![PathBuf::from("needs-shared.R")]
    );
    assert_eq!(
        outcome.report.final_classes[Path::new("needs-shared.R")],
        ExecutionClass::Success
    );
}

#[tokio::test]
async fn test_single_pass_mode_never_retries() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let mut req = request(
        code.path(),
        results.path(),
        &["writes-shared.R", "needs-shared.R"],
    );
    req.retry.fixpoint_enabled = false;

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let outcome = scheduler.run_batch(&req).await.unwrap();

    // 每个脚本恰好一次尝试，没有不动点迭代
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(
        outcome.report.final_classes[Path::new("needs-shared.R")],
        ExecutionClass::RetryableSetup
    );
    assert!(outcome.report.retried_then_succeeded.is_empty());
}

#[tokio::test]
async fn test_pending_set_is_monotonic_and_rounds_bounded() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    // 依赖方向与轮内顺序相反的4脚本链，每轮恰好解锁一个
    let req = request(
        code.path(),
        results.path(),
        &["revchain1.R", "revchain2.R", "revchain3.R", "revchain4.R"],
    );

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let outcome = scheduler.run_batch(&req).await.unwrap();

    // n个脚本最多n轮收敛
    assert!(outcome.rounds <= 4);
    assert_eq!(
        outcome.report.succeeded.len() + outcome.report.retried_then_succeeded.len(),
        4
    );

    // 每轮尝试的脚本数严格不增
    let mut per_round: BTreeMap<usize, usize> = BTreeMap::new();
    for record in &outcome.records {
        *per_round.entry(record.round).or_insert(0) += 1;
    }
    let counts: Vec<usize> = per_round.values().copied().collect();
    assert!(counts.windows(2).all(|pair| pair[1] <= pair[0]));
}

#[tokio::test]
async fn test_max_rounds_caps_oscillation() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let mut req = request(
        code.path(),
        results.path(),
        &["revchain1.R", "revchain2.R", "revchain3.R", "revchain4.R"],
    );
    req.retry.max_rounds = 2;

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let outcome = scheduler.run_batch(&req).await.unwrap();

    assert_eq!(outcome.rounds, 2);
    // 上限截断后，链尾脚本仍处于未成功状态
    assert_eq!(outcome.report.retried_then_failed.len(), 2);
}

#[tokio::test]
async fn test_terminal_failures_are_not_retried() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let req = request(
        code.path(),
        results.path(),
        &["times-out.R", "plain-failure.R", "always-transient.R"],
    );

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let outcome = scheduler.run_batch(&req).await.unwrap();

    // 第1轮没有任何成功，循环立即终止: 超时与普通失败不进入重试
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(
        outcome.report.final_classes[Path::new("times-out.R")],
        ExecutionClass::TimedOut
    );
    assert_eq!(
        outcome.report.final_classes[Path::new("plain-failure.R")],
        ExecutionClass::Failure
    );
    assert_eq!(
        outcome.report.final_classes[Path::new("always-transient.R")],
        ExecutionClass::RetryableSetup
    );
}

#[tokio::test]
async fn test_infrastructure_fault_aborts_batch() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let req = request(
        code.path(),
        results.path(),
        &["aa-ok.R", "engine-down.R", "zz-never-reached.R"],
    );

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let result = scheduler.run_batch(&req).await;

    assert!(matches!(result, Err(BatchError::ContainerEngine(_))));
}

#[tokio::test]
async fn test_setup_failure_is_fatal() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let mut req = request(code.path(), results.path(), &["a.R"]);
    req.env_setup_command = Some(vec!["setup-fail".to_string()]);

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let result = scheduler.run_batch(&req).await;

    assert!(matches!(
        result,
        Err(BatchError::SetupFailed { exit_code: 1 })
    ));
}

#[tokio::test]
async fn test_setup_runs_before_any_script() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let mut req = request(code.path(), results.path(), &["a.R"]);
    req.env_setup_command = Some(vec!["init-env".to_string()]);

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    scheduler.run_batch(&req).await.unwrap();
    let calls = scheduler.executor().calls();

    assert_eq!(calls, vec!["init-env".to_string(), "a".to_string()]);
}

#[tokio::test]
async fn test_result_layout_and_manifest_are_written() {
    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let req = request(code.path(), results.path(), &["sub/a.R"]);

    let scheduler = ScriptBatchScheduler::new(FakeExecutor::new());
    let outcome = scheduler.run_batch(&req).await.unwrap();

    // 结果目录与清单在捕获之前写入，快照里能看到它们
    assert!(outcome.outputs.files.contains_key(Path::new("index")));
    assert!(outcome
        .outputs
        .files
        .contains_key(Path::new("sub%2Fa.R/exit_code")));
    assert_eq!(
        outcome.outputs.files[Path::new("sub%2Fa.R/exit_code")].size,
        2
    );
}

#[tokio::test]
async fn test_empty_batch_never_touches_executor() {
    // mockall桩上不设任何期望，任何调用都会panic
    mockall::mock! {
        Engine {}

        #[async_trait]
        impl ContainerExecutor for Engine {
            async fn run(&self, spec: &ContainerSpec) -> BatchResult<CompletedContainer>;
        }
    }

    let code = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let req = request(code.path(), results.path(), &[]);

    let scheduler = ScriptBatchScheduler::new(MockEngine::new());
    let outcome = scheduler.run_batch(&req).await.unwrap();

    assert!(outcome.records.is_empty());
    assert!(outcome.order.is_empty());
    assert!(outcome.report.final_classes.is_empty());
}
