use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use scriptbatch_capture::{CaptureOptions, FileBundle};
use scriptbatch_core::{
    BatchError, BatchResult, Bind, ContainerExecutor, ContainerSpec, LimitsConfig, RetryConfig,
    ScriptEngine, ScriptRecord,
};

use crate::classify::{classify_exit, ExecutionClass};
use crate::results::ResultLayout;

/// 一个批次的执行请求
///
/// 同一批次的脚本共享可变状态（共享的包安装、共享环境快照、
/// 共享工作目录），脚本间的依赖无法静态得知。
#[derive(Debug)]
pub struct BatchRequest {
    pub batch_id: Uuid,
    /// 已检出的代码目录，以读写方式绑定进每个容器
    pub code_dir: PathBuf,
    /// 相对于代码目录的脚本路径集合
    pub scripts: Vec<PathBuf>,
    pub engine: ScriptEngine,
    pub image: String,
    /// 任何脚本尝试之前执行的共享状态初始化命令；失败立刻中止批次
    pub env_setup_command: Option<Vec<String>>,
    /// 共享环境快照所在目录，以读写方式绑定进每个容器
    pub shared_dir: Option<PathBuf>,
    /// 结果目录：每脚本子目录与批次清单写在这里
    pub results_dir: PathBuf,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub capture: CaptureOptions,
}

/// 批次结束时的脚本集合划分
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// 首次尝试即成功
    pub succeeded: Vec<PathBuf>,
    /// 首次尝试即终局失败（含超时）
    pub failed: Vec<PathBuf>,
    /// 重试后最终成功
    pub retried_then_succeeded: Vec<PathBuf>,
    /// 经历重试但最终未成功
    pub retried_then_failed: Vec<PathBuf>,
    /// 从未被尝试
    pub never_attempted: Vec<PathBuf>,
    /// 每个脚本的最终结局类别
    pub final_classes: BTreeMap<PathBuf, ExecutionClass>,
}

/// 一个批次的完整执行结果
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    /// 全部尝试的记录，按发生顺序；同一脚本可能出现多次
    pub records: Vec<ScriptRecord>,
    /// 发现的执行顺序：各脚本按最后一次尝试的先后排列
    pub order: Vec<PathBuf>,
    /// 实际执行的轮数
    pub rounds: usize,
    pub report: BatchReport,
    /// 结果目录的内容寻址快照
    pub outputs: FileBundle,
}

/// 不动点重试调度器
///
/// 对一组初始独立的脚本反复执行，直到不再有新的成功，
/// 从而在没有依赖图的情况下隐式发现一个可行的执行顺序。
/// `pending` 集合每轮严格不增，批次有限，循环必然终止；
/// 最坏情况是 n 个脚本 O(n²) 次容器启动。
pub struct ScriptBatchScheduler<E> {
    executor: E,
}

impl<E: ContainerExecutor> ScriptBatchScheduler<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// 执行一个批次直至收敛
    ///
    /// 返回 `Err` 仅当执行基础设施本身故障（容器引擎不可达、
    /// 初始化失败等）；脚本失败是数据，体现在结果里。
    pub async fn run_batch(&self, request: &BatchRequest) -> BatchResult<BatchOutcome> {
        let mut scripts = request.scripts.clone();
        scripts.sort();
        scripts.dedup();

        let layout = ResultLayout::new(&request.results_dir);
        std::fs::create_dir_all(&request.results_dir)?;

        self.establish_shared_state(request).await?;

        let mut pending = scripts.clone();
        let mut records: Vec<ScriptRecord> = Vec::new();
        let mut attempts: BTreeMap<PathBuf, usize> = BTreeMap::new();
        let mut final_classes: BTreeMap<PathBuf, ExecutionClass> = BTreeMap::new();
        let mut order_index = 0usize;
        let mut rounds = 0usize;

        while !pending.is_empty() {
            rounds += 1;
            let mut still_pending = Vec::new();
            let mut new_successes = 0usize;

            for script in &pending {
                let spec = self.script_spec(request, script);
                let container = self.executor.run(&spec).await?;
                let class = classify_exit(container.exit_code(), &request.retry);
                let result_dir = layout.write_attempt(script, &container)?;

                info!(
                    batch = %request.batch_id,
                    script = %script.display(),
                    round = rounds,
                    exit_code = container.exit_code(),
                    class = ?class,
                    "脚本尝试结束"
                );

                records.push(ScriptRecord {
                    script: script.clone(),
                    result_dir,
                    container,
                    order_index,
                    round: rounds,
                });
                order_index += 1;
                *attempts.entry(script.clone()).or_insert(0) += 1;
                final_classes.insert(script.clone(), class);

                match class {
                    ExecutionClass::Success => new_successes += 1,
                    ExecutionClass::RetryableSetup if request.retry.fixpoint_enabled => {
                        still_pending.push(script.clone());
                    }
                    _ => {}
                }
            }

            pending = still_pending;
            if !request.retry.fixpoint_enabled {
                break;
            }
            if new_successes == 0 {
                break;
            }
            if rounds >= request.retry.max_rounds {
                warn!(
                    batch = %request.batch_id,
                    rounds,
                    remaining = pending.len(),
                    "达到最大轮数上限，停止重试"
                );
                break;
            }
        }

        layout.write_manifest(&scripts)?;
        let outputs = FileBundle::from_dir(&request.results_dir, &request.capture)
            .map_err(|e| BatchError::Capture(e.to_string()))?;

        let report = build_report(&scripts, &attempts, &final_classes);
        let order = discovered_order(&records);

        info!(
            batch = %request.batch_id,
            rounds,
            attempts = records.len(),
            succeeded = report.succeeded.len() + report.retried_then_succeeded.len(),
            "批次执行结束"
        );

        Ok(BatchOutcome {
            batch_id: request.batch_id,
            records,
            order,
            rounds,
            report,
            outputs,
        })
    }

    /// 在任何脚本尝试之前建立共享状态
    ///
    /// 初始化失败对整个批次是致命的，不做重试。
    async fn establish_shared_state(&self, request: &BatchRequest) -> BatchResult<()> {
        let Some(command) = &request.env_setup_command else {
            return Ok(());
        };
        let spec = ContainerSpec {
            command: command.clone(),
            ..self.base_spec(request)
        };
        let container = self.executor.run(&spec).await?;
        if container.exit_code() != 0 {
            return Err(BatchError::SetupFailed {
                exit_code: container.exit_code(),
            });
        }
        Ok(())
    }

    fn base_spec(&self, request: &BatchRequest) -> ContainerSpec {
        let mut readwrite_binds = vec![Bind::same(&request.code_dir)];
        if let Some(shared) = &request.shared_dir {
            readwrite_binds.push(Bind::same(shared));
        }
        ContainerSpec {
            image: request.image.clone(),
            command: Vec::new(),
            wall_time_limit: request.limits.wall_time_limit(),
            kill_after: request.limits.kill_after(),
            memory_limit: request.limits.memory_bytes,
            cpus: request.limits.cpus,
            readonly_binds: Vec::new(),
            readwrite_binds,
        }
    }

    fn script_spec(&self, request: &BatchRequest, script: &PathBuf) -> ContainerSpec {
        let script_path = request.code_dir.join(script);
        ContainerSpec {
            command: request.engine.script_command(&script_path),
            ..self.base_spec(request)
        }
    }
}

fn build_report(
    scripts: &[PathBuf],
    attempts: &BTreeMap<PathBuf, usize>,
    final_classes: &BTreeMap<PathBuf, ExecutionClass>,
) -> BatchReport {
    let mut report = BatchReport {
        final_classes: final_classes.clone(),
        ..BatchReport::default()
    };
    for script in scripts {
        let count = attempts.get(script).copied().unwrap_or(0);
        if count == 0 {
            report.never_attempted.push(script.clone());
            continue;
        }
        let succeeded = matches!(final_classes.get(script), Some(ExecutionClass::Success));
        match (succeeded, count) {
            (true, 1) => report.succeeded.push(script.clone()),
            (true, _) => report.retried_then_succeeded.push(script.clone()),
            (false, 1) => report.failed.push(script.clone()),
            (false, _) => report.retried_then_failed.push(script.clone()),
        }
    }
    report
}

/// 发现顺序：各脚本按其最后一次尝试在全序中的位置排列
fn discovered_order(records: &[ScriptRecord]) -> Vec<PathBuf> {
    let mut last_position: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for record in records {
        last_position.insert(record.script.clone(), record.order_index);
    }
    let mut ordered: Vec<(usize, PathBuf)> = last_position
        .into_iter()
        .map(|(script, index)| (index, script))
        .collect();
    ordered.sort();
    ordered.into_iter().map(|(_, script)| script).collect()
}
