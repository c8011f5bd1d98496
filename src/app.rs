//! 应用装配
//!
//! 读取代码库登记表，逐个代码库执行批次并流式输出结果；
//! 进程退出码只反映基础设施故障，脚本成败属于结果数据。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use scriptbatch_capture::{ArtifactStore, CaptureMode, CaptureOptions, HashAlgo};
use scriptbatch_core::{AppConfig, CodeCheckout, Machine, ScriptEngine};
use scriptbatch_runner::ContainerRunner;
use scriptbatch_scheduler::{BatchRequest, ExecutionClass, ScriptBatchScheduler};

use crate::checkout::{GitCliCheckout, LocalDirCheckout};

/// 登记表中的一个代码库条目
#[derive(Debug, Clone, Deserialize)]
pub struct CodebaseEntry {
    pub name: String,
    /// 本地目录来源
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// git仓库来源
    #[serde(default)]
    pub git: Option<String>,
    /// 期望的修订指纹，不匹配即中止
    #[serde(default)]
    pub rev: Option<String>,
    /// 覆盖默认脚本引擎
    #[serde(default)]
    pub engine: Option<ScriptEngine>,
    /// 覆盖默认镜像
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Registry {
    #[serde(rename = "codebase")]
    codebases: Vec<CodebaseEntry>,
}

/// 读取TOML登记表
pub fn load_registry(path: &Path) -> Result<Vec<CodebaseEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取登记表失败: {}", path.display()))?;
    let registry: Registry =
        toml::from_str(&text).with_context(|| format!("解析登记表失败: {}", path.display()))?;
    Ok(registry.codebases)
}

/// 一次运行的输入
#[derive(Debug)]
pub struct RunPlan {
    pub codebases: Vec<CodebaseEntry>,
    pub default_engine: ScriptEngine,
    pub default_image: String,
    pub results_root: PathBuf,
    /// 每个批次开始前的共享环境初始化命令
    pub env_setup_command: Option<Vec<String>>,
}

/// 单个代码库的流式结果行
#[derive(Debug, Serialize)]
pub struct CodebaseSummary {
    pub name: String,
    pub batch_id: Uuid,
    pub rounds: usize,
    pub scripts_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retried_then_succeeded: usize,
    pub retried_then_failed: usize,
    pub never_attempted: usize,
    pub order: Vec<PathBuf>,
    pub final_classes: BTreeMap<PathBuf, ExecutionClass>,
    pub outputs_size: u64,
    pub outputs_files: usize,
}

/// 整次运行的汇总报告
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub machine: Machine,
    pub generated_at: DateTime<Utc>,
    pub codebases: Vec<CodebaseSummary>,
}

pub struct Application {
    config: AppConfig,
    machine: Machine,
}

impl Application {
    pub fn new(config: AppConfig, machine: Machine) -> Self {
        Self { config, machine }
    }

    /// 执行整个运行计划
    ///
    /// 任一代码库上的基础设施故障会中止整次运行并向上传播；
    /// 单个脚本的失败只体现在报告里。
    pub async fn run(&self, plan: &RunPlan) -> Result<RunSummary> {
        info!(
            hostname = %self.machine.hostname,
            os = %self.machine.os,
            arch = %self.machine.arch,
            cpus = self.machine.cpu_count,
            codebases = plan.codebases.len(),
            "开始批量执行"
        );

        let executor = ContainerRunner::new(&self.config.engine);
        let scheduler = ScriptBatchScheduler::new(executor);
        let mut summaries = Vec::new();

        for entry in &plan.codebases {
            let summary = self
                .run_codebase(&scheduler, plan, entry)
                .await
                .with_context(|| format!("代码库执行失败: {}", entry.name))?;

            // 每完成一个代码库输出一行JSON，供下游流式消费
            println!("{}", serde_json::to_string(&summary)?);
            summaries.push(summary);
        }

        let summary = RunSummary {
            machine: self.machine.clone(),
            generated_at: Utc::now(),
            codebases: summaries,
        };
        let report_path = plan.results_root.join("report.json");
        std::fs::write(&report_path, serde_json::to_vec_pretty(&summary)?)
            .with_context(|| format!("写入报告失败: {}", report_path.display()))?;
        info!(report = %report_path.display(), "批量执行结束");
        Ok(summary)
    }

    async fn run_codebase(
        &self,
        scheduler: &ScriptBatchScheduler<ContainerRunner>,
        plan: &RunPlan,
        entry: &CodebaseEntry,
    ) -> Result<CodebaseSummary> {
        let engine = entry.engine.unwrap_or(plan.default_engine);
        let image = entry
            .image
            .clone()
            .unwrap_or_else(|| plan.default_image.clone());

        let codebase_root = plan.results_root.join(&entry.name);
        let code_dir = codebase_root.join("code");
        let results_dir = codebase_root.join("results");
        std::fs::create_dir_all(&codebase_root)?;

        self.checkout(entry, &code_dir).await?;

        let scripts = engine
            .discover(&code_dir)
            .with_context(|| format!("枚举脚本失败: {}", code_dir.display()))?;
        info!(
            codebase = %entry.name,
            engine = %engine,
            scripts = scripts.len(),
            "代码检出完成"
        );

        let request = BatchRequest {
            batch_id: Uuid::new_v4(),
            code_dir: std::fs::canonicalize(&code_dir)?,
            scripts,
            engine,
            image,
            env_setup_command: plan.env_setup_command.clone(),
            shared_dir: None,
            results_dir,
            limits: self.config.limits.clone(),
            retry: self.config.retry.clone(),
            capture: self.capture_options()?,
        };

        let outcome = scheduler.run_batch(&request).await?;
        let report = &outcome.report;
        Ok(CodebaseSummary {
            name: entry.name.clone(),
            batch_id: outcome.batch_id,
            rounds: outcome.rounds,
            scripts_total: report.final_classes.len() + report.never_attempted.len(),
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
            retried_then_succeeded: report.retried_then_succeeded.len(),
            retried_then_failed: report.retried_then_failed.len(),
            never_attempted: report.never_attempted.len(),
            order: outcome.order.clone(),
            final_classes: report.final_classes.clone(),
            outputs_size: outcome.outputs.size(),
            outputs_files: outcome.outputs.files.len(),
        })
    }

    async fn checkout(&self, entry: &CodebaseEntry, code_dir: &Path) -> Result<()> {
        match (&entry.path, &entry.git) {
            (Some(path), None) => LocalDirCheckout::new(path)
                .checkout(code_dir)
                .await
                .map_err(Into::into),
            (None, Some(url)) => GitCliCheckout::new(url, entry.rev.clone())
                .checkout(code_dir)
                .await
                .map_err(Into::into),
            _ => {
                error!(codebase = %entry.name, "代码库必须恰好给出 path 或 git 之一");
                anyhow::bail!("代码库 {} 缺少有效来源", entry.name)
            }
        }
    }

    fn capture_options(&self) -> Result<CaptureOptions> {
        let mode = match &self.config.capture.store_dir {
            Some(store_dir) => CaptureMode::Relocate {
                store: ArtifactStore::new(store_dir)
                    .map_err(|e| anyhow::anyhow!("初始化产物存储失败: {e}"))?,
            },
            None => CaptureMode::InMemory {
                inline_limit: Some(self.config.capture.inline_limit_bytes),
            },
        };
        Ok(CaptureOptions {
            mode,
            hash_algo: HashAlgo::Xxh64,
            archive: self.config.capture.archive,
        })
    }
}
