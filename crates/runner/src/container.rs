use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rand::{distr::Alphanumeric, Rng};
use scriptbatch_core::{
    BatchError, BatchResult, CommandSpec, CompletedContainer, CompletedProcess, ContainerExecutor,
    ContainerSpec, EngineConfig,
};
use tracing::{debug, warn};

use crate::accounting::ResourceAccounting;
use crate::command::CommandRunner;

/// 容器执行器
///
/// 每次调用新建一个容器：把用户命令包进宿主侧的测量与超时包装，
/// 分离启动后等待完成，随后在所有退出路径上强制移除容器。
/// 临时目录保存stdout/stderr捕获文件与资源记账文件，
/// 除非配置了 `keep_scratch`，结果提取完成后即被删除。
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    binary: String,
    keep_scratch: bool,
    runner: CommandRunner,
}

impl ContainerRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            keep_scratch: config.keep_scratch,
            runner: CommandRunner::new(),
        }
    }

    async fn run_container(&self, spec: &ContainerSpec) -> BatchResult<CompletedContainer> {
        if spec.command.is_empty() {
            return Err(BatchError::InvalidParams("容器命令不能为空".to_string()));
        }

        let scratch = tempfile::Builder::new()
            .prefix("scriptbatch-")
            .tempdir()?;
        let scratch_path = std::fs::canonicalize(scratch.path())?;
        write_wrapper(&scratch_path, spec)?;

        let binds = merged_binds(spec, &scratch_path);
        let name = container_name();
        let run_args = self.run_args(spec, &binds, &name, &scratch_path);
        let start = Utc::now();

        let outcome = match self.launch(&run_args).await {
            Ok(()) => self.wait_container(&name).await,
            Err(e) => Err(e),
        };
        // 即使启动或等待失败，也要移除引擎可能已创建的容器对象
        self.remove_container(&name).await;
        outcome?;

        let stdout = std::fs::read(scratch_path.join("stdout")).unwrap_or_default();
        let stderr = std::fs::read(scratch_path.join("stderr")).unwrap_or_default();
        let accounting = read_accounting(&scratch_path);

        if self.keep_scratch {
            let kept = scratch.keep();
            debug!(scratch = %kept.display(), "保留临时目录供检查");
        }

        let docker_command = render_engine_command(&self.binary, spec, &binds);
        Ok(CompletedContainer {
            image: spec.image.clone(),
            docker_command,
            proc: CompletedProcess {
                command: spec.command.clone(),
                env: BTreeMap::new(),
                cwd: PathBuf::from("/"),
                exit_code: accounting.exit_code,
                resource: accounting.into_resource(),
                start,
                stdout,
                stderr,
            },
        })
    }

    fn run_args(
        &self,
        spec: &ContainerSpec,
        binds: &BTreeMap<PathBuf, (PathBuf, bool)>,
        name: &str,
        scratch: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            self.binary.clone(),
            "run".to_string(),
            "--detach".to_string(),
            format!("--name={name}"),
            format!("--memory={}", spec.memory_limit),
            format!("--cpus={}", spec.cpus),
        ];
        args.extend(volume_flags(binds));
        args.push(spec.image.clone());
        args.push("/bin/sh".to_string());
        args.push(scratch.join("wrapper.sh").to_string_lossy().into_owned());
        args
    }

    async fn launch(&self, run_args: &[String]) -> BatchResult<()> {
        let proc = self.runner.run(&CommandSpec::new(run_args.to_vec())).await?;
        match proc.raise_for_exit_code() {
            Ok(proc) => {
                debug!(container = %proc.stdout_lossy().trim(), "容器已启动");
                Ok(())
            }
            Err(e) => Err(BatchError::ContainerEngine(format!("容器启动失败: {e}"))),
        }
    }

    async fn wait_container(&self, name: &str) -> BatchResult<()> {
        let spec = CommandSpec::new([self.binary.as_str(), "wait", name]);
        let proc = self.runner.run(&spec).await?;
        if proc.exit_code != 0 {
            return Err(BatchError::ContainerEngine(format!(
                "等待容器结束失败 (退出码 {}): {}",
                proc.exit_code,
                proc.stderr_lossy().trim()
            )));
        }
        Ok(())
    }

    async fn remove_container(&self, name: &str) {
        let spec = CommandSpec::new([self.binary.as_str(), "rm", "--force", name]);
        match self.runner.run(&spec).await {
            Ok(proc) if proc.exit_code == 0 => {}
            Ok(proc) => warn!(
                container = name,
                exit_code = proc.exit_code,
                "移除容器失败: {}",
                proc.stderr_lossy().trim()
            ),
            Err(e) => warn!(container = name, "移除容器失败: {e}"),
        }
    }
}

#[async_trait]
impl ContainerExecutor for ContainerRunner {
    async fn run(&self, spec: &ContainerSpec) -> BatchResult<CompletedContainer> {
        self.run_container(spec).await
    }
}

/// 合并卷绑定为以宿主路径为键的单一映射
///
/// 只读绑定先写入，读写绑定后写入；同一宿主路径冲突时读写生效。
pub fn merged_binds(spec: &ContainerSpec, scratch: &Path) -> BTreeMap<PathBuf, (PathBuf, bool)> {
    let mut merged = BTreeMap::new();
    for bind in &spec.readonly_binds {
        merged.insert(bind.host.clone(), (bind.container.clone(), false));
    }
    for bind in &spec.readwrite_binds {
        merged.insert(bind.host.clone(), (bind.container.clone(), true));
    }
    merged.insert(scratch.to_path_buf(), (scratch.to_path_buf(), true));
    merged
}

fn volume_flags(binds: &BTreeMap<PathBuf, (PathBuf, bool)>) -> Vec<String> {
    binds
        .iter()
        .map(|(host, (container, rw))| {
            let mode = if *rw { "rw" } else { "ro" };
            format!("--volume={}:{}:{mode}", host.display(), container.display())
        })
        .collect()
}

/// 重建等价的交互式引擎调用命令行
///
/// 仅用于人工调试与审计，系统自身不会重新执行该字符串。
pub fn render_engine_command(
    binary: &str,
    spec: &ContainerSpec,
    binds: &BTreeMap<PathBuf, (PathBuf, bool)>,
) -> String {
    let mut args = vec![
        binary.to_string(),
        "run".to_string(),
        "--interactive".to_string(),
        "--tty".to_string(),
        "--rm".to_string(),
        format!("--memory={}", spec.memory_limit),
        format!("--cpus={}", spec.cpus),
    ];
    args.extend(volume_flags(binds));
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    shlex::try_join(args.iter().map(String::as_str)).unwrap_or_else(|_| args.join(" "))
}

/// 生成测量与超时包装脚本
///
/// 包装实施墙钟上限，到期发送终止信号，宽限期后强制杀死；
/// stdout/stderr重定向到临时目录，测量值追加写入记账文件。
fn write_wrapper(scratch: &Path, spec: &ContainerSpec) -> BatchResult<()> {
    let quoted_command = shlex::try_join(spec.command.iter().map(String::as_str))
        .map_err(|e| BatchError::InvalidParams(format!("命令无法安全引用: {e}")))?;
    let script = format!(
        "#!/bin/sh\n\
         exec /usr/bin/time --quiet --format='%M %S %U %e %x' \
         --output='{scratch}/resources' --append \
         timeout --kill-after={kill_after} {limit} {command} \
         > '{scratch}/stdout' 2> '{scratch}/stderr'\n",
        scratch = scratch.display(),
        kill_after = spec.kill_after.as_secs(),
        limit = spec.wall_time_limit.as_secs(),
        command = quoted_command,
    );
    let path = scratch.join("wrapper.sh");
    std::fs::write(&path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn read_accounting(scratch: &Path) -> ResourceAccounting {
    let path = scratch.join("resources");
    match std::fs::read_to_string(&path) {
        Ok(text) => match ResourceAccounting::parse(&text) {
            Some(accounting) => accounting,
            None => {
                // 常见原因是镜像里没有测量工具；按"干净失败"回退而不是报错
                warn!(
                    file = %path.display(),
                    "资源记账文件格式异常，数值回退为零"
                );
                ResourceAccounting::zeroed()
            }
        },
        Err(e) => {
            warn!(
                file = %path.display(),
                "资源记账文件缺失 ({e})，数值回退为零"
            );
            ResourceAccounting::zeroed()
        }
    }
}

fn container_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(10)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("scriptbatch-{suffix}")
}
