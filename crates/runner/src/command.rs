use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Instant;

use chrono::Utc;
use scriptbatch_core::{BatchError, BatchResult, CommandSpec, CompletedProcess};
use tracing::debug;

use crate::probe;

/// 单进程执行器
///
/// 启动恰好一个OS进程，等待其结束并返回完整结果记录。
/// 本层没有超时，超时由调用方（容器包装）负责。
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// 执行一条命令并测量其资源消耗
    ///
    /// 非零退出码不是错误；只有进程无法启动或stdio捕获失败才返回 `Err`。
    pub async fn run(&self, spec: &CommandSpec) -> BatchResult<CompletedProcess> {
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || run_blocking(spec))
            .await
            .map_err(|e| BatchError::Internal(format!("执行任务被中止: {e}")))?
    }
}

fn run_blocking(spec: CommandSpec) -> BatchResult<CompletedProcess> {
    if spec.command.is_empty() {
        return Err(BatchError::InvalidParams("命令不能为空".to_string()));
    }

    // 启动前解析为绝对路径，结果中记录子进程实际的工作目录
    let cwd = std::fs::canonicalize(&spec.cwd)?;

    let mut command = Command::new(&spec.command[0]);
    command
        .args(&spec.command[1..])
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if spec.clear_env {
        command.env_clear();
    }
    command.envs(&spec.env_override);

    let start = Utc::now();
    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| BatchError::ProcessSpawn {
        command: spec.command.join(" "),
        source,
    })?;

    // 在独立线程上排空两条管道，避免缓冲区写满造成死锁
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || drain(stdout_pipe));
    let stderr_thread = std::thread::spawn(move || drain(stderr_pipe));

    let (exit_code, usage) = match probe::wait_with_usage(child.id()) {
        Ok(reaped) => reaped,
        Err(err) => {
            // 探测不可用时退回普通等待，资源字段降级为缺失
            let status = child.wait()?;
            debug!("资源探测不可用，仅记录退出状态: {err}");
            (status.code().unwrap_or(-1), None)
        }
    };
    let wall_time = started.elapsed();

    let stdout = stdout_thread
        .join()
        .map_err(|_| BatchError::Internal("stdout读取线程异常".to_string()))??;
    let stderr = stderr_thread
        .join()
        .map_err(|_| BatchError::Internal("stderr读取线程异常".to_string()))??;

    let resource = match usage {
        Some(raw) => raw.into_resource(wall_time),
        None => probe::unavailable_resource(wall_time),
    };

    debug!(
        command = %spec.command.join(" "),
        exit_code,
        wall_ms = wall_time.as_millis() as u64,
        "命令执行结束"
    );

    Ok(CompletedProcess {
        command: spec.command,
        env: spec.env_override,
        cwd,
        resource,
        exit_code,
        start,
        stdout,
        stderr,
    })
}

fn drain<R: Read>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = pipe {
        reader.read_to_end(&mut buf)?;
    }
    Ok(buf)
}
