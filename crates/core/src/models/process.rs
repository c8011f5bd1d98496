use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::resource::ComputeResource;

/// 一次进程启动的输入参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// 参数向量，第一项为可执行文件
    pub command: Vec<String>,
    /// 环境变量覆盖
    pub env_override: BTreeMap<String, String>,
    /// 为true时从空环境开始，否则继承当前进程环境
    pub clear_env: bool,
    /// 工作目录，启动前会解析为绝对路径
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            env_override: BTreeMap::new(),
            clear_env: false,
            cwd: PathBuf::from("."),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_override.insert(key.into(), value.into());
        self
    }

    pub fn with_clear_env(mut self, clear_env: bool) -> Self {
        self.clear_env = clear_env;
        self
    }
}

/// 一次进程执行的完整结果记录
///
/// 构造后不可变。非零退出码在这一层不是错误，
/// 需要异常式处理的调用方使用 [`CompletedProcess::raise_for_exit_code`]。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedProcess {
    /// 实际执行的参数向量
    pub command: Vec<String>,
    /// 启动时生效的环境变量覆盖快照
    pub env: BTreeMap<String, String>,
    /// 子进程实际的工作目录（绝对路径，审计用）
    pub cwd: PathBuf,
    /// 退出后一次性读取的资源消耗
    pub resource: ComputeResource,
    /// 退出码；被信号终止时为 128+信号编号
    pub exit_code: i32,
    /// 启动时刻
    pub start: DateTime<Utc>,
    /// 捕获的标准输出
    pub stdout: Vec<u8>,
    /// 捕获的标准错误
    pub stderr: Vec<u8>,
}

impl CompletedProcess {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// 重建等价的 `env --chdir=... - K=V ... cmd` 调用，便于人工重现
    pub fn env_command(&self) -> Vec<String> {
        let mut argv = vec![
            "env".to_string(),
            format!("--chdir={}", self.cwd.display()),
            "-".to_string(),
        ];
        argv.extend(self.env.iter().map(|(k, v)| format!("{k}={v}")));
        argv.extend(self.command.iter().cloned());
        argv
    }

    /// 将非零退出码转换为携带完整结果的结构化错误
    ///
    /// 退出码的解释属于调用方；本方法只为偏好异常式处理的调用方提供便利。
    pub fn raise_for_exit_code(self) -> Result<Self, NonZeroExitError> {
        if self.exit_code == 0 {
            Ok(self)
        } else {
            Err(NonZeroExitError {
                process: Box::new(self),
            })
        }
    }
}

/// 进程以非零退出码结束
#[derive(Debug, Error)]
#[error("{}", render(.process))]
pub struct NonZeroExitError {
    pub process: Box<CompletedProcess>,
}

fn render(process: &CompletedProcess) -> String {
    let join = |argv: &[String]| {
        shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
    };
    format!(
        "命令以非零退出码结束\n命令: {}\n退出码: {}\n启动时刻: {}\n完整命令: {}\n标准输出:\n{}\n标准错误:\n{}",
        join(&process.command),
        process.exit_code,
        process.start.to_rfc3339(),
        join(&process.env_command()),
        indent(&process.stdout_lossy()),
        indent(&process.stderr_lossy()),
    )
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(exit_code: i32) -> CompletedProcess {
        CompletedProcess {
            command: vec!["echo".into(), "hi there".into()],
            env: BTreeMap::from([("LANG".to_string(), "C".to_string())]),
            cwd: PathBuf::from("/tmp"),
            resource: ComputeResource::zeroed(),
            exit_code,
            start: Utc::now(),
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
        }
    }

    #[test]
    fn test_raise_for_exit_code_passes_zero() {
        assert!(sample(0).raise_for_exit_code().is_ok());
    }

    #[test]
    fn test_raise_for_exit_code_carries_process() {
        let err = sample(7).raise_for_exit_code().unwrap_err();
        assert_eq!(err.process.exit_code, 7);
        let rendered = err.to_string();
        assert!(rendered.contains("退出码: 7"));
        assert!(rendered.contains("\"hi there\""));
    }

    #[test]
    fn test_env_command_shape() {
        let argv = sample(0).env_command();
        assert_eq!(argv[0], "env");
        assert_eq!(argv[1], "--chdir=/tmp");
        assert_eq!(argv[2], "-");
        assert!(argv.contains(&"LANG=C".to_string()));
        assert_eq!(argv.last().unwrap(), "hi there");
    }
}
