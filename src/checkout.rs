//! 代码检出协作方的轻量实现
//!
//! 调度核心只要求批次开始前目标目录已被填充；
//! 这里提供本地目录复制与git命令行两种来源。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use scriptbatch_core::{CheckoutError, CodeCheckout, CommandSpec};
use scriptbatch_runner::CommandRunner;

/// 把一个本地目录复制到目标位置
pub struct LocalDirCheckout {
    source: PathBuf,
}

impl LocalDirCheckout {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[async_trait]
impl CodeCheckout for LocalDirCheckout {
    async fn checkout(&self, dest: &Path) -> Result<(), CheckoutError> {
        if !self.source.is_dir() {
            return Err(CheckoutError::NotFound(
                self.source.to_string_lossy().into_owned(),
            ));
        }
        std::fs::create_dir_all(dest)?;
        for entry in walkdir::WalkDir::new(&self.source) {
            let entry = entry.map_err(|e| CheckoutError::Io(std::io::Error::other(e)))?;
            let rel = entry
                .path()
                .strip_prefix(&self.source)
                .map_err(|e| CheckoutError::Io(std::io::Error::other(e)))?;
            if rel.as_os_str().is_empty() {
                continue;
            }
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                std::fs::copy(entry.path(), &target)?;
            }
        }
        info!(source = %self.source.display(), dest = %dest.display(), "本地代码复制完成");
        Ok(())
    }
}

/// 通过git命令行克隆仓库
///
/// 给定 `rev` 时检出该修订并核对HEAD指纹；
/// 不匹配按完整性错误上报，而不是降级为警告。
pub struct GitCliCheckout {
    url: String,
    rev: Option<String>,
    runner: CommandRunner,
}

impl GitCliCheckout {
    pub fn new(url: impl Into<String>, rev: Option<String>) -> Self {
        Self {
            url: url.into(),
            rev,
            runner: CommandRunner::new(),
        }
    }

    async fn git(&self, args: Vec<String>, cwd: &Path) -> Result<String, CheckoutError> {
        let mut command = vec!["git".to_string()];
        command.extend(args);
        let spec = CommandSpec::new(command).with_cwd(cwd);
        let proc = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| CheckoutError::Network(e.to_string()))?;
        if proc.exit_code != 0 {
            return Err(CheckoutError::Network(format!(
                "git失败 (退出码 {}): {}",
                proc.exit_code,
                proc.stderr_lossy().trim()
            )));
        }
        Ok(proc.stdout_lossy())
    }
}

#[async_trait]
impl CodeCheckout for GitCliCheckout {
    async fn checkout(&self, dest: &Path) -> Result<(), CheckoutError> {
        let parent = dest
            .parent()
            .ok_or_else(|| CheckoutError::InvalidDestination(dest.to_path_buf()))?;
        std::fs::create_dir_all(parent)?;

        self.git(
            vec![
                "clone".to_string(),
                self.url.clone(),
                dest.to_string_lossy().into_owned(),
            ],
            parent,
        )
        .await?;

        if let Some(rev) = &self.rev {
            self.git(vec!["checkout".to_string(), rev.clone()], dest)
                .await?;
            let head = self
                .git(vec!["rev-parse".to_string(), "HEAD".to_string()], dest)
                .await?;
            let head = head.trim().to_string();
            if !head.starts_with(rev.as_str()) {
                return Err(CheckoutError::HashMismatch {
                    expected: rev.clone(),
                    actual: head,
                });
            }
        }
        info!(url = %self.url, dest = %dest.display(), "git克隆完成");
        Ok(())
    }
}
