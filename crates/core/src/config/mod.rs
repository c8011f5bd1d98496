use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{BatchError, BatchResult};

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine CLI binary, e.g. "docker" or "podman"
    pub binary: String,
    /// Keep per-run scratch directories for inspection instead of deleting them
    pub keep_scratch: bool,
}

/// Per-container resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Wall-clock limit for one script, in seconds
    pub wall_time_seconds: u64,
    /// Grace period between the timeout signal and the forced kill, in seconds
    pub kill_after_seconds: u64,
    /// Memory limit in bytes
    pub memory_bytes: u64,
    /// CPU share
    pub cpus: f64,
}

impl LimitsConfig {
    pub fn wall_time_limit(&self) -> Duration {
        Duration::from_secs(self.wall_time_seconds)
    }

    pub fn kill_after(&self) -> Duration {
        Duration::from_secs(self.kill_after_seconds)
    }
}

/// Fixpoint retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// false = single-pass mode: every script gets exactly one attempt
    pub fixpoint_enabled: bool,
    /// Hard bound on rounds, on top of natural convergence
    pub max_rounds: usize,
    /// Exit codes treated as transient environment/setup failures.
    /// Timeout codes (124/137) are never retried.
    pub retryable_exit_codes: Vec<i32>,
}

/// Output capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Content-addressed store root; None keeps captured files in memory
    pub store_dir: Option<PathBuf>,
    /// Largest file kept inline in memory, in bytes
    pub inline_limit_bytes: u64,
    /// Also build a tar archive of each captured directory
    pub archive: bool,
}

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub capture: CaptureConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                binary: "docker".to_string(),
                keep_scratch: false,
            },
            limits: LimitsConfig {
                wall_time_seconds: 3600,
                kill_after_seconds: 30,
                memory_bytes: 4 * 1024 * 1024 * 1024,
                cpus: 1.0,
            },
            retry: RetryConfig {
                fixpoint_enabled: true,
                max_rounds: 10,
                retryable_exit_codes: vec![75],
            },
            capture: CaptureConfig {
                store_dir: None,
                inline_limit_bytes: 1024 * 1024,
                archive: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCRIPTBATCH_)
    pub fn load(config_path: Option<&str>) -> BatchResult<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("engine.binary", defaults.engine.binary.clone())
            .map_err(config_err)?
            .set_default("engine.keep_scratch", defaults.engine.keep_scratch)
            .map_err(config_err)?
            .set_default("limits.wall_time_seconds", defaults.limits.wall_time_seconds)
            .map_err(config_err)?
            .set_default(
                "limits.kill_after_seconds",
                defaults.limits.kill_after_seconds,
            )
            .map_err(config_err)?
            .set_default("limits.memory_bytes", defaults.limits.memory_bytes)
            .map_err(config_err)?
            .set_default("limits.cpus", defaults.limits.cpus)
            .map_err(config_err)?
            .set_default("retry.fixpoint_enabled", defaults.retry.fixpoint_enabled)
            .map_err(config_err)?
            .set_default("retry.max_rounds", defaults.retry.max_rounds as u64)
            .map_err(config_err)?
            .set_default(
                "retry.retryable_exit_codes",
                defaults
                    .retry
                    .retryable_exit_codes
                    .iter()
                    .map(|c| i64::from(*c))
                    .collect::<Vec<_>>(),
            )
            .map_err(config_err)?
            .set_default(
                "capture.inline_limit_bytes",
                defaults.capture.inline_limit_bytes,
            )
            .map_err(config_err)?
            .set_default("capture.archive", defaults.capture.archive)
            .map_err(config_err)?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(BatchError::Configuration(format!("配置文件不存在: {path}")));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCRIPTBATCH")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> BatchResult<()> {
        if self.engine.binary.trim().is_empty() {
            return Err(BatchError::Configuration(
                "engine.binary 不能为空".to_string(),
            ));
        }
        if self.limits.wall_time_seconds == 0 {
            return Err(BatchError::Configuration(
                "limits.wall_time_seconds 必须大于0".to_string(),
            ));
        }
        if self.limits.kill_after_seconds == 0 {
            return Err(BatchError::Configuration(
                "limits.kill_after_seconds 必须大于0".to_string(),
            ));
        }
        if self.limits.memory_bytes == 0 {
            return Err(BatchError::Configuration(
                "limits.memory_bytes 必须大于0".to_string(),
            ));
        }
        if !(self.limits.cpus > 0.0) {
            return Err(BatchError::Configuration(
                "limits.cpus 必须大于0".to_string(),
            ));
        }
        if self.retry.max_rounds == 0 {
            return Err(BatchError::Configuration(
                "retry.max_rounds 必须大于0".to_string(),
            ));
        }
        for code in &self.retry.retryable_exit_codes {
            if *code == 0 || *code == 124 || *code == 137 {
                return Err(BatchError::Configuration(format!(
                    "retry.retryable_exit_codes 不能包含成功或超时退出码: {code}"
                )));
            }
        }
        Ok(())
    }
}

fn config_err(e: impl std::fmt::Display) -> BatchError {
    BatchError::Configuration(e.to_string())
}
