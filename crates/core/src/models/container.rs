use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::process::CompletedProcess;

/// 一条卷绑定：宿主路径映射到容器内路径
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl Bind {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    /// 容器内路径与宿主路径一致的绑定
    pub fn same(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            host: path.clone(),
            container: path,
        }
    }
}

/// 一次容器执行的输入参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// 容器镜像
    pub image: String,
    /// 容器内执行的参数向量
    pub command: Vec<String>,
    /// 墙钟时间上限
    pub wall_time_limit: Duration,
    /// 超时信号发出后到强制杀死之间的宽限期
    pub kill_after: Duration,
    /// 内存上限（字节）
    pub memory_limit: u64,
    /// CPU份额
    pub cpus: f64,
    /// 只读绑定
    pub readonly_binds: Vec<Bind>,
    /// 读写绑定；与只读绑定冲突时读写生效
    pub readwrite_binds: Vec<Bind>,
}

/// 一次容器执行的完整结果记录
///
/// 在一个 [`CompletedProcess`]（容器内语义：容器内命令、
/// 记账文件恢复的资源与退出状态、捕获的stdio）之上附加容器元数据。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedContainer {
    /// 容器镜像标识
    pub image: String,
    /// 重建出的等价交互式引擎调用命令行，仅供人工调试，系统不会重新执行
    pub docker_command: String,
    /// 容器内执行结果
    pub proc: CompletedProcess,
}

impl CompletedContainer {
    pub fn exit_code(&self) -> i32 {
        self.proc.exit_code
    }
}
