use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 单次进程/容器执行的资源消耗
///
/// 所有字段在进程退出后一次性读取，之后不再变化。
/// 可选字段在测量来源（容器cgroup或宿主OS）无法提供时为 `None`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResource {
    /// 用户态CPU时间
    pub user_cpu_time: Duration,
    /// 内核态CPU时间
    pub system_cpu_time: Duration,
    /// 墙钟时间
    pub wall_time: Duration,
    /// 峰值常驻内存（字节）
    pub max_resident_set_size: u64,
    /// 峰值虚拟内存（字节）
    pub max_virtual_memory_size: Option<u64>,
    /// 读取字节数
    pub io_bytes_read: Option<u64>,
    /// 写入字节数
    pub io_bytes_written: Option<u64>,
    /// 上下文切换次数
    pub context_switches: Option<u64>,
}

impl ComputeResource {
    /// 测量缺失时的回退值：全部数值字段为零
    pub fn zeroed() -> Self {
        Self {
            user_cpu_time: Duration::ZERO,
            system_cpu_time: Duration::ZERO,
            wall_time: Duration::ZERO,
            max_resident_set_size: 0,
            max_virtual_memory_size: None,
            io_bytes_read: None,
            io_bytes_written: None,
            context_switches: None,
        }
    }

    /// CPU总时间（用户态+内核态）
    pub fn total_cpu_time(&self) -> Duration {
        self.user_cpu_time + self.system_cpu_time
    }
}
