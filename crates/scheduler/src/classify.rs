//! 退出码分类
//!
//! 退出码的解释是调度器的策略决定，不属于执行层。

use serde::{Deserialize, Serialize};

use scriptbatch_core::RetryConfig;

/// `timeout` 工具表示超时终止的退出码
pub const TIMEOUT_EXIT: i32 = 124;
/// 宽限期后强杀（128+SIGKILL）的退出码
pub const KILL_EXIT: i32 = 137;

/// 一次脚本尝试的结局类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionClass {
    /// 退出码0
    Success,
    /// 普通失败，不再重试
    Failure,
    /// 超时或强杀；与普通失败是不同的结局类别，同样不重试
    TimedOut,
    /// 环境/安装类瞬时失败，下一轮重试
    RetryableSetup,
}

/// 按退出码划分结局类别
///
/// 超时/强杀码优先于可重试码判定，配置校验也禁止两者重叠。
pub fn classify_exit(exit_code: i32, retry: &RetryConfig) -> ExecutionClass {
    if exit_code == 0 {
        ExecutionClass::Success
    } else if exit_code == TIMEOUT_EXIT || exit_code == KILL_EXIT {
        ExecutionClass::TimedOut
    } else if retry.retryable_exit_codes.contains(&exit_code) {
        ExecutionClass::RetryableSetup
    } else {
        ExecutionClass::Failure
    }
}
