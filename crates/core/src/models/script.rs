use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::container::CompletedContainer;

/// 单个脚本单次尝试的记录
///
/// 同一脚本可能被重试，因此会存在多条记录；
/// 最终状态以最后一条为准，其余保留用于调试。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRecord {
    /// 脚本源路径（相对于代码目录）
    pub script: PathBuf,
    /// 本次尝试的结果目录
    pub result_dir: PathBuf,
    /// 容器执行结果
    pub container: CompletedContainer,
    /// 在发现顺序中的位置（跨轮次单调递增）
    pub order_index: usize,
    /// 所属轮次，从1开始
    pub round: usize,
}
