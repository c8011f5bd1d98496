//! 核心抽象接口定义
//!
//! 调度器通过 [`ContainerExecutor`] 发起容器执行，
//! 通过 [`CodeCheckout`] 获得已填充的代码目录；
//! 两者都是可替换的接缝，便于在测试中用桩实现替代真实基础设施。

use std::path::Path;

use async_trait::async_trait;

use crate::errors::CheckoutError;
use crate::models::{CompletedContainer, ContainerSpec};
use crate::BatchResult;

/// 容器执行接口
///
/// 实现者负责：创建隔离容器、实施资源限制与超时/强杀升级、
/// 捕获stdio、恢复资源消耗，并保证容器对象在所有退出路径上被移除。
/// 脚本的非零退出码体现在返回值中，不是 `Err`；
/// `Err` 只表示执行基础设施本身的故障。
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    /// 在新建容器中执行一条命令并等待其结束
    async fn run(&self, spec: &ContainerSpec) -> BatchResult<CompletedContainer>;
}

/// 代码检出接口
///
/// 调度器只要求执行开始前目标目录已被填充，
/// 不关心背后是git、平台API还是数据集下载。
#[async_trait]
pub trait CodeCheckout: Send + Sync {
    /// 将代码检出到目标目录
    async fn checkout(&self, dest: &Path) -> Result<(), CheckoutError>;
}
