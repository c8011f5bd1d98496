//! 进程与容器执行
//!
//! [`CommandRunner`] 启动单个宿主进程并在退出后一次性读取资源消耗；
//! [`ContainerRunner`] 把一次命令执行包进资源受限的新建容器，
//! 实施超时/强杀升级并从记账文件恢复测量值。

pub mod accounting;
pub mod command;
pub mod container;
pub mod probe;

pub use accounting::ResourceAccounting;
pub use command::CommandRunner;
pub use container::ContainerRunner;
