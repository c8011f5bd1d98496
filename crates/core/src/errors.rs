use std::path::PathBuf;

use thiserror::Error;

/// 批次执行错误类型定义
///
/// 基础设施故障（容器引擎、进程启动、IO）会中止整个批次；
/// 脚本本身的非零退出码不属于错误，由调度器按退出码分类。
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("容器引擎错误: {0}")]
    ContainerEngine(String),

    #[error("进程启动失败: {command}: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("代码检出错误: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("共享环境初始化失败: 退出码 {exit_code}")]
    SetupFailed { exit_code: i32 },

    #[error("产物捕获错误: {0}")]
    Capture(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("无效的参数: {0}")]
    InvalidParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 代码检出错误
///
/// 指纹不匹配是独立的错误变体，调用方可以区分
/// "内容完整性问题"与"执行问题"后自行决定记录或中止。
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("代码来源未找到: {0}")]
    NotFound(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内容指纹不匹配: 期望 {expected}, 实际 {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("目标路径无效: {0}")]
    InvalidDestination(PathBuf),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}
