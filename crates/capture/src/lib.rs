//! 输出产物捕获
//!
//! 将一个目录树快照为内容寻址的文件清单（哈希、大小、类型），
//! 可选择把文件载荷读入内存或搬移到内容寻址存储中。

pub mod bundle;
pub mod file;
pub mod store;

pub use bundle::{CaptureMode, CaptureOptions, FileBundle};
pub use file::{File, FileType, HashAlgo};
pub use store::ArtifactStore;

use thiserror::Error;

/// 产物捕获错误
#[derive(Debug, Error)]
pub enum CaptureError {
    /// 不同哈希算法之间的比较是错误，不是静默的false
    #[error("哈希算法不一致，无法比较: {left} vs {right}")]
    HashAlgoMismatch { left: HashAlgo, right: HashAlgo },

    #[error("不是常规文件: {0}")]
    NotRegularFile(std::path::PathBuf),

    #[error("目录遍历错误: {0}")]
    Walk(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
