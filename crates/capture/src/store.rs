use std::path::{Path, PathBuf};

use crate::file::File;
use crate::CaptureResult;

/// 内容寻址的产物存储
///
/// 文件按其内容哈希存放于 `root/<hex16>` 下，同哈希即去重。
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> CaptureResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 哈希对应的存储位置
    pub fn location(&self, file: &File) -> PathBuf {
        self.root.join(format!("{:016x}", file.hash_value))
    }

    /// 将源文件搬入存储并返回其位置
    ///
    /// 同内容已存在时只删除源文件。跨文件系统时退化为复制加删除。
    pub fn put(&self, src: &Path, file: &File) -> CaptureResult<PathBuf> {
        let dst = self.location(file);
        if dst.exists() {
            std::fs::remove_file(src)?;
            return Ok(dst);
        }
        match std::fs::rename(src, &dst) {
            Ok(()) => Ok(dst),
            Err(_) => {
                std::fs::copy(src, &dst)?;
                std::fs::remove_file(src)?;
                Ok(dst)
            }
        }
    }
}
