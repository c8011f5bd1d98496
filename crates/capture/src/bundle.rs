use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::file::{File, HashAlgo};
use crate::store::ArtifactStore;
use crate::{CaptureError, CaptureResult};

/// 捕获模式
#[derive(Debug, Clone)]
pub enum CaptureMode {
    /// 载荷读入内存，适合小结果集
    InMemory { inline_limit: Option<u64> },
    /// 文件搬入内容寻址存储，快照只保留元数据和位置
    Relocate { store: ArtifactStore },
}

/// 捕获选项
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub mode: CaptureMode,
    pub hash_algo: HashAlgo,
    /// 同时为目录构建tar归档
    pub archive: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            mode: CaptureMode::InMemory {
                inline_limit: Some(1024 * 1024),
            },
            hash_algo: HashAlgo::Xxh64,
            archive: false,
        }
    }
}

/// 一个目录树在某一时刻的内容寻址快照
///
/// 构造后不可变。空快照（`files` 为空）是合法的空白值，
/// 用作任何捕获发生之前的安全默认。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileBundle {
    /// 可选的整目录归档
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<File>,
    /// 相对路径到文件快照的映射
    pub files: BTreeMap<PathBuf, File>,
}

impl FileBundle {
    /// 空白快照
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 成员大小之和
    pub fn size(&self) -> u64 {
        self.files.values().map(|file| file.size).sum()
    }

    /// 对目录做一次快照
    ///
    /// 递归枚举全部常规、非符号链接文件；
    /// 搬移模式下文件被移入存储，目录中留下一个 `index` 成员清单。
    pub fn from_dir(dir: &Path, options: &CaptureOptions) -> CaptureResult<Self> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| CaptureError::Walk(e.to_string()))?;
            if !entry.file_type().is_file() || entry.path_is_symlink() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| CaptureError::Walk(e.to_string()))?
                .to_path_buf();

            let inline_limit = match &options.mode {
                CaptureMode::InMemory { inline_limit } => *inline_limit,
                CaptureMode::Relocate { .. } => None,
            };
            let mut file = File::from_path(entry.path(), options.hash_algo, inline_limit)?;

            if let CaptureMode::Relocate { store } = &options.mode {
                let url = store.put(entry.path(), &file)?;
                file.url = Some(url);
            }

            files.insert(rel, file);
        }

        let archive = if options.archive {
            Some(build_archive(dir, &files, options)?)
        } else {
            None
        };

        debug!(
            dir = %dir.display(),
            members = files.len(),
            "目录快照完成"
        );
        Ok(Self { archive, files })
    }
}

/// 以快照成员清单为内容构建tar归档并对其做快照
///
/// 搬移模式下成员已不在原目录，归档内容来自存储中的位置。
fn build_archive(
    dir: &Path,
    files: &BTreeMap<PathBuf, File>,
    options: &CaptureOptions,
) -> CaptureResult<File> {
    let scratch = tempfile::tempdir()?;
    let archive_path = scratch.path().join("bundle.tar");
    let tar_file = std::fs::File::create(&archive_path)?;
    let mut builder = tar::Builder::new(tar_file);

    for (rel, snapshot) in files {
        let source = match &snapshot.url {
            Some(url) => url.clone(),
            None => dir.join(rel),
        };
        let mut reader = std::fs::File::open(&source)?;
        builder.append_file(rel, &mut reader)?;
    }
    builder.into_inner()?.sync_all()?;

    let mut archive = File::from_path(&archive_path, options.hash_algo, None)?;
    if let CaptureMode::Relocate { store } = &options.mode {
        let url = store.put(&archive_path, &archive)?;
        archive.url = Some(url);
    }
    Ok(archive)
}
