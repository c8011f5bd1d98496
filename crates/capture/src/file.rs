use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;
use xxhash_rust::xxh64::Xxh64;

use crate::{CaptureError, CaptureResult};

/// 内容哈希算法，均为64位宽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgo {
    Xxh64,
    Xxh3,
}

impl HashAlgo {
    pub fn bits(&self) -> u32 {
        64
    }
}

impl std::fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgo::Xxh64 => f.write_str("xxh64"),
            HashAlgo::Xxh3 => f.write_str("xxh3"),
        }
    }
}

/// 粗粒度的文件内容分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Empty,
    Text,
    Binary,
}

/// 单个文件的内容寻址快照
///
/// 不变量：`hash_value < 2^hash_bits`；
/// `contents` 存在时 `size == contents.len()`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub hash_algo: HashAlgo,
    pub hash_bits: u32,
    pub hash_value: u64,
    pub size: u64,
    pub file_type: FileType,
    pub mime_type: String,
    /// 文件载荷，仅在内存捕获模式且未超出上限时保留
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<u8>>,
    /// 文件被搬移后的外部位置
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<PathBuf>,
}

impl File {
    /// 对常规文件做一次快照
    ///
    /// `inline_limit` 为 `Some` 时，不超过上限的文件载荷保留在内存中。
    pub fn from_path(path: &Path, algo: HashAlgo, inline_limit: Option<u64>) -> CaptureResult<Self> {
        let meta = std::fs::symlink_metadata(path)?;
        if !meta.is_file() {
            return Err(CaptureError::NotRegularFile(path.to_path_buf()));
        }
        let size = meta.len();
        let keep_inline = inline_limit.map(|limit| size <= limit).unwrap_or(false);

        let mut hasher = Hasher::new(algo);
        let mut reader = std::fs::File::open(path)?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut contents = keep_inline.then(|| Vec::with_capacity(size as usize));
        let mut head = Vec::new();
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            if head.len() < 8192 {
                let take = (8192 - head.len()).min(n);
                head.extend_from_slice(&buf[..take]);
            }
            if let Some(ref mut payload) = contents {
                payload.extend_from_slice(&buf[..n]);
            }
        }

        Ok(Self {
            hash_algo: algo,
            hash_bits: algo.bits(),
            hash_value: hasher.finish(),
            size,
            file_type: classify(&head, size),
            mime_type: mime_of(path),
            contents,
            url: None,
        })
    }

    /// 空白值：零字节内容的快照，用于任何捕获发生前的安全默认
    pub fn blank(algo: HashAlgo) -> Self {
        let mut hasher = Hasher::new(algo);
        hasher.update(&[]);
        Self {
            hash_algo: algo,
            hash_bits: algo.bits(),
            hash_value: hasher.finish(),
            size: 0,
            file_type: FileType::Empty,
            mime_type: "inode/x-empty".to_string(),
            contents: None,
            url: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 按内容哈希比较两个文件
    ///
    /// 哈希算法或位宽不同时无法做出判断，返回错误而非 `false`。
    pub fn content_eq(&self, other: &File) -> CaptureResult<bool> {
        if self.hash_algo != other.hash_algo || self.hash_bits != other.hash_bits {
            return Err(CaptureError::HashAlgoMismatch {
                left: self.hash_algo,
                right: other.hash_algo,
            });
        }
        Ok(self.hash_value == other.hash_value)
    }

    /// 校验结构不变量，返回违反项的描述
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.hash_bits < 64 && self.hash_value >= 1u64 << self.hash_bits {
            violations.push(format!(
                "哈希值超出位宽: {} >= 2^{}",
                self.hash_value, self.hash_bits
            ));
        }
        if let Some(ref contents) = self.contents {
            if contents.len() as u64 != self.size {
                violations.push(format!(
                    "载荷长度与记录的大小不一致: {} != {}",
                    contents.len(),
                    self.size
                ));
            }
        }
        violations
    }
}

enum Hasher {
    Xxh64(Xxh64),
    Xxh3(Box<Xxh3>),
}

impl Hasher {
    fn new(algo: HashAlgo) -> Self {
        match algo {
            HashAlgo::Xxh64 => Hasher::Xxh64(Xxh64::new(0)),
            HashAlgo::Xxh3 => Hasher::Xxh3(Box::new(Xxh3::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Xxh64(h) => h.update(data),
            Hasher::Xxh3(h) => h.update(data),
        }
    }

    fn finish(&self) -> u64 {
        match self {
            Hasher::Xxh64(h) => h.digest(),
            Hasher::Xxh3(h) => h.digest(),
        }
    }
}

fn classify(head: &[u8], size: u64) -> FileType {
    if size == 0 {
        FileType::Empty
    } else if head.contains(&0) {
        FileType::Binary
    } else {
        FileType::Text
    }
}

fn mime_of(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}
