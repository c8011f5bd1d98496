use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 脚本执行引擎
///
/// 受支持引擎的封闭枚举，匹配具有编译期完备性检查；
/// 新增引擎时编译器会指出所有需要补充的分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptEngine {
    /// R语言脚本，经由 `Rscript`
    RScript,
    /// Python脚本，经由 `python3`
    Python,
    /// POSIX shell脚本，经由 `sh`
    Shell,
}

impl ScriptEngine {
    /// 引擎识别的文件扩展名（小写）
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ScriptEngine::RScript => &["r"],
            ScriptEngine::Python => &["py"],
            ScriptEngine::Shell => &["sh"],
        }
    }

    /// 解释器名称
    pub fn interpreter(&self) -> &'static str {
        match self {
            ScriptEngine::RScript => "Rscript",
            ScriptEngine::Python => "python3",
            ScriptEngine::Shell => "sh",
        }
    }

    /// 构造容器内执行单个脚本的参数向量
    pub fn script_command(&self, script: &Path) -> Vec<String> {
        vec![
            self.interpreter().to_string(),
            script.to_string_lossy().into_owned(),
        ]
    }

    /// 路径是否属于本引擎
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions().contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// 枚举目录下本引擎的全部脚本，返回相对路径的确定性排序
    pub fn discover(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut scripts = Vec::new();
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry.map_err(std::io::Error::other)?;
            if entry.file_type().is_file() && self.matches(entry.path()) {
                if let Ok(rel) = entry.path().strip_prefix(dir) {
                    scripts.push(rel.to_path_buf());
                }
            }
        }
        scripts.sort();
        Ok(scripts)
    }
}

impl std::fmt::Display for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScriptEngine::RScript => "rscript",
            ScriptEngine::Python => "python",
            ScriptEngine::Shell => "shell",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ScriptEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rscript" | "r" => Ok(ScriptEngine::RScript),
            "python" | "python3" => Ok(ScriptEngine::Python),
            "shell" | "sh" => Ok(ScriptEngine::Shell),
            other => Err(format!("未知的脚本引擎: {other}")),
        }
    }
}
