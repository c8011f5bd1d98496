//! 脚本结果目录布局
//!
//! 每次尝试写入 `<结果目录>/<转义的脚本路径>/{stdout,stderr,exit_code}`，
//! 每个批次写一次 `index` 清单，把脚本源路径映射到其结果目录。

use std::path::{Path, PathBuf};

use scriptbatch_core::{BatchResult, CompletedContainer};

/// 把脚本相对路径转义成单层目录名
///
/// 路径分隔符与转义字符本身都按 `%XX` 编码，保证可逆且无冲突。
pub fn fs_escape(path: &Path) -> String {
    let mut escaped = String::new();
    for ch in path.to_string_lossy().chars() {
        match ch {
            '/' | '\\' | '%' => escaped.push_str(&format!("%{:02X}", ch as u32)),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// 单个批次的结果写入器
#[derive(Debug, Clone)]
pub struct ResultLayout {
    results_dir: PathBuf,
}

impl ResultLayout {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// 脚本对应的结果目录（相对名）
    pub fn dir_name_for(&self, script: &Path) -> String {
        fs_escape(script)
    }

    /// 写入一次尝试的stdout/stderr/退出码，返回结果目录
    ///
    /// 重试会覆盖同一目录，最后一次尝试是权威记录。
    pub fn write_attempt(
        &self,
        script: &Path,
        container: &CompletedContainer,
    ) -> BatchResult<PathBuf> {
        let dir = self.results_dir.join(self.dir_name_for(script));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("stdout"), &container.proc.stdout)?;
        std::fs::write(dir.join("stderr"), &container.proc.stderr)?;
        std::fs::write(dir.join("exit_code"), format!("{}\n", container.exit_code()))?;
        Ok(dir)
    }

    /// 写入批次清单：每行 `<结果目录名> <脚本路径>`
    pub fn write_manifest(&self, scripts: &[PathBuf]) -> BatchResult<()> {
        let mut lines = String::new();
        for script in scripts {
            lines.push_str(&format!(
                "{} {}\n",
                self.dir_name_for(script),
                script.display()
            ));
        }
        std::fs::create_dir_all(&self.results_dir)?;
        std::fs::write(self.results_dir.join("index"), lines)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scriptbatch_core::{CompletedContainer, CompletedProcess, ComputeResource};
    use std::collections::BTreeMap;

    fn container(exit_code: i32) -> CompletedContainer {
        CompletedContainer {
            image: "img".to_string(),
            docker_command: "docker run ...".to_string(),
            proc: CompletedProcess {
                command: vec!["Rscript".into(), "a.R".into()],
                env: BTreeMap::new(),
                cwd: PathBuf::from("/"),
                resource: ComputeResource::zeroed(),
                exit_code,
                start: Utc::now(),
                stdout: b"output".to_vec(),
                stderr: b"errors".to_vec(),
            },
        }
    }

    #[test]
    fn test_fs_escape_is_injective_on_separators() {
        assert_eq!(fs_escape(Path::new("sub/dir/a.R")), "sub%2Fdir%2Fa.R");
        assert_eq!(fs_escape(Path::new("odd%name.R")), "odd%25name.R");
        assert_ne!(
            fs_escape(Path::new("a/b.R")),
            fs_escape(Path::new("a%2Fb.R"))
        );
    }

    #[test]
    fn test_write_attempt_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ResultLayout::new(dir.path());
        let result_dir = layout
            .write_attempt(Path::new("sub/a.R"), &container(3))
            .unwrap();

        assert_eq!(
            std::fs::read(result_dir.join("stdout")).unwrap(),
            b"output"
        );
        assert_eq!(
            std::fs::read(result_dir.join("stderr")).unwrap(),
            b"errors"
        );
        assert_eq!(
            std::fs::read_to_string(result_dir.join("exit_code")).unwrap(),
            "3\n"
        );
    }

    #[test]
    fn test_retry_overwrites_previous_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ResultLayout::new(dir.path());
        let first = layout.write_attempt(Path::new("a.R"), &container(75)).unwrap();
        let second = layout.write_attempt(Path::new("a.R"), &container(0)).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(second.join("exit_code")).unwrap(),
            "0\n"
        );
    }

    #[test]
    fn test_manifest_maps_scripts_to_result_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ResultLayout::new(dir.path());
        layout
            .write_manifest(&[PathBuf::from("a.R"), PathBuf::from("sub/b.R")])
            .unwrap();

        let manifest = std::fs::read_to_string(dir.path().join("index")).unwrap();
        assert_eq!(manifest, "a.R a.R\nsub%2Fb.R sub/b.R\n");
    }
}
