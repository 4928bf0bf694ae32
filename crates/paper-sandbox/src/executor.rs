//! Subprocess-isolated Python execution scoped to one workspace.
//!
//! Every call spawns exactly one interpreter child with `cwd` set to the
//! workspace root and a bounded wall clock. All failures, including timeouts
//! and non-zero exits, come back as the result string so the calling agent
//! can read them; nothing is raised.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::Local;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::preamble;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PythonSandbox {
    workspace_dir: PathBuf,
    interpreter: String,
    timeout: Duration,
}

impl PythonSandbox {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            interpreter: "python3".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// Execute a Python source string inside the workspace.
    pub async fn execute_code(&self, code: &str) -> String {
        match self.run_snippet(code).await {
            Ok(output) => output,
            Err(e) => {
                log::error!("直接执行代码错误: {e}");
                format!("直接执行代码错误: {e}")
            }
        }
    }

    /// Persist the code under `code/` and execute it; the returned string
    /// concatenates the save confirmation and the execution output.
    pub async fn save_and_execute(&self, code: &str, filename: &str) -> String {
        let save_result = match self.save_code(code, filename).await {
            Ok(message) => message,
            Err(e) => {
                log::error!("保存代码失败: {e}");
                return format!("保存代码失败: {e}");
            }
        };
        let execute_result = self.execute_code(code).await;
        format!("{save_result}\n\n=== 执行结果 ===\n{execute_result}")
    }

    /// Execute a Python file addressed relative to the workspace.
    pub async fn execute_file(&self, file_path: &str) -> String {
        let workspace = absolute(&self.workspace_dir);
        let full_path = resolve_script_path(&workspace, file_path);
        let normalized = normalize(&full_path);

        if !normalized.starts_with(&workspace) {
            return format!(
                "错误：文件路径 {file_path} 不在工作空间内\n工作空间: {}\n尝试路径: {}",
                workspace.display(),
                normalized.display()
            );
        }
        if !normalized.exists() {
            return format!(
                "错误：文件不存在 {}\n请检查文件路径是否正确",
                normalized.display()
            );
        }
        if normalized.extension().and_then(|e| e.to_str()) != Some("py") {
            return format!("错误：文件 {} 不是Python文件", normalized.display());
        }

        match tokio::fs::read_to_string(&normalized).await {
            Ok(code) => self.execute_code(&code).await,
            Err(e) => format!("从文件执行失败: {e}"),
        }
    }

    /// Replace the contents of an existing `code/<filename>.py`, writing a
    /// timestamped backup beside it first.
    pub async fn edit_code_file(&self, filename: &str, new_code: &str) -> String {
        if new_code.trim().is_empty() {
            return "错误：新代码内容不能为空".to_string();
        }
        if filename.trim().is_empty() {
            return "错误：文件名不能为空".to_string();
        }

        let safe_filename = sanitize_filename(filename, "code");
        let file_path = self.workspace_dir.join("code").join(&safe_filename);

        if !file_path.exists() {
            return format!(
                "错误：文件 {safe_filename} 不存在，无法修改。请先使用 save_and_execute 创建文件。"
            );
        }

        let backup_name = format!(
            "{safe_filename}.backup_{}",
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let backup_path = file_path.with_file_name(&backup_name);

        let result: std::io::Result<()> = async {
            let original = tokio::fs::read_to_string(&file_path).await?;
            tokio::fs::write(&backup_path, original).await?;
            tokio::fs::write(&file_path, new_code).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                log::info!("代码文件已修改: {}", file_path.display());
                format!(
                    "代码文件 {safe_filename} 已成功修改\n文件路径: {}\n相对路径: code/{safe_filename}\n新代码长度: {} 字符\n原文件已备份到: {backup_name}",
                    file_path.display(),
                    new_code.chars().count()
                )
            }
            Err(e) => {
                log::error!("修改代码文件失败: {e}");
                format!("修改代码文件失败: {e}")
            }
        }
    }

    /// Human-readable listing of `code/*.py` with sizes.
    pub async fn list_code_files(&self) -> String {
        let code_dir = self.workspace_dir.join("code");
        if !code_dir.is_dir() {
            return "代码文件目录不存在，还没有创建任何代码文件。".to_string();
        }

        let mut python_files = Vec::new();
        match std::fs::read_dir(&code_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.ends_with(".py") {
                        let size = entry.metadata().map(|m| m.len()).ok();
                        python_files.push((name, size));
                    }
                }
            }
            Err(e) => return format!("列出代码文件失败: {e}"),
        }

        if python_files.is_empty() {
            return "代码文件目录为空，还没有创建任何Python代码文件。".to_string();
        }
        python_files.sort();

        let listing: Vec<String> = python_files
            .iter()
            .map(|(name, size)| match size {
                Some(size) => format!("- {name} ({size} bytes)"),
                None => format!("- {name} (无法获取文件大小)"),
            })
            .collect();

        format!(
            "代码文件目录: {}\n找到 {} 个Python代码文件:\n{}",
            code_dir.display(),
            python_files.len(),
            listing.join("\n")
        )
    }

    async fn save_code(&self, code: &str, filename: &str) -> std::io::Result<String> {
        let fallback = format!("code_{}", chrono::Utc::now().timestamp());
        let safe_filename = sanitize_filename(filename, &fallback);

        let code_dir = self.workspace_dir.join("code");
        tokio::fs::create_dir_all(&code_dir).await?;
        let file_path = code_dir.join(&safe_filename);
        tokio::fs::write(&file_path, code).await?;
        log::info!("代码已保存到文件: {}", file_path.display());

        Ok(format!(
            "代码已成功保存到文件: {safe_filename}\n文件路径: {}\n代码长度: {} 字符",
            file_path.display(),
            code.chars().count()
        ))
    }

    async fn run_snippet(&self, code: &str) -> std::io::Result<String> {
        let wrapped = preamble::prepare(code, &self.workspace_dir.to_string_lossy());

        let script = tempfile::Builder::new()
            .prefix("sandbox_")
            .suffix(".py")
            .tempfile()?;
        std::fs::write(script.path(), &wrapped)?;

        let pythonpath = {
            let code_dir = self.workspace_dir.join("code");
            match std::env::var("PYTHONPATH") {
                Ok(existing) if !existing.is_empty() => {
                    format!("{}:{existing}", code_dir.display())
                }
                _ => code_dir.display().to_string(),
            }
        };

        let mut child = Command::new(&self.interpreter)
            .arg(script.path())
            .current_dir(&self.workspace_dir)
            .env("WORKSPACE_DIR", &self.workspace_dir)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONPATH", pythonpath)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        // Drain both pipes while waiting so a chatty child never fills the
        // pipe buffer and stalls.
        let wait = async {
            let (status, out, err) = tokio::join!(
                child.wait(),
                stdout_pipe.read_to_end(&mut stdout),
                stderr_pipe.read_to_end(&mut stderr),
            );
            out?;
            err?;
            status
        };

        let status = match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Ok(format!(
                    "代码执行超时（{}秒），请检查是否有无限循环或耗时操作",
                    self.timeout.as_secs()
                ));
            }
        };

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let error_output = String::from_utf8_lossy(&stderr).trim().to_string();
            let error_output = if error_output.is_empty() {
                "代码执行失败，无错误信息".to_string()
            } else {
                error_output
            };
            return Ok(format!("执行错误 (返回码: {code}):\n{error_output}"));
        }

        let output = String::from_utf8_lossy(&stdout).trim().to_string();
        if output.is_empty() {
            Ok("代码执行完成，无输出".to_string())
        } else {
            Ok(output)
        }
    }

}

fn resolve_script_path(workspace: &Path, file_path: &str) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let known_prefix = ["code/", "outputs/", "logs/", "temp/"]
        .iter()
        .any(|prefix| file_path.starts_with(prefix));
    if known_prefix {
        workspace.join(file_path)
    } else {
        // Bare filenames are taken relative to code/.
        workspace.join("code").join(file_path)
    }
}

/// Keep alphanumerics plus `._-`; append `.py` when missing.
fn sanitize_filename(filename: &str, fallback: &str) -> String {
    let mut safe: String = filename
        .chars()
        .filter(|c| c.is_alphanumeric() || "._-".contains(*c))
        .collect();
    if safe.is_empty() {
        safe = fallback.to_string();
    }
    if !safe.ends_with(".py") {
        safe.push_str(".py");
    }
    safe
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn normalize(path: &Path) -> PathBuf {
    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    match absolute_path.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => {
            // Lexical fallback for paths that do not exist.
            let mut normalized = PathBuf::new();
            for component in absolute_path.components() {
                match component {
                    std::path::Component::ParentDir => {
                        normalized.pop();
                    }
                    std::path::Component::CurDir => {}
                    other => normalized.push(other),
                }
            }
            normalized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok()
    }

    fn sandbox(dir: &TempDir) -> PythonSandbox {
        std::fs::create_dir_all(dir.path().join("code")).unwrap();
        PythonSandbox::new(dir.path()).with_timeout(Duration::from_secs(10))
    }

    #[test]
    fn sanitize_keeps_safe_characters_only() {
        assert_eq!(sanitize_filename("plot_x2", "f"), "plot_x2.py");
        assert_eq!(sanitize_filename("../../evil", "f"), "....evil.py");
        assert_eq!(sanitize_filename("a b/c", "f"), "abc.py");
        assert_eq!(sanitize_filename("", "code_1"), "code_1.py");
        assert_eq!(sanitize_filename("done.py", "f"), "done.py");
    }

    #[tokio::test]
    async fn execute_captures_stdout() {
        if !python_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let result = sandbox(&dir).execute_code("print('integral = 333.33')").await;
        assert!(result.contains("integral = 333.33"), "got: {result}");
    }

    #[tokio::test]
    async fn execute_reports_empty_output() {
        if !python_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let result = sandbox(&dir).execute_code("x = 1").await;
        assert_eq!(result, "代码执行完成，无输出");
    }

    #[tokio::test]
    async fn execute_reports_nonzero_exit_with_stderr() {
        if !python_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let result = sandbox(&dir).execute_code("raise ValueError('boom')").await;
        assert!(result.starts_with("执行错误 (返回码: 1)"), "got: {result}");
        assert!(result.contains("boom"));
    }

    #[tokio::test]
    async fn infinite_loop_hits_the_wall_clock_cap() {
        if !python_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let sandbox = PythonSandbox::new(dir.path()).with_timeout(Duration::from_secs(1));
        let result = sandbox.execute_code("while True:\n    pass").await;
        assert!(result.starts_with("代码执行超时（1秒）"), "got: {result}");
    }

    #[tokio::test]
    async fn save_and_execute_persists_the_script() {
        if !python_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir);
        let result = sandbox
            .save_and_execute("print('saved run')", "plot_x2")
            .await;
        assert!(result.contains("代码已成功保存到文件: plot_x2.py"), "got: {result}");
        assert!(result.contains("=== 执行结果 ==="));
        assert!(result.contains("saved run"));
        assert!(dir.path().join("code/plot_x2.py").is_file());
    }

    #[tokio::test]
    async fn execute_file_rejects_paths_outside_the_workspace() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir);
        let result = sandbox.execute_file("../../outside.py").await;
        assert!(result.starts_with("错误：文件路径"), "got: {result}");
    }

    #[tokio::test]
    async fn edit_requires_an_existing_file() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir);
        let result = sandbox.edit_code_file("missing", "print(1)").await;
        assert!(result.contains("不存在，无法修改"), "got: {result}");
    }

    #[tokio::test]
    async fn edit_writes_backup_then_new_content() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir);
        std::fs::write(dir.path().join("code/run.py"), "old").unwrap();

        let result = sandbox.edit_code_file("run", "print('new')").await;
        assert!(result.contains("已成功修改"), "got: {result}");

        let content = std::fs::read_to_string(dir.path().join("code/run.py")).unwrap();
        assert_eq!(content, "print('new')");

        let backups: Vec<_> = std::fs::read_dir(dir.path().join("code"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup_"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn list_code_files_reports_sizes() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir);
        std::fs::write(dir.path().join("code/a.py"), "print(1)").unwrap();
        std::fs::write(dir.path().join("code/notes.txt"), "x").unwrap();

        let result = sandbox.list_code_files().await;
        assert!(result.contains("找到 1 个Python代码文件"), "got: {result}");
        assert!(result.contains("a.py (8 bytes)"));
        assert!(!result.contains("notes.txt"));
    }

    #[tokio::test]
    async fn preamble_creates_plot_directory_before_user_code() {
        if !python_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir);
        let result = sandbox
            .execute_code("import os\nprint(os.path.isdir('outputs/plots'))")
            .await;
        assert!(result.contains("True"), "got: {result}");
    }

    #[tokio::test]
    async fn child_cwd_is_the_workspace_root() {
        if !python_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir);
        let result = sandbox
            .execute_code("import os\nprint(os.path.realpath(os.getcwd()))")
            .await;
        let expected = dir.path().canonicalize().unwrap();
        assert!(
            result.contains(&expected.display().to_string()),
            "got: {result}"
        );
    }
}
