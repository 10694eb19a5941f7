//! Filesystem tools: `read_file`, `write_file`, `list_directory`, `search_files`.
//!
//! Relative paths resolve against the configured workspace directory and
//! a leading `~` expands to the home directory.

use std::path::{Path, PathBuf};

use super::types::{Tool, ToolResult, required_str};
use crate::llm::LlmError;

/// Largest file `read_file` will return.
pub const MAX_READ_BYTES: u64 = 100_000;
const MAX_LIST_ENTRIES: usize = 100;
const MAX_SEARCH_RESULTS: usize = 50;

fn resolve(workspace: &Path, raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        workspace.join(expanded)
    }
}

fn human_size(size: u64) -> String {
    if size < 1024 {
        format!("{size} B")
    } else if size < 1024 * 1024 {
        format!("{:.1} KB", size as f64 / 1024.0)
    } else {
        format!("{:.1} MB", size as f64 / 1024.0 / 1024.0)
    }
}

/// Reads a UTF-8 text file (lossy), up to [`MAX_READ_BYTES`].
pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    /// Create the tool rooted at `workspace`.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "读取文件内容（最大100KB）。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "文件路径" }
            },
            "required": ["path"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let raw = required_str(&args, "path")?;
        if raw.trim().is_empty() {
            return Ok(ToolResult::failure("No path provided."));
        }
        let path = resolve(&self.workspace, raw);
        if !path.exists() {
            return Ok(ToolResult::failure(format!(
                "File not found: {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Ok(ToolResult::failure(format!("Not a file: {}", path.display())));
        }
        let size = std::fs::metadata(&path)
            .map_err(|e| LlmError::Tool(format!("Read error: {e}")))?
            .len();
        if size > MAX_READ_BYTES {
            return Ok(ToolResult::failure(format!(
                "File too large ({size} bytes). Max 100KB."
            )));
        }
        let bytes =
            std::fs::read(&path).map_err(|e| LlmError::Tool(format!("Read error: {e}")))?;
        Ok(ToolResult::success(String::from_utf8_lossy(&bytes)))
    }
}

/// Writes text to a file, creating parent directories.
pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    /// Create the tool rooted at `workspace`.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "写入内容到文件。如果目录不存在会自动创建。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "文件路径" },
                "content": { "type": "string", "description": "要写入的内容" }
            },
            "required": ["path", "content"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let raw = required_str(&args, "path")?;
        if raw.trim().is_empty() {
            return Ok(ToolResult::failure("No path provided."));
        }
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let path = resolve(&self.workspace, raw);

        let written = path
            .parent()
            .map_or(Ok(()), |parent| std::fs::create_dir_all(parent))
            .and_then(|()| std::fs::write(&path, content));
        match written {
            Ok(()) => Ok(ToolResult::success(format!(
                "Written {} chars to {}",
                content.chars().count(),
                path.display()
            ))),
            Err(e) => Ok(ToolResult::failure(format!("Write error: {e}"))),
        }
    }
}

/// Lists a directory: folders first, then files, by lowercase name.
pub struct ListDirectoryTool {
    workspace: PathBuf,
}

impl ListDirectoryTool {
    /// Create the tool rooted at `workspace`.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "列出目录中的文件和文件夹，显示大小和修改时间。用于探索文件系统。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "目录路径。默认为当前目录。支持 ~ 表示用户主目录。"
                }
            },
            "required": []
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = resolve(&self.workspace, raw);
        if !path.exists() {
            return Ok(ToolResult::failure(format!(
                "Directory not found: {}",
                path.display()
            )));
        }
        if !path.is_dir() {
            return Ok(ToolResult::failure(format!(
                "Not a directory: {}",
                path.display()
            )));
        }

        let read = match std::fs::read_dir(&path) {
            Ok(read) => read,
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                    "Error listing directory: {e}"
                )));
            }
        };
        let mut entries: Vec<(bool, String, Option<std::fs::Metadata>)> = read
            .filter_map(|e| e.ok())
            .map(|e| {
                let meta = e.metadata().ok();
                let is_dir = meta.as_ref().is_some_and(|m| m.is_dir());
                (is_dir, e.file_name().to_string_lossy().into_owned(), meta)
            })
            .collect();
        entries.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase()))
        });

        let total = entries.len();
        let mut lines = vec![format!("Directory: {}\n", path.display())];
        for (is_dir, name, meta) in entries.iter().take(MAX_LIST_ENTRIES) {
            match meta {
                _ if *is_dir => lines.push(format!("  [DIR]  {name}/")),
                Some(meta) => {
                    let mtime = meta
                        .modified()
                        .ok()
                        .map(|t| {
                            chrono::DateTime::<chrono::Local>::from(t)
                                .format("%Y-%m-%d %H:%M")
                                .to_string()
                        })
                        .unwrap_or_default();
                    lines.push(format!("  {:>10}  {mtime}  {name}", human_size(meta.len())));
                }
                None => lines.push(format!("  [???]  {name}")),
            }
        }
        if total > MAX_LIST_ENTRIES {
            lines.push(format!(
                "\n  ... and {} more entries",
                total - MAX_LIST_ENTRIES
            ));
        }
        lines.push(format!("\nTotal: {total} items"));
        Ok(ToolResult::success(lines.join("\n")))
    }
}

/// Recursively finds files whose names match a glob pattern.
pub struct SearchFilesTool {
    workspace: PathBuf,
}

impl SearchFilesTool {
    /// Create the tool rooted at `workspace`.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "按文件名模式搜索文件。使用glob语法，如 '*.py' 搜索Python文件，'*.csv' 搜索CSV文件。递归搜索子目录。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "文件名匹配模式（glob语法），如 '*.py', '*.csv', 'report*'"
                },
                "directory": {
                    "type": "string",
                    "description": "搜索起始目录。默认为当前目录。支持 ~ 表示用户主目录。"
                }
            },
            "required": ["pattern"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let pattern = required_str(&args, "pattern")?.trim();
        if pattern.is_empty() {
            return Ok(ToolResult::failure("No search pattern provided."));
        }
        let raw_dir = args
            .get("directory")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let dir = resolve(&self.workspace, raw_dir);
        if !dir.is_dir() {
            return Ok(ToolResult::failure(format!(
                "Not a directory: {}",
                dir.display()
            )));
        }

        let full = format!(
            "{}/**/{pattern}",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let paths = match glob::glob(&full) {
            Ok(paths) => paths,
            Err(e) => return Ok(ToolResult::failure(format!("Search error: {e}"))),
        };
        let matches: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
        if matches.is_empty() {
            return Ok(ToolResult::success(format!(
                "No files matching '{pattern}' in {}",
                dir.display()
            )));
        }

        let shown = matches.len().min(MAX_SEARCH_RESULTS);
        let mut lines = vec![format!(
            "Found {shown} file(s) matching '{pattern}' in {}:\n",
            dir.display()
        )];
        for m in matches.iter().take(MAX_SEARCH_RESULTS) {
            let rel = m.strip_prefix(&dir).unwrap_or(m);
            match std::fs::metadata(m) {
                Ok(meta) => lines.push(format!(
                    "  {}  ({})",
                    rel.display(),
                    human_size(meta.len())
                )),
                Err(_) => lines.push(format!("  {}", rel.display())),
            }
        }
        if matches.len() > MAX_SEARCH_RESULTS {
            lines.push(format!(
                "\n  ... and {} more matches",
                matches.len() - MAX_SEARCH_RESULTS
            ));
        }
        Ok(ToolResult::success(lines.join("\n")))
    }
}
