//! Process tools: `run_command` (shell) and `run_python`.
//!
//! Both run a child process with piped output and a hard timeout.
//! stdout is capped at 8000 characters and stderr at 2000.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use super::types::{Tool, ToolResult, required_str, truncate_chars};
use crate::llm::LlmError;

const STDOUT_LIMIT: usize = 8000;
const STDERR_LIMIT: usize = 2000;

/// Captured output of a finished child process.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// stdout, capped.
    pub stdout: String,
    /// stderr, capped.
    pub stderr: String,
}

/// Outcome of [`run_with_timeout`] when the process did not finish.
#[derive(Debug)]
pub enum ProcessError {
    /// The process could not be started.
    Spawn(std::io::Error),
    /// The process was killed after the timeout.
    TimedOut,
    /// Waiting on the process failed.
    Wait(std::io::Error),
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `cmd` to completion, killing it after `timeout`.
///
/// Output pipes are drained on helper threads so a chatty child cannot
/// block on a full pipe.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(ProcessError::Spawn)?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let start = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if start.elapsed() > timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::TimedOut);
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => return Err(ProcessError::Wait(e)),
        }
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    Ok(ProcessOutput {
        status,
        stdout: truncate_chars(&stdout, STDOUT_LIMIT).0,
        stderr: truncate_chars(&stderr, STDERR_LIMIT).0,
    })
}

/// Executes shell commands via `/bin/sh -c`. Disabled unless explicitly allowed.
pub struct RunCommandTool {
    allowed: bool,
    timeout: Duration,
    workdir: PathBuf,
}

impl RunCommandTool {
    /// Create the tool.
    pub fn new(allowed: bool, timeout: Duration, workdir: PathBuf) -> Self {
        Self {
            allowed,
            timeout,
            workdir,
        }
    }
}

impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "执行Shell命令（30秒超时）。需要在配置中启用 TOOLS_ALLOW_SHELL=true。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "要执行的Shell命令"
                }
            },
            "required": ["command"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        if !self.allowed {
            return Ok(ToolResult::failure(
                "Shell commands are disabled. Set TOOLS_ALLOW_SHELL=true to enable.",
            ));
        }
        let command = required_str(&args, "command")?.trim();
        if command.is_empty() {
            return Ok(ToolResult::failure("No command provided."));
        }

        tracing::info!(command = %command, "running shell command");
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir);

        match run_with_timeout(cmd, self.timeout) {
            Ok(out) => {
                let code = out.status.code().unwrap_or(-1);
                let mut content = format!("Exit code: {code}\n");
                if !out.stdout.is_empty() {
                    content.push_str(&format!("stdout:\n{}\n", out.stdout));
                }
                if !out.stderr.is_empty() {
                    content.push_str(&format!("stderr:\n{}\n", out.stderr));
                }
                Ok(ToolResult {
                    content,
                    is_error: !out.status.success(),
                })
            }
            Err(ProcessError::TimedOut) => Ok(ToolResult::failure(format!(
                "Command timed out ({}s limit).",
                self.timeout.as_secs()
            ))),
            Err(ProcessError::Spawn(e) | ProcessError::Wait(e)) => {
                Ok(ToolResult::failure(format!("Command error: {e}")))
            }
        }
    }
}

/// Runs a Python snippet with `<python_bin> -c`.
pub struct RunPythonTool {
    enabled: bool,
    python_bin: String,
    timeout: Duration,
    workdir: PathBuf,
}

impl RunPythonTool {
    /// Create the tool.
    pub fn new(enabled: bool, python_bin: String, timeout: Duration, workdir: PathBuf) -> Self {
        Self {
            enabled,
            python_bin,
            timeout,
            workdir,
        }
    }
}

impl Tool for RunPythonTool {
    fn name(&self) -> &str {
        "run_python"
    }

    fn description(&self) -> &str {
        "执行Python代码并返回输出。可以用来做数据处理、文件操作、数学计算等任何Python能做的事。代码通过print()输出结果。30秒超时。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "要执行的Python代码。用print()输出需要的结果。"
                }
            },
            "required": ["code"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        if !self.enabled {
            return Ok(ToolResult::failure(
                "Python execution is disabled. Set PYTHON_EXEC_ENABLED=true to enable.",
            ));
        }
        let code = required_str(&args, "code")?;
        if code.trim().is_empty() {
            return Ok(ToolResult::failure("No code provided."));
        }

        let mut cmd = Command::new(&self.python_bin);
        cmd.arg("-c").arg(code).current_dir(&self.workdir);

        match run_with_timeout(cmd, self.timeout) {
            Ok(out) => {
                let mut content = out.stdout;
                if !out.stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&format!("[stderr]\n{}", out.stderr));
                }
                if !out.status.success() {
                    let code = out.status.code().unwrap_or(-1);
                    content.push_str(&format!("\n[exit code: {code}]"));
                }
                let content = content.trim();
                Ok(ToolResult {
                    content: if content.is_empty() {
                        "(no output)".to_owned()
                    } else {
                        content.to_owned()
                    },
                    is_error: !out.status.success(),
                })
            }
            Err(ProcessError::TimedOut) => Ok(ToolResult::failure(format!(
                "Python execution timed out ({}s limit).",
                self.timeout.as_secs()
            ))),
            Err(ProcessError::Spawn(e) | ProcessError::Wait(e)) => {
                Ok(ToolResult::failure(format!("Execution error: {e}")))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn shell(allowed: bool) -> RunCommandTool {
        RunCommandTool::new(allowed, Duration::from_secs(5), PathBuf::from("."))
    }

    #[test]
    fn disabled_shell_refuses() {
        let result = shell(false)
            .execute(serde_json::json!({"command": "echo hi"}))
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("TOOLS_ALLOW_SHELL"));
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let result = shell(true)
            .execute(serde_json::json!({"command": "echo hello"}))
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "Exit code: 0\nstdout:\nhello\n\n");
    }

    #[test]
    fn nonzero_exit_is_error_with_stderr() {
        let result = shell(true)
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}))
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.starts_with("Exit code: 3\n"));
        assert!(result.content.contains("stderr:\noops"));
    }

    #[test]
    fn timeout_kills_process() {
        let tool = RunCommandTool::new(true, Duration::from_millis(200), PathBuf::from("."));
        let result = tool
            .execute(serde_json::json!({"command": "sleep 5"}))
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("timed out"));
    }

    #[test]
    fn large_output_is_capped() {
        let result = shell(true)
            .execute(serde_json::json!({"command": "yes x | head -n 20000"}))
            .unwrap();
        let stdout = result.content.split("stdout:\n").nth(1).unwrap();
        assert!(stdout.chars().count() <= STDOUT_LIMIT + 1);
    }

    #[test]
    fn missing_command_is_tool_error() {
        assert!(shell(true).execute(serde_json::json!({})).is_err());
    }

    #[test]
    fn disabled_python_refuses() {
        let tool = RunPythonTool::new(
            false,
            "python3".into(),
            Duration::from_secs(5),
            PathBuf::from("."),
        );
        let result = tool
            .execute(serde_json::json!({"code": "print(1)"}))
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("PYTHON_EXEC_ENABLED"));
    }

    #[test]
    fn missing_interpreter_is_error_result() {
        let tool = RunPythonTool::new(
            true,
            "definitely-not-a-python-binary".into(),
            Duration::from_secs(5),
            PathBuf::from("."),
        );
        let result = tool
            .execute(serde_json::json!({"code": "print(1)"}))
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.starts_with("Execution error:"));
    }
}
