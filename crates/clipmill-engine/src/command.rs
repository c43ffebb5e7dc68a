//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use clipmill_core::{Error, Result};

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How many trailing stderr bytes to keep in an error message.
const STDERR_TAIL: usize = 2048;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use clipmill_engine::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> clipmill_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("error")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/video.mov")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            current_dir: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Set the working directory for the child process.
    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the process exceeds the configured deadline.
    /// - [`Error::Execute`] if the process exits non-zero (message includes
    ///   the stderr tail) or fails to spawn.
    pub async fn execute(&self) -> Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = self.base_command();
        let child = cmd
            .spawn()
            .map_err(|e| Error::execute(format!("{program_name}: failed to spawn: {e}")))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(Error::execute(format!(
                        "{program_name}: exited with status {}: {}",
                        output.status,
                        tail(&tool_output.stderr)
                    )));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(Error::execute(format!(
                "{program_name}: I/O error waiting for process: {e}"
            ))),
            // The cancelled wait_with_output future drops the child, and
            // kill_on_drop reaps it.
            Err(_elapsed) => Err(Error::timeout(program_name, self.timeout)),
        }
    }

    /// Execute the command, invoking `on_line` for every stdout line as it
    /// arrives. Stderr is collected and reported on failure.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`ToolCommand::execute`].
    pub async fn execute_streaming<F>(&self, mut on_line: F) -> Result<ExitStatus>
    where
        F: FnMut(&str) + Send,
    {
        let program_name = self.program_name();

        let mut cmd = self.base_command();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::execute(format!("{program_name}: failed to spawn: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::execute(format!("{program_name}: stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::execute(format!("{program_name}: stderr not captured")))?;

        // Drain stderr concurrently so the child never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let mut reader = BufReader::new(stderr);
            let _ = reader.read_to_string(&mut buf).await;
            buf
        });

        let drive = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await.map_err(|e| {
                Error::execute(format!("{program_name}: error reading stdout: {e}"))
            })? {
                on_line(&line);
            }
            child
                .wait()
                .await
                .map_err(|e| Error::execute(format!("{program_name}: wait failed: {e}")))
        };

        let status = match tokio::time::timeout(self.timeout, drive).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => {
                return Err(Error::timeout(program_name, self.timeout));
            }
        };

        if !status.success() {
            let stderr_text = stderr_task.await.unwrap_or_default();
            return Err(Error::execute(format!(
                "{program_name}: exited with status {status}: {}",
                tail(&stderr_text)
            )));
        }

        Ok(status)
    }
}

/// Trailing slice of a (possibly long) stderr capture.
fn tail(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().nth_back(STDERR_TAIL) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}
