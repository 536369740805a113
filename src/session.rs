/// External tool invocation: spawn one subprocess, wait for it, and report
/// what it printed (exit code, output bytes, duration).
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// A fully resolved command line for an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of a tool run whose output went to a file.
#[derive(Debug)]
pub struct SessionResult {
    /// Process exit code (None if killed by signal).
    pub exit_code: Option<i32>,
    /// Total bytes written to the output file.
    pub output_bytes: u64,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl SessionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Result of a tool run captured in memory.
#[derive(Debug)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// First non-empty stderr line, for short failure messages.
    pub fn error_line(&self) -> String {
        self.stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match self.exit_code {
                Some(code) => format!("exited with status {code}"),
                None => "killed by signal".to_string(),
            })
    }
}

/// Errors that can occur while running an external tool.
#[derive(Debug)]
pub enum SessionError {
    /// Failed to create the output file.
    OutputFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the subprocess.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Failed while waiting on the subprocess.
    Io { source: std::io::Error },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::OutputFile { path, source } => {
                write!(
                    f,
                    "failed to create output file {}: {}",
                    path.display(),
                    source
                )
            }
            SessionError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {}", program, source)
            }
            SessionError::Io { source } => {
                write!(f, "I/O error while running tool: {}", source)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::OutputFile { source, .. } => Some(source),
            SessionError::Spawn { source, .. } => Some(source),
            SessionError::Io { source } => Some(source),
        }
    }
}

/// Run `command` with stdout+stderr both written to `output_path`.
pub async fn run_to_file(
    command: &ToolCommand,
    output_path: &Path,
) -> Result<SessionResult, SessionError> {
    let output_file = std::fs::File::create(output_path).map_err(|e| SessionError::OutputFile {
        path: output_path.to_path_buf(),
        source: e,
    })?;
    // Second handle for stderr since File doesn't impl Clone
    let output_file_stderr = output_file
        .try_clone()
        .map_err(|e| SessionError::OutputFile {
            path: output_path.to_path_buf(),
            source: e,
        })?;

    tracing::debug!(
        command = %command,
        output = %output_path.display(),
        "spawning tool"
    );

    let start = Instant::now();

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(output_file))
        .stderr(Stdio::from(output_file_stderr))
        .spawn()
        .map_err(|e| SessionError::Spawn {
            program: command.program.clone(),
            source: e,
        })?;

    let status = child
        .wait()
        .await
        .map_err(|e| SessionError::Io { source: e })?;

    let duration = start.elapsed();
    let output_bytes = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
    let exit_code = status.code();

    tracing::debug!(
        exit_code = ?exit_code,
        output_bytes,
        duration_ms = duration.as_millis() as u64,
        "tool finished"
    );

    Ok(SessionResult {
        exit_code,
        output_bytes,
        duration,
    })
}

/// Run `command` and capture stdout and stderr in memory.
pub async fn run_captured(command: &ToolCommand) -> Result<CapturedOutput, SessionError> {
    tracing::debug!(command = %command, "spawning tool");

    let start = Instant::now();
    let output = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SessionError::Spawn {
            program: command.program.clone(),
            source: e,
        })?;
    let duration = start.elapsed();

    Ok(CapturedOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn display_joins_program_and_args() {
        let cmd = ToolCommand::new("pgbench").args(["-c", "8", "db"]);
        assert_eq!(cmd.to_string(), "pgbench -c 8 db");
    }

    #[tokio::test]
    async fn run_to_file_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("out.txt");

        let result = run_to_file(&sh("echo stdout-line; echo stderr-line >&2"), &output_path)
            .await
            .unwrap();

        assert!(result.success());
        let contents = std::fs::read_to_string(&output_path).unwrap();
        assert!(contents.contains("stdout-line"));
        assert!(contents.contains("stderr-line"));
    }

    #[tokio::test]
    async fn run_to_file_reports_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("bytes.txt");

        let result = run_to_file(&ToolCommand::new("printf").arg("ABCDE"), &output_path)
            .await
            .unwrap();
        assert_eq!(result.output_bytes, 5);
    }

    #[tokio::test]
    async fn run_to_file_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("fail.txt");

        let result = run_to_file(&sh("exit 42"), &output_path).await.unwrap();
        assert_eq!(result.exit_code, Some(42));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn run_to_file_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("spawn-fail.txt");

        let err = run_to_file(&ToolCommand::new("nonexistent-binary-xyz"), &output_path)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn nonexistent-binary-xyz"));
    }

    #[tokio::test]
    async fn run_to_file_bad_output_path() {
        let err = run_to_file(
            &ToolCommand::new("echo").arg("hello"),
            Path::new("/nonexistent-dir/impossible/output.txt"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::OutputFile { .. }));
    }

    #[tokio::test]
    async fn run_captured_splits_streams() {
        let out = run_captured(&sh("echo out; echo 'ERROR:  boom' >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.error_line(), "ERROR:  boom");
    }

    #[tokio::test]
    async fn error_line_falls_back_to_status() {
        let out = run_captured(&sh("exit 2")).await.unwrap();
        assert_eq!(out.error_line(), "exited with status 2");
    }
}
