//! Process helpers shared by every adapter that shells out to an external
//! binary (`kubectl`, `tmux`, `ssh`, `bd`, `coop`).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::error::ProcessError;

/// Captured result of a finished helper process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawn and wait for a process, optionally piping stdin.
pub async fn run_process(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
) -> Result<ExecOutput, ProcessError> {
    let mut cmd = Command::new(program);
    // Dropped futures (cancelled ticks, timeouts) must not leak children.
    cmd.kill_on_drop(true);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    let spawn_err = |source: std::io::Error| ProcessError::Spawn {
        program: program.to_string(),
        source,
    };

    let mut child = cmd.spawn().map_err(spawn_err)?;

    if let Some(input) = stdin {
        if let Some(mut child_stdin) = child.stdin.take() {
            child_stdin.write_all(input).await.map_err(spawn_err)?;
        }
    }

    let output = child.wait_with_output().await.map_err(spawn_err)?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a program with the caller's terminal attached and return its exit
/// code. Signals that kill the child map to 1.
pub async fn run_interactive(program: &str, args: &[String]) -> Result<i32, ProcessError> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;
    Ok(status.code().unwrap_or(1))
}

/// Replace the current process image with `program`. Only returns on
/// failure.
#[cfg(unix)]
pub async fn exec_or_spawn(program: &str, args: &[String]) -> Result<i32, ProcessError> {
    use std::os::unix::process::CommandExt;
    let source = std::process::Command::new(program).args(args).exec();
    Err(ProcessError::Spawn {
        program: program.to_string(),
        source,
    })
}

/// Without image replacement, proxy through a child and forward its exit
/// code.
#[cfg(not(unix))]
pub async fn exec_or_spawn(program: &str, args: &[String]) -> Result<i32, ProcessError> {
    run_interactive(program, args).await
}

/// Bound a command future by `limit`, mapping expiry to a contextual error.
pub async fn run_with_timeout(
    fut: impl std::future::Future<Output = Result<ExecOutput, ProcessError>>,
    limit: Duration,
    context: &str,
) -> Result<ExecOutput, ProcessError> {
    match timeout(limit, fut).await {
        Ok(out) => out,
        Err(_) => Err(ProcessError::TimedOut {
            context: context.to_string(),
            after: limit,
        }),
    }
}

/// Convert non-zero command status into a contextual error.
pub fn ensure_success(output: ExecOutput, context: &str) -> Result<ExecOutput, ProcessError> {
    if output.success() {
        return Ok(output);
    }

    let mut detail = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };
    if detail.is_empty() {
        detail = format!("command exited with {}", output.exit_code);
    }

    Err(ProcessError::Failed {
        context: context.to_string(),
        detail,
    })
}

/// Human-oriented duration formatting used in messages.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    if secs == 0 {
        return format!("{millis}ms");
    }
    if millis == 0 {
        if secs % 3600 == 0 {
            return format!("{}h", secs / 3600);
        }
        if secs % 60 == 0 {
            return format!("{}m", secs / 60);
        }
        return format!("{secs}s");
    }
    format!("{secs}.{millis:03}s")
}

/// Parse `500ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
///
/// Zero durations are rejected; every configured interval must make progress.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err("empty duration".into());
    }
    let (digits, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => text.split_at(idx),
        None => (text, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration `{raw}`"))?;
    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => return Err(format!("unknown duration unit `{other}` in `{raw}`")),
    };
    if duration.is_zero() {
        return Err(format!("duration `{raw}` must be greater than zero"));
    }
    Ok(duration)
}

/// Shell-safe single-quote escaping.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".into()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// Locate an executable by name on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// True when `path` is a regular file with an execute bit set.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
