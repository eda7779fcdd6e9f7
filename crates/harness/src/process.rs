//! Subprocess execution
//!
//! Every external command (the control-plane CLI and the container runtime)
//! goes through this runner so streaming, capture, exit-code handling, and
//! cancellation behave the same everywhere.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hubtest_common::{Error, Result};

/// Grace period between SIGTERM and SIGKILL when cancelling a child
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Options for one command invocation
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory for the child
    pub cwd: Option<PathBuf>,

    /// Extra environment on top of the inherited one
    pub envs: Vec<(String, String)>,

    /// Keep the argv line and both streams out of the logs (credentials)
    pub suppress_output: bool,
}

impl ExecOptions {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(dir.into()),
            ..Default::default()
        }
    }

    pub fn suppressed(mut self) -> Self {
        self.suppress_output = true;
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((name.into(), value.into()));
        self
    }
}

/// Captured result of a completed command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs subprocesses with live-streamed, captured output
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cancel: CancellationToken,
}

impl ProcessRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Runner that ignores run-level cancellation, for teardown work that
    /// must complete while the run is shutting down
    pub fn detached(&self) -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Run a command to completion, failing on non-zero exit
    pub async fn run(
        &self,
        program: impl AsRef<OsStr>,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecOutput> {
        let program = program.as_ref();
        let program_name = program.to_string_lossy().to_string();
        let rendered = render_command(program, args);

        if opts.suppress_output {
            debug!("Running {} (output suppressed)", program_name);
        } else {
            info!("Running: {}", rendered);
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &opts.cwd {
            cmd.current_dir(dir);
        }
        for (name, value) in &opts.envs {
            cmd.env(name, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", program_name, e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let suppress = opts.suppress_output;

        let drained = async { tokio::join!(drain(stdout, suppress), drain(stderr, suppress)) };

        tokio::select! {
            (out, err) = drained => {
                let stdout = out?;
                let stderr = err?;
                let status = child.wait().await?;
                let code = status.code().unwrap_or(-1);

                if status.success() {
                    Ok(ExecOutput { code, stdout, stderr })
                } else {
                    Err(Error::CommandFailed {
                        command: if suppress { program_name } else { rendered },
                        code,
                        stderr: stderr.trim_end().to_string(),
                    })
                }
            }
            _ = self.cancel.cancelled() => {
                warn!("Cancellation requested, terminating {}", program_name);
                terminate(&mut child).await;
                Err(Error::Cancelled)
            }
        }
    }
}

/// Read one child stream to the end, logging each line unless suppressed
async fn drain<R>(stream: Option<R>, suppress: bool) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let stream = match stream {
        Some(s) => s,
        None => return Ok(String::new()),
    };

    let mut lines = BufReader::new(stream).lines();
    let mut captured = String::new();
    while let Some(line) = lines.next_line().await? {
        if !suppress {
            info!("{}", line);
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}

/// SIGTERM first, SIGKILL after the grace period
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
                return;
            }
            warn!("Child ignored SIGTERM, killing");
        }
    }

    let _ = child.kill().await;
}

fn render_command(program: &OsStr, args: &[String]) -> String {
    let mut rendered = program.to_string_lossy().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}
