//! Shell agent runner. Spawns the agent CLI and streams its output.
//!
//! The prompt goes to the child's stdin. Stdout and stderr are read line by
//! line; each line is optionally echoed to the operator and always captured.

use async_trait::async_trait;
use ralph_core::config::Capabilities;
use ralph_core::error::RunnerError;
use ralph_core::port::{AgentInvocation, AgentOutput, AgentRunner};
use std::io::{ErrorKind, Write};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::shell::{exit_code, shell_command};

pub struct ShellAgentRunner {
    timeout: Option<Duration>,
    echo: bool,
}

impl ShellAgentRunner {
    pub fn new() -> Self {
        Self {
            timeout: None,
            echo: true,
        }
    }

    /// Kill the agent if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Echo agent output to the terminal as it arrives.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

impl Default for ShellAgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Capabilities are advisory; the agent CLI reads them from the environment.
fn capability_env(capabilities: &Capabilities) -> Vec<(String, String)> {
    let mut env = vec![(
        "RALPH_NETWORK".to_string(),
        if capabilities.network { "1" } else { "0" }.to_string(),
    )];
    if !capabilities.writable_paths.is_empty() {
        let joined: Vec<String> = capabilities
            .writable_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        env.push(("RALPH_WRITABLE_PATHS".to_string(), joined.join(":")));
    }
    env
}

#[derive(Clone, Copy)]
enum Sink {
    Stdout,
    Stderr,
}

/// Read `reader` to the end, one line at a time.
async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    echo: Option<Sink>,
) -> std::io::Result<String> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        match echo {
            Some(Sink::Stdout) => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
            Some(Sink::Stderr) => {
                let _ = std::io::stderr().lock().write_all(text.as_bytes());
            }
            None => {}
        }
        captured.push_str(&text);
    }
    Ok(captured)
}

#[async_trait]
impl AgentRunner for ShellAgentRunner {
    async fn run_agent(&self, invocation: &AgentInvocation) -> Result<AgentOutput, RunnerError> {
        let command = invocation.command.clone();
        let started = Instant::now();

        let mut cmd = shell_command(&command, &invocation.working_dir);
        cmd.envs(&invocation.env)
            .envs(capability_env(&invocation.capabilities))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %command, prompt_len = invocation.prompt.len(), "Spawning agent");

        let mut child = cmd.spawn().map_err(|e| RunnerError::SpawnFailed {
            command: command.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let prompt = invocation.prompt.clone();
        let (out_sink, err_sink) = if self.echo {
            (Some(Sink::Stdout), Some(Sink::Stderr))
        } else {
            (None, None)
        };

        let run = async move {
            let feed = async move {
                if let Some(mut stdin) = stdin {
                    match stdin.write_all(prompt.as_bytes()).await {
                        // Agents that ignore stdin may close it early
                        Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                        other => other?,
                    }
                }
                Ok::<(), std::io::Error>(())
            };
            let (fed, out, err, status) = tokio::join!(
                feed,
                pump(stdout, out_sink),
                pump(stderr, err_sink),
                child.wait()
            );
            fed?;
            Ok::<_, std::io::Error>((out?, err?, status?))
        };

        let finished = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(command = %command, timeout_secs = limit.as_secs(), "Agent timed out");
                    return Err(RunnerError::Timeout {
                        command,
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => run.await,
        };

        let (stdout, stderr, status) = finished.map_err(|e| RunnerError::Io {
            command: command.clone(),
            reason: e.to_string(),
        })?;

        let exit_code = exit_code(status);
        let duration_ms = started.elapsed().as_millis() as u64;
        if exit_code != 0 {
            warn!(command = %command, exit_code, "Agent exited non-zero");
        } else {
            debug!(command = %command, duration_ms, "Agent finished");
        }

        Ok(AgentOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms,
        })
    }
}
