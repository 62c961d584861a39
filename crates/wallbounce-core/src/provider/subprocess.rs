//! Subprocess provider adapter.
//!
//! Spawns a vendor CLI with an explicit argument vector, never through a
//! shell, so no input sanitization question ever arises. The prompt is
//! written to the child's standard input (UTF-8, EOF-terminated) and the
//! response is read from standard output until EOF; standard error is
//! captured for diagnostics only. On timeout or cancellation the child's
//! process group receives a terminate signal, then a kill signal after a
//! grace period.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use super::{
    HealthStatus, InvocationContext, Provider, ProviderDescriptor, ProviderOutput, TokenUsage,
};
use crate::error::ProviderError;
use crate::safety::redact_secrets;

/// How the child's standard output is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The whole of standard output, trimmed, is the response text.
    #[default]
    Raw,
    /// The last non-empty line of standard output is a JSON envelope:
    /// `{"content": "...", "confidence": 0.9, "reasoning": "...",
    ///   "input_tokens": 10, "output_tokens": 5}`; all fields except
    /// `content` optional.
    JsonEnvelope,
}

/// Limit on captured stderr carried in error messages.
const STDERR_CAP: usize = 2048;

/// Default grace period between terminate and kill.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Default probe arguments for health checks.
const DEFAULT_HEALTH_ARGS: &[&str] = &["--version"];

/// Provider adapter that runs a vendor CLI, with no shell anywhere in the path.
pub struct SubprocessProvider {
    descriptor: ProviderDescriptor,
    program: String,
    args: Vec<String>,
    health_args: Vec<String>,
    output_format: OutputFormat,
    grace: Duration,
}

impl SubprocessProvider {
    /// Create an adapter spawning `program` with `args` on each invocation.
    pub fn new(
        descriptor: ProviderDescriptor,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            descriptor,
            program: program.into(),
            args,
            health_args: DEFAULT_HEALTH_ARGS.iter().map(|s| (*s).to_string()).collect(),
            output_format: OutputFormat::Raw,
            grace: DEFAULT_GRACE,
        }
    }

    /// Set how standard output is parsed.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set the arguments used by [`Provider::health_check`].
    pub fn with_health_args(mut self, args: Vec<String>) -> Self {
        self.health_args = args;
        self
    }

    /// Set the terminate-to-kill grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Terminate the child's process group, escalating to kill after the
    /// grace period.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // The child leads its own process group; signal the group so
            // grandchildren die with it.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
            if tokio::time::timeout(self.grace, child.wait()).await.is_ok() {
                return;
            }
        }
        let _ = child.kill().await;
    }

    fn parse_output(&self, stdout: &[u8]) -> Result<ProviderOutput, ProviderError> {
        let text = String::from_utf8_lossy(stdout);
        match self.output_format {
            OutputFormat::Raw => {
                let content = text.trim().to_string();
                if content.is_empty() {
                    return Err(ProviderError::Parse("provider produced no output".into()));
                }
                Ok(ProviderOutput {
                    content,
                    ..Default::default()
                })
            }
            OutputFormat::JsonEnvelope => {
                let line = text
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .ok_or_else(|| ProviderError::Parse("provider produced no output".into()))?;
                let envelope: Envelope = serde_json::from_str(line.trim())
                    .map_err(|e| ProviderError::Parse(format!("bad response envelope: {e}")))?;
                Ok(ProviderOutput {
                    content: envelope.content,
                    confidence: envelope.confidence,
                    reasoning: envelope.reasoning,
                    usage: TokenUsage {
                        input_tokens: envelope.input_tokens.unwrap_or(0),
                        output_tokens: envelope.output_tokens.unwrap_or(0),
                    },
                })
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct Envelope {
    content: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

/// Cap a string at [`STDERR_CAP`] bytes without splitting a character.
fn cap_at_boundary(mut s: String) -> String {
    if s.len() > STDERR_CAP {
        let mut end = STDERR_CAP;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

async fn slurp<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

enum RunOutcome {
    Done {
        status: std::process::ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
    Canceled,
}

#[async_trait::async_trait]
impl Provider for SubprocessProvider {
    fn describe(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        query: &str,
        ctx: &InvocationContext,
    ) -> Result<ProviderOutput, ProviderError> {
        let prompt = ctx.full_prompt(query);

        let mut child = self
            .command(&self.args)
            .spawn()
            .map_err(|e| ProviderError::Spawn {
                message: format!("{}: {e}", self.program),
            })?;

        let mut stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tracing::debug!(
            provider = %self.descriptor.id,
            program = %self.program,
            prompt_chars = prompt.len(),
            "Subprocess provider invoked"
        );

        let outcome = {
            let work = async {
                let writer = async {
                    if let Some(stdin) = stdin.as_mut() {
                        // A broken pipe just means the child does not read
                        // stdin; its stdout still decides the outcome.
                        let _ = stdin.write_all(prompt.as_bytes()).await;
                        let _ = stdin.shutdown().await;
                    }
                    drop(stdin.take());
                };
                let (
                    (),
                    stdout_buf,
                    stderr_buf,
                ) = tokio::join!(writer, slurp(stdout), slurp(stderr));
                let status = child.wait().await;
                (status, stdout_buf, stderr_buf)
            };
            tokio::pin!(work);

            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => RunOutcome::Canceled,
                () = tokio::time::sleep(ctx.timeout) => RunOutcome::TimedOut,
                (status, stdout_buf, stderr_buf) = &mut work => {
                    match status {
                        Ok(status) => RunOutcome::Done { status, stdout: stdout_buf, stderr: stderr_buf },
                        Err(e) => return Err(ProviderError::Spawn { message: e.to_string() }),
                    }
                }
            }
        };

        match outcome {
            RunOutcome::Done {
                status,
                stdout,
                stderr,
            } => {
                if !status.success() {
                    let stderr_text =
                        cap_at_boundary(redact_secrets(String::from_utf8_lossy(&stderr).trim()));
                    return Err(ProviderError::NonZeroExit {
                        code: status.code().unwrap_or(-1),
                        stderr: stderr_text,
                    });
                }
                self.parse_output(&stdout)
            }
            RunOutcome::TimedOut => {
                self.terminate(&mut child).await;
                Err(ProviderError::Timeout {
                    seconds: ctx.timeout.as_secs(),
                })
            }
            RunOutcome::Canceled => {
                self.terminate(&mut child).await;
                Err(ProviderError::Canceled)
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let result = async {
            let mut child = self
                .command(&self.health_args)
                .spawn()
                .map_err(|e| format!("{}: {e}", self.program))?;
            drop(child.stdin.take());
            let stderr = child.stderr.take();
            let status = child.wait().await.map_err(|e| e.to_string())?;
            if status.success() {
                Ok(())
            } else {
                let stderr_buf = slurp(stderr).await;
                Err(format!(
                    "exit status {}: {}",
                    status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&stderr_buf).trim()
                ))
            }
        };

        match tokio::time::timeout(Duration::from_secs(5), result).await {
            Ok(Ok(())) => HealthStatus {
                ok: true,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: None,
            },
            Ok(Err(detail)) => HealthStatus {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: Some(redact_secrets(&detail)),
            },
            Err(_) => HealthStatus {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: Some("health probe timed out".into()),
            },
        }
    }
}
