// Per-request transcode session: spawn, pump output, wind down

use std::ffi::OsString;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use super::command::TransformTool;
use super::feeder::{FeedError, Feeder};
use crate::config::MuxStrategy;
use crate::media::errors::TranscodeError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Tool diagnostics kept for error reports
const STDERR_TAIL: usize = 16 * 1024;

/// Lifecycle of one transcode session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    ProcessStarted,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MuxStrategy>,
    pub state: SessionState,
    /// Bytes forwarded to the output sink
    pub bytes_written: u64,
    /// Bytes read from all inputs
    pub bytes_fed: u64,
}

/// How the output pump stopped
#[derive(Debug)]
pub(crate) enum PumpEnd {
    Eof,
    /// The session token fired (an input failed)
    Cancelled,
    /// Writing to the sink failed
    Disconnected,
    ReadFailed(io::Error),
}

/// The spawned tool and its side channels
pub(crate) struct RunningTool {
    child: Child,
    pub stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

/// How the tool ended
pub(crate) struct ToolExit {
    status: ExitStatus,
    stderr: String,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

impl RunningTool {
    pub fn stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Wait for exit, killing the tool if it outlives `grace`
    pub async fn wait(mut self, grace: Option<Duration>) -> io::Result<ToolExit> {
        let status = match grace {
            Some(grace) => match timeout(grace, self.child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(grace_secs = grace.as_secs_f32(), "tool did not exit, killing it");
                    self.child.kill().await?;
                    self.child.wait().await?
                }
            },
            None => self.child.wait().await?,
        };

        let stderr = match self.stderr.take() {
            Some(mut task) => match timeout(Duration::from_secs(1), &mut task).await {
                Ok(Ok(text)) => text,
                _ => {
                    task.abort();
                    String::new()
                }
            },
            None => String::new(),
        };

        Ok(ToolExit { status, stderr })
    }
}

/// State shared by every step of one session
pub(crate) struct Session {
    pub id: String,
    tool: String,
    mode: &'static str,
    strategy: Option<MuxStrategy>,
    state: SessionState,
    token: CancellationToken,
    _guard: DropGuard,
    bytes_written: u64,
    exit_grace: Duration,
}

impl Session {
    pub fn new(
        tool: &dyn TransformTool,
        mode: &'static str,
        strategy: Option<MuxStrategy>,
        exit_grace: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);

        Self {
            id,
            tool: tool.name().to_string(),
            mode,
            strategy,
            state: SessionState::Created,
            _guard: token.clone().drop_guard(),
            token,
            bytes_written: 0,
            exit_grace,
        }
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("transcode", session = %self.id, mode = self.mode)
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, bytes = self.bytes_written, "session state");
        self.state = next;
    }

    /// Command for `tool` with stdout and stderr captured and no stdin
    pub fn command(&self, tool: &dyn TransformTool, args: Vec<OsString>) -> Command {
        trace!(program = %tool.program().display(), ?args, "tool command");
        let mut cmd = Command::new(tool.program());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn spawn(&mut self, cmd: &mut Command) -> Result<RunningTool, TranscodeError> {
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.transition(SessionState::Failed);
                return Err(TranscodeError::Spawn {
                    tool: self.tool.clone(),
                    source,
                });
            }
        };
        debug!(tool = %self.tool, pid = ?child.id(), "tool started");
        self.transition(SessionState::ProcessStarted);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(capture_stderr);
        Ok(RunningTool {
            child,
            stdout,
            stderr,
        })
    }

    /// Forward `reader` to `sink` in order, flushing every chunk
    pub async fn pump<R, W>(&mut self, reader: &mut R, sink: &mut W) -> PumpEnd
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let token = self.token.clone();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = tokio::select! {
                biased;
                _ = token.cancelled() => return PumpEnd::Cancelled,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return PumpEnd::Eof,
                    Ok(n) => n,
                    Err(err) => return PumpEnd::ReadFailed(err),
                },
            };

            if self.state == SessionState::ProcessStarted {
                self.transition(SessionState::Streaming);
            }

            let written = tokio::select! {
                biased;
                _ = token.cancelled() => return PumpEnd::Cancelled,
                written = write_chunk(sink, &buf[..n]) => written,
            };
            if let Err(err) = written {
                debug!(error = %err, bytes = self.bytes_written, "output sink closed");
                return PumpEnd::Disconnected;
            }
            self.bytes_written += n as u64;
        }
    }

    /// Pump the tool's stdout, then wind everything down
    ///
    /// Feeders are always joined before this returns, so no pipe, FIFO or
    /// scratch file is released while a feeder still uses it.
    pub async fn drive<W>(
        &mut self,
        mut running: RunningTool,
        output: &mut W,
        feeders: Vec<Feeder>,
    ) -> Result<SessionReport, TranscodeError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let end = match running.stdout.take() {
            Some(mut stdout) => self.pump(&mut stdout, output).await,
            None => PumpEnd::ReadFailed(io::Error::other("stdout not captured")),
        };

        if !matches!(end, PumpEnd::Eof) {
            self.token.cancel();
        }
        let exit = running.wait(Some(self.exit_grace)).await;
        // releases feeders still waiting on a FIFO the tool never opened
        self.token.cancel();

        let fed = settle(join_all(feeders).await);
        self.conclude(end, fed, exit)
    }

    /// Pick the session outcome
    ///
    /// Precedence: consumer disconnect, input failure, tool failure, output
    /// read failure.
    pub fn conclude(
        &mut self,
        end: PumpEnd,
        fed: Result<u64, TranscodeError>,
        exit: io::Result<ToolExit>,
    ) -> Result<SessionReport, TranscodeError> {
        if let PumpEnd::Disconnected = end {
            self.transition(SessionState::Cancelled);
            return Err(TranscodeError::ConsumerDisconnected {
                bytes_written: self.bytes_written,
            });
        }

        let bytes_fed = match fed {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail(err)),
        };

        let exit = match exit {
            Ok(exit) => exit,
            Err(source) => {
                self.transition(SessionState::Failed);
                return Err(TranscodeError::plumbing("tool exit status", source));
            }
        };
        if !exit.status.success() {
            self.transition(SessionState::Failed);
            return Err(TranscodeError::Execution {
                tool: self.tool.clone(),
                status: exit.status,
                stderr: exit.stderr,
            });
        }
        if !exit.stderr.is_empty() {
            trace!(stderr = %exit.stderr, "tool diagnostics");
        }

        match end {
            PumpEnd::Eof => {}
            PumpEnd::ReadFailed(source) => {
                self.transition(SessionState::Failed);
                return Err(TranscodeError::plumbing("tool output", source));
            }
            PumpEnd::Cancelled | PumpEnd::Disconnected => {
                self.transition(SessionState::Cancelled);
                return Err(TranscodeError::ConsumerDisconnected {
                    bytes_written: self.bytes_written,
                });
            }
        }

        self.transition(SessionState::Completed);
        Ok(SessionReport {
            session_id: self.id.clone(),
            mode: self.mode,
            strategy: self.strategy,
            state: self.state,
            bytes_written: self.bytes_written,
            bytes_fed,
        })
    }

    pub fn fail(&mut self, err: TranscodeError) -> TranscodeError {
        self.transition(SessionState::Failed);
        err
    }
}

async fn write_chunk<W>(sink: &mut W, chunk: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    sink.write_all(chunk).await?;
    sink.flush().await
}

async fn join_all(feeders: Vec<Feeder>) -> Vec<(&'static str, Result<u64, FeedError>)> {
    futures::future::join_all(feeders.into_iter().map(Feeder::join)).await
}

/// Total bytes fed, or the first input failure
///
/// Errors writing into the tool's inputs only matter through the tool's
/// own exit status.
fn settle(fed: Vec<(&'static str, Result<u64, FeedError>)>) -> Result<u64, TranscodeError> {
    let mut total = 0u64;
    for (input, result) in fed {
        match result {
            Ok(bytes) => total += bytes,
            Err(FeedError::Source(source)) => return Err(TranscodeError::Input { input, source }),
            Err(err) => trace!(input, error = %err, "feeder stopped"),
        }
    }
    Ok(total)
}

/// Keep the last STDERR_TAIL bytes of the tool's diagnostics
fn capture_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL {
                        let excess = tail.len() - STDERR_TAIL;
                        tail.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).trim().to_string()
    })
}
