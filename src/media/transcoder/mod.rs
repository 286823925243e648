// Stream transcoder/muxer driving an external transform tool
//
// Two modes: a single-stream re-encode (input -> stdin, stdout -> sink) and
// a dual-stream mux whose input plumbing is picked by `MuxStrategy`.

mod command;
mod feeder;
mod plumbing;
mod session;

#[cfg(all(test, unix))]
pub(crate) mod testing;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tracing::Instrument;

pub use command::{FfmpegTool, InputSpec, OutputSpec, TransformTool};
pub use session::{SessionReport, SessionState};

use self::feeder::{feed, FeedError, Feeder};
use self::session::{PumpEnd, Session};
use crate::config::{MuxStrategy, PipelineConfig};
use crate::media::errors::TranscodeError;
use crate::media::traits::ByteStream;

#[cfg(unix)]
const VIDEO_FD: i32 = 3;
#[cfg(unix)]
const AUDIO_FD: i32 = 4;

/// Runs transcode sessions; cheap to clone and share across requests
///
/// Holds no per-session state: each call owns its own process, pipes and
/// scratch files.
#[derive(Clone)]
pub struct Transcoder {
    tool: Arc<dyn TransformTool>,
    scratch_dir: PathBuf,
    exit_grace: Duration,
}

impl Transcoder {
    pub fn new(tool: Arc<dyn TransformTool>) -> Self {
        Self {
            tool,
            scratch_dir: std::env::temp_dir(),
            exit_grace: Duration::from_secs(5),
        }
    }

    /// Transcoder running ffmpeg at `ffmpeg_path` with the configured knobs
    pub fn from_config(ffmpeg_path: impl Into<PathBuf>, config: &PipelineConfig) -> Self {
        let tool = FfmpegTool::new(ffmpeg_path).with_frag_duration(config.frag_duration_us);
        Self::new(Arc::new(tool))
            .with_scratch_dir(config.scratch_dir.clone())
            .with_exit_grace(config.exit_grace)
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    fn session(&self, mode: &'static str, strategy: Option<MuxStrategy>) -> Session {
        Session::new(self.tool.as_ref(), mode, strategy, self.exit_grace)
    }

    /// Re-encode `input` and write the result to `output` as it is produced
    pub async fn transcode<W>(
        &self,
        input: ByteStream,
        output: &mut W,
    ) -> Result<SessionReport, TranscodeError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut session = self.session("transcode", None);
        let span = session.span();

        async move {
            let args = self
                .tool
                .transcode_args(&InputSpec::Stdin, &OutputSpec::Stdout);
            let mut cmd = session.command(self.tool.as_ref(), args);
            cmd.stdin(Stdio::piped());

            let mut running = session.spawn(&mut cmd)?;
            let stdin = match running.stdin() {
                Some(stdin) => stdin,
                None => {
                    let err = std::io::Error::other("stdin not captured");
                    return Err(session.fail(TranscodeError::plumbing("tool input", err)));
                }
            };

            let token = session.token();
            let feeder = Feeder::spawn("input", feed("input", input, stdin, token));
            session.drive(running, output, vec![feeder]).await
        }
        .instrument(span)
        .await
    }

    /// Mux a video-only and an audio-only stream into one streamable MP4
    ///
    /// Both input streams are consumed and closed on every path. Cleanup of
    /// pipes, FIFOs and scratch files is complete when this returns.
    pub async fn mux<W>(
        &self,
        video: ByteStream,
        audio: ByteStream,
        output: &mut W,
        strategy: MuxStrategy,
    ) -> Result<SessionReport, TranscodeError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut session = self.session("mux", Some(strategy));
        let span = session.span();

        async move {
            tracing::debug!(%strategy, "muxing");
            match strategy {
                #[cfg(unix)]
                MuxStrategy::ExtraFds => self.mux_extra_fds(&mut session, video, audio, output).await,
                #[cfg(unix)]
                MuxStrategy::NamedPipes => {
                    self.mux_named_pipes(&mut session, video, audio, output).await
                }
                #[cfg(not(unix))]
                MuxStrategy::ExtraFds | MuxStrategy::NamedPipes => {
                    Err(session.fail(TranscodeError::Unsupported(strategy.as_str())))
                }
                MuxStrategy::TempFiles => {
                    self.mux_temp_files(&mut session, video, audio, output).await
                }
            }
        }
        .instrument(span)
        .await
    }

    #[cfg(unix)]
    async fn mux_extra_fds<W>(
        &self,
        session: &mut Session,
        video: ByteStream,
        audio: ByteStream,
        output: &mut W,
    ) -> Result<SessionReport, TranscodeError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        use std::os::fd::AsRawFd;
        use self::plumbing::FdPipe;

        let video_pipe =
            FdPipe::new().map_err(|e| session.fail(TranscodeError::plumbing("video pipe", e)))?;
        let audio_pipe =
            FdPipe::new().map_err(|e| session.fail(TranscodeError::plumbing("audio pipe", e)))?;
        let video_tx = FdPipe::sender(video_pipe.write)
            .map_err(|e| session.fail(TranscodeError::plumbing("video pipe", e)))?;
        let audio_tx = FdPipe::sender(audio_pipe.write)
            .map_err(|e| session.fail(TranscodeError::plumbing("audio pipe", e)))?;

        let args = self.tool.mux_args(
            &InputSpec::Fd(VIDEO_FD),
            &InputSpec::Fd(AUDIO_FD),
            &OutputSpec::Stdout,
        );
        let mut cmd = session.command(self.tool.as_ref(), args);
        plumbing::map_fds(
            &mut cmd,
            [
                (video_pipe.read.as_raw_fd(), VIDEO_FD),
                (audio_pipe.read.as_raw_fd(), AUDIO_FD),
            ],
        );

        let running = session.spawn(&mut cmd);
        // the child holds its own copies; ours would keep the pipes from reaching EOF
        drop(video_pipe.read);
        drop(audio_pipe.read);
        let running = running?;

        let token = session.token();
        let feeders = vec![
            Feeder::spawn("video", feed("video", video, video_tx, token.clone())),
            Feeder::spawn("audio", feed("audio", audio, audio_tx, token)),
        ];
        session.drive(running, output, feeders).await
    }

    #[cfg(unix)]
    async fn mux_named_pipes<W>(
        &self,
        session: &mut Session,
        video: ByteStream,
        audio: ByteStream,
        output: &mut W,
    ) -> Result<SessionReport, TranscodeError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        use self::plumbing::{open_fifo_writer, FifoPair};

        let fifos = FifoPair::create(&self.scratch_dir, &session.id)
            .map_err(|e| session.fail(TranscodeError::plumbing("named pipes", e)))?;

        let args = self.tool.mux_args(
            &InputSpec::Path(fifos.video.clone()),
            &InputSpec::Path(fifos.audio.clone()),
            &OutputSpec::Stdout,
        );
        let mut cmd = session.command(self.tool.as_ref(), args);
        let running = session.spawn(&mut cmd)?;

        let token = session.token();
        let feeders = [("video", video, fifos.video.clone()), ("audio", audio, fifos.audio.clone())]
            .into_iter()
            .map(|(input, source, path)| {
                let token = token.clone();
                Feeder::spawn(input, async move {
                    let sink = open_fifo_writer(&path, &token).await?;
                    feed(input, source, sink, token).await
                })
            })
            .collect();

        let result = session.drive(running, output, feeders).await;
        drop(fifos);
        result
    }

    async fn mux_temp_files<W>(
        &self,
        session: &mut Session,
        video: ByteStream,
        audio: ByteStream,
        output: &mut W,
    ) -> Result<SessionReport, TranscodeError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let scratch = |role: &str, suffix: &str| {
            plumbing::scratch_file(&self.scratch_dir, role, suffix)
                .map_err(|e| TranscodeError::plumbing("scratch file", e))
        };
        let staged_video = scratch("video", ".mp4").map_err(|e| session.fail(e))?;
        let staged_audio = scratch("audio", ".m4a").map_err(|e| session.fail(e))?;
        let muxed = scratch("muxed", ".mp4").map_err(|e| session.fail(e))?;

        let (video_file, audio_file) = match open_writers(&staged_video, &staged_audio) {
            Ok(files) => files,
            Err(err) => return Err(session.fail(TranscodeError::plumbing("scratch file", err))),
        };

        let token = session.token();
        let (video_fed, audio_fed) = tokio::join!(
            feed("video", video, video_file, token.clone()),
            feed("audio", audio, audio_file, token),
        );
        let bytes_fed = match staged(vec![("video", video_fed), ("audio", audio_fed)]) {
            Ok(bytes) => bytes,
            Err(err) => return Err(session.fail(err)),
        };
        tracing::debug!("inputs staged");

        let args = self.tool.mux_args(
            &InputSpec::Path(staged_video.path().to_path_buf()),
            &InputSpec::Path(staged_audio.path().to_path_buf()),
            &OutputSpec::Path(muxed.path().to_path_buf()),
        );
        let mut cmd = session.command(self.tool.as_ref(), args);
        cmd.stdout(Stdio::null());
        let running = session.spawn(&mut cmd)?;

        let exit = running.wait(None).await;
        let exit_ok = matches!(&exit, Ok(exit) if exit.success());
        let end = if exit_ok {
            match tokio::fs::File::open(muxed.path()).await {
                Ok(mut file) => session.pump(&mut file, output).await,
                Err(err) => PumpEnd::ReadFailed(err),
            }
        } else {
            PumpEnd::Eof
        };

        session.conclude(end, Ok(bytes_fed), exit)
    }
}

fn open_writers(
    video: &tempfile::NamedTempFile,
    audio: &tempfile::NamedTempFile,
) -> std::io::Result<(tokio::fs::File, tokio::fs::File)> {
    Ok((plumbing::scratch_writer(video)?, plumbing::scratch_writer(audio)?))
}

/// Total bytes staged, or the first staging failure
///
/// A source failure wins over the disk error it may have caused on the
/// other input.
fn staged(fed: Vec<(&'static str, Result<u64, FeedError>)>) -> Result<u64, TranscodeError> {
    let mut total = 0u64;
    let mut disk_failure = None;
    for (input, result) in fed {
        match result {
            Ok(bytes) => total += bytes,
            Err(FeedError::Source(source)) => return Err(TranscodeError::Input { input, source }),
            Err(FeedError::Sink(source)) => {
                disk_failure.get_or_insert(TranscodeError::plumbing("scratch file", source));
            }
            Err(FeedError::Cancelled) => {}
        }
    }
    match disk_failure {
        Some(err) => Err(err),
        None => Ok(total),
    }
}
