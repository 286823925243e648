// Transform tool definitions and argument templates

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Where the tool reads one of its inputs from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    Stdin,
    /// Inherited file descriptor (3 and 4 for the two mux inputs)
    Fd(i32),
    /// FIFO or regular file
    Path(PathBuf),
}

/// Where the tool writes its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSpec {
    Stdout,
    Path(PathBuf),
}

/// Trait for external single-purpose transform programs
///
/// Implementations only render argument lists; spawning, wiring and
/// cleanup belong to the session.
pub trait TransformTool: Send + Sync {
    /// Name of the tool (for logging and error messages)
    fn name(&self) -> &str;

    /// Executable to spawn
    fn program(&self) -> &Path;

    /// Arguments for a single-stream re-encode
    fn transcode_args(&self, input: &InputSpec, output: &OutputSpec) -> Vec<OsString>;

    /// Arguments for muxing a video-only and an audio-only input
    fn mux_args(&self, video: &InputSpec, audio: &InputSpec, output: &OutputSpec)
        -> Vec<OsString>;
}

/// ffmpeg with MP3 re-encode and fragmented-MP4 mux templates
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    path: PathBuf,
    frag_duration_us: Option<u64>,
}

impl FfmpegTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frag_duration_us: Some(1_000_000),
        }
    }

    pub fn with_frag_duration(mut self, frag_duration_us: Option<u64>) -> Self {
        self.frag_duration_us = frag_duration_us;
        self
    }

    fn input_arg(input: &InputSpec) -> OsString {
        match input {
            InputSpec::Stdin => "pipe:0".into(),
            InputSpec::Fd(fd) => format!("pipe:{}", fd).into(),
            InputSpec::Path(path) => path.clone().into_os_string(),
        }
    }

    /// Output target; files get `-y` so a pre-created temp file is overwritten
    fn push_output(args: &mut Vec<OsString>, output: &OutputSpec) {
        match output {
            OutputSpec::Stdout => args.push("pipe:1".into()),
            OutputSpec::Path(path) => {
                args.push("-y".into());
                args.push(path.clone().into_os_string());
            }
        }
    }
}

impl TransformTool for FfmpegTool {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn program(&self) -> &Path {
        &self.path
    }

    fn transcode_args(&self, input: &InputSpec, output: &OutputSpec) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into()];
        // -nostdin would also stop ffmpeg from reading pipe:0
        if *input != InputSpec::Stdin {
            args.push("-nostdin".into());
        }
        args.extend(["-loglevel", "error", "-i"].into_iter().map(OsString::from));
        args.push(Self::input_arg(input));
        args.extend(
            ["-vn", "-acodec", "libmp3lame", "-q:a", "0", "-f", "mp3"]
                .into_iter()
                .map(OsString::from),
        );
        Self::push_output(&mut args, output);
        args
    }

    fn mux_args(
        &self,
        video: &InputSpec,
        audio: &InputSpec,
        output: &OutputSpec,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "warning".into(),
            "-i".into(),
            Self::input_arg(video),
            "-i".into(),
            Self::input_arg(audio),
        ];
        args.extend(
            [
                "-map",
                "0:v",
                "-map",
                "1:a",
                "-c:v",
                "copy",
                "-c:a",
                "aac",
                "-movflags",
                "frag_keyframe+empty_moov+default_base_moof",
            ]
            .into_iter()
            .map(OsString::from),
        );
        if let Some(frag) = self.frag_duration_us {
            args.push("-frag_duration".into());
            args.push(frag.to_string().into());
        }
        args.push("-f".into());
        args.push("mp4".into());
        Self::push_output(&mut args, output);
        args
    }
}
