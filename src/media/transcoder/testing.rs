// POSIX-shell stand-in for ffmpeg used by the transcoder and delivery tests

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio_util::io::StreamReader;

use super::command::{InputSpec, OutputSpec, TransformTool};
use crate::media::traits::ByteStream;

/// Runs a shell script instead of a real transform tool
///
/// Inputs arrive as positional arguments; stdout carries the output unless
/// the session asks for a file.
pub(crate) struct ShellTool {
    program: PathBuf,
    script: String,
}

impl ShellTool {
    /// Concatenates its inputs to the output
    pub fn passthrough() -> Self {
        Self {
            program: PathBuf::from("/bin/sh"),
            script: "cat \"$@\"".to_string(),
        }
    }

    /// Runs `script` with the inputs as positional arguments
    pub fn script(script: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("/bin/sh"),
            script: script.into(),
        }
    }

    /// Writes its pid to `pid_file`, then concatenates its inputs
    pub fn recording_pid(pid_file: &Path) -> Self {
        Self::script(format!(
            "echo $$ > '{}'; exec cat \"$@\"",
            pid_file.display()
        ))
    }

    /// Writes `message` to stderr and exits with `code` without reading input
    pub fn failing(message: &str, code: i32) -> Self {
        Self::script(format!("echo '{}' >&2; exit {}", message, code))
    }

    /// Points at a binary that does not exist
    pub fn missing() -> Self {
        Self {
            program: PathBuf::from("/nonexistent/tubemux-tool"),
            script: String::new(),
        }
    }

    fn render_input(input: &InputSpec) -> OsString {
        match input {
            InputSpec::Stdin => "-".into(),
            InputSpec::Fd(fd) => format!("/dev/fd/{}", fd).into(),
            InputSpec::Path(path) => path.clone().into_os_string(),
        }
    }

    fn args(&self, inputs: &[&InputSpec], output: &OutputSpec) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-c".into()];
        match output {
            OutputSpec::Stdout => {
                args.push(self.script.clone().into());
                args.push("sh".into());
            }
            // a file target travels as the first positional argument
            OutputSpec::Path(path) => {
                let script = format!("out=\"$1\"; shift; {{ {}; }} > \"$out\"", self.script);
                args.push(script.into());
                args.push("sh".into());
                args.push(path.clone().into_os_string());
            }
        }
        args.extend(inputs.iter().map(|input| Self::render_input(input)));
        args
    }
}

impl TransformTool for ShellTool {
    fn name(&self) -> &str {
        "sh"
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn transcode_args(&self, input: &InputSpec, output: &OutputSpec) -> Vec<OsString> {
        self.args(&[input], output)
    }

    fn mux_args(
        &self,
        video: &InputSpec,
        audio: &InputSpec,
        output: &OutputSpec,
    ) -> Vec<OsString> {
        self.args(&[video, audio], output)
    }
}

/// Source that yields a few bytes, then fails
pub(crate) fn failing_source() -> ByteStream {
    Box::pin(StreamReader::new(futures::stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "upstream reset")),
    ])))
}

/// Pid written by a `ShellTool::recording_pid` tool
pub(crate) fn recorded_pid(pid_file: &Path) -> i32 {
    let text = std::fs::read_to_string(pid_file).unwrap();
    text.trim().parse().unwrap()
}

/// Whether `pid` is still a live (non-zombie) process
pub(crate) fn is_running(pid: i32) -> bool {
    if cfg!(target_os = "linux") {
        // field 3 of /proc/<pid>/stat is the state; Z is a zombie
        return match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .map_or(false, |state| state != "Z"),
            Err(_) => false,
        };
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Poll `is_running` until the process is gone or `within` elapses
pub(crate) async fn wait_until_gone(pid: i32, within: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while is_running(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    true
}
