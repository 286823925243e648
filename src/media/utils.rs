// Helper functions shared by resolvers and the delivery layer

use std::io;
use std::process::{Output, Stdio};

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};
use url::Url;

lazy_static::lazy_static! {
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[a-zA-Z0-9_-]{11}$").unwrap();
    static ref UNSAFE_FILENAME_RE: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]+"#).unwrap();
}

/// Run command with timeout, capturing stdout and stderr
pub async fn run_output_with_timeout(
    program: &str,
    args: &[String],
    timeout_secs: u64,
) -> io::Result<Output> {
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr not captured"))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task.await.map_err(io::Error::other)??;
            let stderr = stderr_task.await.map_err(io::Error::other)??;
            Ok(Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} timed out after {}s", program, timeout_secs),
            ))
        }
    }
}

/// Extract a video id from a bare id or one of the common URL shapes
///
/// Unrecognised input is returned unchanged.
pub fn extract_video_id(input: &str) -> String {
    let input = input.trim();
    if VIDEO_ID_RE.is_match(input) {
        return input.to_string();
    }

    let Ok(url) = Url::parse(input) else {
        return input.to_string();
    };
    let host = url.host_str().unwrap_or_default();

    if host == "youtu.be" {
        return url.path().trim_start_matches('/').to_string();
    }

    if host.contains("youtube.com") {
        if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
            if !v.is_empty() {
                return v.into_owned();
            }
        }
        for prefix in ["/embed/", "/v/"] {
            if let Some(id) = url.path().strip_prefix(prefix) {
                return id.to_string();
            }
        }
    }

    input.to_string()
}

/// Compact duration display, e.g. "1h2m3s", "3m25s", "0s"
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Parse a clock-style duration ("3:25", "1:02:03") into seconds
pub fn parse_clock_duration(text: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut parts = 0;
    for part in text.trim().split(':') {
        total = total * 60 + part.trim().parse::<u64>().ok()?;
        parts += 1;
    }
    (parts > 0 && parts <= 3).then_some(total)
}

/// File-system safe name derived from a media title
///
/// Reserved characters collapse to `_`; an empty result becomes `fallback`.
pub fn sanitize_filename(title: &str, fallback: &str) -> String {
    let cleaned = UNSAFE_FILENAME_RE.replace_all(title.trim(), "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.chars().take(150).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ids_pass_through() {
        assert_eq!(extract_video_id("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
    }

    #[test]
    fn ids_are_extracted_from_urls() {
        let cases = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/v/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
        ];
        for case in cases {
            assert_eq!(extract_video_id(case), "dQw4w9WgXcQ", "{}", case);
        }
    }

    #[test]
    fn unknown_input_is_returned_unchanged() {
        assert_eq!(extract_video_id("not a url"), "not a url");
        assert_eq!(
            extract_video_id("https://example.com/watch?v=abc"),
            "https://example.com/watch?v=abc"
        );
    }

    #[test]
    fn durations_use_compact_units() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(205), "3m25s");
        assert_eq!(format_duration(3723), "1h2m3s");
    }

    #[test]
    fn clock_durations_parse() {
        assert_eq!(parse_clock_duration("3:25"), Some(205));
        assert_eq!(parse_clock_duration("1:02:03"), Some(3723));
        assert_eq!(parse_clock_duration("LIVE"), None);
    }

    #[test]
    fn filenames_drop_reserved_characters() {
        assert_eq!(sanitize_filename("AC/DC: Live?", "x"), "AC_DC_ Live_");
        assert_eq!(sanitize_filename("  ..  ", "abc"), "abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_output_is_captured() {
        let args = vec!["-c".to_string(), "echo out; echo err >&2".to_string()];
        let output = run_output_with_timeout("sh", &args, 5).await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_commands_time_out() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = run_output_with_timeout("sh", &args, 1).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
