// External tool discovery and readiness checks

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::errors::DeliveryError;
use super::utils::run_output_with_timeout;
use crate::config::PipelineConfig;

const VERSION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    Ffmpeg,
    YtDlp,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Ffmpeg => "ffmpeg",
            ToolType::YtDlp => "yt-dlp",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::Ffmpeg => "-version",
            ToolType::YtDlp => "--version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub is_available: bool,
}

/// Finds ffmpeg and yt-dlp: explicit path, then common install
/// locations, then `PATH`
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    ffmpeg_path: Option<PathBuf>,
    ytdlp_path: Option<PathBuf>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ytdlp_path: config.ytdlp_path.clone(),
        }
    }

    /// Resolved binary path, if the tool can be found
    ///
    /// An explicitly configured path is never second-guessed: if it does
    /// not exist the tool counts as missing.
    pub fn locate(&self, tool: ToolType) -> Option<PathBuf> {
        let explicit = match tool {
            ToolType::Ffmpeg => &self.ffmpeg_path,
            ToolType::YtDlp => &self.ytdlp_path,
        };
        if let Some(path) = explicit {
            return path.exists().then(|| path.clone());
        }

        let binary = tool.as_str();
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary), // Homebrew on Apple Silicon
            format!("/usr/local/bin/{}", binary),
            format!("/usr/bin/{}", binary),
        ];
        common_paths
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .or_else(|| which::which(binary).ok())
    }

    /// Path and version of `tool`; available only if the version probe runs
    pub async fn get_tool_info(&self, tool: ToolType) -> ToolInfo {
        let path = self.locate(tool);
        let version = match &path {
            Some(path) => Self::probe_version(path, tool).await,
            None => None,
        };

        ToolInfo {
            name: tool.as_str().to_string(),
            tool_type: tool,
            is_available: version.is_some(),
            version,
            path,
        }
    }

    pub async fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::Ffmpeg).await,
            self.get_tool_info(ToolType::YtDlp).await,
        ]
    }

    /// Startup readiness check for the transform tool
    ///
    /// Returns the ffmpeg path to build the transcoder with.
    pub async fn ensure_ready(&self) -> Result<PathBuf, DeliveryError> {
        let info = self.get_tool_info(ToolType::Ffmpeg).await;
        match (info.path, info.version) {
            (Some(path), Some(version)) => {
                info!(path = %path.display(), %version, "ffmpeg ready");
                Ok(path)
            }
            (Some(path), None) => Err(DeliveryError::ProcessSpawnFailure(format!(
                "ffmpeg at {} does not run",
                path.display()
            ))),
            (None, _) => Err(DeliveryError::ProcessSpawnFailure(
                "ffmpeg not found".to_string(),
            )),
        }
    }

    async fn probe_version(path: &Path, tool: ToolType) -> Option<String> {
        let program = path.to_string_lossy();
        let args = [tool.version_arg().to_string()];
        match run_output_with_timeout(&program, &args, VERSION_TIMEOUT_SECS).await {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                Some(parse_version(tool, &stdout))
            }
            Ok(output) => {
                debug!(tool = tool.as_str(), status = %output.status, "version probe failed");
                None
            }
            Err(err) => {
                debug!(tool = tool.as_str(), error = %err, "version probe failed");
                None
            }
        }
    }
}

/// "ffmpeg version 6.1.1 Copyright ..." -> "6.1.1"; yt-dlp prints the bare version
fn parse_version(tool: ToolType, stdout: &str) -> String {
    let first = stdout.lines().next().unwrap_or_default().trim();
    match tool {
        ToolType::Ffmpeg => first
            .strip_prefix("ffmpeg version ")
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or(first)
            .to_string(),
        ToolType::YtDlp => first.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_versions_are_trimmed() {
        assert_eq!(
            parse_version(
                ToolType::Ffmpeg,
                "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc"
            ),
            "6.1.1-3ubuntu5"
        );
        assert_eq!(parse_version(ToolType::YtDlp, "2024.08.06\n"), "2024.08.06");
    }

    #[test]
    fn missing_explicit_path_is_not_replaced() {
        let manager = ToolManager {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ytdlp_path: None,
        };
        assert_eq!(manager.locate(ToolType::Ffmpeg), None);
    }

    #[tokio::test]
    async fn missing_ffmpeg_fails_readiness() {
        let manager = ToolManager {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ytdlp_path: None,
        };
        let err = manager.ensure_ready().await.unwrap_err();
        assert!(matches!(err, DeliveryError::ProcessSpawnFailure(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runnable_tool_reports_version() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\necho 'ffmpeg version 7.0 Copyright'\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let manager = ToolManager {
            ffmpeg_path: Some(fake.clone()),
            ytdlp_path: None,
        };
        let info = manager.get_tool_info(ToolType::Ffmpeg).await;
        assert!(info.is_available);
        assert_eq!(info.version.as_deref(), Some("7.0"));
        assert_eq!(manager.ensure_ready().await.unwrap(), fake);
    }
}
