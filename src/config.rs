// Pipeline configuration - built once at startup and passed down
//
// `PipelineConfig` usually comes from `PipelineConfig::from_env`; nothing
// reads the environment after that.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the dual-stream mux hands its two inputs to the transform tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MuxStrategy {
    /// Two anonymous pipes passed as extra file descriptors 3 and 4
    ExtraFds,
    /// Two uniquely named FIFOs in the scratch directory
    NamedPipes,
    /// Buffer both inputs to temp files, mux to a third, then stream it
    TempFiles,
}

impl MuxStrategy {
    pub const ALL: [MuxStrategy; 3] = [Self::ExtraFds, Self::NamedPipes, Self::TempFiles];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtraFds => "extra-fds",
            Self::NamedPipes => "named-pipes",
            Self::TempFiles => "temp-files",
        }
    }
}

impl Default for MuxStrategy {
    fn default() -> Self {
        if cfg!(unix) {
            Self::ExtraFds
        } else {
            Self::TempFiles
        }
    }
}

impl fmt::Display for MuxStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MuxStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extra-fds" | "fds" | "pipes" => Ok(Self::ExtraFds),
            "named-pipes" | "fifo" | "fifos" => Ok(Self::NamedPipes),
            "temp-files" | "tempfiles" | "files" => Ok(Self::TempFiles),
            _ => Err(ConfigError::Invalid {
                key: "mux strategy",
                value: s.to_string(),
            }),
        }
    }
}

/// Invalid configuration value
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Network configuration for resolvers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP or SOCKS5 proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Timeout in seconds for metadata lookups and connection setup
    pub timeout_seconds: u32,

    /// Path to a cookies.txt file for the resolver tool
    pub cookies_path: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_seconds: 30,
            cookies_path: None,
        }
    }
}

/// Configuration for the whole delivery pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Explicit ffmpeg binary; looked up when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit yt-dlp binary; looked up when unset
    pub ytdlp_path: Option<PathBuf>,
    pub mux_strategy: MuxStrategy,
    /// Where FIFOs and temp files are created
    pub scratch_dir: PathBuf,
    /// How long the tool may take to exit once its pipes are closed
    #[serde(with = "duration_secs")]
    pub exit_grace: Duration,
    /// Fragment duration for the streamable MP4 output, in microseconds
    pub frag_duration_us: Option<u64>,
    /// Upper bound on combined-stream height; unbounded when unset
    pub max_combined_height: Option<u32>,
    /// Bytes of output buffered between a session and its consumer
    pub output_buffer: usize,
    pub network: NetworkConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ytdlp_path: None,
            mux_strategy: MuxStrategy::default(),
            scratch_dir: std::env::temp_dir(),
            exit_grace: Duration::from_secs(5),
            frag_duration_us: Some(1_000_000),
            max_combined_height: None,
            output_buffer: 64 * 1024,
            network: NetworkConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `TUBEMUX_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("TUBEMUX_FFMPEG") {
            config.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("TUBEMUX_YTDLP") {
            config.ytdlp_path = Some(PathBuf::from(path));
        }
        if let Some(strategy) = get("TUBEMUX_MUX_STRATEGY") {
            config.mux_strategy = strategy.parse()?;
        }
        if let Some(dir) = get("TUBEMUX_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(dir);
        }
        if let Some(secs) = get("TUBEMUX_EXIT_GRACE_SECS") {
            let secs: u64 = parse_number("exit grace", &secs)?;
            config.exit_grace = Duration::from_secs(secs);
        }
        if let Some(height) = get("TUBEMUX_MAX_COMBINED_HEIGHT") {
            config.max_combined_height = Some(parse_number("max combined height", &height)?);
        }
        if let Some(proxy) = get("TUBEMUX_PROXY") {
            config.network.proxy = Some(proxy);
        }
        if let Some(cookies) = get("TUBEMUX_COOKIES") {
            config.network.cookies_path = Some(PathBuf::from(cookies));
        }

        Ok(config)
    }

    pub fn with_ffmpeg_path(mut self, path: Option<PathBuf>) -> Self {
        self.ffmpeg_path = path;
        self
    }

    pub fn with_ytdlp_path(mut self, path: Option<PathBuf>) -> Self {
        self.ytdlp_path = path;
        self
    }

    pub fn with_mux_strategy(mut self, strategy: MuxStrategy) -> Self {
        self.mux_strategy = strategy;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn with_max_combined_height(mut self, height: Option<u32>) -> Self {
        self.max_combined_height = height;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.network.proxy = proxy;
        self
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// Serde helpers to (de)serialize `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
