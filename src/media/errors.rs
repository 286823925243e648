// Error types for the delivery pipeline

use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

/// Format selection ran out of candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    /// No representation carries audio at all
    #[error("no audio formats available")]
    NoAudioAvailable,

    /// No already-muxed video+audio representation
    #[error("no combined video+audio formats available")]
    NoCombinedFormat,

    /// No video representation without an audio channel
    #[error("no video-only formats available")]
    NoVideoOnlyFormat,

    /// No audio representation to pair with the video
    #[error("no audio-only formats available")]
    NoAudioOnlyFormat,
}

/// Failures reported by a metadata/stream resolver
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// The identifier does not name any reachable media
    #[error("media not found: {0}")]
    NotFound(String),

    /// Network, tool or upstream service failure
    #[error("upstream failure: {message}")]
    Upstream {
        message: String,
        /// Whether retrying later may succeed
        transient: bool,
    },
}

impl ResolveError {
    pub fn upstream(message: impl Into<String>, transient: bool) -> Self {
        Self::Upstream {
            message: message.into(),
            transient,
        }
    }
}

/// Failures of a single transcode session
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// The transform tool could not be started
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The transform tool exited unsuccessfully
    #[error("{tool} exited with {status}: {stderr}")]
    Execution {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Reading one of the input byte streams failed
    #[error("{input} input failed: {source}")]
    Input {
        input: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Pipe, FIFO or temp file setup failed
    #[error("failed to set up {what}: {source}")]
    Plumbing {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the output sink failed
    #[error("consumer disconnected after {bytes_written} bytes")]
    ConsumerDisconnected { bytes_written: u64 },

    /// The requested plumbing is not available on this platform
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl TranscodeError {
    pub(crate) fn plumbing(what: &'static str, source: std::io::Error) -> Self {
        Self::Plumbing { what, source }
    }
}

/// Caller-facing error of a delivery request
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The request itself is malformed (e.g. empty id)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown media identifier
    #[error("media not found: {0}")]
    NotFound(String),

    /// Selection exhausted every candidate
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Resolver or network failure
    #[error("upstream failure: {message}")]
    UpstreamFailure { message: String, transient: bool },

    /// External tool missing or unstartable
    #[error("process spawn failure: {0}")]
    ProcessSpawnFailure(String),

    /// External tool failed before any output was committed
    #[error("process execution failure: {0}")]
    ProcessExecutionFailure(String),

    /// The consumer went away mid-stream
    #[error("consumer disconnected")]
    ConsumerDisconnected,

    /// Anything else (task panics, unexpected I/O)
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Map this error to an HTTP status code for a thin web layer
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Selection(_) => 404,
            Self::UpstreamFailure { transient: true, .. } => 503,
            Self::UpstreamFailure { .. } => 502,
            Self::ProcessSpawnFailure(_) => 503,
            Self::ProcessExecutionFailure(_) => 500,
            // nginx's "client closed request"
            Self::ConsumerDisconnected => 499,
            Self::Internal(_) => 500,
        }
    }

    /// Expected during playback seeking or abandonment; not worth an error log
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::ConsumerDisconnected)
    }

    /// Short label for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "Invalid request",
            Self::NotFound(_) => "Media not found",
            Self::Selection(_) => "No suitable format",
            Self::UpstreamFailure { .. } => "Upstream failure",
            Self::ProcessSpawnFailure(_) => "Transcoder unavailable",
            Self::ProcessExecutionFailure(_) => "Conversion failed",
            Self::ConsumerDisconnected => "Consumer disconnected",
            Self::Internal(_) => "Internal error",
        }
    }

    /// Structured body sent when nothing has been written yet
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.kind().to_string(),
            message: Some(self.to_string()),
        }
    }
}

impl From<ResolveError> for DeliveryError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(id) => Self::NotFound(id),
            ResolveError::Upstream { message, transient } => {
                Self::UpstreamFailure { message, transient }
            }
        }
    }
}

impl From<TranscodeError> for DeliveryError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Spawn { .. } | TranscodeError::Unsupported(_) => {
                Self::ProcessSpawnFailure(err.to_string())
            }
            TranscodeError::Execution { .. } => Self::ProcessExecutionFailure(err.to_string()),
            TranscodeError::Input { .. } => Self::UpstreamFailure {
                message: err.to_string(),
                transient: true,
            },
            TranscodeError::Plumbing { .. } => Self::Internal(err.to_string()),
            TranscodeError::ConsumerDisconnected { .. } => Self::ConsumerDisconnected,
        }
    }
}

/// JSON error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
