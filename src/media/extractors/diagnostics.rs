// Resolver diagnostics - classify yt-dlp failures
//
// yt-dlp reports everything through free-form stderr text. The delivery
// layer only needs to know whether the media is gone for good or whether
// the upstream may recover, so the text is reduced to a `FailureReason`.

use serde::{Deserialize, Serialize};

use crate::media::errors::ResolveError;

/// Why a lookup or stream open was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Private video requiring authorization
    PrivateVideo,

    /// Removed, terminated or never existed
    Unavailable,

    /// Channel membership required
    MembersOnly,

    /// DRM-protected or paid content
    DrmProtected,

    /// Age gate requiring a signed-in session
    AgeRestricted,

    GeoBlocked,

    /// 429 or similar throttling
    RateLimited,

    /// Bot check, PO token or SABR protection
    BotDetection,

    /// HTTP 403 without a more specific cause
    Forbidden,

    /// Connection or socket timeout
    NetworkTimeout,

    Unknown,
}

impl FailureReason {
    /// Nothing reachable exists behind the identifier for this caller
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            Self::PrivateVideo | Self::Unavailable | Self::MembersOnly | Self::DrmProtected
        )
    }

    /// Retrying later (or with different settings) may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::BotDetection | Self::Forbidden | Self::NetworkTimeout
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::PrivateVideo => "Private video",
            Self::Unavailable => "Video unavailable",
            Self::MembersOnly => "Members-only content",
            Self::DrmProtected => "DRM-protected content",
            Self::AgeRestricted => "Age-restricted content",
            Self::GeoBlocked => "Geographic restriction",
            Self::RateLimited => "Rate limited by upstream",
            Self::BotDetection => "Bot detection triggered",
            Self::Forbidden => "Access denied (HTTP 403)",
            Self::NetworkTimeout => "Network timeout",
            Self::Unknown => "Unknown failure",
        }
    }

    /// Typed resolver error for media `id`, keeping the most useful stderr line
    pub fn into_resolve_error(self, id: &str, stderr: &str) -> ResolveError {
        if self.is_missing() {
            return ResolveError::NotFound(id.to_string());
        }
        let detail = error_line(stderr).unwrap_or_else(|| self.description().to_string());
        ResolveError::upstream(detail, self.is_transient())
    }
}

/// Classify an error message
pub fn diagnose_error(error: &str) -> FailureReason {
    let lower = error.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&[
        "drm",
        "widevine",
        "playready",
        "requires purchase",
        "this video requires payment",
        "youtube premium",
    ]) {
        return FailureReason::DrmProtected;
    }
    if any(&["members only", "members-only", "join this channel", "available to members"]) {
        return FailureReason::MembersOnly;
    }
    if any(&["private video", "video is private", "granted access"]) {
        return FailureReason::PrivateVideo;
    }
    if any(&[
        "video unavailable",
        "video is unavailable",
        "has been removed",
        "no longer available",
        "account associated with this video has been terminated",
        "incomplete youtube id",
        "not a valid url",
    ]) {
        return FailureReason::Unavailable;
    }
    if any(&["sign in to confirm your age", "age-restricted", "age_verification"]) {
        return FailureReason::AgeRestricted;
    }
    if any(&["not available in your country", "blocked in your country", "geo restrict"]) {
        return FailureReason::GeoBlocked;
    }
    if any(&["429", "rate limit", "too many requests"]) {
        return FailureReason::RateLimited;
    }
    if any(&["not a bot", "captcha", "unusual traffic", "po token", "sabr"]) {
        return FailureReason::BotDetection;
    }
    if any(&["403", "forbidden"]) {
        return FailureReason::Forbidden;
    }
    if any(&["timed out", "timeout", "connection refused", "network is unreachable"]) {
        return FailureReason::NetworkTimeout;
    }

    FailureReason::Unknown
}

/// First `ERROR:` line, falling back to the first non-empty line
fn error_line(stderr: &str) -> Option<String> {
    let lines = || stderr.lines().map(str::trim).filter(|l| !l.is_empty());
    lines()
        .find(|l| l.to_lowercase().starts_with("error:"))
        .or_else(|| lines().next())
        .map(str::to_string)
}
