// Common data models for the delivery pipeline

use serde::{Deserialize, Serialize};
use time::Date;

/// Audio track metadata attached to a representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Track id; starts with the language code (e.g. "en.4", "fr-FR")
    pub id: String,
    pub display_name: String,
    pub is_default: bool,
}

/// One retrievable encoding of a media item
///
/// Representations come from a resolver and are never mutated by the
/// pipeline; selection only filters, sorts and picks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Representation {
    /// Resolver-specific format id (itag, format_id, ...)
    pub id: String,
    /// Container/codec tag, e.g. `video/mp4; codecs="avc1.64001F"`
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    /// Overall (video) bitrate in bit/s
    pub bitrate: u64,
    /// Average audio bitrate in bit/s
    pub audio_bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_channels: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<AudioTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// Direct download URL, when the resolver exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers needed to open `url`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<(String, String)>,
}

impl Representation {
    /// Representation with only the required attributes set
    pub fn new(id: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mime_type: mime_type.into(),
            quality_label: None,
            bitrate: 0,
            audio_bitrate: 0,
            width: 0,
            height: 0,
            fps: 0,
            audio_channels: 0,
            audio_track: None,
            content_length: None,
            url: None,
            request_headers: Vec::new(),
        }
    }

    /// Mime tag mentions video
    pub fn has_video(&self) -> bool {
        self.mime_type.contains("video")
    }

    /// Mime tag mentions audio
    pub fn is_audio_tagged(&self) -> bool {
        self.mime_type.contains("audio")
    }

    /// Carries an audio channel or is tagged as audio
    pub fn has_audio(&self) -> bool {
        self.audio_channels > 0 || self.is_audio_tagged()
    }

    pub fn is_audio_only(&self) -> bool {
        self.is_audio_tagged() && !self.has_video()
    }

    /// Has no audio channel and the mime tag mentions video
    pub fn is_video_only(&self) -> bool {
        self.audio_channels == 0 && self.has_video()
    }

    /// Video and at least one audio channel in a single stream
    pub fn is_combined(&self) -> bool {
        self.has_video() && self.audio_channels > 0
    }

    /// H.264/AVC, the broadly compatible video codec
    pub fn is_h264(&self) -> bool {
        self.mime_type.contains("avc1")
    }

    pub fn is_mp4(&self) -> bool {
        self.mime_type.contains("mp4")
    }

    /// Language code prefix of the audio track id, if any
    pub fn language(&self) -> Option<&str> {
        self.audio_track.as_ref().map(|t| t.id.as_str())
    }

    /// Audio track id starts with "en"
    pub fn is_english(&self) -> bool {
        self.language().map_or(false, |lang| lang.starts_with("en"))
    }
}

/// Video thumbnail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Everything a resolver knows about one media item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDetails {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration_secs: u64,
    pub views: u64,
    pub description: String,
    pub thumbnails: Vec<Thumbnail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<Date>,
    /// The representation catalog
    pub formats: Vec<Representation>,
}

/// Catalog entry as shown to API consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatView {
    pub id: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    pub bitrate: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub audio_bitrate: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub width: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub height: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub fps: u64,
    pub audio_only: bool,
    pub video_only: bool,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl From<&Representation> for FormatView {
    fn from(r: &Representation) -> Self {
        Self {
            id: r.id.clone(),
            mime_type: r.mime_type.clone(),
            quality_label: r.quality_label.clone(),
            bitrate: r.bitrate,
            audio_bitrate: r.audio_bitrate,
            width: u64::from(r.width),
            height: u64::from(r.height),
            fps: u64::from(r.fps),
            audio_only: r.is_audio_tagged(),
            video_only: r.is_video_only(),
        }
    }
}

/// Media information for API consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    /// Human-readable duration, e.g. "3m25s"
    pub duration: String,
    pub duration_sec: u64,
    pub views: String,
    pub description: String,
    pub thumbnails: Vec<Thumbnail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    pub formats: Vec<FormatView>,
}

/// A media item in search or playlist results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration: String,
    pub duration_sec: u64,
    pub views: String,
    pub thumbnails: Vec<Thumbnail>,
}

/// A playlist in search results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistResult {
    pub id: String,
    pub title: String,
    pub author: String,
    pub video_count: u32,
    pub thumbnails: Vec<Thumbnail>,
}

/// Outcome of running the format selector
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Best pure-audio representation
    Audio(Representation),
    /// Best already-muxed representation
    Combined(Representation),
    /// Video without audio channel, paired with the best audio
    Separate {
        video: Representation,
        audio: Representation,
    },
}
