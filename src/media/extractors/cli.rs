// yt-dlp resolver - metadata via the `yt-dlp` binary, bytes via reqwest
//
// yt-dlp resolves the representation catalog (including direct URLs and the
// request headers they need); the streams themselves are fetched directly so
// the bytes flow through our own pipeline instead of yt-dlp's downloader.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use time::Date;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::diagnostics::diagnose_error;
use crate::config::NetworkConfig;
use crate::media::errors::ResolveError;
use crate::media::models::{AudioTrack, MediaDetails, Representation, SearchResult, Thumbnail};
use crate::media::traits::{MediaResolver, OpenedStream};
use crate::media::utils::{format_duration, run_output_with_timeout};

/// Player clients tried in order when the previous one was blocked
const FALLBACK_CLIENTS: [Option<&str>; 3] = [None, Some("android"), Some("tv")];

/// Resolver backed by the yt-dlp binary
pub struct YtDlpResolver {
    ytdlp_path: PathBuf,
    network: NetworkConfig,
    http: reqwest::Client,
}

impl YtDlpResolver {
    pub fn new(ytdlp_path: impl Into<PathBuf>, network: NetworkConfig) -> Result<Self, ResolveError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(u64::from(network.timeout_seconds)));
        if let Some(proxy) = &network.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ResolveError::upstream(format!("invalid proxy: {}", e), false))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| ResolveError::upstream(format!("http client: {}", e), false))?;

        Ok(Self {
            ytdlp_path: ytdlp_path.into(),
            network,
            http,
        })
    }

    /// Watch URL for a bare id; URLs pass through
    fn target_url(id: &str) -> String {
        if id.starts_with("http://") || id.starts_with("https://") {
            id.to_string()
        } else {
            format!("https://www.youtube.com/watch?v={}", id)
        }
    }

    /// Build command arguments
    fn build_args(&self, mode: &[&str], client: Option<&str>, target: &str) -> Vec<String> {
        let mut args: Vec<String> = mode.iter().map(|a| a.to_string()).collect();
        args.extend([
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.network.timeout_seconds.to_string(),
            "--retries".to_string(),
            "2".to_string(),
        ]);

        if let Some(client) = client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        if let Some(path) = &self.network.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        if let Some(proxy) = &self.network.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(target.to_string());
        args
    }

    /// Overall budget for one yt-dlp run (it retries internally)
    fn run_timeout(&self) -> u64 {
        u64::from(self.network.timeout_seconds) * 3
    }

    /// Run yt-dlp, falling back to other player clients while it is blocked
    async fn run(&self, id: &str, mode: &[&str]) -> Result<Vec<u8>, ResolveError> {
        let program = self.ytdlp_path.to_string_lossy().into_owned();
        let target = Self::target_url(id);
        let mut last_error = ResolveError::upstream("no player clients to try", false);

        for client in FALLBACK_CLIENTS {
            let args = self.build_args(mode, client, &target);
            debug!(%id, client = client.unwrap_or("default"), "running yt-dlp");

            match run_output_with_timeout(&program, &args, self.run_timeout()).await {
                Ok(out) if out.status.success() => return Ok(out.stdout),
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    let reason = diagnose_error(&stderr);
                    warn!(%id, client = client.unwrap_or("default"), reason = reason.description(), "yt-dlp failed");
                    last_error = reason.into_resolve_error(id, &stderr);
                    if !reason.is_transient() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(ResolveError::upstream(
                        format!("yt-dlp not found at {}", program),
                        false,
                    ));
                }
                Err(err) => {
                    let transient = err.kind() == io::ErrorKind::TimedOut;
                    warn!(%id, error = %err, "yt-dlp did not complete");
                    last_error = ResolveError::upstream(err.to_string(), transient);
                    if !transient {
                        break;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Entries of a playlist, without resolving each one
    pub async fn list_playlist(&self, playlist_id: &str) -> Result<Vec<SearchResult>, ResolveError> {
        let target = if playlist_id.starts_with("http") {
            playlist_id.to_string()
        } else {
            format!("https://www.youtube.com/playlist?list={}", playlist_id)
        };
        let stdout = self
            .run(&target, &["--flat-playlist", "--dump-single-json"])
            .await?;
        parse_playlist(&stdout)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, id: &str) -> Result<MediaDetails, ResolveError> {
        let stdout = self.run(id, &["--dump-json", "--no-playlist"]).await?;
        let details = parse_details(&stdout)?;
        debug!(%id, formats = details.formats.len(), "resolved");
        Ok(details)
    }

    async fn open_stream(
        &self,
        representation: &Representation,
    ) -> Result<OpenedStream, ResolveError> {
        let url = representation.url.as_deref().ok_or_else(|| {
            ResolveError::upstream(format!("format {} has no direct URL", representation.id), false)
        })?;

        let mut request = self.http.get(url);
        for (name, value) in &representation.request_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            ResolveError::upstream(
                format!("opening format {}: {}", representation.id, e),
                e.is_timeout() || e.is_connect(),
            )
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ResolveError::NotFound(representation.id.clone()));
        }
        if !status.is_success() {
            return Err(ResolveError::upstream(
                format!("HTTP {} opening format {}", status, representation.id),
                status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            ));
        }

        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(OpenedStream::new(StreamReader::new(body), content_length))
    }
}

/// Parse `--dump-json` output
pub fn parse_details(stdout: &[u8]) -> Result<MediaDetails, ResolveError> {
    let json: Value = serde_json::from_slice(stdout)
        .map_err(|e| ResolveError::upstream(format!("invalid yt-dlp JSON: {}", e), false))?;

    let formats = json["formats"]
        .as_array()
        .ok_or_else(|| ResolveError::upstream("no formats array in yt-dlp JSON", false))?
        .iter()
        .filter_map(parse_format)
        .collect();

    Ok(MediaDetails {
        id: json["id"].as_str().unwrap_or_default().to_string(),
        title: json["title"].as_str().unwrap_or_default().to_string(),
        author: author(&json),
        duration_secs: json["duration"].as_f64().unwrap_or(0.0) as u64,
        views: json["view_count"].as_u64().unwrap_or(0),
        description: json["description"].as_str().unwrap_or_default().to_string(),
        thumbnails: parse_thumbnails(&json),
        upload_date: json["upload_date"].as_str().and_then(parse_upload_date),
        formats,
    })
}

/// Parse `--flat-playlist --dump-single-json` output
pub fn parse_playlist(stdout: &[u8]) -> Result<Vec<SearchResult>, ResolveError> {
    let json: Value = serde_json::from_slice(stdout)
        .map_err(|e| ResolveError::upstream(format!("invalid yt-dlp JSON: {}", e), false))?;

    let entries = json["entries"].as_array().map(Vec::as_slice).unwrap_or_default();
    Ok(entries
        .iter()
        .filter_map(|entry| {
            let id = entry["id"].as_str()?;
            let duration_sec = entry["duration"].as_f64().unwrap_or(0.0) as u64;
            Some(SearchResult {
                id: id.to_string(),
                title: entry["title"].as_str().unwrap_or_default().to_string(),
                author: author(entry),
                duration: format_duration(duration_sec),
                duration_sec,
                views: entry["view_count"]
                    .as_u64()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                thumbnails: parse_thumbnails(entry),
            })
        })
        .collect())
}

fn author(json: &Value) -> String {
    json["uploader"]
        .as_str()
        .or_else(|| json["channel"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_thumbnails(json: &Value) -> Vec<Thumbnail> {
    let listed: Vec<Thumbnail> = json["thumbnails"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|t| {
            Some(Thumbnail {
                url: t["url"].as_str()?.to_string(),
                width: t["width"].as_u64().unwrap_or(0) as u32,
                height: t["height"].as_u64().unwrap_or(0) as u32,
            })
        })
        .collect();

    if listed.is_empty() {
        if let Some(url) = json["thumbnail"].as_str() {
            return vec![Thumbnail {
                url: url.to_string(),
                width: 0,
                height: 0,
            }];
        }
    }
    listed
}

/// "20240115" -> 2024-01-15
fn parse_upload_date(raw: &str) -> Option<Date> {
    let format = time::format_description::parse("[year][month][day]").ok()?;
    Date::parse(raw, &format).ok()
}

/// Map one yt-dlp format to a representation
///
/// Storyboards and anything not fetchable with a single HTTP GET
/// (HLS/DASH manifests) are skipped.
fn parse_format(f: &Value) -> Option<Representation> {
    let id = f["format_id"].as_str()?;
    let protocol = f["protocol"].as_str().unwrap_or("https");
    if protocol != "https" && protocol != "http" {
        return None;
    }

    let ext = f["ext"].as_str().unwrap_or_default();
    let vcodec = f["vcodec"].as_str().filter(|c| *c != "none");
    let acodec = f["acodec"].as_str().filter(|c| *c != "none");
    if vcodec.is_none() && acodec.is_none() {
        return None;
    }

    let mut rep = Representation::new(id, mime_type(ext, vcodec, acodec));
    rep.quality_label = f["format_note"].as_str().map(str::to_string);
    rep.width = f["width"].as_u64().unwrap_or(0) as u32;
    rep.height = f["height"].as_u64().unwrap_or(0) as u32;
    rep.fps = f["fps"].as_f64().map_or(0, |fps| fps.round() as u32);

    let tbr = bits_per_second(&f["tbr"]);
    if vcodec.is_some() {
        rep.bitrate = bits_per_second(&f["vbr"]).or(tbr).unwrap_or(0);
    }
    if acodec.is_some() {
        rep.audio_bitrate = bits_per_second(&f["abr"])
            .or(if vcodec.is_none() { tbr } else { None })
            .unwrap_or(0);
        rep.audio_channels = f["audio_channels"].as_u64().unwrap_or(2) as u32;
        rep.bitrate = rep.bitrate.max(tbr.unwrap_or(0));
    }

    rep.audio_track = f["language"].as_str().filter(|_| acodec.is_some()).map(|lang| AudioTrack {
        id: lang.to_string(),
        display_name: f["format_note"].as_str().unwrap_or(lang).to_string(),
        is_default: f["language_preference"].as_i64().map_or(false, |p| p >= 10),
    });

    rep.content_length = f["filesize"].as_u64().or_else(|| f["filesize_approx"].as_u64());
    rep.url = f["url"].as_str().map(str::to_string);
    rep.request_headers = f["http_headers"]
        .as_object()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(rep)
}

/// Container/codec tag in the form browsers use, e.g. `video/mp4; codecs="avc1.64001F, mp4a.40.2"`
fn mime_type(ext: &str, vcodec: Option<&str>, acodec: Option<&str>) -> String {
    let container = match ext {
        "m4a" | "mp4" => "mp4",
        "weba" => "webm",
        other => other,
    };
    let kind = if vcodec.is_some() { "video" } else { "audio" };
    let codecs: Vec<&str> = vcodec.into_iter().chain(acodec).collect();
    format!("{}/{}; codecs=\"{}\"", kind, container, codecs.join(", "))
}

/// yt-dlp reports rates in kbit/s
fn bits_per_second(value: &Value) -> Option<u64> {
    value
        .as_f64()
        .filter(|kbps| *kbps > 0.0)
        .map(|kbps| (kbps * 1000.0).round() as u64)
}
