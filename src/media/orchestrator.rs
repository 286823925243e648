// Delivery orchestration - resolve, select, open, transcode
//
// `MediaDelivery` is the per-request entry point a thin HTTP or CLI layer
// calls. It owns nothing mutable: the resolver and transcoder are injected
// and shared across requests.

use std::io::Cursor;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, DuplexStream};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, instrument, warn, Instrument};

use super::errors::{DeliveryError, TranscodeError};
use super::format_selector::FormatSelector;
use super::models::{FormatView, Representation, Selection, VideoInfo};
use super::traits::{ByteStream, MediaResolver};
use super::transcoder::{SessionReport, Transcoder};
use super::utils::{extract_video_id, format_duration, sanitize_filename};
use crate::config::{MuxStrategy, PipelineConfig};

const AUDIO_CACHE: &str = "public, max-age=3600";
const NO_CACHE: &str = "no-cache";
const FIRST_CHUNK: usize = 16 * 1024;

/// An output stream ready to be copied to the consumer
pub struct Delivery {
    pub content_type: &'static str,
    /// Known only for passthrough of an already-muxed representation
    pub content_length: Option<u64>,
    pub cache_control: &'static str,
    pub accept_ranges: bool,
    /// Suggested file name, derived from the media title
    pub filename: String,
    pub body: ByteStream,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("cache_control", &self.cache_control)
            .field("accept_ranges", &self.accept_ranges)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// `Content-Disposition` value for `filename`
pub fn content_disposition(filename: &str, download: bool) -> String {
    let kind = if download { "attachment" } else { "inline" };
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{}; filename=\"{}\"", kind, escaped)
}

pub struct MediaDelivery {
    resolver: Arc<dyn MediaResolver>,
    transcoder: Transcoder,
    selector: FormatSelector,
    mux_strategy: MuxStrategy,
    output_buffer: usize,
}

impl MediaDelivery {
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        transcoder: Transcoder,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            resolver,
            transcoder,
            selector: FormatSelector::new().with_max_combined_height(config.max_combined_height),
            mux_strategy: config.mux_strategy,
            output_buffer: config.output_buffer.max(1),
        }
    }

    pub fn resolver(&self) -> &dyn MediaResolver {
        self.resolver.as_ref()
    }

    /// Media details with the catalog annotated for display
    #[instrument(skip(self), fields(resolver = self.resolver.name()))]
    pub async fn info(&self, id: &str) -> Result<VideoInfo, DeliveryError> {
        let id = normalize_id(id)?;
        let details = self.resolver.resolve(&id).await?;

        Ok(VideoInfo {
            id: details.id,
            title: details.title,
            author: details.author,
            duration: format_duration(details.duration_secs),
            duration_sec: details.duration_secs,
            views: details.views.to_string(),
            description: details.description,
            thumbnails: details.thumbnails,
            upload_date: details.upload_date.map(|d| {
                format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day())
            }),
            formats: details.formats.iter().map(FormatView::from).collect(),
        })
    }

    /// Best audio, re-encoded to MP3 on the fly
    #[instrument(skip(self), fields(resolver = self.resolver.name()))]
    pub async fn listen(&self, id: &str) -> Result<Delivery, DeliveryError> {
        let id = normalize_id(id)?;
        let details = self.resolver.resolve(&id).await?;
        let Selection::Audio(audio) = self.selector.select_audio(&details.formats)? else {
            return Err(DeliveryError::Internal("audio selection returned video".into()));
        };
        debug!(format = %audio.id, bitrate = audio.audio_bitrate, "audio selected");

        let input = self.resolver.open_stream(&audio).await?.reader;
        let transcoder = self.transcoder.clone();
        let body = self
            .commit(move |mut sink| async move { transcoder.transcode(input, &mut sink).await })
            .await?;

        info!(title = %details.title, "listen started");
        Ok(Delivery {
            content_type: "audio/mpeg",
            content_length: None,
            cache_control: AUDIO_CACHE,
            accept_ranges: false,
            filename: format!("{}.mp3", sanitize_filename(&details.title, &id)),
            body,
        })
    }

    /// Video with audio, using the configured mux strategy when needed
    pub async fn watch(&self, id: &str) -> Result<Delivery, DeliveryError> {
        self.watch_with(id, self.mux_strategy).await
    }

    /// Video with audio
    ///
    /// An already-muxed representation is passed through untouched; only
    /// when none exists are separate video and audio streams muxed.
    #[instrument(skip(self), fields(resolver = self.resolver.name()))]
    pub async fn watch_with(
        &self,
        id: &str,
        strategy: MuxStrategy,
    ) -> Result<Delivery, DeliveryError> {
        let id = normalize_id(id)?;
        let details = self.resolver.resolve(&id).await?;
        let filename = format!("{}.mp4", sanitize_filename(&details.title, &id));

        match self.selector.select_video(&details.formats)? {
            Selection::Combined(combined) => {
                debug!(format = %combined.id, height = combined.height, "combined passthrough");
                let opened = self.resolver.open_stream(&combined).await?;
                let content_length = opened.content_length.or(combined.content_length);
                info!(title = %details.title, "watch started");
                Ok(Delivery {
                    content_type: "video/mp4",
                    content_length,
                    cache_control: NO_CACHE,
                    accept_ranges: true,
                    filename,
                    body: opened.reader,
                })
            }
            Selection::Separate { video, audio } => {
                let body = self.mux(&video, &audio, strategy).await?;
                info!(title = %details.title, %strategy, "watch started");
                Ok(Delivery {
                    content_type: "video/mp4",
                    content_length: None,
                    cache_control: NO_CACHE,
                    accept_ranges: false,
                    filename,
                    body,
                })
            }
            Selection::Audio(_) => Err(DeliveryError::Internal(
                "video selection returned audio".into(),
            )),
        }
    }

    async fn mux(
        &self,
        video: &Representation,
        audio: &Representation,
        strategy: MuxStrategy,
    ) -> Result<ByteStream, DeliveryError> {
        debug!(video = %video.id, audio = %audio.id, "muxing separate streams");
        let video = self.resolver.open_stream(video).await?.reader;
        let audio = self.resolver.open_stream(audio).await?.reader;

        let transcoder = self.transcoder.clone();
        self.commit(move |mut sink| async move {
            transcoder.mux(video, audio, &mut sink, strategy).await
        })
        .await
    }

    /// Run a session in the background and wait for its first output
    ///
    /// Until a byte is produced the session's failure is still reportable
    /// and is returned here. Afterwards the body is handed out and a later
    /// failure only ends it early. Dropping the call before that point
    /// aborts the session.
    async fn commit<F, Fut>(&self, session: F) -> Result<ByteStream, DeliveryError>
    where
        F: FnOnce(DuplexStream) -> Fut,
        Fut: std::future::Future<Output = Result<SessionReport, TranscodeError>> + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::duplex(self.output_buffer);
        let handle = AbortOnDropHandle::new(tokio::spawn(session(writer).in_current_span()));

        let mut first = vec![0u8; FIRST_CHUNK];
        let n = reader
            .read(&mut first)
            .await
            .map_err(|err| DeliveryError::Internal(err.to_string()))?;

        if n == 0 {
            let report = join_session(handle).await?;
            debug!(session = %report.session_id, "session produced no output");
            return Ok(Box::pin(tokio::io::empty()));
        }

        first.truncate(n);
        tokio::spawn(watch_session(handle).in_current_span());
        Ok(Box::pin(Cursor::new(first).chain(reader)))
    }
}

fn normalize_id(id: &str) -> Result<String, DeliveryError> {
    let id = extract_video_id(id);
    if id.is_empty() {
        return Err(DeliveryError::InvalidRequest("missing media id".into()));
    }
    Ok(id)
}

type SessionHandle = AbortOnDropHandle<Result<SessionReport, TranscodeError>>;

async fn join_session(handle: SessionHandle) -> Result<SessionReport, DeliveryError> {
    match handle.await {
        Ok(result) => Ok(result?),
        Err(err) => Err(DeliveryError::Internal(format!("session task: {}", err))),
    }
}

/// Log how a committed session ended
async fn watch_session(handle: SessionHandle) {
    match join_session(handle).await {
        Ok(report) => debug!(
            session = %report.session_id,
            bytes = report.bytes_written,
            "delivery complete"
        ),
        Err(err) if err.is_expected() => debug!(error = %err, "consumer went away"),
        Err(err) => warn!(error = %err, "delivery truncated"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use time::{Date, Month};

    use super::*;
    use crate::media::errors::ResolveError;
    use crate::media::models::MediaDetails;
    use crate::media::traits::OpenedStream;
    use crate::media::transcoder::testing::{recorded_pid, wait_until_gone, ShellTool};

    struct MemoryResolver {
        details: MediaDetails,
        bodies: HashMap<String, &'static [u8]>,
        opened: Mutex<Vec<String>>,
    }

    impl MemoryResolver {
        fn new(formats: Vec<(Representation, &'static [u8])>) -> Self {
            let bodies = formats
                .iter()
                .map(|(r, body)| (r.id.clone(), *body))
                .collect();
            Self {
                details: MediaDetails {
                    id: "dQw4w9WgXcQ".into(),
                    title: "Song: Live".into(),
                    author: "Band".into(),
                    duration_secs: 205,
                    views: 42,
                    description: String::new(),
                    thumbnails: Vec::new(),
                    upload_date: Date::from_calendar_date(2024, Month::January, 2).ok(),
                    formats: formats.into_iter().map(|(r, _)| r).collect(),
                },
                bodies,
                opened: Mutex::new(Vec::new()),
            }
        }

        fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaResolver for MemoryResolver {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn resolve(&self, id: &str) -> Result<MediaDetails, ResolveError> {
            if id == self.details.id {
                Ok(self.details.clone())
            } else {
                Err(ResolveError::NotFound(id.to_string()))
            }
        }

        async fn open_stream(
            &self,
            representation: &Representation,
        ) -> Result<OpenedStream, ResolveError> {
            self.opened.lock().unwrap().push(representation.id.clone());
            let body = self.bodies[&representation.id];
            Ok(OpenedStream::new(body, Some(body.len() as u64)))
        }
    }

    fn audio() -> Representation {
        let mut r = Representation::new("140", r#"audio/mp4; codecs="mp4a.40.2""#);
        r.audio_channels = 2;
        r.audio_bitrate = 128_000;
        r
    }

    fn video_only() -> Representation {
        let mut r = Representation::new("137", r#"video/mp4; codecs="avc1.640028""#);
        r.height = 1080;
        r
    }

    fn combined() -> Representation {
        let mut r = Representation::new("18", r#"video/mp4; codecs="avc1.42001E, mp4a.40.2""#);
        r.audio_channels = 2;
        r.height = 360;
        r
    }

    fn delivery(resolver: Arc<MemoryResolver>, tool: ShellTool, scratch: &std::path::Path) -> MediaDelivery {
        let config = PipelineConfig::default().with_scratch_dir(scratch);
        let transcoder = Transcoder::new(Arc::new(tool))
            .with_scratch_dir(scratch)
            .with_exit_grace(Duration::from_secs(1));
        MediaDelivery::new(resolver, transcoder, &config)
    }

    async fn read_body(delivery: Delivery) -> Vec<u8> {
        let mut body = delivery.body;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn listen_streams_transcoded_audio() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![(audio(), b"audio-bytes")]));
        let service = delivery(resolver, ShellTool::passthrough(), scratch.path());

        let delivery = service.listen("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert_eq!(delivery.content_type, "audio/mpeg");
        assert_eq!(delivery.cache_control, "public, max-age=3600");
        assert_eq!(delivery.content_length, None);
        assert_eq!(delivery.filename, "Song_ Live.mp3");
        assert_eq!(read_body(delivery).await, b"audio-bytes");
    }

    #[tokio::test]
    async fn failures_before_output_are_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![(audio(), b"audio-bytes")]));
        let service = delivery(resolver, ShellTool::failing("bad input", 1), scratch.path());

        let err = service.listen("dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, DeliveryError::ProcessExecutionFailure(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn failures_after_output_truncate_the_body() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![(audio(), b"audio-bytes")]));
        let tool = ShellTool::script("cat >/dev/null; printf partial; exit 2");
        let service = delivery(resolver, tool, scratch.path());

        let delivery = service.listen("dQw4w9WgXcQ").await.unwrap();
        let mut body = delivery.body;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"partial");
    }

    #[tokio::test]
    async fn abandoned_requests_stop_the_tool() {
        let scratch = tempfile::tempdir().unwrap();
        let records = tempfile::tempdir().unwrap();
        let pid_file = records.path().join("tool.pid");
        let resolver = Arc::new(MemoryResolver::new(vec![(audio(), b"audio-bytes")]));
        let tool = ShellTool::script(format!(
            "echo $$ > '{}'; exec sleep 30",
            pid_file.display()
        ));
        let service = delivery(resolver, tool, scratch.path());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(500), service.listen("dQw4w9WgXcQ")).await;
        assert!(abandoned.is_err(), "tool produced output unexpectedly");

        let pid = recorded_pid(&pid_file);
        assert!(
            wait_until_gone(pid, Duration::from_secs(5)).await,
            "tool {} outlived the request",
            pid
        );
    }

    #[tokio::test]
    async fn unknown_and_empty_ids_are_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![(audio(), b"a")]));
        let service = delivery(resolver, ShellTool::passthrough(), scratch.path());

        let err = service.listen("zzzzzzzzzzz").await.unwrap_err();
        assert_eq!(err.http_status(), 404);

        let err = service.watch("  ").await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn missing_audio_is_a_selection_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![(video_only(), b"v")]));
        let service = delivery(resolver, ShellTool::passthrough(), scratch.path());

        let err = service.listen("dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Selection(_)));
    }

    #[tokio::test]
    async fn combined_formats_pass_through() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![
            (combined(), b"muxed-already"),
            (video_only(), b"video"),
            (audio(), b"audio"),
        ]));
        let service = delivery(resolver.clone(), ShellTool::passthrough(), scratch.path());

        let delivery = service.watch("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(delivery.content_length, Some(13));
        assert!(delivery.accept_ranges);
        assert_eq!(delivery.cache_control, "no-cache");
        assert_eq!(read_body(delivery).await, b"muxed-already");
        assert_eq!(resolver.opened(), vec!["18"]);
    }

    #[tokio::test]
    async fn separate_streams_are_muxed_with_every_strategy() {
        for strategy in MuxStrategy::ALL {
            let scratch = tempfile::tempdir().unwrap();
            let resolver = Arc::new(MemoryResolver::new(vec![
                (video_only(), b"video-track|"),
                (audio(), b"audio-track"),
            ]));
            let service = delivery(resolver.clone(), ShellTool::passthrough(), scratch.path());

            let delivery = service.watch_with("dQw4w9WgXcQ", strategy).await.unwrap();
            assert_eq!(delivery.content_type, "video/mp4");
            assert_eq!(delivery.content_length, None);
            assert_eq!(read_body(delivery).await, b"video-track|audio-track", "{}", strategy);
            assert_eq!(resolver.opened(), vec!["137", "140"]);
        }
    }

    #[tokio::test]
    async fn capped_combined_height_falls_back_to_mux() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![
            (combined(), b"muxed-already"),
            (video_only(), b"v"),
            (audio(), b"a"),
        ]));
        let config = PipelineConfig::default()
            .with_scratch_dir(scratch.path())
            .with_max_combined_height(Some(240))
            .with_mux_strategy(MuxStrategy::TempFiles);
        let transcoder =
            Transcoder::new(Arc::new(ShellTool::passthrough())).with_scratch_dir(scratch.path());
        let service = MediaDelivery::new(resolver.clone(), transcoder, &config);

        let delivery = service.watch("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(read_body(delivery).await, b"va");
        assert_eq!(resolver.opened(), vec!["137", "140"]);
    }

    #[tokio::test]
    async fn info_formats_duration_and_date() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MemoryResolver::new(vec![(audio(), b"a"), (video_only(), b"v")]));
        let service = delivery(resolver, ShellTool::passthrough(), scratch.path());

        let info = service.info("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(info.duration, "3m25s");
        assert_eq!(info.views, "42");
        assert_eq!(info.upload_date.as_deref(), Some("2024-01-02"));
        assert!(info.formats[0].audio_only);
        assert!(info.formats[1].video_only);
    }

    #[test]
    fn dispositions_quote_the_name() {
        assert_eq!(content_disposition("a.mp3", false), "inline; filename=\"a.mp3\"");
        assert_eq!(
            content_disposition("say \"hi\".mp4", true),
            "attachment; filename=\"say \\\"hi\\\".mp4\""
        );
    }
}
