// FormatSelector - deterministic representation selection
//
// Turns a representation catalog into one of three selections:
// - Audio only (highest audio bitrate)
// - Combined (already-muxed video+audio, MP4 first, then tallest)
// - Separate video-only + audio pair for muxing (H.264 first, English audio first)
//
// All sorts are stable, so repeated selection over the same catalog
// always yields the same result.

use std::cmp::Reverse;

use super::errors::SelectionError;
use super::models::{Representation, Selection};

/// Format selector with codec-compatibility and quality tie-breaks
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatSelector {
    /// Ignore combined representations taller than this
    max_combined_height: Option<u32>,
}

impl FormatSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_combined_height(mut self, height: Option<u32>) -> Self {
        self.max_combined_height = height;
        self
    }

    /// Best pure-audio representation
    ///
    /// Falls back to any representation carrying audio when nothing is
    /// tagged as audio-only.
    pub fn select_audio_only<'a>(
        &self,
        catalog: &'a [Representation],
    ) -> Result<&'a Representation, SelectionError> {
        let carrying: Vec<&Representation> = catalog.iter().filter(|r| r.has_audio()).collect();

        let mut candidates: Vec<&Representation> = carrying
            .iter()
            .copied()
            .filter(|r| r.is_audio_only())
            .collect();
        if candidates.is_empty() {
            candidates = carrying;
        }

        candidates.sort_by_key(|r| Reverse(r.audio_bitrate));
        candidates
            .first()
            .copied()
            .ok_or(SelectionError::NoAudioAvailable)
    }

    /// Best representation that already has both video and audio
    ///
    /// MP4 containers sort before anything else; within the same
    /// container preference the tallest wins.
    pub fn select_combined<'a>(
        &self,
        catalog: &'a [Representation],
    ) -> Result<&'a Representation, SelectionError> {
        let mut candidates: Vec<&Representation> = catalog
            .iter()
            .filter(|r| r.is_combined())
            .filter(|r| self.max_combined_height.map_or(true, |max| r.height <= max))
            .collect();

        // false sorts before true, so negate "is mp4"
        candidates.sort_by_key(|r| (!r.is_mp4(), Reverse(r.height)));
        candidates
            .first()
            .copied()
            .ok_or(SelectionError::NoCombinedFormat)
    }

    /// Best video-only representation, preferring H.264 over everything else
    pub fn select_video_only<'a>(
        &self,
        catalog: &'a [Representation],
    ) -> Result<&'a Representation, SelectionError> {
        let (mut h264, mut other): (Vec<&Representation>, Vec<&Representation>) = catalog
            .iter()
            .filter(|r| r.is_video_only())
            .partition(|r| r.is_h264());

        h264.sort_by_key(|r| Reverse(r.bitrate));
        other.sort_by_key(|r| Reverse(r.bitrate));

        h264.first()
            .or_else(|| other.first())
            .copied()
            .ok_or(SelectionError::NoVideoOnlyFormat)
    }

    /// Best audio to pair with a video-only representation
    ///
    /// An English track wins over any bitrate; otherwise the highest
    /// audio bitrate.
    pub fn select_pairing_audio<'a>(
        &self,
        catalog: &'a [Representation],
    ) -> Result<&'a Representation, SelectionError> {
        let mut candidates: Vec<&Representation> =
            catalog.iter().filter(|r| r.is_audio_tagged()).collect();
        candidates.sort_by_key(|r| Reverse(r.audio_bitrate));

        candidates
            .iter()
            .find(|r| r.is_english())
            .or_else(|| candidates.first())
            .copied()
            .ok_or(SelectionError::NoAudioOnlyFormat)
    }

    /// Video-only + audio pair for muxing
    ///
    /// Either both sides are selected or the call fails; nothing is opened here.
    pub fn select_separate<'a>(
        &self,
        catalog: &'a [Representation],
    ) -> Result<(&'a Representation, &'a Representation), SelectionError> {
        let video = self.select_video_only(catalog)?;
        let audio = self.select_pairing_audio(catalog)?;
        Ok((video, audio))
    }

    /// Selection for video playback: combined when available, else a pair
    pub fn select_video(&self, catalog: &[Representation]) -> Result<Selection, SelectionError> {
        match self.select_combined(catalog) {
            Ok(combined) => Ok(Selection::Combined(combined.clone())),
            Err(SelectionError::NoCombinedFormat) => {
                let (video, audio) = self.select_separate(catalog)?;
                Ok(Selection::Separate {
                    video: video.clone(),
                    audio: audio.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Selection for audio playback
    pub fn select_audio(&self, catalog: &[Representation]) -> Result<Selection, SelectionError> {
        self.select_audio_only(catalog)
            .map(|r| Selection::Audio(r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::models::AudioTrack;

    fn video_only(id: &str, codec: &str, height: u32, bitrate: u64) -> Representation {
        let mut r = Representation::new(id, format!(r#"video/mp4; codecs="{}""#, codec));
        r.height = height;
        r.width = height * 16 / 9;
        r.bitrate = bitrate;
        r
    }

    fn combined(id: &str, container: &str, height: u32) -> Representation {
        let mut r = Representation::new(id, format!("video/{}; codecs=\"x, y\"", container));
        r.height = height;
        r.audio_channels = 2;
        r
    }

    fn audio(id: &str, bitrate: u64, lang: Option<&str>) -> Representation {
        let mut r = Representation::new(id, r#"audio/mp4; codecs="mp4a.40.2""#);
        r.audio_bitrate = bitrate;
        r.audio_channels = 2;
        r.audio_track = lang.map(|l| AudioTrack {
            id: l.to_string(),
            display_name: l.to_string(),
            is_default: false,
        });
        r
    }

    #[test]
    fn audio_only_picks_highest_bitrate() {
        let catalog = vec![
            audio("low", 48_000, None),
            audio("high", 160_000, None),
            combined("c", "mp4", 360),
        ];
        let best = FormatSelector::new().select_audio_only(&catalog).unwrap();
        assert_eq!(best.id, "high");
    }

    #[test]
    fn audio_only_falls_back_to_combined_streams() {
        let mut low = combined("low", "mp4", 360);
        low.audio_bitrate = 96_000;
        let mut high = combined("high", "webm", 720);
        high.audio_bitrate = 128_000;
        let catalog = vec![low, high, video_only("v", "avc1", 1080, 4_000_000)];

        let best = FormatSelector::new().select_audio_only(&catalog).unwrap();
        assert_eq!(best.id, "high");
    }

    #[test]
    fn audio_only_without_audio_fails() {
        let catalog = vec![video_only("v", "avc1", 720, 1)];
        assert_eq!(
            FormatSelector::new().select_audio_only(&catalog),
            Err(SelectionError::NoAudioAvailable)
        );
    }

    #[test]
    fn combined_prefers_mp4_regardless_of_order() {
        let a = vec![combined("webm", "webm", 720), combined("mp4", "mp4", 720)];
        let b = vec![combined("mp4", "mp4", 720), combined("webm", "webm", 720)];
        let selector = FormatSelector::new();
        assert_eq!(selector.select_combined(&a).unwrap().id, "mp4");
        assert_eq!(selector.select_combined(&b).unwrap().id, "mp4");
    }

    #[test]
    fn combined_prefers_mp4_over_taller_webm() {
        let catalog = vec![combined("webm", "webm", 1080), combined("mp4", "mp4", 360)];
        assert_eq!(FormatSelector::new().select_combined(&catalog).unwrap().id, "mp4");
    }

    #[test]
    fn combined_prefers_taller_within_container() {
        let catalog = vec![
            combined("360", "mp4", 360),
            combined("720", "mp4", 720),
            combined("480", "mp4", 480),
        ];
        assert_eq!(FormatSelector::new().select_combined(&catalog).unwrap().id, "720");
    }

    #[test]
    fn combined_never_returns_silent_or_audio_only_streams() {
        let catalog = vec![
            video_only("v", "avc1", 1080, 5_000_000),
            audio("a", 128_000, None),
            combined("c", "webm", 360),
        ];
        let picked = FormatSelector::new().select_combined(&catalog).unwrap();
        assert!(picked.has_video());
        assert!(picked.audio_channels > 0);
        assert_eq!(picked.id, "c");
    }

    #[test]
    fn combined_height_cap_excludes_tall_streams() {
        let catalog = vec![combined("2160", "mp4", 2160), combined("720", "mp4", 720)];
        let capped = FormatSelector::new().with_max_combined_height(Some(1080));
        assert_eq!(capped.select_combined(&catalog).unwrap().id, "720");

        let only_tall = vec![combined("2160", "mp4", 2160)];
        assert_eq!(
            capped.select_combined(&only_tall),
            Err(SelectionError::NoCombinedFormat)
        );
    }

    #[test]
    fn separate_prefers_h264_bucket() {
        let catalog = vec![
            video_only("vp9", "vp9", 2160, 9_000_000),
            video_only("avc-low", "avc1.4d401e", 480, 900_000),
            video_only("avc-high", "avc1.640028", 1080, 4_000_000),
            audio("a", 128_000, None),
        ];
        let (video, _) = FormatSelector::new().select_separate(&catalog).unwrap();
        assert_eq!(video.id, "avc-high");
    }

    #[test]
    fn separate_uses_other_codecs_without_h264() {
        let catalog = vec![
            video_only("vp9-low", "vp9", 720, 1_000_000),
            video_only("vp9-high", "vp9", 1080, 2_500_000),
            audio("a", 128_000, None),
        ];
        let (video, _) = FormatSelector::new().select_separate(&catalog).unwrap();
        assert_eq!(video.id, "vp9-high");
    }

    #[test]
    fn separate_prefers_english_audio_over_bitrate() {
        let catalog = vec![
            video_only("v", "avc1", 720, 2_000),
            audio("en", 48_000, Some("en")),
            audio("untagged", 160_000, None),
        ];
        let (_, audio) = FormatSelector::new().select_separate(&catalog).unwrap();
        assert_eq!(audio.id, "en");
    }

    #[test]
    fn separate_without_audio_fails_instead_of_going_silent() {
        let catalog = vec![video_only("v", "avc1", 720, 2_000)];
        assert_eq!(
            FormatSelector::new().select_separate(&catalog),
            Err(SelectionError::NoAudioOnlyFormat)
        );
    }

    #[test]
    fn separate_pair_invariants_hold() {
        let catalog = vec![
            combined("c", "mp4", 720),
            video_only("v", "vp9", 1080, 3_000_000),
            audio("a", 128_000, Some("de")),
        ];
        let (video, audio) = FormatSelector::new().select_separate(&catalog).unwrap();
        assert_eq!(video.audio_channels, 0);
        assert!(audio.is_audio_tagged());
    }

    #[test]
    fn empty_catalog_fails_every_selection() {
        let selector = FormatSelector::new();
        let empty: Vec<Representation> = Vec::new();
        assert_eq!(selector.select_audio_only(&empty), Err(SelectionError::NoAudioAvailable));
        assert_eq!(selector.select_combined(&empty), Err(SelectionError::NoCombinedFormat));
        assert_eq!(selector.select_separate(&empty), Err(SelectionError::NoVideoOnlyFormat));
        assert_eq!(
            selector.select_pairing_audio(&empty),
            Err(SelectionError::NoAudioOnlyFormat)
        );
        assert_eq!(selector.select_video(&empty), Err(SelectionError::NoVideoOnlyFormat));
    }

    #[test]
    fn selection_is_idempotent() {
        let catalog = vec![
            combined("a", "mp4", 720),
            combined("b", "mp4", 720),
            audio("x", 128_000, None),
            audio("y", 128_000, None),
        ];
        let selector = FormatSelector::new();
        let first = selector.select_video(&catalog).unwrap();
        let second = selector.select_video(&catalog).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            selector.select_audio(&catalog).unwrap(),
            selector.select_audio(&catalog).unwrap()
        );
    }

    #[test]
    fn video_selection_falls_back_to_separate_streams() {
        let catalog = vec![video_only("v", "avc1", 720, 2_000), audio("a", 128_000, None)];
        match FormatSelector::new().select_video(&catalog).unwrap() {
            Selection::Separate { video, audio } => {
                assert_eq!(video.id, "v");
                assert_eq!(audio.id, "a");
            }
            other => panic!("expected separate selection, got {:?}", other),
        }
    }

    #[test]
    fn end_to_end_separate_scenario() {
        let catalog = vec![
            video_only("720-avc1", "avc1.4d401f", 720, 2000),
            video_only("1080-vp9", "vp9", 1080, 1800),
            audio("128-en", 128, Some("en")),
            audio("160-fr", 160, Some("fr")),
        ];
        let (video, audio) = FormatSelector::new().select_separate(&catalog).unwrap();
        assert_eq!(video.id, "720-avc1");
        assert_eq!(audio.id, "128-en");
    }
}
