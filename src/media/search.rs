// Search collaborator - InnerTube search with typed, lenient projections
//
// The search response is a deep tree of optional renderers. Only the path
// down to the item list is modelled; each item is decoded on its own so one
// odd entry never sinks the page, and every field projection falls back to
// an empty value instead of failing.

use std::time::Duration;

use serde::{de::IgnoredAny, Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::debug;

use super::errors::ResolveError;
use super::models::{PlaylistResult, SearchResult, Thumbnail};
use super::utils::parse_clock_duration;
use crate::config::NetworkConfig;

const SEARCH_URL: &str = "https://www.youtube.com/youtubei/v1/search?prettyPrint=false";
const CLIENT_NAME: &str = "WEB";
const CLIENT_VERSION: &str = "2.20231219.04.00";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Decode `T`, or fall back to its default if the value has an unexpected shape
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchResponse {
    #[serde(deserialize_with = "lenient")]
    contents: Contents,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Contents {
    two_column_search_results_renderer: TwoColumnResults,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TwoColumnResults {
    primary_contents: PrimaryContents,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PrimaryContents {
    section_list_renderer: SectionList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SectionList {
    contents: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Section {
    item_section_renderer: ItemSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemSection {
    contents: Vec<Value>,
}

/// One search item; at most one renderer is set
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Item {
    video_renderer: Option<VideoRenderer>,
    playlist_renderer: Option<PlaylistRenderer>,
    compact_playlist_renderer: Option<PlaylistRenderer>,
    grid_playlist_renderer: Option<PlaylistRenderer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VideoRenderer {
    video_id: Option<String>,
    title: Option<TextValue>,
    owner_text: Option<TextValue>,
    long_byline_text: Option<TextValue>,
    length_text: Option<TextValue>,
    view_count_text: Option<TextValue>,
    #[serde(deserialize_with = "lenient")]
    thumbnail: ThumbnailList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlaylistRenderer {
    playlist_id: Option<String>,
    title: Option<TextValue>,
    short_byline_text: Option<TextValue>,
    long_byline_text: Option<TextValue>,
    video_count: Option<TextValue>,
    video_count_text: Option<TextValue>,
    #[serde(deserialize_with = "lenient")]
    thumbnail: ThumbnailList,
    #[serde(deserialize_with = "lenient")]
    thumbnails: Vec<ThumbnailList>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThumbnailList {
    thumbnails: Vec<ThumbnailEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThumbnailEntry {
    url: Option<String>,
    width: u32,
    height: u32,
}

/// InnerTube text: a bare string, `{"simpleText"}` or `{"runs": [{"text"}]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextValue {
    Plain(String),
    Rich {
        #[serde(rename = "simpleText")]
        simple_text: Option<String>,
        runs: Option<Vec<Run>>,
    },
    Other(IgnoredAny),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Run {
    text: String,
}

impl TextValue {
    /// Full text: simple text, or all runs joined
    fn text(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Rich {
                simple_text: Some(text),
                ..
            } => text.clone(),
            Self::Rich {
                runs: Some(runs), ..
            } => runs.iter().map(|r| r.text.as_str()).collect(),
            _ => String::new(),
        }
    }

    /// Leading segment, e.g. the channel name in a byline
    fn first_run(&self) -> String {
        match self {
            Self::Rich {
                runs: Some(runs), ..
            } => runs.first().map(|r| r.text.clone()).unwrap_or_default(),
            other => other.text(),
        }
    }
}

fn text_of(value: &Option<TextValue>) -> String {
    value.as_ref().map(TextValue::text).unwrap_or_default()
}

fn first_run_of(values: &[&Option<TextValue>]) -> String {
    values
        .iter()
        .filter_map(|v| v.as_ref())
        .map(TextValue::first_run)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn project_thumbnails(list: &ThumbnailList) -> Vec<Thumbnail> {
    list.thumbnails
        .iter()
        .filter_map(|t| {
            Some(Thumbnail {
                url: t.url.clone()?,
                width: t.width,
                height: t.height,
            })
        })
        .collect()
}

/// Projections of a video item
impl VideoRenderer {
    fn title(&self) -> String {
        text_of(&self.title)
    }

    fn author(&self) -> String {
        first_run_of(&[&self.owner_text, &self.long_byline_text])
    }

    fn duration(&self) -> String {
        text_of(&self.length_text)
    }

    fn views(&self) -> String {
        text_of(&self.view_count_text)
    }

    fn thumbnails(&self) -> Vec<Thumbnail> {
        project_thumbnails(&self.thumbnail)
    }

    fn into_result(self) -> Option<SearchResult> {
        let duration = self.duration();
        let duration_sec = parse_clock_duration(&duration).unwrap_or(0);
        Some(SearchResult {
            title: self.title(),
            author: self.author(),
            views: self.views(),
            thumbnails: self.thumbnails(),
            duration,
            duration_sec,
            id: self.video_id?,
        })
    }
}

/// Projections of a playlist item
impl PlaylistRenderer {
    fn title(&self) -> String {
        text_of(&self.title)
    }

    fn author(&self) -> String {
        first_run_of(&[&self.short_byline_text, &self.long_byline_text])
    }

    /// "12", "12 videos" or "1,204 videos" -> count; unknown is 0
    fn video_count(&self) -> u32 {
        let text = match (&self.video_count, &self.video_count_text) {
            (Some(count), _) => count.text(),
            (None, Some(count)) => count.text(),
            (None, None) => return 0,
        };
        let digits: String = text
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        digits.parse().unwrap_or(0)
    }

    fn thumbnails(&self) -> Vec<Thumbnail> {
        let direct = project_thumbnails(&self.thumbnail);
        if !direct.is_empty() {
            return direct;
        }
        self.thumbnails.first().map(project_thumbnails).unwrap_or_default()
    }

    fn into_result(self) -> Option<PlaylistResult> {
        Some(PlaylistResult {
            title: self.title(),
            author: self.author(),
            video_count: self.video_count(),
            thumbnails: self.thumbnails(),
            id: self.playlist_id?,
        })
    }
}

/// Videos and playlists found on one result page
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SearchPage {
    pub videos: Vec<SearchResult>,
    pub playlists: Vec<PlaylistResult>,
}

/// Project a raw search response; shapes that do not match yield nothing
pub fn parse_search_response(body: &[u8]) -> Result<SearchPage, ResolveError> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| ResolveError::upstream(format!("invalid search response: {}", e), false))?;

    let mut page = SearchPage::default();
    let sections = response
        .contents
        .two_column_search_results_renderer
        .primary_contents
        .section_list_renderer
        .contents;

    let items = sections
        .into_iter()
        .filter_map(|section| serde_json::from_value::<Section>(section).ok())
        .flat_map(|section| section.item_section_renderer.contents)
        .filter_map(|item| serde_json::from_value::<Item>(item).ok());

    for item in items {
        if let Some(video) = item.video_renderer.and_then(VideoRenderer::into_result) {
            page.videos.push(video);
            continue;
        }
        let playlist = item
            .playlist_renderer
            .or(item.compact_playlist_renderer)
            .or(item.grid_playlist_renderer)
            .and_then(PlaylistRenderer::into_result);
        if let Some(playlist) = playlist {
            page.playlists.push(playlist);
        }
    }

    Ok(page)
}

/// InnerTube search client
#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SearchClient {
    pub fn new(network: &NetworkConfig) -> Result<Self, ResolveError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(u64::from(network.timeout_seconds)));
        if let Some(proxy) = &network.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ResolveError::upstream(format!("invalid proxy: {}", e), false))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| ResolveError::upstream(format!("http client: {}", e), false))?;

        Ok(Self {
            http,
            endpoint: SEARCH_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// One page of results for `query`
    pub async fn search(&self, query: &str) -> Result<SearchPage, ResolveError> {
        let payload = json!({
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION,
                    "hl": "en",
                    "gl": "US",
                }
            },
            "query": query,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ResolveError::upstream(format!("search request: {}", e), true))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::upstream(
                format!("search returned HTTP {}", status),
                status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolveError::upstream(format!("search response: {}", e), true))?;
        let page = parse_search_response(&body)?;
        debug!(query, videos = page.videos.len(), playlists = page.playlists.len(), "search done");
        Ok(page)
    }

    pub async fn search_videos(&self, query: &str) -> Result<Vec<SearchResult>, ResolveError> {
        Ok(self.search(query).await?.videos)
    }

    /// Playlists for `query`
    ///
    /// Searches `"<query> playlist"`; when the page carries no playlist
    /// items, its videos are returned in playlist form with an unknown count.
    pub async fn search_playlists(&self, query: &str) -> Result<Vec<PlaylistResult>, ResolveError> {
        let page = self.search(&format!("{} playlist", query)).await?;
        Ok(playlists_or_videos(page))
    }

    /// Media related to `id` (a search on the id itself)
    pub async fn related(&self, id: &str) -> Result<Vec<SearchResult>, ResolveError> {
        let videos = self.search_videos(id).await?;
        Ok(videos.into_iter().filter(|v| v.id != id).collect())
    }
}

fn playlists_or_videos(page: SearchPage) -> Vec<PlaylistResult> {
    if !page.playlists.is_empty() {
        return page.playlists;
    }
    page.videos
        .into_iter()
        .map(|v| PlaylistResult {
            id: v.id,
            title: v.title,
            author: v.author,
            video_count: 0,
            thumbnails: v.thumbnails,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(items: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "contents": {
                "twoColumnSearchResultsRenderer": {
                    "primaryContents": {
                        "sectionListRenderer": {
                            "contents": [
                                {"continuationItemRenderer": {}},
                                {"itemSectionRenderer": {"contents": items}}
                            ]
                        }
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn video_items_are_projected() {
        let body = response(json!([{
            "videoRenderer": {
                "videoId": "dQw4w9WgXcQ",
                "title": {"runs": [{"text": "Never Gonna "}, {"text": "Give You Up"}]},
                "ownerText": {"runs": [{"text": "Rick Astley"}]},
                "lengthText": {"simpleText": "3:33"},
                "viewCountText": {"simpleText": "1,500,000,000 views"},
                "thumbnail": {"thumbnails": [{"url": "https://i.ytimg.com/a.jpg", "width": 360, "height": 202}]}
            }
        }]));

        let page = parse_search_response(&body).unwrap();
        let video = &page.videos[0];

        assert_eq!(video.id, "dQw4w9WgXcQ");
        assert_eq!(video.title, "Never Gonna Give You Up");
        assert_eq!(video.author, "Rick Astley");
        assert_eq!(video.duration, "3:33");
        assert_eq!(video.duration_sec, 213);
        assert_eq!(video.views, "1,500,000,000 views");
        assert_eq!(video.thumbnails[0].width, 360);
    }

    #[test]
    fn missing_fields_yield_defaults() {
        let body = response(json!([
            {"videoRenderer": {"videoId": "abc", "thumbnail": "not an object", "lengthText": 42}},
            {"videoRenderer": {"title": {"simpleText": "no id"}}},
            {"shelfRenderer": {}},
            "garbage"
        ]));

        let page = parse_search_response(&body).unwrap();

        assert_eq!(page.videos.len(), 1);
        let video = &page.videos[0];
        assert_eq!(video.title, "");
        assert_eq!(video.author, "");
        assert_eq!(video.duration_sec, 0);
        assert!(video.thumbnails.is_empty());
    }

    #[test]
    fn unexpected_top_level_shape_is_empty() {
        let page = parse_search_response(br#"{"contents": []}"#).unwrap();
        assert_eq!(page, SearchPage::default());
        assert!(parse_search_response(b"<html>").is_err());
    }

    #[test]
    fn playlist_renderers_are_collected() {
        let body = response(json!([
            {"playlistRenderer": {
                "playlistId": "PL123",
                "title": {"simpleText": "Best of"},
                "shortBylineText": {"runs": [{"text": "Curator"}, {"text": " • "}]},
                "videoCount": "1,204",
                "thumbnails": [{"thumbnails": [{"url": "https://i.ytimg.com/p.jpg", "width": 480, "height": 270}]}]
            }},
            {"gridPlaylistRenderer": {
                "playlistId": "PL456",
                "title": {"runs": [{"text": "Mix"}]},
                "videoCountText": {"runs": [{"text": "12"}, {"text": " videos"}]}
            }}
        ]));

        let page = parse_search_response(&body).unwrap();

        assert_eq!(page.playlists.len(), 2);
        assert_eq!(page.playlists[0].author, "Curator");
        assert_eq!(page.playlists[0].video_count, 1204);
        assert_eq!(page.playlists[0].thumbnails.len(), 1);
        assert_eq!(page.playlists[1].video_count, 12);
    }

    #[test]
    fn videos_stand_in_for_missing_playlists() {
        let page = SearchPage {
            videos: vec![SearchResult {
                id: "abc".into(),
                title: "A video".into(),
                ..Default::default()
            }],
            playlists: Vec::new(),
        };

        let playlists = playlists_or_videos(page);
        assert_eq!(playlists[0].id, "abc");
        assert_eq!(playlists[0].video_count, 0);
    }
}
