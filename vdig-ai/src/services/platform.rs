//! Video platform metadata and subtitle client
//!
//! [`VideoPlatform`] is the seam the acquisition pipeline and the collection
//! expander talk to. [`BilibiliClient`] implements it over the public web API.
//! Each method performs a single request chain with no retry; callers wrap
//! calls in the shared [`Fetcher`](super::fetcher::Fetcher).

use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE, ORIGIN, REFERER};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::fetcher::FetchError;
use crate::models::{Segment, Transcript};
use vdig_common::config::PlatformConfig;

/// Page size of the collection listing
pub const COLLECTION_PAGE_SIZE: u32 = 20;

/// One part of a (possibly multi-part) video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPart {
    /// 1-based part number
    pub page: u32,
    pub cid: u64,
    /// Part title
    pub part: String,
}

/// Video metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub bvid: String,
    pub title: String,
    pub parts: Vec<VideoPart>,
    /// Cover image URL, when the platform lists one
    pub cover_url: Option<String>,
}

impl VideoInfo {
    pub fn part(&self, page: u32) -> Option<&VideoPart> {
        self.parts.iter().find(|p| p.page == page)
    }
}

/// One page of a collection listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionPage {
    /// Member video ids, in listing order
    pub bvids: Vec<String>,
    pub has_more: bool,
}

/// Metadata and subtitle provider
#[async_trait::async_trait]
pub trait VideoPlatform: Send + Sync {
    /// Title and parts of a video
    async fn video_info(&self, bvid: &str) -> Result<VideoInfo, FetchError>;

    /// Subtitle of one part; `Ok(None)` means the video definitively has none
    async fn subtitle(&self, bvid: &str, cid: u64) -> Result<Option<Transcript>, FetchError>;

    /// One page (1-based) of a collection listing
    async fn collection_page(&self, media_id: u64, page: u32)
        -> Result<CollectionPage, FetchError>;

    /// Raw bytes of a cover image
    async fn cover(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Login cookies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies {
    pub sessdata: Option<String>,
    pub bili_jct: Option<String>,
    pub buvid3: Option<String>,
}

impl Cookies {
    /// Parse `key=value` lines; keys are case-insensitive, `#` starts a comment
    pub fn parse(content: &str) -> Self {
        let mut cookies = Cookies::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_lowercase().as_str() {
                "sessdata" => cookies.sessdata = Some(value.to_string()),
                "bili_jct" => cookies.bili_jct = Some(value.to_string()),
                "buvid3" => cookies.buvid3 = Some(value.to_string()),
                _ => {}
            }
        }
        cookies
    }

    /// Load from file; a missing file yields no cookies
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Cookies file not found, continuing without login");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// `Cookie` header value, `None` when empty
    pub fn header_value(&self) -> Option<String> {
        let pairs: Vec<String> = [
            ("SESSDATA", &self.sessdata),
            ("bili_jct", &self.bili_jct),
            ("buvid3", &self.buvid3),
        ]
        .iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| format!("{}={}", name, v)))
        .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    bvid: String,
    title: String,
    #[serde(default)]
    pic: String,
    #[serde(default)]
    pages: Vec<PageData>,
}

#[derive(Debug, Deserialize)]
struct PageData {
    page: u32,
    cid: u64,
    #[serde(default)]
    part: String,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerData {
    #[serde(default)]
    subtitle: Option<SubtitleListing>,
}

#[derive(Debug, Default, Deserialize)]
struct SubtitleListing {
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
    #[serde(default)]
    ai_subtitle: Option<SubtitleTrack>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubtitleTrack {
    #[serde(default)]
    lan: String,
    #[serde(default)]
    subtitle_url: String,
}

#[derive(Debug, Deserialize)]
struct SubtitleBody {
    #[serde(default)]
    body: Vec<SubtitleLine>,
}

#[derive(Debug, Deserialize)]
struct SubtitleLine {
    from: f64,
    to: f64,
    content: String,
}

#[derive(Debug, Deserialize)]
struct FavoriteData {
    #[serde(default)]
    medias: Option<Vec<FavoriteMedia>>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct FavoriteMedia {
    #[serde(default)]
    bvid: String,
}

/// Map a non-zero API envelope code
fn api_code_error(code: i64, message: String) -> FetchError {
    match code {
        -404 | 62002 | 62004 => FetchError::NotFound(message),
        -403 | 11010 => FetchError::PermissionDenied(message),
        -101 => FetchError::AuthExpired,
        -412 | -509 | -799 => FetchError::RateLimited,
        -500 | -503 => FetchError::Server(500),
        _ => FetchError::Api { code, message },
    }
}

/// Track URLs are sometimes protocol-relative
pub fn normalize_track_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

/// Bilibili web API client
pub struct BilibiliClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl BilibiliClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, FetchError> {
        let cookies = match &config.cookies_file {
            Some(path) => Cookies::load(path)
                .map_err(|e| FetchError::Connection(format!("read cookies file: {}", e)))?,
            None => Cookies::default(),
        };
        Self::with_cookies(config, &cookies)
    }

    pub fn with_cookies(config: &PlatformConfig, cookies: &Cookies) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        let site = HeaderValue::from_str(&config.site_url)
            .map_err(|e| FetchError::Parse(format!("site_url header: {}", e)))?;
        headers.insert(REFERER, site.clone());
        headers.insert(ORIGIN, site);
        if let Some(cookie) = cookies.header_value() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| FetchError::Parse(format!("cookie header: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(FetchError::from_reqwest)?;

        tracing::debug!(
            base_url = %config.base_url,
            logged_in = cookies.sessdata.is_some(),
            "Platform client created"
        );

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_body<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        tracing::debug!(url = %url, "Platform request");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))
    }

    async fn get_api<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let envelope: Envelope<T> = self.get_body(&url).await?;
        if envelope.code != 0 {
            return Err(api_code_error(envelope.code, envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| FetchError::Parse(format!("missing data in {}", path_and_query)))
    }

    async fn subtitle_listing(&self, bvid: &str, cid: u64) -> Result<SubtitleListing, FetchError> {
        let wbi = format!("/x/player/wbi/v2?bvid={}&cid={}", bvid, cid);
        let data: PlayerData = match self.get_api(&wbi).await {
            Ok(data) => data,
            Err(FetchError::Api { code, message }) => {
                tracing::debug!(bvid, code, message = %message, "Signed player API refused, trying legacy endpoint");
                self.get_api(&format!("/x/player/v2?bvid={}&cid={}", bvid, cid))
                    .await?
            }
            Err(e) => return Err(e),
        };
        Ok(data.subtitle.unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl VideoPlatform for BilibiliClient {
    async fn video_info(&self, bvid: &str) -> Result<VideoInfo, FetchError> {
        let data: ViewData = self
            .get_api(&format!("/x/web-interface/view?bvid={}", bvid))
            .await?;

        if data.pages.is_empty() {
            return Err(FetchError::Parse(format!("video {} lists no parts", bvid)));
        }

        tracing::debug!(bvid = %data.bvid, title = %data.title, parts = data.pages.len(), "Video metadata resolved");

        let cover_url = (!data.pic.is_empty()).then(|| normalize_track_url(&data.pic));

        Ok(VideoInfo {
            bvid: data.bvid,
            title: data.title,
            cover_url,
            parts: data
                .pages
                .into_iter()
                .map(|p| VideoPart {
                    page: p.page,
                    cid: p.cid,
                    part: p.part,
                })
                .collect(),
        })
    }

    async fn subtitle(&self, bvid: &str, cid: u64) -> Result<Option<Transcript>, FetchError> {
        let listing = self.subtitle_listing(bvid, cid).await?;

        // Uploaded tracks first, generated track last
        let tracks: Vec<SubtitleTrack> = listing
            .subtitles
            .into_iter()
            .chain(listing.ai_subtitle)
            .filter(|t| !t.subtitle_url.is_empty())
            .collect();

        if tracks.is_empty() {
            tracing::debug!(bvid, cid, "No subtitle tracks listed");
            return Ok(None);
        }

        for track in tracks {
            let url = normalize_track_url(&track.subtitle_url);
            let body: SubtitleBody = match self.get_body(&url).await {
                Ok(body) => body,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::warn!(bvid, lan = %track.lan, error = %e, "Subtitle track unusable, trying next");
                    continue;
                }
            };
            if body.body.is_empty() {
                tracing::debug!(bvid, lan = %track.lan, "Subtitle track is empty, trying next");
                continue;
            }

            tracing::debug!(bvid, lan = %track.lan, lines = body.body.len(), "Subtitle track downloaded");
            return Ok(Some(Transcript::new(
                body.body
                    .into_iter()
                    .map(|line| Segment {
                        start: line.from,
                        end: line.to,
                        text: line.content,
                    })
                    .collect(),
            )));
        }

        Ok(None)
    }

    async fn cover(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(url = %url, "Cover request");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), String::new()));
        }
        let bytes = response.bytes().await.map_err(FetchError::from_reqwest)?;
        Ok(bytes.to_vec())
    }

    async fn collection_page(
        &self,
        media_id: u64,
        page: u32,
    ) -> Result<CollectionPage, FetchError> {
        let data: FavoriteData = self
            .get_api(&format!(
                "/x/v3/fav/resource/list?media_id={}&pn={}&ps={}&platform=web",
                media_id, page, COLLECTION_PAGE_SIZE
            ))
            .await?;

        Ok(CollectionPage {
            bvids: data
                .medias
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.bvid)
                .filter(|b| !b.is_empty())
                .collect(),
            has_more: data.has_more,
        })
    }
}
