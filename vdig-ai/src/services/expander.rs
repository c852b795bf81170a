//! Reference classification and collection expansion
//!
//! One submitted reference becomes one or more single-video references:
//! a collection is paged through to its members, a multi-part video without a
//! part selector becomes one reference per part when all parts are requested.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::fetcher::Fetcher;
use super::platform::VideoPlatform;

/// Upper bound on listing pages fetched for one collection
const MAX_COLLECTION_PAGES: u32 = 500;

/// What a raw reference denotes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Single video, optionally with an explicit 1-based part selector
    Video { bvid: String, page: Option<u32> },
    /// Favourites collection
    Collection { media_id: u64 },
    /// Not recognizable; kept verbatim and failed at acquisition
    Unrecognized,
}

fn bvid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"BV[0-9A-Za-z]+").expect("BVID regex is valid"))
}

fn page_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]p=(\d+)").expect("page regex is valid"))
}

fn collection_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[?&]fid=(\d+))|(?:/ml(\d+))").expect("collection regex is valid")
    })
}

/// Classify a raw reference
pub fn classify(reference: &str) -> ReferenceKind {
    let reference = reference.trim();

    if let Some(caps) = collection_pattern().captures(reference) {
        let id = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
        if let Some(media_id) = id.and_then(|s| s.parse::<u64>().ok()) {
            return ReferenceKind::Collection { media_id };
        }
    }

    if let Some(m) = bvid_pattern().find(reference) {
        let page = page_pattern()
            .captures(reference)
            .and_then(|c| c.get(1))
            .and_then(|p| p.as_str().parse::<u32>().ok())
            .filter(|p| *p >= 1);
        return ReferenceKind::Video {
            bvid: m.as_str().to_string(),
            page,
        };
    }

    ReferenceKind::Unrecognized
}

/// Result of expanding one raw reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Resolved single-video references, in order
    pub references: Vec<String>,
    /// Whether the reference was turned into more than itself
    pub expanded: bool,
    /// Multi-part video enumerated into sibling parts
    pub all_parts: bool,
    /// Non-fatal problems met while expanding
    pub warnings: Vec<String>,
}

/// Expands raw references using the platform listing
pub struct CollectionExpander {
    platform: Arc<dyn VideoPlatform>,
    fetcher: Fetcher,
    site_url: String,
}

impl CollectionExpander {
    pub fn new(platform: Arc<dyn VideoPlatform>, fetcher: Fetcher, site_url: impl Into<String>) -> Self {
        Self {
            platform,
            fetcher,
            site_url: site_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn video_url(&self, bvid: &str, page: Option<u32>) -> String {
        match page {
            Some(p) => format!("{}/video/{}?p={}", self.site_url, bvid, p),
            None => format!("{}/video/{}", self.site_url, bvid),
        }
    }

    pub async fn expand(&self, reference: &str, all_parts: bool) -> Expansion {
        match classify(reference) {
            ReferenceKind::Collection { media_id } => self.expand_collection(media_id).await,
            ReferenceKind::Video { bvid, page: None } if all_parts => {
                self.expand_parts(reference, &bvid).await
            }
            _ => Expansion {
                references: vec![reference.trim().to_string()],
                ..Expansion::default()
            },
        }
    }

    async fn expand_parts(&self, reference: &str, bvid: &str) -> Expansion {
        let platform = &self.platform;
        match self
            .fetcher
            .fetch("video_info", || platform.video_info(bvid))
            .await
        {
            Ok(info) if info.parts.len() > 1 => {
                tracing::info!(bvid, parts = info.parts.len(), "Expanding all parts");
                Expansion {
                    references: info
                        .parts
                        .iter()
                        .map(|p| self.video_url(bvid, Some(p.page)))
                        .collect(),
                    expanded: true,
                    all_parts: true,
                    warnings: Vec::new(),
                }
            }
            Ok(_) => Expansion {
                references: vec![reference.trim().to_string()],
                ..Expansion::default()
            },
            Err(e) => {
                // The task itself will surface the failure at acquisition
                tracing::warn!(bvid, error = %e, "Part listing failed, submitting reference as a single video");
                Expansion {
                    references: vec![reference.trim().to_string()],
                    warnings: vec![format!("{}: part listing failed: {}", bvid, e)],
                    ..Expansion::default()
                }
            }
        }
    }

    async fn expand_collection(&self, media_id: u64) -> Expansion {
        let mut expansion = Expansion {
            expanded: true,
            ..Expansion::default()
        };
        let platform = &self.platform;

        for page in 1..=MAX_COLLECTION_PAGES {
            let result = self
                .fetcher
                .fetch("collection_page", || platform.collection_page(media_id, page))
                .await;

            match result {
                Ok(listing) => {
                    let fetched = listing.bvids.len();
                    expansion
                        .references
                        .extend(listing.bvids.iter().map(|b| self.video_url(b, None)));
                    tracing::debug!(media_id, page, fetched, has_more = listing.has_more, "Collection page fetched");
                    if !listing.has_more || fetched == 0 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        media_id,
                        page,
                        kept = expansion.references.len(),
                        error = %e,
                        "Collection page failed, keeping members fetched so far"
                    );
                    expansion
                        .warnings
                        .push(format!("collection {} page {}: {}", media_id, page, e));
                    break;
                }
            }
        }

        tracing::info!(media_id, members = expansion.references.len(), "Collection expanded");
        expansion
    }
}
