//! Provider specifications and the content reference type.
//!
//! A [`ProviderSpec`] is the static description of one third-party embed
//! site: the ordered fetch-and-extract hops of its redirect chain, the id of
//! the decoder pipeline that recovers a URL from its obfuscated payload, and
//! the header policy its CDN edges expect. Specs are immutable and loaded
//! into a [`ProviderRegistry`](registry::ProviderRegistry) at startup;
//! nothing about a provider is discovered at resolve time.

use serde::{Deserialize, Serialize};

mod registry;

pub use registry::ProviderRegistry;

/// Whether a content reference points at a movie or a TV episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

/// The inbound identifier a caller wants resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    /// TMDB numeric id of the movie or show.
    pub tmdb_id: u64,
    pub kind: MediaKind,
    /// Season number, required for [`MediaKind::Tv`].
    pub season: Option<u32>,
    /// Episode number, required for [`MediaKind::Tv`].
    pub episode: Option<u32>,
}

impl ContentRef {
    /// Reference a movie by TMDB id.
    pub fn movie(tmdb_id: u64) -> Self {
        Self {
            tmdb_id,
            kind: MediaKind::Movie,
            season: None,
            episode: None,
        }
    }

    /// Reference a TV episode by TMDB id, season, and episode.
    pub fn episode(tmdb_id: u64, season: u32, episode: u32) -> Self {
        Self {
            tmdb_id,
            kind: MediaKind::Tv,
            season: Some(season),
            episode: Some(episode),
        }
    }

    /// Stable key for the decode cache.
    pub fn cache_key(&self) -> String {
        match self.kind {
            MediaKind::Movie => format!("movie:{}", self.tmdb_id),
            MediaKind::Tv => format!(
                "tv:{}:{}:{}",
                self.tmdb_id,
                self.season.unwrap_or(0),
                self.episode.unwrap_or(0)
            ),
        }
    }
}

/// How to pull the next identifier out of a fetched hop body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractRule {
    /// Capture group `group` of the first match of `pattern`.
    Regex { pattern: String, group: usize },
    /// Value of attribute `attr` on the first `element` tag carrying it.
    DataAttr { element: String, attr: String },
    /// Text of the first element with an inline `display:none` style whose
    /// text is at least `min_len` characters. The element's id is kept as
    /// auxiliary decode context.
    HiddenDiv { min_len: usize },
}

impl ExtractRule {
    /// The regex pattern this rule compiles to.
    pub(crate) fn pattern(&self) -> String {
        match self {
            ExtractRule::Regex { pattern, .. } => pattern.clone(),
            ExtractRule::DataAttr { element, attr } => {
                format!(r#"<{element}[^>]*\s{attr}="([^"]+)""#)
            }
            ExtractRule::HiddenDiv { .. } => {
                r#"<div id="([^"]+)" style="display:\s*none;?">([^<]+)</div>"#.to_string()
            }
        }
    }
}

/// One fetch-and-extract step of a provider's chain.
///
/// URL templates substitute `{id}`, `{season}`, `{episode}`, and `{prev}`
/// (the value extracted by the previous hop, scheme-normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopSpec {
    /// URL template used for movie references.
    pub movie_url: String,
    /// URL template used for TV references.
    pub tv_url: String,
    pub extract: ExtractRule,
}

impl HopSpec {
    /// A hop whose URL is the same for movies and TV (typically `{prev}`).
    pub fn fixed<U: Into<String>>(url: U, extract: ExtractRule) -> Self {
        let url = url.into();
        Self {
            movie_url: url.clone(),
            tv_url: url,
            extract,
        }
    }

    /// Render the hop URL for a reference, substituting `{prev}` when the
    /// hop follows an earlier extraction.
    pub fn render(&self, content: &ContentRef, prev: Option<&str>) -> String {
        let template = match content.kind {
            MediaKind::Movie => &self.movie_url,
            MediaKind::Tv => &self.tv_url,
        };
        let mut url = template
            .replace("{id}", &content.tmdb_id.to_string())
            .replace("{season}", &content.season.unwrap_or(0).to_string())
            .replace("{episode}", &content.episode.unwrap_or(0).to_string());
        if let Some(prev) = prev {
            url = url.replace("{prev}", prev);
        }
        url
    }
}

/// Outbound header behavior for one provider.
///
/// Some CDN edges reject requests that carry `Origin` without a matching
/// `Referer`, so `Origin` is only sent when the spec says so; `Referer` is
/// always sent and mirrors what a browser navigating the chain would send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderPolicy {
    /// Referer for the first hop and for candidate probes.
    pub referer_base: String,
    /// Whether to send an `Origin` header at all.
    pub send_origin: bool,
    /// Origin value when `send_origin` is set.
    pub origin: Option<String>,
}

impl HeaderPolicy {
    /// Referer-only policy (the common case).
    pub fn referer_only<R: Into<String>>(referer_base: R) -> Self {
        Self {
            referer_base: referer_base.into(),
            send_origin: false,
            origin: None,
        }
    }

    /// Referer plus Origin policy.
    pub fn with_origin<R: Into<String>, O: Into<String>>(referer_base: R, origin: O) -> Self {
        Self {
            referer_base: referer_base.into(),
            send_origin: true,
            origin: Some(origin.into()),
        }
    }
}

/// Static description of one provider's chain and decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Short lowercase identifier, e.g. `"vidsrc"`.
    pub id: String,
    /// Ordered, non-empty hop chain.
    pub hops: Vec<HopSpec>,
    /// Id of the decoder pipeline registered for this provider.
    pub pipeline: String,
    pub headers: HeaderPolicy,
}
