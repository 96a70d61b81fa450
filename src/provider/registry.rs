//! Immutable table of provider specs, validated at load.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SpecError;

use super::{ExtractRule, HeaderPolicy, HopSpec, ProviderSpec};

/// Process-wide, read-only registry of [`ProviderSpec`]s.
#[derive(Debug)]
pub struct ProviderRegistry {
    specs: HashMap<String, Arc<ProviderSpec>>,
}

impl ProviderRegistry {
    /// Build a registry from specs, validating each one.
    ///
    /// Validation enforces the spec invariants up front: a non-empty hop
    /// chain, compilable extraction patterns, and unique provider ids.
    pub fn new(specs: Vec<ProviderSpec>) -> Result<Self, SpecError> {
        let mut map = HashMap::with_capacity(specs.len());
        for spec in specs {
            if spec.hops.is_empty() {
                return Err(SpecError::EmptyChain(spec.id));
            }
            for (hop, hop_spec) in spec.hops.iter().enumerate() {
                regex::Regex::new(&hop_spec.extract.pattern()).map_err(|source| {
                    SpecError::InvalidPattern {
                        provider: spec.id.clone(),
                        hop,
                        source,
                    }
                })?;
            }
            if map.contains_key(&spec.id) {
                return Err(SpecError::DuplicateProvider(spec.id));
            }
            map.insert(spec.id.clone(), Arc::new(spec));
        }
        Ok(Self { specs: map })
    }

    /// Registry of the builtin aggregator providers.
    pub fn builtin() -> Self {
        Self::new(builtin_specs()).expect("builtin provider specs are valid")
    }

    /// Look up a spec by provider id.
    pub fn get(&self, id: &str) -> Option<Arc<ProviderSpec>> {
        self.specs.get(id).cloned()
    }

    /// Registered provider ids, in no particular order.
    pub fn ids(&self) -> Vec<&str> {
        self.specs.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// The provider chains established from the embed sites the engine targets.
///
/// Each spec mirrors the hop sequence a browser takes through the site's
/// nested iframes; extraction patterns track the markup observed there and
/// are the first thing to update when a provider changes.
fn builtin_specs() -> Vec<ProviderSpec> {
    vec![
        // Three-hop iframe chain: embed page -> player iframe -> /prorcp/
        // page carrying a hidden div whose id selects the decoder.
        ProviderSpec {
            id: "vidsrc".into(),
            hops: vec![
                HopSpec {
                    movie_url: "https://vidsrc.xyz/embed/movie/{id}".into(),
                    tv_url: "https://vidsrc.xyz/embed/tv/{id}/{season}-{episode}".into(),
                    extract: ExtractRule::Regex {
                        pattern: r#"id="player_iframe" src="([^"]+)""#.into(),
                        group: 1,
                    },
                },
                HopSpec::fixed(
                    "{prev}",
                    ExtractRule::Regex {
                        pattern: r#"src: '(/prorcp/[^']+)'"#.into(),
                        group: 1,
                    },
                ),
                HopSpec::fixed(
                    "https://cloudnestra.com{prev}",
                    ExtractRule::HiddenDiv { min_len: 32 },
                ),
            ],
            pipeline: "vidsrc".into(),
            headers: HeaderPolicy::referer_only("https://vidsrc.xyz/"),
        },
        // Single hop: the embed page inlines an atob(`...`) player config.
        ProviderSpec {
            id: "embedsu".into(),
            hops: vec![HopSpec {
                movie_url: "https://embed.su/embed/movie/{id}".into(),
                tv_url: "https://embed.su/embed/tv/{id}/{season}/{episode}".into(),
                extract: ExtractRule::Regex {
                    pattern: r"atob\(`([a-zA-Z0-9+/=]+)`\)".into(),
                    group: 1,
                },
            }],
            pipeline: "embedsu".into(),
            headers: HeaderPolicy::referer_only("https://embed.su/"),
        },
        // Two hops: the embed page links a module script which carries the
        // AES payload. This edge requires both Referer and Origin.
        ProviderSpec {
            id: "moviebox".into(),
            hops: vec![
                HopSpec {
                    movie_url: "https://ww2.moviebox.to/movie/{id}".into(),
                    tv_url: "https://ww2.moviebox.to/tv/{id}/{season}/{episode}".into(),
                    extract: ExtractRule::Regex {
                        pattern: r#"<script type="module"[^>]*src="([^"]+)""#.into(),
                        group: 1,
                    },
                },
                HopSpec::fixed(
                    "https://ww2.moviebox.to{prev}",
                    ExtractRule::Regex {
                        pattern: r#"PAYLOAD:\s*"([^"]+)""#.into(),
                        group: 1,
                    },
                ),
            ],
            pipeline: "moviebox".into(),
            headers: HeaderPolicy::with_origin(
                "https://ww2.moviebox.to/",
                "https://ww2.moviebox.to",
            ),
        },
    ]
}
