//! Walks a provider's hop chain and extracts the obfuscated payload.
//!
//! The navigator is a small state machine: fetch hop `i`, run its
//! extraction rule, feed the extracted value into hop `i + 1`'s URL
//! template, carrying the previous hop's URL as `Referer` throughout. A
//! non-2xx response or a rule that matches nothing fails immediately with
//! the hop index. A miss means the provider changed its markup, not a
//! transient fault, so there is no retry.

use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{ResolveError, Stage};
use crate::http;
use crate::provider::{ContentRef, ExtractRule, ProviderSpec};

/// The raw payload recovered at the end of a chain, traced to the hop
/// that produced it.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub raw: String,
    /// URL of the final hop, used as `Referer` context downstream.
    pub hop_url: String,
    /// Element id captured alongside the payload, when the extraction
    /// rule exposes one (used by dispatching decoders).
    pub element_id: Option<String>,
}

/// One fetched hop, recorded for the diagnostic trail.
#[derive(Debug, Clone, Serialize)]
pub struct HopRecord {
    pub index: usize,
    pub url: String,
    pub status: u16,
    pub elapsed_ms: u64,
}

/// Walks provider chains over the shared HTTP client.
pub struct ChainNavigator {
    client: reqwest::Client,
}

impl ChainNavigator {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Walk the chain for one reference.
    ///
    /// `per_hop` bounds each fetch; `budget` bounds the whole walk. Hop
    /// records are appended to `trail` as they complete, so a failure
    /// still leaves the hops taken so far visible to the caller.
    pub async fn run(
        &self,
        spec: &ProviderSpec,
        content: &ContentRef,
        per_hop: Duration,
        budget: Duration,
        trail: &mut Vec<HopRecord>,
    ) -> Result<EncodedPayload, ResolveError> {
        let started = Instant::now();
        let mut prev_url: Option<String> = None;
        let mut prev_value: Option<String> = None;
        let mut payload: Option<EncodedPayload> = None;

        for (index, hop) in spec.hops.iter().enumerate() {
            let url = hop.render(content, prev_value.as_deref());
            let referer = prev_url.as_deref().unwrap_or(&spec.headers.referer_base);

            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(ResolveError::Timeout {
                    stage: Stage::Chain { hop: index },
                });
            }

            debug!(provider = %spec.id, hop = index, url = %url, "fetching chain hop");
            let hop_started = Instant::now();
            let request = http::apply_policy(self.client.get(&url), &spec.headers, referer);
            let response = tokio::time::timeout(per_hop.min(remaining), request.send())
                .await
                .map_err(|_| ResolveError::Timeout {
                    stage: Stage::Chain { hop: index },
                })?
                .map_err(|e| {
                    ResolveError::chain_broken(&spec.id, index, format!("request failed: {e}"))
                })?;

            let status = response.status();
            if !status.is_success() {
                trail.push(HopRecord {
                    index,
                    url: url.clone(),
                    status: status.as_u16(),
                    elapsed_ms: hop_started.elapsed().as_millis() as u64,
                });
                return Err(ResolveError::chain_broken(
                    &spec.id,
                    index,
                    format!("unexpected status {status}"),
                ));
            }

            let body = response.text().await.map_err(|e| {
                ResolveError::chain_broken(&spec.id, index, format!("body read failed: {e}"))
            })?;
            trail.push(HopRecord {
                index,
                url: url.clone(),
                status: status.as_u16(),
                elapsed_ms: hop_started.elapsed().as_millis() as u64,
            });

            let extracted = extract(&hop.extract, &body).ok_or_else(|| {
                ResolveError::chain_broken(&spec.id, index, "extraction rule matched nothing")
            })?;

            if index + 1 == spec.hops.len() {
                payload = Some(EncodedPayload {
                    raw: extracted.value,
                    hop_url: url.clone(),
                    element_id: extracted.element_id,
                });
            } else {
                prev_value = Some(normalize_url_fragment(&extracted.value));
            }
            prev_url = Some(url);
        }

        // The registry guarantees a non-empty hop list, so the last
        // iteration always set the payload.
        payload.ok_or_else(|| ResolveError::chain_broken(&spec.id, 0, "provider has no hops"))
    }
}

struct Extracted {
    value: String,
    element_id: Option<String>,
}

/// Apply one extraction rule to a fetched body.
fn extract(rule: &ExtractRule, body: &str) -> Option<Extracted> {
    let re = Regex::new(&rule.pattern()).ok()?;
    match rule {
        ExtractRule::Regex { group, .. } => {
            let caps = re.captures(body)?;
            Some(Extracted {
                value: caps.get(*group)?.as_str().to_string(),
                element_id: None,
            })
        }
        ExtractRule::DataAttr { .. } => {
            let caps = re.captures(body)?;
            Some(Extracted {
                value: caps.get(1)?.as_str().to_string(),
                element_id: None,
            })
        }
        ExtractRule::HiddenDiv { min_len } => {
            for caps in re.captures_iter(body) {
                let content = caps.get(2)?.as_str();
                if content.len() >= *min_len {
                    return Some(Extracted {
                        value: content.to_string(),
                        element_id: Some(caps.get(1)?.as_str().to_string()),
                    });
                }
            }
            None
        }
    }
}

/// Protocol-relative fragments become https; everything else passes
/// through for the next hop's template to place.
fn normalize_url_fragment(value: &str) -> String {
    if let Some(rest) = value.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        value.to_string()
    }
}
