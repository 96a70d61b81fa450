//! Probes candidate URLs until one serves a valid manifest.
//!
//! Candidates are probed strictly in rank order, never in parallel: the
//! chosen URL must be the first documented working one, and fanning out
//! would hammer a single CDN family. Success requires both a 2xx status
//! and a content sniff matching a manifest signature, since some CDNs
//! serve a 200 error page and status alone proves nothing.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::{ResolveError, Stage};
use crate::expand::CandidateUrl;
use crate::http;
use crate::provider::HeaderPolicy;

/// How much of the response body the sniff examines.
const SNIFF_WINDOW: usize = 1024;

/// Why a single probe did or did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Valid,
    /// Non-2xx response.
    Status(u16),
    /// 2xx response whose body does not look like a manifest.
    BadSignature,
    Timeout,
    Network(String),
}

/// One probe, recorded for the diagnostic trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeAttempt {
    pub url: String,
    pub outcome: ProbeOutcome,
    pub elapsed_ms: u64,
}

/// Sequentially probes candidates over the shared HTTP client.
pub struct CandidateProber {
    client: reqwest::Client,
}

impl CandidateProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Probe candidates in rank order until one validates.
    ///
    /// `per_candidate` bounds each probe; `budget` bounds the stage.
    /// Returns the chosen candidate and the full attempt trail (the
    /// successful probe included), or [`ResolveError::ResolutionFailed`]
    /// with the trail when the list is exhausted.
    pub async fn select(
        &self,
        policy: &HeaderPolicy,
        candidates: &[CandidateUrl],
        per_candidate: Duration,
        budget: Duration,
    ) -> Result<(CandidateUrl, Vec<ProbeAttempt>), ResolveError> {
        let started = Instant::now();
        let mut trail = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(ResolveError::Timeout {
                    stage: Stage::Probe,
                });
            }

            let probe_started = Instant::now();
            let outcome = self
                .probe_one(policy, &candidate.url, per_candidate.min(remaining))
                .await;
            let valid = outcome == ProbeOutcome::Valid;
            debug!(url = %candidate.url, rank = candidate.rank, ?outcome, "probed candidate");
            trail.push(ProbeAttempt {
                url: candidate.url.clone(),
                outcome,
                elapsed_ms: probe_started.elapsed().as_millis() as u64,
            });

            if valid {
                return Ok((candidate.clone(), trail));
            }
        }

        Err(ResolveError::ResolutionFailed {
            tried: candidates.len(),
            trail,
        })
    }

    async fn probe_one(
        &self,
        policy: &HeaderPolicy,
        url: &str,
        deadline: Duration,
    ) -> ProbeOutcome {
        let started = Instant::now();
        let request = http::apply_policy(self.client.get(url), policy, &policy.referer_base);
        let response = match tokio::time::timeout(deadline, request.send()).await {
            Err(_) => return ProbeOutcome::Timeout,
            Ok(Err(e)) => return ProbeOutcome::Network(e.to_string()),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            return ProbeOutcome::Status(status.as_u16());
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        // The deadline covers the whole probe; the body read only gets
        // what the send left over.
        let remaining = deadline.saturating_sub(started.elapsed());
        let body = match tokio::time::timeout(remaining, response.bytes()).await {
            Err(_) => return ProbeOutcome::Timeout,
            Ok(Err(e)) => return ProbeOutcome::Network(e.to_string()),
            Ok(Ok(body)) => body,
        };

        let window = &body[..body.len().min(SNIFF_WINDOW)];
        if looks_like_manifest(content_type.as_deref(), window) {
            ProbeOutcome::Valid
        } else {
            ProbeOutcome::BadSignature
        }
    }
}

/// Manifest signature sniff over the first [`SNIFF_WINDOW`] bytes.
fn looks_like_manifest(content_type: Option<&str>, window: &[u8]) -> bool {
    if let Some(ct) = content_type {
        if ct.contains("mpegurl") || ct.contains("dash+xml") {
            return true;
        }
    }
    let Ok(prefix) = std::str::from_utf8(window) else {
        return false;
    };
    let prefix = prefix.trim_start();
    if prefix.starts_with("#EXTM3U") || prefix.starts_with("<MPD") || prefix.contains("<MPD ") {
        return true;
    }
    // Some providers front their manifest with a small JSON descriptor.
    serde_json::from_str::<serde_json::Value>(prefix)
        .ok()
        .and_then(|v| {
            v.as_object().map(|o| {
                o.get("file").map(|f| f.is_string()).unwrap_or(false)
                    || o.get("url").map(|f| f.is_string()).unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
