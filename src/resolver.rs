//! Orchestrates chain walk, decode, expansion, and probing for one call.
//!
//! A single `resolve()` is strictly sequential, each stage consuming the
//! previous stage's output. Concurrency across calls is bounded by a
//! global semaphore plus a per-provider semaphore and token-bucket
//! pacing, so a popular provider can neither starve the others nor draw
//! rate-limit bans. Stage errors short-circuit and are returned
//! unmodified; the caller can always tell "markup changed" from "crypto
//! rotated" from "all CDNs unreachable".

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::DecodeCache;
use crate::chain::{ChainNavigator, HopRecord};
use crate::decode::{DecodedResolution, DecoderRegistry};
use crate::error::{ResolveError, SpecError, Stage};
use crate::expand::{CandidateUrl, PlaceholderExpander};
use crate::http;
use crate::probe::{CandidateProber, ProbeAttempt};
use crate::provider::{ContentRef, ProviderRegistry, ProviderSpec};

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Timeout layering and concurrency limits for a resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Deadline for one chain hop fetch.
    pub per_hop_timeout: Duration,
    /// Deadline for one candidate probe; shorter than a hop fetch since
    /// failover across candidates is the expected path.
    pub per_candidate_timeout: Duration,
    /// Bound on the whole resolution, across all stages.
    pub overall_deadline: Duration,
    /// How long a decoded resolution is memoized.
    pub cache_ttl: Duration,
    /// Outbound concurrency across all providers.
    pub max_concurrent: usize,
    /// Outbound concurrency per provider.
    pub max_concurrent_per_provider: usize,
    /// Token-bucket pacing per provider, requests per second.
    pub per_provider_rate: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            per_hop_timeout: Duration::from_secs(10),
            per_candidate_timeout: Duration::from_secs(4),
            overall_deadline: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(90),
            max_concurrent: 16,
            max_concurrent_per_provider: 4,
            per_provider_rate: 4,
        }
    }
}

/// Diagnostic trail accumulated across the stages of one resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionTrail {
    pub hops: Vec<HopRecord>,
    /// Decoder that produced the resolution; a cache hit reuses the
    /// original decoder label.
    pub decoder: String,
    pub probes: Vec<ProbeAttempt>,
    pub total_ms: u64,
}

/// A probed-and-validated manifest URL with its ordered fallbacks.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    pub url: String,
    /// Candidates ranked after the chosen one, for caller-side failover.
    pub fallbacks: Vec<String>,
    pub provider: String,
    pub trail: ResolutionTrail,
}

/// The resolution engine root.
pub struct Resolver {
    providers: ProviderRegistry,
    decoders: DecoderRegistry,
    expander: PlaceholderExpander,
    navigator: ChainNavigator,
    prober: CandidateProber,
    cache: DecodeCache,
    global: Arc<Semaphore>,
    per_provider: DashMap<String, Arc<Semaphore>>,
    limiters: DashMap<String, Arc<DirectLimiter>>,
    config: ResolverConfig,
}

impl Resolver {
    /// Assemble a resolver from explicit registries (tests register
    /// wiremock-backed providers this way).
    pub fn new(
        providers: ProviderRegistry,
        decoders: DecoderRegistry,
        expander: PlaceholderExpander,
        config: ResolverConfig,
    ) -> Result<Self, SpecError> {
        let client = http::build_client(config.per_hop_timeout)?;
        Ok(Self {
            providers,
            decoders,
            expander,
            navigator: ChainNavigator::new(client.clone()),
            prober: CandidateProber::new(client),
            cache: DecodeCache::new(config.cache_ttl),
            global: Arc::new(Semaphore::new(config.max_concurrent)),
            per_provider: DashMap::new(),
            limiters: DashMap::new(),
            config,
        })
    }

    /// Resolver over the builtin provider, decoder, and token tables.
    pub fn builtin(config: ResolverConfig) -> Result<Self, SpecError> {
        Self::new(
            ProviderRegistry::builtin(),
            DecoderRegistry::builtin(),
            PlaceholderExpander::builtin(),
            config,
        )
    }

    /// Resolve one embed reference to a playable manifest URL.
    pub async fn resolve(
        &self,
        provider_id: &str,
        content: &ContentRef,
    ) -> Result<ResolutionResult, ResolveError> {
        let spec = self
            .providers
            .get(provider_id)
            .ok_or_else(|| ResolveError::UnknownProvider(provider_id.to_string()))?;

        // Concurrency discipline: per-provider cap and pacing first, then
        // the global permit. A capped provider's overflow queues without
        // holding global capacity, so it cannot starve other providers.
        // Permits are held for the whole resolution.
        let _provider = self
            .provider_semaphore(&spec.id)
            .acquire_owned()
            .await
            .expect("provider semaphore never closes");
        self.provider_limiter(&spec.id).until_ready().await;
        let _global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("global semaphore never closes");

        let started = Instant::now();
        let mut hops = Vec::new();
        let result = self
            .run_stages(&spec, content, started, &mut hops)
            .await;

        match result {
            Ok((chosen, candidates, decoded, probes)) => {
                let fallbacks = candidates
                    .iter()
                    .filter(|c| c.rank > chosen.rank)
                    .map(|c| c.url.clone())
                    .collect();
                debug!(provider = %spec.id, url = %chosen.url, "resolved");
                Ok(ResolutionResult {
                    url: chosen.url,
                    fallbacks,
                    provider: spec.id.clone(),
                    trail: ResolutionTrail {
                        hops,
                        decoder: decoded.decoder,
                        probes,
                        total_ms: started.elapsed().as_millis() as u64,
                    },
                })
            }
            Err(error) => {
                warn!(
                    provider = %spec.id,
                    content = %content.cache_key(),
                    hops_taken = hops.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    %error,
                    "resolution failed"
                );
                Err(error)
            }
        }
    }

    async fn run_stages(
        &self,
        spec: &ProviderSpec,
        content: &ContentRef,
        started: Instant,
        hops: &mut Vec<HopRecord>,
    ) -> Result<
        (
            CandidateUrl,
            Vec<CandidateUrl>,
            DecodedResolution,
            Vec<ProbeAttempt>,
        ),
        ResolveError,
    > {
        let key = format!("{}:{}", spec.id, content.cache_key());

        let decoded = match self.cache.get(&key) {
            Some(decoded) => {
                debug!(provider = %spec.id, key = %key, "decode cache hit");
                decoded
            }
            None => {
                let budget = self.remaining(started).ok_or(ResolveError::Timeout {
                    stage: Stage::Chain { hop: 0 },
                })?;
                let payload = self
                    .navigator
                    .run(spec, content, self.config.per_hop_timeout, budget, hops)
                    .await?;

                if self.remaining(started).is_none() {
                    return Err(ResolveError::Timeout {
                        stage: Stage::Decode,
                    });
                }
                let decoded = self.decoders.decode(&spec.pipeline, &spec.id, &payload)?;
                // First finisher wins; a racing duplicate walk is cheaper
                // than serializing resolutions behind a lock.
                self.cache.insert(&key, decoded.clone());
                decoded
            }
        };

        let candidates = self.expander.expand(&decoded);
        let budget = self.remaining(started).ok_or(ResolveError::Timeout {
            stage: Stage::Probe,
        })?;
        let (chosen, probes) = self
            .prober
            .select(
                &spec.headers,
                &candidates,
                self.config.per_candidate_timeout,
                budget,
            )
            .await?;

        Ok((chosen, candidates, decoded, probes))
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.config
            .overall_deadline
            .checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
    }

    fn provider_semaphore(&self, provider: &str) -> Arc<Semaphore> {
        self.per_provider
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(Semaphore::new(self.config.max_concurrent_per_provider))
            })
            .clone()
    }

    fn provider_limiter(&self, provider: &str) -> Arc<DirectLimiter> {
        self.limiters
            .entry(provider.to_string())
            .or_insert_with(|| {
                let quota = Quota::per_second(
                    NonZeroU32::new(self.config.per_provider_rate.max(1))
                        .expect("rate is at least 1"),
                );
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }
}
