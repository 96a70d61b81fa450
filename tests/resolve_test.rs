//! End-to-end resolution tests against a wiremock provider.
//!
//! Each test stands up a [`MockServer`] playing the role of an embed
//! provider (and its CDN edges), registers a provider spec pointing at it,
//! and drives [`Resolver::resolve`] through the full chain-walk, decode,
//! expand, probe sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use embedsolve::decode::{DecoderRegistry, Pipeline, Step};
use embedsolve::error::Stage;
use embedsolve::expand::{PlaceholderExpander, TokenTable};
use embedsolve::probe::ProbeOutcome;
use embedsolve::provider::{
    ContentRef, ExtractRule, HeaderPolicy, HopSpec, ProviderRegistry, ProviderSpec,
};
use embedsolve::resolver::{Resolver, ResolverConfig};
use embedsolve::ResolveError;

const MANIFEST: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nchunk.m3u8\n";

fn three_hop_spec(base: &str) -> ProviderSpec {
    ProviderSpec {
        id: "mocksrc".into(),
        hops: vec![
            HopSpec {
                movie_url: format!("{base}/embed/movie/{{id}}"),
                tv_url: format!("{base}/embed/tv/{{id}}/{{season}}-{{episode}}"),
                extract: ExtractRule::Regex {
                    pattern: r#"id="player_iframe" src="([^"]+)""#.into(),
                    group: 1,
                },
            },
            HopSpec::fixed(
                "{prev}",
                ExtractRule::Regex {
                    pattern: r"src: '([^']+)'".into(),
                    group: 1,
                },
            ),
            HopSpec::fixed("{prev}", ExtractRule::HiddenDiv { min_len: 8 }),
        ],
        pipeline: "plain64".into(),
        headers: HeaderPolicy::referer_only("https://aggregator.example/"),
    }
}

/// Resolver wired to one provider spec and a base64 payload decoder, with
/// no placeholder tokens registered.
fn resolver_for(spec: ProviderSpec, config: ResolverConfig) -> Resolver {
    resolver_with_tokens(spec, config, Vec::<(String, Vec<String>)>::new())
}

fn resolver_with_tokens<I, T, D>(spec: ProviderSpec, config: ResolverConfig, tokens: I) -> Resolver
where
    I: IntoIterator<Item = (T, Vec<D>)>,
    T: Into<String>,
    D: Into<String>,
{
    let providers = ProviderRegistry::new(vec![spec]).expect("test spec is valid");
    let mut decoders = DecoderRegistry::empty();
    decoders.register("plain64", Pipeline::Steps(vec![Step::Base64 { url_safe: false }]));
    let expander =
        PlaceholderExpander::new(TokenTable::new(tokens).expect("test token table is valid"));
    Resolver::new(providers, decoders, expander, config).expect("resolver builds")
}

/// Mount the three chain hops whose final payload base64-encodes `text`.
async fn mount_chain(server: &MockServer, text: &str) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/embed/movie/603"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<iframe id="player_iframe" src="{base}/rcp/abc"></iframe>"#
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rcp/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "loadIframe() {{ src: '{base}/prorcp/xyz' }}"
        )))
        .mount(server)
        .await;
    let payload = STANDARD.encode(text);
    Mock::given(method("GET"))
        .and(path("/prorcp/xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<div id="p0" style="display:none;">{payload}</div>"#
        )))
        .mount(server)
        .await;
}

fn manifest_response() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/vnd.apple.mpegurl")
        .set_body_string(MANIFEST)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_hop_chain_resolves_to_manifest() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_chain(
        &server,
        &format!("{base}/stream/master.m3u8 or {base}/stream/backup.m3u8"),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/stream/master.m3u8"))
        .respond_with(manifest_response())
        .mount(&server)
        .await;

    let resolver = resolver_for(three_hop_spec(&base), ResolverConfig::default());
    let result = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .expect("resolution should succeed");

    assert_eq!(result.url, format!("{base}/stream/master.m3u8"));
    assert_eq!(result.fallbacks, [format!("{base}/stream/backup.m3u8")]);
    assert_eq!(result.provider, "mocksrc");
    assert_eq!(result.trail.hops.len(), 3);
    assert!(result.trail.hops.iter().all(|h| h.status == 200));
    assert_eq!(result.trail.decoder, "plain64");
    assert_eq!(result.trail.probes.len(), 1);
    assert_eq!(result.trail.probes[0].outcome, ProbeOutcome::Valid);
}

#[tokio::test]
async fn placeholder_token_expands_against_the_table() {
    let server = MockServer::start().await;
    let base = server.uri();
    let host = base.strip_prefix("http://").unwrap().to_string();
    mount_chain(&server, "http://{edge}/stream/master.m3u8").await;
    Mock::given(method("GET"))
        .and(path("/stream/master.m3u8"))
        .respond_with(manifest_response())
        .mount(&server)
        .await;

    let resolver = resolver_with_tokens(
        three_hop_spec(&base),
        ResolverConfig::default(),
        [("edge", vec![host])],
    );
    let result = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .expect("resolution should succeed");
    assert_eq!(result.url, format!("{base}/stream/master.m3u8"));
}

// ---------------------------------------------------------------------------
// Header discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_hop_sends_referer_and_origin_per_policy() {
    let server = MockServer::start().await;
    let base = server.uri();
    let manifest_url = format!("{base}/m.m3u8");
    let payload = STANDARD.encode(&manifest_url);

    // Mounts match only when the browser-shaped headers are present, so a
    // missing Referer or Origin surfaces as a 404 and a broken chain.
    Mock::given(method("GET"))
        .and(path("/embed/movie/603"))
        .and(header("Referer", "https://site.example/"))
        .and(header("Origin", "https://site.example"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<iframe id="player_iframe" src="{base}/inner"></iframe>"#
        )))
        .mount(&server)
        .await;
    // The second hop's Referer must be the first hop's URL, not the base.
    Mock::given(method("GET"))
        .and(path("/inner"))
        .and(header("Referer", format!("{base}/embed/movie/603").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(r#"data = "{payload}""#)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/m.m3u8"))
        .respond_with(manifest_response())
        .mount(&server)
        .await;

    let spec = ProviderSpec {
        id: "mocksrc".into(),
        hops: vec![
            HopSpec {
                movie_url: format!("{base}/embed/movie/{{id}}"),
                tv_url: format!("{base}/embed/tv/{{id}}"),
                extract: ExtractRule::Regex {
                    pattern: r#"src="([^"]+)""#.into(),
                    group: 1,
                },
            },
            HopSpec::fixed(
                "{prev}",
                ExtractRule::Regex {
                    pattern: r#"data = "([^"]+)""#.into(),
                    group: 1,
                },
            ),
        ],
        pipeline: "plain64".into(),
        headers: HeaderPolicy::with_origin("https://site.example/", "https://site.example"),
    };
    let resolver = resolver_for(spec, ResolverConfig::default());
    let result = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .expect("resolution should succeed");
    assert_eq!(result.url, manifest_url);
}

// ---------------------------------------------------------------------------
// Chain failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn changed_markup_breaks_the_chain_at_hop_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/embed/movie/603"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html>redesigned player page</html>"),
        )
        .mount(&server)
        .await;

    let resolver = resolver_for(three_hop_spec(&server.uri()), ResolverConfig::default());
    let err = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ResolveError::ChainBroken { hop: 0, ref reason, .. }
            if reason.contains("matched nothing")
    );
}

#[tokio::test]
async fn upstream_error_breaks_the_chain_at_its_hop() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/embed/movie/603"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<iframe id="player_iframe" src="{base}/rcp/abc"></iframe>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rcp/abc"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let resolver = resolver_for(three_hop_spec(&base), ResolverConfig::default());
    let err = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ResolveError::ChainBroken { hop: 1, ref reason, .. }
            if reason.contains("503")
    );
}

#[tokio::test]
async fn unknown_provider_fails_without_io() {
    let resolver = resolver_for(three_hop_spec("http://127.0.0.1:1"), ResolverConfig::default());
    let err = resolver
        .resolve("other", &ContentRef::movie(603))
        .await
        .unwrap_err();
    assert_matches!(err, ResolveError::UnknownProvider(ref id) if id == "other");
}

// ---------------------------------------------------------------------------
// Candidate probing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn probing_falls_through_to_the_first_working_candidate() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_chain(
        &server,
        &format!("{base}/cdn/a.m3u8 or {base}/cdn/b.m3u8 or {base}/cdn/c.m3u8"),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/cdn/a.m3u8"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/b.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>domain parked</html>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/c.m3u8"))
        .respond_with(manifest_response())
        .mount(&server)
        .await;

    let resolver = resolver_for(three_hop_spec(&base), ResolverConfig::default());
    let result = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .expect("third candidate should validate");

    assert_eq!(result.url, format!("{base}/cdn/c.m3u8"));
    assert!(result.fallbacks.is_empty());
    let outcomes: Vec<_> = result.trail.probes.iter().map(|p| &p.outcome).collect();
    assert_eq!(
        outcomes,
        [
            &ProbeOutcome::Status(404),
            &ProbeOutcome::BadSignature,
            &ProbeOutcome::Valid,
        ]
    );
}

#[tokio::test]
async fn exhausted_candidates_report_the_full_trail() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_chain(&server, &format!("{base}/cdn/a.m3u8 or {base}/cdn/b.m3u8")).await;
    Mock::given(method("GET"))
        .and(path("/cdn/a.m3u8"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/b.m3u8"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let resolver = resolver_for(three_hop_spec(&base), ResolverConfig::default());
    let err = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .unwrap_err();
    assert_matches!(err, ResolveError::ResolutionFailed { tried: 2, ref trail }
        if trail.len() == 2
            && trail[0].outcome == ProbeOutcome::Status(404)
            && trail[1].outcome == ProbeOutcome::Status(502));
}

// ---------------------------------------------------------------------------
// Decode cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeat_resolution_skips_the_chain_within_ttl() {
    let server = MockServer::start().await;
    let base = server.uri();
    let payload = STANDARD.encode(format!("{base}/stream/master.m3u8"));
    // Each chain hop may be fetched exactly once; the second resolution
    // must come out of the decode cache.
    Mock::given(method("GET"))
        .and(path("/embed/movie/603"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<iframe id="player_iframe" src="{base}/rcp/abc"></iframe>"#
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rcp/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "loadIframe() {{ src: '{base}/prorcp/xyz' }}"
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prorcp/xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<div id="p0" style="display:none;">{payload}</div>"#
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stream/master.m3u8"))
        .respond_with(manifest_response())
        .expect(2)
        .mount(&server)
        .await;

    let resolver = resolver_for(three_hop_spec(&base), ResolverConfig::default());
    let content = ContentRef::movie(603);

    let first = resolver.resolve("mocksrc", &content).await.unwrap();
    assert_eq!(first.trail.hops.len(), 3);

    let second = resolver.resolve("mocksrc", &content).await.unwrap();
    assert_eq!(second.url, first.url);
    // Cache hit: no chain hops, but the probe still ran fresh.
    assert!(second.trail.hops.is_empty());
    assert_eq!(second.trail.probes.len(), 1);
}

// ---------------------------------------------------------------------------
// Concurrency discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn capped_provider_queue_does_not_starve_other_providers() {
    let server = MockServer::start().await;
    let base = server.uri();
    let payload = STANDARD.encode(format!("{base}/m.m3u8"));
    // The hot provider's hop is slow; the cold provider's is instant.
    Mock::given(method("GET"))
        .and(path("/hot/embed/movie/603"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(r#"data = "{payload}""#))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cold/embed/movie/603"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(r#"data = "{payload}""#)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/m.m3u8"))
        .respond_with(manifest_response())
        .mount(&server)
        .await;

    let one_hop = |id: &str| ProviderSpec {
        id: id.into(),
        hops: vec![HopSpec {
            movie_url: format!("{base}/{id}/embed/movie/{{id}}"),
            tv_url: format!("{base}/{id}/embed/tv/{{id}}"),
            extract: ExtractRule::Regex {
                pattern: r#"data = "([^"]+)""#.into(),
                group: 1,
            },
        }],
        pipeline: "plain64".into(),
        headers: HeaderPolicy::referer_only("https://aggregator.example/"),
    };
    let providers = ProviderRegistry::new(vec![one_hop("hot"), one_hop("cold")]).unwrap();
    let mut decoders = DecoderRegistry::empty();
    decoders.register("plain64", Pipeline::Steps(vec![Step::Base64 { url_safe: false }]));
    let expander =
        PlaceholderExpander::new(TokenTable::new(Vec::<(String, Vec<String>)>::new()).unwrap());
    let config = ResolverConfig {
        max_concurrent: 2,
        max_concurrent_per_provider: 1,
        ..ResolverConfig::default()
    };
    let resolver = Arc::new(Resolver::new(providers, decoders, expander, config).unwrap());

    // Two hot resolutions: one runs, the second queues on the hot
    // provider's cap and must not hold a global permit while it waits.
    let hot1 = tokio::spawn({
        let r = resolver.clone();
        async move { r.resolve("hot", &ContentRef::movie(603)).await }
    });
    let hot2 = tokio::spawn({
        let r = resolver.clone();
        async move { r.resolve("hot", &ContentRef::movie(603)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    resolver
        .resolve("cold", &ContentRef::movie(603))
        .await
        .expect("cold provider should resolve immediately");
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "cold provider waited {}ms behind the hot provider's queue",
        started.elapsed().as_millis()
    );

    hot1.await.unwrap().unwrap();
    hot2.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overall_deadline_times_out_a_stalled_hop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/embed/movie/603"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("never arrives in time")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = ResolverConfig {
        overall_deadline: Duration::from_millis(100),
        ..ResolverConfig::default()
    };
    let resolver = resolver_for(three_hop_spec(&server.uri()), config);
    let err = resolver
        .resolve("mocksrc", &ContentRef::movie(603))
        .await
        .unwrap_err();
    assert_matches!(err, ResolveError::Timeout { stage: Stage::Chain { hop: 0 } });
}

#[tokio::test]
async fn tv_reference_renders_season_and_episode() {
    let server = MockServer::start().await;
    let base = server.uri();
    let payload = STANDARD.encode(format!("{base}/m.m3u8"));
    Mock::given(method("GET"))
        .and(path("/embed/tv/1399/1-2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!(r#"data = "{payload}""#)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/m.m3u8"))
        .respond_with(manifest_response())
        .mount(&server)
        .await;

    let spec = ProviderSpec {
        id: "mocksrc".into(),
        hops: vec![HopSpec {
            movie_url: format!("{base}/embed/movie/{{id}}"),
            tv_url: format!("{base}/embed/tv/{{id}}/{{season}}-{{episode}}"),
            extract: ExtractRule::Regex {
                pattern: r#"data = "([^"]+)""#.into(),
                group: 1,
            },
        }],
        pipeline: "plain64".into(),
        headers: HeaderPolicy::referer_only("https://aggregator.example/"),
    };
    let resolver = resolver_for(spec, ResolverConfig::default());
    let result = resolver
        .resolve("mocksrc", &ContentRef::episode(1399, 1, 2))
        .await
        .expect("resolution should succeed");
    assert_eq!(result.url, format!("{base}/m.m3u8"));
}
