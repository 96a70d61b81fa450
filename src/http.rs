//! Shared outbound HTTP client and header policy application.
//!
//! Headers must exactly mirror what a browser navigating the chain
//! client-side would send: a real browser `User-Agent`, the previous page
//! as `Referer`, and `Origin` only for the providers whose edges expect it
//! (some CDN edges reject requests carrying `Origin` without a matching
//! `Referer`).

use std::time::Duration;

use reqwest::{Client, RequestBuilder};

use crate::provider::HeaderPolicy;

/// User agent presented on every outbound request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Build the shared client used for hop fetches and candidate probes.
///
/// The per-request timeout here is a transport-level backstop; stage
/// deadlines are layered on top by the resolver. Builder failure is a
/// startup configuration error and is propagated, never degraded to a
/// client without the browser headers.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Attach the provider's headers to a request: `Referer` always, `Origin`
/// only when the policy sends one.
pub fn apply_policy(request: RequestBuilder, policy: &HeaderPolicy, referer: &str) -> RequestBuilder {
    let request = request.header("Referer", referer);
    match (&policy.send_origin, &policy.origin) {
        (true, Some(origin)) => request.header("Origin", origin),
        _ => request,
    }
}
