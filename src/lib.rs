//! embedsolve - turns aggregator embed references into playable manifests.
//!
//! Given a provider id and a `{tmdb_id, kind, season, episode}` reference,
//! the engine walks the provider's redirect/embed chain, decodes the
//! obfuscated payload it ends in, expands CDN placeholder tokens into
//! ranked failover candidates, and probes them until one serves a valid
//! manifest. See [`Resolver::resolve`](resolver::Resolver::resolve).

pub mod cache;
pub mod chain;
pub mod decode;
pub mod error;
pub mod expand;
pub mod http;
pub mod probe;
pub mod provider;
pub mod resolver;

pub use error::{ResolveError, Stage};
pub use provider::{ContentRef, MediaKind, ProviderRegistry};
pub use resolver::{ResolutionResult, Resolver, ResolverConfig};
