//! Error types for the resolution engine.
//!
//! Each variant maps to a distinct remediation path: [`ResolveError::ChainBroken`]
//! and [`ResolveError::DecoderStale`] mean the upstream provider changed and a
//! registry update is required, while [`ResolveError::ResolutionFailed`] may be a
//! transient CDN outage the caller can retry after backoff. No stage masks
//! another stage's error; whatever the resolver returns is what actually broke.

use std::fmt;

use crate::probe::ProbeAttempt;

/// The resolution stage a timeout is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Fetching or extracting a chain hop.
    Chain { hop: usize },
    /// Running the decoder pipeline.
    Decode,
    /// Probing candidate URLs.
    Probe,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Chain { hop } => write!(f, "chain hop {hop}"),
            Stage::Decode => write!(f, "decode"),
            Stage::Probe => write!(f, "probe"),
        }
    }
}

/// Error type for a single `resolve()` call.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No spec is registered under the requested provider id.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A hop fetch or extraction rule failed. The provider changed its
    /// markup; not retryable without a spec update.
    #[error("Chain broken at hop {hop} for provider {provider}: {reason}")]
    ChainBroken {
        provider: String,
        hop: usize,
        reason: String,
    },

    /// The decoder pipeline produced invalid output. The provider rotated
    /// its encoding or keys; not retryable without a pipeline update.
    #[error("Decoder stale for provider {provider}: {detail}")]
    DecoderStale { provider: String, detail: String },

    /// Every candidate URL was probed and none served a valid manifest.
    /// Retryable by the caller after backoff.
    #[error("Resolution failed: none of {tried} candidates served a manifest")]
    ResolutionFailed {
        tried: usize,
        trail: Vec<ProbeAttempt>,
    },

    /// A stage exceeded its deadline or the overall resolution budget.
    #[error("Timed out during {stage}")]
    Timeout { stage: Stage },
}

impl ResolveError {
    /// Create a new ChainBroken error.
    pub fn chain_broken<P, R>(provider: P, hop: usize, reason: R) -> Self
    where
        P: Into<String>,
        R: Into<String>,
    {
        Self::ChainBroken {
            provider: provider.into(),
            hop,
            reason: reason.into(),
        }
    }

    /// Create a new DecoderStale error.
    pub fn decoder_stale<P, D>(provider: P, detail: D) -> Self
    where
        P: Into<String>,
        D: Into<String>,
    {
        Self::DecoderStale {
            provider: provider.into(),
            detail: detail.into(),
        }
    }

    /// True when the caller may retry the same reference after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResolutionFailed { .. } | Self::Timeout { .. }
        )
    }
}

/// Result type alias using [`ResolveError`].
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Error raised when a provider spec fails validation at registry load.
///
/// Spec problems are programming/configuration errors caught at startup,
/// never during a `resolve()` call.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// A provider declared an empty hop list.
    #[error("Provider {0} has no hops")]
    EmptyChain(String),

    /// An extraction rule's regex pattern does not compile.
    #[error("Provider {provider} hop {hop} has an invalid pattern: {source}")]
    InvalidPattern {
        provider: String,
        hop: usize,
        #[source]
        source: regex::Error,
    },

    /// Two specs share the same provider id.
    #[error("Duplicate provider id: {0}")]
    DuplicateProvider(String),

    /// A placeholder token maps to an empty domain list.
    #[error("Token {0} has an empty domain list")]
    EmptyDomainList(String),

    /// The shared HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ResolveError::UnknownProvider("nope".into());
        assert_eq!(err.to_string(), "Unknown provider: nope");

        let err = ResolveError::chain_broken("vidsrc", 2, "extraction rule matched nothing");
        assert_eq!(
            err.to_string(),
            "Chain broken at hop 2 for provider vidsrc: extraction rule matched nothing"
        );

        let err = ResolveError::decoder_stale("vidsrc", "bad padding");
        assert_eq!(
            err.to_string(),
            "Decoder stale for provider vidsrc: bad padding"
        );

        let err = ResolveError::Timeout {
            stage: Stage::Chain { hop: 1 },
        };
        assert_eq!(err.to_string(), "Timed out during chain hop 1");
    }

    #[test]
    fn retryability() {
        assert!(ResolveError::ResolutionFailed {
            tried: 3,
            trail: vec![],
        }
        .is_retryable());
        assert!(ResolveError::Timeout {
            stage: Stage::Decode
        }
        .is_retryable());
        assert!(!ResolveError::chain_broken("p", 0, "gone").is_retryable());
        assert!(!ResolveError::decoder_stale("p", "rotated").is_retryable());
        assert!(!ResolveError::UnknownProvider("p".into()).is_retryable());
    }
}
