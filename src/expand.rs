//! Expands placeholder tokens in a decoded URL into ranked candidates.
//!
//! A decoded resolution may contain `{token}` placeholders standing in for
//! one of several CDN hostnames, and may join several complete alternative
//! URLs with `" or "`. Expansion is an explicit Cartesian product over the
//! distinct tokens, in the order they are first discovered, with the first
//! token varying slowest, so the primary candidate is always the first
//! domain of the first token. Pure and deterministic; identical input
//! yields identical ordered output.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::decode::DecodedResolution;
use crate::error::SpecError;

/// Delimiter joining complete alternative URLs inside one resolution.
const ALTERNATIVE_DELIMITER: &str = " or ";

/// One concrete, fully substituted URL with its rank and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateUrl {
    pub url: String,
    /// Probe order; 0 is the primary candidate.
    pub rank: usize,
    /// Which alternative and token substitutions produced this URL.
    pub provenance: String,
}

/// Static token -> CDN domain list table.
#[derive(Debug, Clone)]
pub struct TokenTable {
    domains: HashMap<String, Vec<String>>,
}

impl TokenTable {
    /// Build a table, rejecting any token with an empty domain list. An
    /// empty list would make the Cartesian product empty and a non-empty
    /// resolution would yield zero candidates.
    pub fn new<I, T, D>(entries: I) -> Result<Self, SpecError>
    where
        I: IntoIterator<Item = (T, Vec<D>)>,
        T: Into<String>,
        D: Into<String>,
    {
        let mut domains = HashMap::new();
        for (token, list) in entries {
            let token = token.into();
            if list.is_empty() {
                return Err(SpecError::EmptyDomainList(token));
            }
            domains.insert(token, list.into_iter().map(Into::into).collect());
        }
        Ok(Self { domains })
    }

    /// The CDN families the builtin providers template against.
    pub fn builtin() -> Self {
        Self::new([
            (
                "edge",
                vec![
                    "edgedeliverynetwork.com",
                    "cdn-centaurus.com",
                    "shadowlandschronicles.com",
                ],
            ),
            ("relay", vec!["tmstr.cloud", "tmstr-relay.net"]),
        ])
        .expect("builtin token table is valid")
    }

    fn get(&self, token: &str) -> Option<&[String]> {
        self.domains.get(token).map(Vec::as_slice)
    }
}

/// Pure expander over a [`TokenTable`].
pub struct PlaceholderExpander {
    table: TokenTable,
    token_re: Regex,
}

impl PlaceholderExpander {
    pub fn new(table: TokenTable) -> Self {
        Self {
            table,
            token_re: Regex::new(r"\{([A-Za-z0-9_-]+)\}").expect("token pattern is valid"),
        }
    }

    pub fn builtin() -> Self {
        Self::new(TokenTable::builtin())
    }

    /// Expand a decoded resolution into its ranked candidate list.
    ///
    /// Output length is the product of each distinct token's domain-list
    /// size (1 with no tokens), summed over alternatives. A token missing
    /// from the table is substituted literally rather than dropped; it is
    /// likely already a hostname fragment.
    pub fn expand(&self, decoded: &DecodedResolution) -> Vec<CandidateUrl> {
        let mut candidates = Vec::new();
        for (alt, template) in decoded.text.split(ALTERNATIVE_DELIMITER).enumerate() {
            self.expand_alternative(alt, template.trim(), &mut candidates);
        }
        candidates
    }

    fn expand_alternative(&self, alt: usize, template: &str, out: &mut Vec<CandidateUrl>) {
        // Distinct tokens, left-to-right discovery order.
        let mut tokens: Vec<&str> = Vec::new();
        for caps in self.token_re.captures_iter(template) {
            let token = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }

        if tokens.is_empty() {
            out.push(CandidateUrl {
                url: template.to_string(),
                rank: out.len(),
                provenance: format!("alt{alt} literal"),
            });
            return;
        }

        let lists: Vec<Vec<String>> = tokens
            .iter()
            .map(|token| match self.table.get(token) {
                Some(domains) => domains.to_vec(),
                None => {
                    warn!(token, "unknown placeholder token, substituting literally");
                    vec![token.to_string()]
                }
            })
            .collect();

        let total: usize = lists.iter().map(Vec::len).product();
        for idx in 0..total {
            let mut url = template.to_string();
            let mut picks = Vec::with_capacity(tokens.len());
            let mut divisor = total;
            for (token, list) in tokens.iter().zip(&lists) {
                divisor /= list.len();
                let domain = &list[(idx / divisor) % list.len()];
                url = url.replace(&format!("{{{token}}}"), domain);
                picks.push(format!("{token}={domain}"));
            }
            out.push(CandidateUrl {
                url,
                rank: out.len(),
                provenance: format!("alt{alt} {}", picks.join(",")),
            });
        }
    }
}
