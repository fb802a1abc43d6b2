//! Target URL resolution and rewrite rules.
//!
//! An inbound request URL is first made absolute — anything not starting
//! with `http://` or `https://` is resolved against the configured default
//! target per RFC 3986 — and then run through the ordered rewrite rules.
//! The first pattern that matches replaces the URL and stops the scan;
//! later rules never see the result.

use regex::Regex;
use tracing::debug;
use url::Url;

use backhaul_common::config::RewriteRule;

use crate::{AgentError, Result};

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    replacement: String,
}

/// Ordered, first-match-wins URL rewrite rules, compiled once at startup.
#[derive(Debug)]
pub struct RewriteRules {
    rules: Vec<CompiledRule>,
}

impl RewriteRules {
    /// Compile the configured rules. A bad pattern is a startup error.
    pub fn compile(rules: &[RewriteRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.pattern).map_err(|source| AgentError::Rewrite {
                    pattern: rule.pattern.clone(),
                    source,
                })?;
                Ok(CompiledRule {
                    pattern,
                    replacement: rule.replacement.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Apply the first matching rule; later rules do not apply.
    pub fn apply(&self, url: &str) -> String {
        for rule in &self.rules {
            if rule.pattern.is_match(url) {
                let rewritten = rule
                    .pattern
                    .replace_all(url, rule.replacement.as_str())
                    .into_owned();
                debug!(original = url, rewritten = %rewritten, pattern = %rule.pattern, "URL rewritten");
                return rewritten;
            }
        }
        url.to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Resolve a request URL to the absolute upstream target: normalize
/// against the default target, rewrite, parse.
pub fn target_url(
    request_url: &str,
    rules: &RewriteRules,
    default_target: &Url,
) -> std::result::Result<Url, url::ParseError> {
    let absolute = if request_url.starts_with("http://") || request_url.starts_with("https://") {
        request_url.to_string()
    } else {
        let resolved = default_target.join(request_url)?;
        debug!(relative = request_url, absolute = %resolved, "relative URL resolved");
        resolved.to_string()
    };

    Url::parse(&rules.apply(&absolute))
}
