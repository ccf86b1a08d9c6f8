//! Path prefix rewriting
//!
//! Rules are checked in declaration order and at most one applies.

use serde::Deserialize;

/// Replace `match_prefix` with `replacement_prefix` at the start of a path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewriteRule {
    #[serde(rename = "match")]
    pub match_prefix: String,
    #[serde(rename = "replace")]
    pub replacement_prefix: String,
}

impl RewriteRule {
    pub fn new(match_prefix: impl Into<String>, replacement_prefix: impl Into<String>) -> Self {
        Self {
            match_prefix: match_prefix.into(),
            replacement_prefix: replacement_prefix.into(),
        }
    }

    /// The rewritten path, or `None` when the rule does not match.
    pub fn apply(&self, path: &str) -> Option<String> {
        path.strip_prefix(self.match_prefix.as_str())
            .map(|rest| format!("{}{}", self.replacement_prefix, rest))
    }
}

/// Built-in table. Both entries are identity mappings kept as remapping points.
pub fn default_rules() -> Vec<RewriteRule> {
    vec![
        RewriteRule::new("/api/v1/chat", "/api/v1/chat"),
        RewriteRule::new("/api/v1/models", "/api/v1/models"),
    ]
}

#[derive(Debug, Clone)]
pub struct PathRewriter {
    rules: Vec<RewriteRule>,
}

impl Default for PathRewriter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl PathRewriter {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// Apply the first matching rule; unmatched paths come back unchanged.
    pub fn rewrite(&self, path: &str) -> String {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(path))
            .unwrap_or_else(|| path.to_string())
    }
}
