//! Request path rewriting.
//!
//! # Responsibilities
//! - Hold method + path rewrite rules keyed by input path
//! - Replace the path of matching requests before routing
//!
//! # Design Decisions
//! - One rule per input path; registering again overwrites the entry
//! - Configured rules are registered in reverse order, so for a duplicated
//!   input path the rule listed *first* is registered last and wins
//! - Only the path changes; query and fragment are kept as received

use std::collections::HashMap;

use crate::config::RewriteConfig;
use crate::http::Request;
use crate::routing::matcher::MethodMatcher;

/// A registered rewrite.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    methods: MethodMatcher,
    output: String,
}

/// Rewrites request paths according to the configured rules.
#[derive(Debug, Clone, Default)]
pub struct RequestRewriter {
    rules: HashMap<String, RewriteRule>,
}

impl RequestRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rewriter from rules in configuration order.
    pub fn from_rules(rules: &[RewriteConfig]) -> Self {
        let mut rewriter = Self::new();
        for rule in rules.iter().rev() {
            rewriter.register(&rule.methods, &rule.input, &rule.output);
        }
        rewriter
    }

    /// Install a rule for `input_path`, replacing any earlier one.
    pub fn register<S: AsRef<str>>(&mut self, methods: &[S], input_path: &str, output_path: &str) {
        self.rules.insert(
            input_path.to_string(),
            RewriteRule {
                methods: MethodMatcher::new(methods.iter().map(|m| m.as_ref())),
                output: output_path.to_string(),
            },
        );
    }

    /// Apply the rule for the request's path, if its method matches.
    ///
    /// Returns `true` when the path was rewritten.
    pub fn rewrite(&self, request: &mut Request<'_>) -> bool {
        let Some(rule) = self.rules.get(request.path()) else {
            return false;
        };
        if !rule.methods.accepts(request.method()) {
            return false;
        }

        tracing::debug!(
            method = %request.method(),
            from = %request.path(),
            to = %rule.output,
            "Rewriting request path"
        );
        request.url_mut().set_path(&rule.output);
        true
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionId;
    use http::{HeaderMap, Method, Version};

    fn request(method: Method, target: &str) -> Request<'static> {
        Request::new(method, target, Version::HTTP_11, HeaderMap::new(), "http", ConnectionId::new())
            .unwrap()
    }

    fn rule(methods: &[&str], input: &str, output: &str) -> RewriteConfig {
        RewriteConfig {
            methods: methods.iter().map(|m| m.to_string()).collect(),
            input: input.into(),
            output: output.into(),
        }
    }

    #[test]
    fn first_configured_rule_wins() {
        let rewriter = RequestRewriter::from_rules(&[
            rule(&["GET"], "/dup", "/first"),
            rule(&["GET", "POST"], "/dup", "/second"),
        ]);
        assert_eq!(rewriter.len(), 1);

        let mut req = request(Method::GET, "/dup");
        assert!(rewriter.rewrite(&mut req));
        assert_eq!(req.path(), "/first");
    }

    #[test]
    fn shadowed_rule_is_not_merged() {
        let rewriter = RequestRewriter::from_rules(&[
            rule(&["GET"], "/dup", "/first"),
            rule(&["POST"], "/dup", "/second"),
        ]);

        // The POST rule was shadowed, so POST is left alone.
        let mut req = request(Method::POST, "/dup");
        assert!(!rewriter.rewrite(&mut req));
        assert_eq!(req.path(), "/dup");
    }

    #[test]
    fn later_registration_overwrites() {
        let mut rewriter = RequestRewriter::new();
        rewriter.register(&["GET"], "/x", "/one");
        rewriter.register(&["GET"], "/x", "/two");

        let mut req = request(Method::GET, "/x");
        rewriter.rewrite(&mut req);
        assert_eq!(req.path(), "/two");
    }

    #[test]
    fn preserves_query_and_fragment() {
        let rewriter = RequestRewriter::from_rules(&[rule(&["*"], "/old", "/new/path")]);
        let mut req = request(Method::GET, "/old?a=1&b=two#frag");
        assert!(rewriter.rewrite(&mut req));
        assert_eq!(req.path(), "/new/path");
        assert_eq!(req.query(), Some("a=1&b=two"));
        assert_eq!(req.url().fragment(), Some("frag"));
    }

    #[test]
    fn method_mismatch_leaves_path() {
        let rewriter = RequestRewriter::from_rules(&[rule(&["POST"], "/old", "/new")]);
        let mut req = request(Method::GET, "/old");
        assert!(!rewriter.rewrite(&mut req));
        assert_eq!(req.path(), "/old");
    }

    #[test]
    fn unknown_path_is_untouched() {
        let rewriter = RequestRewriter::from_rules(&[rule(&["*"], "/old", "/new")]);
        let mut req = request(Method::GET, "/other");
        assert!(!rewriter.rewrite(&mut req));
    }
}
