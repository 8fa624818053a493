//! Route matching logic.
//!
//! # Responsibilities
//! - Match request method (set membership, `*` wildcard)
//! - Match request path (exact or prefix glob)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Method matching is case-insensitive on configured names
//! - Path matching is case-sensitive
//! - Patterns ending in `*` are prefix matches; `*` alone matches everything
//! - No regex to guarantee O(n) matching

use http::Method;

use crate::http::Request;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<'_>) -> bool;
}

/// Matches the request method.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
    any: bool,
}

impl MethodMatcher {
    /// Create a method matcher. `"*"` in the list matches every method.
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut any = false;
        let mut parsed = Vec::new();
        for method in methods {
            let method = method.as_ref();
            if method == "*" {
                any = true;
            } else if let Ok(m) = Method::from_bytes(method.to_ascii_uppercase().as_bytes()) {
                parsed.push(m);
            }
        }
        Self {
            methods: parsed,
            any,
        }
    }

    /// Whether `method` is accepted by this matcher.
    pub fn accepts(&self, method: &Method) -> bool {
        self.any || self.methods.iter().any(|m| m == method)
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &Request<'_>) -> bool {
        self.accepts(req.method())
    }
}

/// Matches the request path exactly or by prefix.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    prefix: bool,
}

impl PathMatcher {
    /// `"/a/*"` matches everything under `/a/`; anything else is exact.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        match pattern.strip_suffix('*') {
            Some(prefix) => Self {
                pattern: prefix.to_string(),
                prefix: true,
            },
            None => Self {
                pattern,
                prefix: false,
            },
        }
    }
}

impl Matcher for PathMatcher {
    fn matches(&self, req: &Request<'_>) -> bool {
        if self.prefix {
            req.path().starts_with(&self.pattern)
        } else {
            req.path() == self.pattern
        }
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<'_>) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(req))
    }
}
