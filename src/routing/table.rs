//! Route table compilation and lookup.
//!
//! # Responsibilities
//! - Compile route patterns at startup; exclude (never fail on) bad rules
//! - First-match-wins lookup by declaration order
//! - Resolve policy and connector names with fail-closed defaults
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - One table, one algorithm: HTTP and WebSocket dispatch share it, so both
//!   transports always agree on policy/connector resolution for a path
//! - Patterns are anchored so "/mcp" matches exactly and "/graph(.*)"
//!   matches the whole subtree

use regex::Regex;

use crate::config::schema::{RouteKind, RouteRule};

/// Policy applied when no route matches a path.
pub const DEFAULT_POLICY: &str = "mock-always-deny";

/// Connector applied when no route matches a path.
pub const DEFAULT_CONNECTOR: &str = "simple";

/// A compiled route table entry.
#[derive(Debug, Clone)]
pub struct Route {
    pub rule: RouteRule,
    matcher: Regex,
    prefix: String,
}

impl Route {
    /// The route prefix: the pattern with its trailing capture group
    /// stripped. Used for downstream URL computation and base rewriting.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// Immutable, ordered route table shared by every transport.
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile the configured rules.
    ///
    /// A rule with an invalid pattern, or missing the field its kind
    /// requires, is logged and excluded; the table build never fails as a
    /// whole.
    pub fn build(rules: Vec<RouteRule>) -> Self {
        let trailing_group = Regex::new(r"\(.*\)$").expect("static pattern");
        let mut routes = Vec::with_capacity(rules.len());

        for rule in rules {
            if let Some(reason) = missing_requirement(&rule) {
                tracing::warn!(route = %rule.name, pattern = %rule.pattern, reason, "Excluding route rule");
                continue;
            }
            let matcher = match Regex::new(&format!("^(?:{})$", rule.pattern)) {
                Ok(re) => re,
                Err(err) => {
                    tracing::warn!(
                        route = %rule.name,
                        pattern = %rule.pattern,
                        error = %err,
                        "Invalid route pattern; excluding rule"
                    );
                    continue;
                }
            };
            let prefix = trailing_group.replace(&rule.pattern, "").into_owned();
            tracing::debug!(route = %rule.name, pattern = %rule.pattern, kind = ?rule.kind, "Registered route");
            routes.push(Route { rule, matcher, prefix });
        }

        Self { routes }
    }

    /// First rule, in declaration order, whose pattern matches the path.
    pub fn matched(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.is_match(path))
    }

    /// Policy name for a path, or the fail-closed default.
    pub fn policy_for(&self, path: &str) -> &str {
        self.matched(path)
            .and_then(|route| route.rule.policy.as_deref())
            .unwrap_or(DEFAULT_POLICY)
    }

    /// Connector name for a path, or the default connector.
    pub fn connector_for(&self, path: &str) -> &str {
        self.matched(path)
            .and_then(|route| route.rule.connector.as_deref())
            .unwrap_or(DEFAULT_CONNECTOR)
    }

    /// All compiled routes, in declaration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// The field a rule's kind cannot function without, if absent.
fn missing_requirement(rule: &RouteRule) -> Option<&'static str> {
    match rule.kind {
        RouteKind::Proxy if rule.target.is_none() => Some("missing target"),
        RouteKind::Redirect if rule.redirect_to.is_none() => Some("missing redirect_to"),
        RouteKind::StaticFile if rule.file.is_none() => Some("missing file"),
        // A websocket rule without a target is kept: the session handler
        // owes the client a 1011 close, not silent unroutability.
        _ => None,
    }
}
