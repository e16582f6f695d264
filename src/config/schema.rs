//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits so the same route shapes deserialize from
//! the TOML config file and from an external JSON routes file.

use serde::Deserialize;

use crate::bolt::BoltAuth;

/// Root configuration for the policy-gated proxy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Request header carrying the caller's common name.
    pub identity_header: IdentityHeaderConfig,

    /// Ordered route rules. First match wins.
    pub routes: Vec<RouteRule>,

    /// Optional JSON file with additional route rules, appended after
    /// the inline list.
    pub routes_file: Option<String>,

    /// Credentials substituted into Bolt authentication frames.
    pub bolt_auth: BoltAuth,

    /// Overrides for the fixed HTML pages served by the proxy.
    pub pages: PagesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Identity header configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityHeaderConfig {
    /// Header name holding the client common name. Absent header resolves
    /// to the anonymous principal.
    pub name: String,
}

impl Default for IdentityHeaderConfig {
    fn default() -> Self {
        Self {
            name: "x-user-common-name".to_string(),
        }
    }
}

/// One entry of the route table.
///
/// Immutable after startup; compiled into `routing::Route` by the table
/// builder, which logs and excludes rules it cannot compile.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRule {
    /// Route identifier for logging and the splash inventory.
    pub name: String,

    /// Path pattern (anchored regex, e.g. "/analytics/(.*)").
    pub pattern: String,

    /// Transport kind. Defaults to plain proxying.
    #[serde(default)]
    pub kind: RouteKind,

    /// Downstream base URL for proxy rules.
    pub target: Option<String>,

    /// Destination path for redirect rules.
    pub redirect_to: Option<String>,

    /// File served by static-file rules.
    pub file: Option<String>,

    /// Rewrite `<base>` and CSP `base-uri` in HTML responses.
    #[serde(default)]
    pub rewrite_base: bool,

    /// Ordered request-header rewrite rules.
    #[serde(default)]
    pub header_rules: Vec<HeaderRule>,

    /// Canned responses served when a request header matches.
    #[serde(default)]
    pub conditional_returns: Vec<ConditionalReturn>,

    /// Canned responses served for subpath prefixes.
    #[serde(default)]
    pub subpath_returns: Vec<SubpathReturn>,

    /// Policy engine name; the table default applies when unset.
    pub policy: Option<String>,

    /// User directory connector name; the table default applies when unset.
    pub connector: Option<String>,

    /// Shape of the response when the backend is unreachable.
    #[serde(default)]
    pub soft_error: SoftErrorMode,

    /// Omit this route from the splash inventory when denied.
    #[serde(default)]
    pub hide_if_no_access: bool,

    /// Query string appended to the route's splash inventory link.
    pub params: Option<String>,

    /// WebSocket sub-configuration for websocket rules.
    pub websocket: Option<WebsocketRoute>,
}

/// Transport kind of a route rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RouteKind {
    #[default]
    Proxy,
    Redirect,
    StaticFile,
    Splash,
    Websocket,
}

/// Response shape for an unreachable backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SoftErrorMode {
    /// Fixed 502 HTML page.
    #[default]
    Html,
    /// Tool-protocol soft error: a retryable JSON-RPC envelope with 503.
    Mcp,
}

/// WebSocket sub-configuration of a route rule.
#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketRoute {
    /// Which session handler drives the relay.
    pub handler: WsHandlerKind,

    /// Backend WebSocket URL.
    pub target: Option<String>,

    /// Authorization header value sent on the backend handshake.
    pub auth_header: Option<String>,

    /// Carry the client's query string onto the backend URL.
    #[serde(default)]
    pub preserve_query: bool,
}

/// WebSocket session handler kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WsHandlerKind {
    /// Bolt-aware relay: RUN inspection and credential substitution.
    Bolt,
    /// Opaque bidirectional relay.
    Passthrough,
}

/// Condition gating a header rule.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderCondition {
    /// Header inspected by the condition.
    pub header_name: String,

    /// Require presence (true) or absence (false).
    pub exists: Option<bool>,

    /// Exact value match.
    pub equals: Option<String>,

    /// Substring match.
    pub includes: Option<String>,

    /// Regex match; an invalid pattern never matches.
    pub matches: Option<String>,
}

/// One request-header rewrite operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum HeaderRule {
    /// Set the header only when absent.
    Create {
        header_name: String,
        value: String,
        when: Option<HeaderCondition>,
    },
    /// Set the header unconditionally.
    Update {
        header_name: String,
        value: String,
        when: Option<HeaderCondition>,
    },
    /// Regex-replace the current value; skipped when the header is absent
    /// or the pattern is invalid.
    Patch {
        header_name: String,
        pattern: String,
        replacement: String,
        when: Option<HeaderCondition>,
    },
    /// Remove the header regardless of its value.
    Delete {
        header_name: String,
        when: Option<HeaderCondition>,
    },
}

/// Canned response served when a request header contains a substring.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionalReturn {
    pub header_name: String,
    pub includes: String,
    pub body: String,
    #[serde(default = "default_return_content_type")]
    pub content_type: String,
}

/// Canned response served for a subpath prefix under the route.
#[derive(Debug, Clone, Deserialize)]
pub struct SubpathReturn {
    pub path: String,
    pub body: String,
    #[serde(default = "default_return_content_type")]
    pub content_type: String,
}

fn default_return_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

/// Fixed HTML pages, overridable per deployment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PagesConfig {
    /// Body of the 502 page for generic upstream failures.
    pub upstream_error: Option<String>,

    /// Body of the 403 page for policy denials.
    pub access_denied: Option<String>,

    /// Splash template; `<!--SERVICES_BUTTONS-->` marks the inventory slot.
    pub services: Option<String>,
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Bind address of the metrics endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
