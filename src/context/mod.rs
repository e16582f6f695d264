//! Request context pipeline.
//!
//! # Responsibilities
//! - Extract the caller's common name from the identity header
//! - Resolve connector and policy names through the route table
//! - Run directory lookup, then policy evaluation, in that order
//! - Produce one immutable decision object per request or session
//!
//! # Design Decisions
//! - One synchronous sequence for every transport: HTTP handlers and
//!   WebSocket sessions go through the same function, so neither can skip
//!   a step or observe a context before the policy call completes
//! - The context is an explicit value threaded through the call path,
//!   never ambient task-local state
//! - `is_allowed` starts false and is only flipped by the policy engine

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, Method};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::plugins::{PluginRegistry, User};
use crate::routing::RouteTable;

/// The anonymous principal used when the identity header is absent.
pub const ANONYMOUS: &str = "anonymous";

/// Per-request decision object. Created once, never shared across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub protocol: &'static str,
    pub user: Option<User>,
    pub connector_name: String,
    pub policy_name: String,
    pub is_allowed: bool,
    /// Unix milliseconds at which the policy decision resolved.
    pub decided_at_ms: u128,
}

/// Derived view of a context: the decision and its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub access: bool,
    pub policy: String,
    pub route: String,
}

impl RequestContext {
    pub fn decision(&self) -> PolicyDecision {
        PolicyDecision {
            access: self.is_allowed,
            policy: self.policy_name.clone(),
            route: self.path.clone(),
        }
    }

    /// Display name for audit logs: CN if known, else the directory name.
    pub fn user_label(&self) -> &str {
        self.user
            .as_ref()
            .map(|u| u.common_name.as_str())
            .unwrap_or(ANONYMOUS)
    }
}

/// Common name from the configured identity header, `anonymous` if absent
/// or unreadable.
pub fn extract_common_name(headers: &HeaderMap, identity_header: &str) -> String {
    headers
        .get(identity_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// Build the decision object for one request or session.
///
/// The ordering here is the security boundary: identity extraction, route
/// resolution, directory lookup, then policy evaluation. No caller observes
/// the context until the last step has populated `is_allowed`.
pub async fn build_context(
    table: &RouteTable,
    registry: &PluginRegistry,
    identity_header: &str,
    headers: &HeaderMap,
    method: &Method,
    path: &str,
    protocol: &'static str,
) -> RequestContext {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let common_name = extract_common_name(headers, identity_header);
    let connector_name = table.connector_for(path).to_string();
    let policy_name = table.policy_for(path).to_string();

    let user = match registry.lookup(&connector_name, &common_name, path).await {
        Some(user) => Some(user),
        // The directory does not know the caller; keep the CN so denials
        // are attributable in the audit trail.
        None => Some(User::unresolved(&common_name)),
    };

    let auth_attributes = user
        .as_ref()
        .and_then(|u| u.auth_attributes.as_deref())
        .unwrap_or("");
    let is_allowed = registry.evaluate(&policy_name, auth_attributes, path);

    let decided_at_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let context = RequestContext {
        request_id,
        method: method.to_string(),
        path: path.to_string(),
        protocol,
        user,
        connector_name,
        policy_name,
        is_allowed,
        decided_at_ms,
    };

    tracing::debug!(
        request_id = %context.request_id,
        path = %context.path,
        user = %context.user_label(),
        policy = %context.policy_name,
        connector = %context.connector_name,
        allowed = context.is_allowed,
        "Policy decision resolved"
    );

    context
}

/// Memoized, awaitable context for a WebSocket session.
///
/// The decision is computed exactly once; the proactive resolution branch
/// and the first-message check both await the same cell, so denial handling
/// can fire redundantly from either path without recomputation.
pub struct AuthGate {
    cell: OnceCell<RequestContext>,
    table: Arc<RouteTable>,
    registry: Arc<PluginRegistry>,
    identity_header: String,
    headers: HeaderMap,
    method: Method,
    path: String,
}

impl AuthGate {
    pub fn new(
        table: Arc<RouteTable>,
        registry: Arc<PluginRegistry>,
        identity_header: String,
        headers: HeaderMap,
        method: Method,
        path: String,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            table,
            registry,
            identity_header,
            headers,
            method,
            path,
        }
    }

    /// Resolve (or await) the session context.
    pub async fn context(&self) -> &RequestContext {
        self.cell
            .get_or_init(|| {
                build_context(
                    &self.table,
                    &self.registry,
                    &self.identity_header,
                    &self.headers,
                    &self.method,
                    &self.path,
                    "ws",
                )
            })
            .await
    }

    /// Resolve (or await) the decision.
    pub async fn is_allowed(&self) -> bool {
        self.context().await.is_allowed
    }

    /// The context, only if already resolved.
    pub fn resolved(&self) -> Option<&RequestContext> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteKind, RouteRule, SoftErrorMode};

    fn table_with(policy: &str, connector: &str) -> RouteTable {
        RouteTable::build(vec![RouteRule {
            name: "analytics".to_string(),
            pattern: "/analytics/(.*)".to_string(),
            kind: RouteKind::Proxy,
            target: Some("http://127.0.0.1:3001".to_string()),
            redirect_to: None,
            file: None,
            rewrite_base: true,
            header_rules: Vec::new(),
            conditional_returns: Vec::new(),
            subpath_returns: Vec::new(),
            policy: Some(policy.to_string()),
            connector: Some(connector.to_string()),
            soft_error: SoftErrorMode::Html,
            hide_if_no_access: false,
            params: None,
            websocket: None,
        }])
    }

    #[tokio::test]
    async fn allows_admin_through_simple_stack() {
        let table = table_with("simple-role-admin", "simple");
        let registry = PluginRegistry::builtin();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-common-name", "cn=alice".parse().unwrap());

        let context = build_context(
            &table,
            &registry,
            "x-user-common-name",
            &headers,
            &Method::GET,
            "/analytics/dash",
            "http",
        )
        .await;

        assert!(context.is_allowed);
        assert_eq!(context.policy_name, "simple-role-admin");
        assert_eq!(context.user_label(), "cn=alice");
        assert_eq!(
            context.decision(),
            PolicyDecision {
                access: true,
                policy: "simple-role-admin".to_string(),
                route: "/analytics/dash".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn missing_header_resolves_to_anonymous() {
        let table = table_with("simple-role-admin", "mock");
        let registry = PluginRegistry::builtin();

        let context = build_context(
            &table,
            &registry,
            "x-user-common-name",
            &HeaderMap::new(),
            &Method::GET,
            "/analytics/dash",
            "http",
        )
        .await;

        // Mock connector knows nobody; no attributes, so the policy denies.
        assert_eq!(context.user_label(), ANONYMOUS);
        assert!(!context.is_allowed);
    }

    #[tokio::test]
    async fn unmatched_path_fails_closed() {
        let table = table_with("mock-always-allow", "simple");
        let registry = PluginRegistry::builtin();

        let context = build_context(
            &table,
            &registry,
            "x-user-common-name",
            &HeaderMap::new(),
            &Method::GET,
            "/somewhere-else",
            "http",
        )
        .await;

        assert_eq!(context.policy_name, "mock-always-deny");
        assert!(!context.is_allowed);
    }

    #[tokio::test]
    async fn gate_memoizes_the_decision() {
        let table = Arc::new(table_with("mock-always-allow", "simple"));
        let registry = Arc::new(PluginRegistry::builtin());
        let gate = AuthGate::new(
            table,
            registry,
            "x-user-common-name".to_string(),
            HeaderMap::new(),
            Method::GET,
            "/analytics/dash".to_string(),
        );

        assert!(gate.resolved().is_none());
        assert!(gate.is_allowed().await);
        let first_id = gate.resolved().unwrap().request_id.clone();
        assert!(gate.is_allowed().await);
        assert_eq!(gate.resolved().unwrap().request_id, first_id);
    }
}
