//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all entry handler
//! - Wire up middleware (tracing, request ID)
//! - Build the per-request context and enforce the policy decision
//! - Dispatch by route kind: proxy, redirect, static file, splash, websocket
//! - Forward requests to backends and transform their responses
//!
//! # Data Flow
//! request -> route match -> context (CN, connector, policy) -> dispatch
//!
//! # Design Decisions
//! - Policy gating happens before any canned return or upstream byte is
//!   produced; only redirects and the splash page bypass the gate, and the
//!   splash filters its inventory per route instead
//! - WebSocket routes upgrade first and decide inside the session, so the
//!   denial arrives as a close frame rather than an HTTP status

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use http_body_util::BodyExt;
use hyper_util::{client::legacy::Client, client::legacy::connect::HttpConnector, rt::TokioExecutor};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::bolt::BoltAuth;
use crate::config::{PagesConfig, ProxyConfig, RouteKind, SoftErrorMode};
use crate::context::{build_context, AuthGate, RequestContext};
use crate::http::errors::{
    access_denied_page, mcp_soft_error, upstream_error_page, DEFAULT_SERVICES_PAGE, SERVICES_SLOT,
};
use crate::http::forward::{
    build_target_url, forward_request, is_event_stream, is_html, normalized_proxied_path,
    UpstreamClient,
};
use crate::http::headers::apply_header_rules;
use crate::http::rewrite::{patch_csp, rewrite_html_base, rewrite_location};
use crate::observability::metrics;
use crate::plugins::PluginRegistry;
use crate::routing::{Route, RouteTable};

/// Largest request or response body the proxy will buffer for rewriting.
const MAX_BUFFERED_BODY: usize = 8 * 1024 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<RouteTable>,
    pub registry: Arc<PluginRegistry>,
    pub client: UpstreamClient,
    pub identity_header: String,
    pub bolt_auth: BoltAuth,
    pub pages: PagesConfig,
}

/// HTTP server for the policy-gated proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let table = Arc::new(RouteTable::build(config.routes.clone()));
        let registry = Arc::new(PluginRegistry::builtin());
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = AppState {
            table,
            registry,
            client,
            identity_header: config.identity_header.name.clone(),
            bolt_auth: config.bolt_auth.clone(),
            pages: config.pages.clone(),
        };

        let router = Self::build_router(state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(entry_handler))
            .route("/", any(entry_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all entry point: match, decide, dispatch, record.
async fn entry_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
    request: Request<Body>,
) -> Response {
    let ws = ws.ok();
    let start_time = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(route) = state.table.matched(&path).cloned() else {
        tracing::warn!(method = %method, path = %path, "No route matched");
        let response = (StatusCode::NOT_FOUND, "No matching route").into_response();
        metrics::record_request(method.as_str(), response.status().as_u16(), "none", start_time);
        return response;
    };

    let route_name = route.rule.name.clone();
    let response = dispatch(&state, &route, ws, request).await;
    metrics::record_request(
        method.as_str(),
        response.status().as_u16(),
        &route_name,
        start_time,
    );
    response
}

async fn dispatch(
    state: &AppState,
    route: &Route,
    ws: Option<WebSocketUpgrade>,
    request: Request<Body>,
) -> Response {
    match route.rule.kind {
        // Redirects reveal nothing about the destination, so they are the
        // one transport that skips the policy gate.
        RouteKind::Redirect => {
            let location = route.rule.redirect_to.as_deref().unwrap_or("/");
            // Never bounce a request already at the destination, and never
            // redirect an upgrade out from under its handshake.
            if request.uri().path() == location || ws.is_some() {
                return (StatusCode::NOT_FOUND, "No matching route").into_response();
            }
            Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, location)
                .body(Body::empty())
                .unwrap_or_else(|_| Response::new(Body::empty()))
        }
        RouteKind::Splash => serve_splash(state, request.headers()).await,
        RouteKind::Websocket => match ws {
            Some(upgrade) => {
                let gate = AuthGate::new(
                    state.table.clone(),
                    state.registry.clone(),
                    state.identity_header.clone(),
                    request.headers().clone(),
                    request.method().clone(),
                    request.uri().path().to_string(),
                );
                crate::ws::handle_upgrade(
                    upgrade,
                    gate,
                    route.rule.websocket.clone(),
                    state.bolt_auth.clone(),
                    route.rule.name.clone(),
                    request.uri().query().map(str::to_string),
                )
            }
            None => (StatusCode::UPGRADE_REQUIRED, "WebSocket upgrade required").into_response(),
        },
        RouteKind::StaticFile => {
            let context =
                context_for(state, request.headers(), request.method(), request.uri().path())
                    .await;
            if !context.is_allowed {
                return denied(state, &context);
            }
            serve_static(route).await
        }
        RouteKind::Proxy => {
            let context =
                context_for(state, request.headers(), request.method(), request.uri().path())
                    .await;
            if !context.is_allowed {
                return denied(state, &context);
            }
            proxy_request(state, route, &context, request).await
        }
    }
}

async fn context_for(
    state: &AppState,
    headers: &HeaderMap,
    method: &Method,
    path: &str,
) -> RequestContext {
    build_context(
        &state.table,
        &state.registry,
        &state.identity_header,
        headers,
        method,
        path,
        "http",
    )
    .await
}

fn denied(state: &AppState, context: &RequestContext) -> Response {
    tracing::warn!(
        request_id = %context.request_id,
        path = %context.path,
        user = %context.user_label(),
        policy = %context.policy_name,
        "Access denied by policy"
    );
    access_denied_page(state.pages.access_denied.as_deref())
}

/// Forward one HTTP request to the route's backend and transform the
/// response on the way back.
async fn proxy_request(
    state: &AppState,
    route: &Route,
    context: &RequestContext,
    request: Request<Body>,
) -> Response {
    let Some(target) = route.rule.target.as_deref() else {
        return upstream_error_page(state.pages.upstream_error.as_deref());
    };

    let (parts, body) = request.into_parts();
    let subpath = normalized_proxied_path(parts.uri.path(), route.prefix());

    // Canned returns answer locally, after the gate, before the backend.
    if let Some(response) = canned_return(route, &parts.headers, &subpath) {
        return response;
    }

    let mut headers = parts.headers.clone();
    apply_header_rules(&mut headers, &route.rule.header_rules);

    let url = build_target_url(target, &subpath, parts.uri.query());

    // Tool-protocol routes buffer the request body so a failed forward can
    // still recover the JSON-RPC id for the soft error envelope.
    let (buffered_body, outgoing) = if route.rule.soft_error == SoftErrorMode::Mcp {
        let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
            Ok(bytes) => bytes,
            Err(_) => bytes::Bytes::new(),
        };
        (Some(bytes.clone()), Body::from(bytes))
    } else {
        (None, body)
    };

    // Tool-protocol calls get an audit trail: start, end, error.
    let mcp_post = route.rule.soft_error == SoftErrorMode::Mcp && parts.method == Method::POST;
    if mcp_post {
        log_mcp_start(
            &context.request_id,
            parts.uri.path(),
            &route.rule.name,
            &url,
            buffered_body.as_deref().unwrap_or_default(),
        );
    }

    let upstream = forward_request(&state.client, parts.method.clone(), &url, &headers, outgoing).await;

    let response = match upstream {
        Ok(response) => {
            if mcp_post {
                log_mcp_end(
                    &context.request_id,
                    parts.uri.path(),
                    &route.rule.name,
                    &url,
                    response.status().as_u16(),
                );
            }
            response
        }
        Err(error) => {
            tracing::error!(
                request_id = %context.request_id,
                route = %route.rule.name,
                url = %url,
                error = %error,
                "Upstream request failed"
            );
            if mcp_post {
                log_mcp_error(
                    &context.request_id,
                    parts.uri.path(),
                    &route.rule.name,
                    &url,
                    &error.to_string(),
                );
            }
            return match route.rule.soft_error {
                SoftErrorMode::Mcp => mcp_soft_error(
                    &parts.method,
                    buffered_body.as_deref().unwrap_or_default(),
                ),
                SoftErrorMode::Html => {
                    upstream_error_page(state.pages.upstream_error.as_deref())
                }
            };
        }
    };

    transform_response(route, response).await
}

fn log_mcp_start(request_id: &str, path: &str, route: &str, target: &str, payload: &[u8]) {
    tracing::info!(
        event = "MCP_POST_START",
        request_id = %request_id,
        path = %path,
        route = %route,
        target = %target,
        payload = %String::from_utf8_lossy(payload),
        "Tool call forwarded"
    );
}

fn log_mcp_end(request_id: &str, path: &str, route: &str, target: &str, status: u16) {
    tracing::info!(
        event = "MCP_POST_END",
        request_id = %request_id,
        path = %path,
        route = %route,
        target = %target,
        status = status,
        "Tool call completed"
    );
}

fn log_mcp_error(request_id: &str, path: &str, route: &str, target: &str, error: &str) {
    tracing::warn!(
        event = "MCP_POST_ERROR",
        request_id = %request_id,
        path = %path,
        route = %route,
        target = %target,
        error = %error,
        "Tool call failed"
    );
}

/// First matching canned return for this request, if any.
fn canned_return(route: &Route, headers: &HeaderMap, subpath: &str) -> Option<Response> {
    for ret in &route.rule.conditional_returns {
        let value = headers
            .get(ret.header_name.as_str())
            .and_then(|v| v.to_str().ok());
        if matches!(value, Some(v) if v.contains(ret.includes.as_str())) {
            return Some(canned_body(&ret.body, &ret.content_type));
        }
    }
    for ret in &route.rule.subpath_returns {
        if subpath.starts_with(ret.path.as_str()) {
            return Some(canned_body(&ret.body, &ret.content_type));
        }
    }
    None
}

fn canned_body(body: &str, content_type: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Apply Location rewriting, base-tag injection and CSP patching. Event
/// streams and non-HTML bodies relay without buffering.
async fn transform_response(
    route: &Route,
    upstream: hyper::Response<hyper::body::Incoming>,
) -> Response {
    let (mut parts, body) = upstream.into_parts();

    if parts.status.is_redirection() {
        if let Some(location) = parts
            .headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            let rewritten = rewrite_location(location, route.prefix());
            if let Ok(value) = HeaderValue::from_str(&rewritten) {
                parts.headers.insert(header::LOCATION, value);
            }
        }
    }

    let rewrite = route.rule.rewrite_base && is_html(&parts.headers);
    if !rewrite || is_event_stream(&parts.headers) {
        return Response::from_parts(parts, Body::new(body)).into_response();
    }

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            tracing::error!(route = %route.rule.name, error = %error, "Upstream body read failed");
            return upstream_error_page(None);
        }
    };

    let html = String::from_utf8_lossy(&bytes);
    let rewritten = rewrite_html_base(&html, route.prefix());

    if let Some(csp) = parts
        .headers
        .get(header::CONTENT_SECURITY_POLICY)
        .and_then(|v| v.to_str().ok())
    {
        let patched = patch_csp(csp, route.prefix());
        if let Ok(value) = HeaderValue::from_str(&patched) {
            parts.headers.insert(header::CONTENT_SECURITY_POLICY, value);
        }
    }

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::TRANSFER_ENCODING);
    Response::from_parts(parts, Body::from(rewritten)).into_response()
}

/// Static file routes serve one configured file, policy gated like proxies.
async fn serve_static(route: &Route) -> Response {
    let Some(file) = route.rule.file.as_deref() else {
        return (StatusCode::NOT_FOUND, "File not configured").into_response();
    };
    match tokio::fs::read(file).await {
        Ok(contents) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_for(file))
            .body(Body::from(contents))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(error) => {
            tracing::warn!(route = %route.rule.name, file = %file, error = %error, "Static file unreadable");
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
    }
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// The splash page lists every visible route as a button. It renders for
/// everyone; per-route policy decides which entries appear, and routes
/// marked hide-if-no-access vanish instead of rendering disabled.
async fn serve_splash(state: &AppState, headers: &HeaderMap) -> Response {
    let template = state
        .pages
        .services
        .as_deref()
        .unwrap_or(DEFAULT_SERVICES_PAGE);

    let common_name = crate::context::extract_common_name(headers, &state.identity_header);
    let mut buttons = String::new();

    for route in state.table.routes() {
        if route.rule.kind == RouteKind::Splash {
            continue;
        }
        let connector = state.table.connector_for(route.prefix());
        let user = state
            .registry
            .lookup(connector, &common_name, route.prefix())
            .await;
        let attrs = user
            .as_ref()
            .and_then(|u| u.auth_attributes.as_deref())
            .unwrap_or("");
        let policy = state.table.policy_for(route.prefix());
        let allowed = state.registry.evaluate(policy, attrs, route.prefix());

        if !allowed && route.rule.hide_if_no_access {
            continue;
        }
        let params = route.rule.params.as_deref().unwrap_or("");
        if allowed {
            buttons.push_str(&format!(
                "<a class=\"service\" href=\"{}{}\">{}</a>\n",
                route.prefix(),
                params,
                route.rule.name,
            ));
        } else {
            buttons.push_str(&format!(
                "<span class=\"service disabled\">{}</span>\n",
                route.rule.name,
            ));
        }
    }

    let body = template.replace(SERVICES_SLOT, &buttons);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}
