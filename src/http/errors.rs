//! Fixed error pages and protocol-aware soft errors.
//!
//! # Responsibilities
//! - Serve the 502 page when a backend is unreachable
//! - Serve the 403 page on policy denial
//! - Produce the tool-protocol soft error for routes that speak JSON-RPC
//!
//! # Design Decisions
//! - Pages are compiled-in defaults, overridable through `[pages]` config
//! - The JSON-RPC envelope echoes the request id when it can be recovered
//!   from the buffered body, so clients correlate the failure and retry

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};

/// JSON-RPC error code for a temporarily unavailable backend.
pub const MCP_UPSTREAM_UNAVAILABLE: i64 = -32001;

pub const DEFAULT_UPSTREAM_ERROR_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Service Unavailable</title></head>\n<body>\n<h1>502 Bad Gateway</h1>\n<p>The backing service is not reachable right now. Please try again later.</p>\n</body>\n</html>\n";

pub const DEFAULT_ACCESS_DENIED_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Access Denied</title></head>\n<body>\n<h1>403 Forbidden</h1>\n<p>Your certificate does not grant access to this service.</p>\n</body>\n</html>\n";

pub const DEFAULT_SERVICES_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Services</title></head>\n<body>\n<h1>Available services</h1>\n<!--SERVICES_BUTTONS-->\n</body>\n</html>\n";

/// Marker in the splash template replaced by the service inventory.
pub const SERVICES_SLOT: &str = "<!--SERVICES_BUTTONS-->";

fn html_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Fixed 502 page for an unreachable backend.
pub fn upstream_error_page(override_body: Option<&str>) -> Response {
    html_response(
        StatusCode::BAD_GATEWAY,
        override_body.unwrap_or(DEFAULT_UPSTREAM_ERROR_PAGE).to_string(),
    )
}

/// Fixed 403 page for a policy denial.
pub fn access_denied_page(override_body: Option<&str>) -> Response {
    html_response(
        StatusCode::FORBIDDEN,
        override_body.unwrap_or(DEFAULT_ACCESS_DENIED_PAGE).to_string(),
    )
}

/// Soft error for JSON-RPC tool routes whose backend is down.
///
/// POST bodies are JSON-RPC calls: answer 503 with an error envelope that
/// carries the caller's id so the client treats the failure as retryable.
/// GETs (stream/session polling) get a plain-text 503; any other method a
/// generic JSON error body.
pub fn mcp_soft_error(method: &axum::http::Method, request_body: &[u8]) -> Response {
    use axum::http::Method;

    match *method {
        Method::POST => {
            let id = serde_json::from_slice::<Value>(request_body)
                .ok()
                .and_then(|v| v.get("id").cloned())
                .unwrap_or(Value::Null);

            let envelope = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": MCP_UPSTREAM_UNAVAILABLE,
                    "message": "Upstream tool server is unavailable, retry later",
                    "data": { "retryable": true },
                },
            });

            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(envelope.to_string()))
                .unwrap_or_else(|_| Response::new(Body::empty()))
        }
        Method::GET => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from("Upstream tool server is unavailable"))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        _ => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"error": "upstream tool server unavailable"}).to_string(),
            ))
            .unwrap_or_else(|_| Response::new(Body::empty())),
    }
}
